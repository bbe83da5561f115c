// Frame-flow protocol shared by every inference-backed stage
//
// A stage submits each incoming frame to its processor, then decides what goes
// downstream: the input itself (estimators) or whatever the processor has
// ready (synthesizers). The free functions below are the building blocks; the
// stage modules only choose how to combine them.

pub mod context;
pub mod cpe;
pub mod drain;
pub mod fi;
pub mod pe;
pub mod retiming;
pub mod stb;
pub mod up;

use crate::config::StreamConfig;
use crate::engine::verify::verify_and_create;
use crate::engine::{Engine, OutputTarget, ProcessorHandle};
use crate::error::{FilterError, Result};
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{LinkProps, OutputLink};
use drain::{DrainPolicy, DrainReport};

pub use context::FilterContext;

pub trait VideoFilter {
    fn name(&self) -> &'static str;

    /// The single input format the stage negotiates.
    fn pixel_format(&self) -> PixelFormat;

    /// Creates the processor for a new stream and returns the output link.
    fn config_props(&mut self, engine: &dyn Engine, inlink: &LinkProps) -> Result<LinkProps>;

    fn filter_frame(&mut self, frame: Frame, out: &mut OutputLink) -> Result<()>;

    /// Flushes buffered work after upstream ended. The processor is destroyed
    /// whether or not draining succeeds.
    fn drain(&mut self, out: &mut OutputLink) -> Result<DrainReport>;

    /// Teardown; must be safe to call in any state.
    fn uninit(&mut self);

    fn stream_config(&self) -> Option<&StreamConfig>;
}

/// Submits `frame`. On failure the frame is released here and only this call
/// fails; on success ownership comes back to the caller.
pub fn submit(handle: Option<&mut ProcessorHandle>, frame: Frame) -> Result<Frame> {
    let Some(handle) = handle else {
        return Err(FilterError::NotConfigured);
    };
    match handle.process(&frame) {
        Ok(()) => Ok(frame),
        Err(source) => {
            let pts = frame.pts;
            drop(frame);
            tracing::error!("{}: processing failed for pts {}: {}", handle.model(), pts, source);
            Err(FilterError::Submission { pts, source })
        }
    }
}

/// Pulls every ready output into buffers from `out`, stamps it with the
/// properties of `reference` and the engine's pts, and pushes it downstream.
///
/// Outputs with a negative pts are dropped without error. Returns how many
/// frames were pushed.
pub fn add_output(
    handle: &mut ProcessorHandle,
    out: &mut OutputLink,
    reference: &Frame,
) -> Result<usize> {
    let count = handle.output_count();
    let mut pushed = 0;
    for index in 0..count {
        let mut frame = out.get_video_buffer()?;
        let line_size = frame.line_size;
        let pts = handle
            .output_frame(OutputTarget::Buffer {
                data: &mut frame.data,
                line_size,
            })
            .map_err(|source| {
                tracing::error!(
                    "{}: output {} of {} failed (reference pts {}): {}",
                    handle.model(),
                    index,
                    count,
                    reference.pts,
                    source
                );
                FilterError::Output {
                    index,
                    count,
                    source,
                }
            })?;
        frame.copy_props_from(reference);
        frame.pts = pts;
        if pts < 0 {
            tracing::warn!(
                "{}: ignoring suppressed output (reference pts {})",
                handle.model(),
                reference.pts
            );
            continue;
        }
        out.push_frame(frame)?;
        pushed += 1;
        tracing::debug!("{}: emitted pts {} (reference pts {})", handle.model(), pts, reference.pts);
    }
    Ok(pushed)
}

/// Pulls and discards every ready output.
pub fn ignore_output(handle: &mut ProcessorHandle) -> usize {
    let count = handle.output_count();
    for index in 0..count {
        match handle.output_frame(OutputTarget::Discard) {
            Ok(pts) => tracing::trace!("{}: ignored output {} (pts {})", handle.model(), index, pts),
            Err(e) => tracing::warn!("{}: could not discard output {}: {}", handle.model(), index, e),
        }
    }
    count
}

/// Drain variant for synthesizing stages: keeps emitting outputs anchored on
/// the last submitted frame until the processor is empty.
pub fn postflight(
    handle: &mut ProcessorHandle,
    out: &mut OutputLink,
    previous: Option<&Frame>,
    policy: &DrainPolicy,
) -> Result<DrainReport> {
    match previous {
        Some(reference) => drain::drain(handle, policy, |h| add_output(h, out, reference).map(|_| ())),
        None => drain_ignoring(handle, policy),
    }
}

pub fn drain_ignoring(handle: &mut ProcessorHandle, policy: &DrainPolicy) -> Result<DrainReport> {
    drain::drain(handle, policy, |h| {
        ignore_output(h);
        Ok(())
    })
}

/// Ends, discard-drains and destroys a handle that will not be used again.
pub fn retire(mut handle: ProcessorHandle, policy: &DrainPolicy) {
    if let Err(e) = drain_ignoring(&mut handle, policy) {
        tracing::warn!("{}: retiring without a clean drain: {}", handle.model(), e);
    }
    handle.destroy();
}

/// Owns the processor handle and stream configuration of one stage.
pub struct Session {
    handle: Option<ProcessorHandle>,
    config: Option<StreamConfig>,
    policy: DrainPolicy,
}

impl Session {
    pub fn new(policy: DrainPolicy) -> Self {
        Self {
            handle: None,
            config: None,
            policy,
        }
    }

    pub fn set_policy(&mut self, policy: DrainPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> &DrainPolicy {
        &self.policy
    }

    /// Verifies `config`, retires any previous handle, then creates a new one.
    pub fn open(
        &mut self,
        engine: &dyn Engine,
        config: StreamConfig,
        inlink: &LinkProps,
    ) -> Result<LinkProps> {
        self.close();
        self.config = None;
        let (handle, outlink) = verify_and_create(engine, &config, inlink)?;
        self.handle = Some(handle);
        self.config = Some(config);
        Ok(outlink)
    }

    pub fn handle_mut(&mut self) -> Option<&mut ProcessorHandle> {
        self.handle.as_mut()
    }

    pub fn config(&self) -> Option<&StreamConfig> {
        self.config.as_ref()
    }

    /// Drains with `step` and destroys the handle afterwards, even on failure.
    pub fn drain_with<F>(&mut self, step: F) -> Result<DrainReport>
    where
        F: FnMut(&mut ProcessorHandle) -> Result<()>,
    {
        let mut handle = self.handle.take().ok_or(FilterError::NotConfigured)?;
        let result = drain::drain(&mut handle, &self.policy, step);
        handle.destroy();
        result
    }

    pub fn postflight(&mut self, out: &mut OutputLink, previous: Option<&Frame>) -> Result<DrainReport> {
        let mut handle = self.handle.take().ok_or(FilterError::NotConfigured)?;
        let result = postflight(&mut handle, out, previous, &self.policy);
        handle.destroy();
        result
    }

    /// Releases the handle if one is still open.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("{}: retiring processor", handle.model());
            retire(handle, &self.policy);
        }
    }
}

/// Single-slot reference to the last submitted frame.
#[derive(Debug, Default)]
pub struct PreviousFrame(Option<Frame>);

impl PreviousFrame {
    /// Drops the held frame, then keeps `frame`.
    pub fn replace(&mut self, frame: Frame) -> &Frame {
        drop(self.0.take());
        self.0.insert(frame)
    }

    pub fn get(&self) -> Option<&Frame> {
        self.0.as_ref()
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

/// Filter-frame step of every synthesizing stage: submit, keep the frame as
/// the new reference, emit whatever is ready.
pub fn synthesize(
    session: &mut Session,
    previous: &mut PreviousFrame,
    frame: Frame,
    out: &mut OutputLink,
) -> Result<usize> {
    let frame = submit(session.handle_mut(), frame)?;
    let reference = previous.replace(frame);
    let handle = session.handle_mut().ok_or(FilterError::NotConfigured)?;
    add_output(handle, out, reference)
}

/// Drain step of every synthesizing stage. The reference frame is released
/// once the processor is gone.
pub fn finish_synthesis(
    session: &mut Session,
    previous: &mut PreviousFrame,
    out: &mut OutputLink,
) -> Result<DrainReport> {
    let result = session.postflight(out, previous.get());
    previous.clear();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CpeOptions;
    use crate::engine::mock::{Script, ScriptedEngine};
    use crate::engine::EngineError;
    use crate::frame::{FramePool, Rational};
    use crate::pipeline::sink::{CollectSink, Collected};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn props() -> LinkProps {
        LinkProps {
            width: 2,
            height: 2,
            format: PixelFormat::Rgb48,
            time_base: Rational::new(1, 30),
            frame_rate: Rational::new(30, 1),
            sample_aspect_ratio: Rational::new(1, 1),
        }
    }

    fn link(pool: &FramePool) -> (OutputLink, Arc<Mutex<Collected>>) {
        let (sink, collected) = CollectSink::new();
        let mut out = OutputLink::new(Box::new(sink), pool.clone());
        out.set_props(props());
        (out, collected)
    }

    fn frame(pool: &FramePool, pts: i64) -> Frame {
        let mut frame = pool.alloc(2, 2, PixelFormat::Rgb48);
        frame.pts = pts;
        frame.data.fill(pts as u16 + 1);
        frame
    }

    #[test]
    fn test_submit_failure_releases_frame() {
        let script = Script::shared();
        script.lock().unwrap().fail_pts = vec![1];
        let mut handle = ProcessorHandle::new(Script::processor(&script), "mock");
        let pool = FramePool::new();

        let kept = submit(Some(&mut handle), frame(&pool, 0)).unwrap();
        assert_eq!(pool.live(), 1);
        let err = submit(Some(&mut handle), frame(&pool, 1)).unwrap_err();
        assert!(matches!(err, FilterError::Submission { pts: 1, .. }));
        assert_eq!(pool.live(), 1);
        drop(kept);

        // the handle keeps accepting frames after a failure
        assert!(submit(Some(&mut handle), frame(&pool, 2)).is_ok());
        assert!(matches!(
            submit(None, frame(&pool, 3)),
            Err(FilterError::NotConfigured)
        ));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_add_output_skips_negative_pts() {
        let script = Script::shared();
        {
            let mut s = script.lock().unwrap();
            s.outputs_per_input = 2;
            s.suppress_pts = vec![1];
        }
        let mut handle = ProcessorHandle::new(Script::processor(&script), "mock");
        let pool = FramePool::new();
        let (mut out, collected) = link(&pool);

        let mut reference = frame(&pool, 0);
        reference.sample_aspect_ratio = Rational::new(4, 3);
        handle.process(&reference).unwrap();
        handle.process(&frame(&pool, 1)).unwrap();
        handle.process(&frame(&pool, 2)).unwrap();

        let pushed = add_output(&mut handle, &mut out, &reference).unwrap();
        assert_eq!(pushed, 4);
        let collected = collected.lock().unwrap();
        let pts: Vec<i64> = collected.frames.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![0, 1, 4, 5]);
        assert!(collected
            .frames
            .iter()
            .all(|f| f.sample_aspect_ratio == Rational::new(4, 3)));
        assert_eq!(collected.frames[2].data[0], 3);
        // the two suppressed buffers were released
        assert_eq!(pool.live(), 5);
    }

    #[test]
    fn test_output_failure_is_reported() {
        let script = Script::shared();
        let mut handle = ProcessorHandle::new(Script::processor(&script), "mock");
        let pool = FramePool::new();
        let (mut out, _) = link(&pool);
        let reference = frame(&pool, 0);
        handle.process(&reference).unwrap();
        script.lock().unwrap().fail_output = true;

        let err = add_output(&mut handle, &mut out, &reference).unwrap_err();
        assert!(matches!(err, FilterError::Output { index: 0, count: 1, .. }));
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn test_previous_frame_holds_one() {
        let pool = FramePool::new();
        let mut previous = PreviousFrame::default();
        for pts in 0..4 {
            previous.replace(frame(&pool, pts));
            assert_eq!(pool.live(), 1);
        }
        assert_eq!(previous.get().map(|f| f.pts), Some(3));
        previous.clear();
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_failed_create_leaves_session_empty() {
        let engine = ScriptedEngine::new();
        let config = CpeOptions::default().stream_config();
        let inlink = props();
        let mut session = Session::new(
            DrainPolicy::estimation()
                .with_interval(Duration::from_millis(1))
                .with_max_stalled_polls(3),
        );
        session.open(&engine, config.clone(), &inlink).unwrap();
        assert!(session.handle_mut().is_some());

        engine.script.lock().unwrap().fail_create =
            Some(EngineError::InvalidParameters("no memory".to_string()));
        let err = session.open(&engine, config, &inlink).unwrap_err();
        assert!(matches!(err, FilterError::Create(EngineError::InvalidParameters(_))));
        assert!(session.handle_mut().is_none());
        assert!(session.config().is_none());

        let script = engine.script.lock().unwrap();
        assert_eq!(script.created, 1);
        // the first handle was retired before the failed attempt
        assert_eq!(script.destroyed, 1);
    }

    #[test]
    fn test_retire_destroys_after_bounded_drain() {
        let script = Script::shared();
        {
            let mut s = script.lock().unwrap();
            s.lag = 1;
            s.stall = true;
        }
        let mut handle = ProcessorHandle::new(Script::processor(&script), "mock");
        handle.process(&frame(&FramePool::new(), 0)).unwrap();
        let policy = DrainPolicy::estimation()
            .with_interval(Duration::from_millis(1))
            .with_max_stalled_polls(3);
        retire(handle, &policy);
        let s = script.lock().unwrap();
        assert_eq!(s.end_stream_calls, 1);
        assert_eq!(s.destroyed, 1);
    }
}
