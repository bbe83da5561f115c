use super::drain::{DrainPolicy, DrainReport};
use super::{ignore_output, submit, Session, VideoFilter};
use crate::config::{PeOptions, StreamConfig};
use crate::engine::Engine;
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{LinkProps, OutputLink};

/// Parameter estimation: frames are forwarded unchanged while the engine
/// accumulates its estimate.
pub struct ParameterEstimation {
    options: PeOptions,
    session: Session,
}

impl ParameterEstimation {
    pub fn new(options: PeOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            session: Session::new(DrainPolicy::estimation()),
        })
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.session.set_policy(policy);
        self
    }
}

impl VideoFilter for ParameterEstimation {
    fn name(&self) -> &'static str {
        "pe"
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb48
    }

    fn config_props(&mut self, engine: &dyn Engine, inlink: &LinkProps) -> Result<LinkProps> {
        self.session.open(engine, self.options.stream_config(), inlink)
    }

    fn filter_frame(&mut self, frame: Frame, out: &mut OutputLink) -> Result<()> {
        let frame = submit(self.session.handle_mut(), frame)?;
        if let Some(handle) = self.session.handle_mut() {
            ignore_output(handle);
        }
        out.push_frame(frame)
    }

    fn drain(&mut self, _out: &mut OutputLink) -> Result<DrainReport> {
        self.session.drain_with(|handle| {
            ignore_output(handle);
            Ok(())
        })
    }

    fn uninit(&mut self) {
        self.session.close();
    }

    fn stream_config(&self) -> Option<&StreamConfig> {
        self.session.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::ScriptedEngine;
    use crate::filter::FilterContext;
    use crate::frame::{FramePool, Rational};
    use crate::pipeline::sink::CollectSink;
    use crate::pipeline::source::VecSource;
    use crate::pipeline::Flow;
    use std::time::Duration;

    #[test]
    fn test_failed_submission_keeps_stage_usable() {
        let engine = ScriptedEngine::new();
        engine.script.lock().unwrap().fail_pts = vec![1];
        let pool = FramePool::new();
        let inlink = LinkProps {
            width: 2,
            height: 2,
            format: PixelFormat::Rgb48,
            time_base: Rational::new(1, 30),
            frame_rate: Rational::new(30, 1),
            sample_aspect_ratio: Rational::new(1, 1),
        };
        let frames = (0..3)
            .map(|pts| {
                let mut f = pool.alloc(2, 2, PixelFormat::Rgb48);
                f.pts = pts;
                f
            })
            .collect();
        let mut source = VecSource::new(inlink.clone(), frames);

        let stage = ParameterEstimation::new(PeOptions::default())
            .unwrap()
            .with_drain_policy(DrainPolicy::estimation().with_interval(Duration::from_millis(1)));
        let (sink, collected) = CollectSink::new();
        let mut ctx = FilterContext::new(Box::new(stage), Box::new(sink), pool.clone());
        ctx.configure(&engine, &inlink).unwrap();

        assert_eq!(ctx.request_frame(&mut source).unwrap(), Flow::Continue);
        let err = ctx.request_frame(&mut source).unwrap_err();
        assert!(err.is_recoverable());
        // frames 0 and 2 are still alive: one delivered, one queued upstream
        assert_eq!(pool.live(), 2);
        assert_eq!(ctx.request_frame(&mut source).unwrap(), Flow::Continue);
        assert_eq!(ctx.request_frame(&mut source).unwrap(), Flow::Eof);

        let collected = collected.lock().unwrap();
        let pts: Vec<i64> = collected.frames.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![0, 2]);
        assert_eq!(collected.eof_count, 1);
        assert_eq!(engine.script.lock().unwrap().submitted, vec![0, 2]);
        assert_eq!(ctx.stats().submission_failures, 1);
    }
}
