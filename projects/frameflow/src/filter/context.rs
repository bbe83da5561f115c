use super::drain::{DrainReport, StreamState};
use super::VideoFilter;
use crate::engine::Engine;
use crate::error::{ErrorKind, FilterError, Result};
use crate::frame::FramePool;
use crate::pipeline::{Flow, FrameSink, FrameSource, LinkProps, OutputLink};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub state: StreamState,
    pub frames_in: u64,
    pub frames_out: u64,
    pub submission_failures: u64,
    pub eof_sent: bool,
    pub drain_polls: u32,
}

/// Host-side wrapper around one stage: negotiates the links and drives the
/// stream state machine from `request_frame`.
pub struct FilterContext {
    filter: Box<dyn VideoFilter>,
    outlink: OutputLink,
    state: StreamState,
    frames_in: u64,
    submission_failures: u64,
    drain: Option<DrainReport>,
    /// Message of the error that failed the drain, repeated on later pulls.
    drain_failure: Option<String>,
}

impl FilterContext {
    pub fn new(filter: Box<dyn VideoFilter>, sink: Box<dyn FrameSink>, pool: FramePool) -> Self {
        Self {
            filter,
            outlink: OutputLink::new(sink, pool),
            state: StreamState::Streaming,
            frames_in: 0,
            submission_failures: 0,
            drain: None,
            drain_failure: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.filter.name()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn frames_in(&self) -> u64 {
        self.frames_in
    }

    pub fn filter(&self) -> &dyn VideoFilter {
        self.filter.as_ref()
    }

    /// Negotiates the input link and configures the stage for a new stream.
    /// Calling it again retires the current processor first.
    pub fn configure(&mut self, engine: &dyn Engine, inlink: &LinkProps) -> Result<LinkProps> {
        let expected = self.filter.pixel_format();
        if inlink.format != expected {
            return Err(FilterError::FormatMismatch {
                expected,
                actual: inlink.format,
            });
        }
        let props = self.filter.config_props(engine, inlink)?;
        tracing::info!(
            "{}: configured {}x{} {} -> {}x{} at {} fps",
            self.filter.name(),
            inlink.width,
            inlink.height,
            inlink.format,
            props.width,
            props.height,
            props.frame_rate
        );
        self.outlink.set_props(props.clone());
        self.state = StreamState::Streaming;
        self.drain = None;
        self.drain_failure = None;
        Ok(props)
    }

    /// Pulls one frame from `source` through the stage.
    ///
    /// When upstream is exhausted the stage drains and end of stream is
    /// propagated downstream once; every later call returns `Flow::Eof`
    /// without touching the processor. After a failed drain every later call
    /// reports that failure again.
    pub fn request_frame(&mut self, source: &mut dyn FrameSource) -> Result<Flow> {
        match self.state {
            StreamState::Closed => return Ok(Flow::Eof),
            StreamState::Failed => {
                let message = self.drain_failure.clone().unwrap_or_default();
                return Err(FilterError::StreamFailed(message));
            }
            StreamState::Streaming | StreamState::Draining => {}
        }

        match source.request_frame()? {
            Some(frame) => {
                self.frames_in += 1;
                if let Err(e) = self.filter.filter_frame(frame, &mut self.outlink) {
                    if e.kind() == ErrorKind::Submission {
                        self.submission_failures += 1;
                    }
                    return Err(e);
                }
                Ok(Flow::Continue)
            }
            None => {
                self.state = StreamState::Draining;
                tracing::debug!("{}: upstream ended, draining", self.filter.name());
                match self.filter.drain(&mut self.outlink) {
                    Ok(report) => {
                        self.state = StreamState::Closed;
                        self.drain = Some(report);
                        self.outlink.end_of_stream()?;
                        tracing::info!(
                            "{}: end of stream after {} frames in, {} out",
                            self.filter.name(),
                            self.frames_in,
                            self.outlink.frames_pushed()
                        );
                        Ok(Flow::Eof)
                    }
                    Err(e) => {
                        let e = e.into_drain();
                        self.state = StreamState::Failed;
                        self.drain_failure = Some(e.to_string());
                        tracing::error!("{}: {}", self.filter.name(), e);
                        Err(e)
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            state: self.state,
            frames_in: self.frames_in,
            frames_out: self.outlink.frames_pushed(),
            submission_failures: self.submission_failures,
            eof_sent: self.outlink.eof_sent(),
            drain_polls: self.drain.map(|d| d.polls).unwrap_or(0),
        }
    }

    pub fn uninit(&mut self) {
        self.filter.uninit();
    }
}

impl Drop for FilterContext {
    fn drop(&mut self) {
        self.uninit();
    }
}
