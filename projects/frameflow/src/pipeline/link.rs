use crate::error::{FilterError, Result};
use crate::frame::{Frame, FramePool, PixelFormat, Rational};
use serde::Serialize;

/// Negotiated properties of one link between two pipeline nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkProps {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub time_base: Rational,
    pub frame_rate: Rational,
    pub sample_aspect_ratio: Rational,
}

/// Result of one `request_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// End of stream; returned again on every later call.
    Eof,
}

/// Upstream side of a stage: hands out decoded frames until it runs dry.
pub trait FrameSource {
    fn props(&self) -> LinkProps;

    /// `Ok(None)` marks end of stream.
    fn request_frame(&mut self) -> Result<Option<Frame>>;
}

/// Downstream side of a stage.
pub trait FrameSink {
    fn filter_frame(&mut self, frame: Frame) -> anyhow::Result<()>;

    fn end_of_stream(&mut self) -> anyhow::Result<()>;
}

/// Output pad of a stage. Owns the downstream sink and the pool output
/// buffers are allocated from.
pub struct OutputLink {
    props: Option<LinkProps>,
    sink: Box<dyn FrameSink>,
    pool: FramePool,
    pushed: u64,
    eof_sent: bool,
}

impl OutputLink {
    pub fn new(sink: Box<dyn FrameSink>, pool: FramePool) -> Self {
        Self {
            props: None,
            sink,
            pool,
            pushed: 0,
            eof_sent: false,
        }
    }

    pub fn set_props(&mut self, props: LinkProps) {
        self.props = Some(props);
        self.eof_sent = false;
    }

    /// Allocates a frame sized for this link.
    pub fn get_video_buffer(&self) -> Result<Frame> {
        let props = self.props.as_ref().ok_or(FilterError::NotConfigured)?;
        Ok(self.pool.alloc(props.width, props.height, props.format))
    }

    /// Hands `frame` to the sink. The frame is gone either way.
    pub fn push_frame(&mut self, frame: Frame) -> Result<()> {
        let pts = frame.pts;
        self.sink
            .filter_frame(frame)
            .map_err(|e| FilterError::Downstream {
                pts,
                reason: e.to_string(),
            })?;
        self.pushed += 1;
        Ok(())
    }

    /// Signals end of stream downstream; later calls do nothing.
    pub fn end_of_stream(&mut self) -> Result<()> {
        if self.eof_sent {
            return Ok(());
        }
        self.eof_sent = true;
        self.sink.end_of_stream().map_err(|e| FilterError::Downstream {
            pts: -1,
            reason: e.to_string(),
        })
    }

    pub fn frames_pushed(&self) -> u64 {
        self.pushed
    }

    pub fn eof_sent(&self) -> bool {
        self.eof_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sink::CollectSink;

    fn props() -> LinkProps {
        LinkProps {
            width: 6,
            height: 4,
            format: PixelFormat::Rgb48,
            time_base: Rational::new(1, 30),
            frame_rate: Rational::new(30, 1),
            sample_aspect_ratio: Rational::new(1, 1),
        }
    }

    #[test]
    fn test_end_of_stream_sent_once() {
        let (sink, collected) = CollectSink::new();
        let mut link = OutputLink::new(Box::new(sink), FramePool::new());
        link.set_props(props());
        link.end_of_stream().unwrap();
        link.end_of_stream().unwrap();
        assert_eq!(collected.lock().unwrap().eof_count, 1);
        assert!(link.eof_sent());
    }

    #[test]
    fn test_buffer_needs_props() {
        let (sink, _) = CollectSink::new();
        let pool = FramePool::new();
        let mut link = OutputLink::new(Box::new(sink), pool.clone());
        assert!(matches!(link.get_video_buffer(), Err(FilterError::NotConfigured)));
        link.set_props(props());
        let frame = link.get_video_buffer().unwrap();
        assert_eq!((frame.width, frame.height), (6, 4));
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn test_rejected_push_releases_frame() {
        let (sink, collected) = CollectSink::new();
        let sink = sink.rejecting(vec![3]);
        let pool = FramePool::new();
        let mut link = OutputLink::new(Box::new(sink), pool.clone());
        link.set_props(props());

        let mut frame = link.get_video_buffer().unwrap();
        frame.pts = 3;
        let err = link.push_frame(frame).unwrap_err();
        assert!(matches!(err, FilterError::Downstream { pts: 3, .. }));
        assert_eq!(pool.live(), 0);
        assert_eq!(link.frames_pushed(), 0);
        assert!(collected.lock().unwrap().frames.is_empty());
    }
}
