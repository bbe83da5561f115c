use super::{EngineError, InputBuffer, OutputTarget, Processor};
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Streaming,
    Draining,
    Closed,
}

/// Owned session around one processor, bound to a single stream.
///
/// Dropping the handle releases the processor; `destroy` does the same but
/// reports outputs that were never pulled.
pub struct ProcessorHandle {
    processor: Box<dyn Processor>,
    model: String,
    state: HandleState,
    submitted: u64,
    emitted: u64,
}

impl ProcessorHandle {
    pub fn new(processor: Box<dyn Processor>, model: impl Into<String>) -> Self {
        Self {
            processor,
            model: model.into(),
            state: HandleState::Streaming,
            submitted: 0,
            emitted: 0,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn process(&mut self, frame: &Frame) -> Result<(), EngineError> {
        if self.state != HandleState::Streaming {
            return Err(EngineError::StreamEnded);
        }
        self.processor.process(InputBuffer::from_frame(frame))?;
        self.submitted += 1;
        Ok(())
    }

    pub fn output_count(&mut self) -> usize {
        self.processor.output_count()
    }

    pub fn output_frame(&mut self, target: OutputTarget<'_>) -> Result<i64, EngineError> {
        let pts = self.processor.output_frame(target)?;
        self.emitted += 1;
        Ok(pts)
    }

    /// Ends the processor stream. Calling it again is a no-op.
    pub fn end_stream(&mut self) {
        if self.state == HandleState::Streaming {
            tracing::debug!(
                "{}: ending stream after {} submissions",
                self.model,
                self.submitted
            );
            self.processor.end_stream();
            self.state = HandleState::Draining;
        }
    }

    pub fn remaining(&mut self) -> usize {
        self.processor.remaining_frames()
    }

    pub fn close(&mut self) {
        self.end_stream();
        self.state = HandleState::Closed;
    }

    pub fn output_size(&mut self) -> Option<(u32, u32)> {
        self.processor.output_size()
    }

    pub fn destroy(mut self) {
        let left = self.remaining();
        if left > 0 {
            tracing::warn!(
                "{}: destroying processor with {} outputs still pending",
                self.model,
                left
            );
        }
        tracing::debug!(
            "{}: destroyed ({} submitted, {} emitted)",
            self.model,
            self.submitted,
            self.emitted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::Script;
    use crate::frame::{FramePool, PixelFormat};

    #[test]
    fn test_end_stream_is_idempotent() {
        let script = Script::shared();
        let mut handle = ProcessorHandle::new(Script::processor(&script), "mock");
        handle.end_stream();
        handle.end_stream();
        assert_eq!(handle.state(), HandleState::Draining);
        assert_eq!(script.lock().unwrap().end_stream_calls, 1);
    }

    #[test]
    fn test_process_after_end_is_rejected() {
        let script = Script::shared();
        let mut handle = ProcessorHandle::new(Script::processor(&script), "mock");
        let frame = FramePool::new().alloc(2, 2, PixelFormat::Rgb48);
        assert!(handle.process(&frame).is_ok());
        handle.close();
        assert_eq!(handle.process(&frame), Err(EngineError::StreamEnded));
        assert_eq!(handle.submitted(), 1);
        handle.destroy();
        assert_eq!(script.lock().unwrap().destroyed, 1);
    }
}
