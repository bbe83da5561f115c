pub mod handle;
#[cfg(test)]
pub mod mock;
pub mod sim;
pub mod verify;

use crate::frame::{Frame, PixelFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use handle::ProcessorHandle;

/// Kind of work a model performs; each stage asks for exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    FrameInterpolation,
    ParameterEstimation,
    CamPoseEstimation,
    Upscaling,
    Stabilization,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrameInterpolation => "frame-interpolation",
            Self::ParameterEstimation => "parameter-estimation",
            Self::CamPoseEstimation => "cam-pose-estimation",
            Self::Upscaling => "upscaling",
            Self::Stabilization => "stabilization",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub index: i32,
    pub name: String,
}

/// One entry of the engine's model catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub model_type: ModelType,
    pub scales: Vec<u32>,
    /// Available without downloading.
    pub local: bool,
}

/// Everything the engine needs to create a processor for one stream.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorInfo {
    pub processor_name: String,
    pub processor_index: i32,
    pub model_name: String,
    pub model_type: ModelType,
    pub scale: u32,
    pub device: i32,
    pub extra_threads: u32,
    pub vram_fraction: f64,
    pub can_download_model: bool,
    pub input_width: u32,
    pub input_height: u32,
    pub input_format: PixelFormat,
    pub timebase: f64,
    pub framerate: f64,
    pub frame_count: u64,
    pub model_parameters: Vec<f32>,
    pub options: Vec<String>,
}

/// Borrowed view of a frame's pixels handed to `Processor::process`.
#[derive(Debug, Clone, Copy)]
pub struct InputBuffer<'a> {
    pub data: &'a [u16],
    pub width: u32,
    pub height: u32,
    pub line_size: usize,
    pub format: PixelFormat,
    pub pts: i64,
}

impl<'a> InputBuffer<'a> {
    pub fn from_frame(frame: &'a Frame) -> Self {
        Self {
            data: &frame.data,
            width: frame.width,
            height: frame.height,
            line_size: frame.line_size,
            format: frame.format,
            pts: frame.pts,
        }
    }
}

/// Where a pulled output goes. `Discard` consumes it without copying pixels.
pub enum OutputTarget<'a> {
    Buffer { data: &'a mut [u16], line_size: usize },
    Discard,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("unknown {model_type} model '{model}'")]
    UnknownModel { model: String, model_type: ModelType },
    #[error("invalid device {index}, {available} GPUs available")]
    InvalidDevice { index: i32, available: usize },
    #[error("scale {scale} not supported by model '{model}' (allowed: {allowed:?})")]
    InvalidScale {
        model: String,
        scale: u32,
        allowed: Vec<u32>,
    },
    #[error("model '{0}' is not available locally and downloading is disabled")]
    DownloadDenied(String),
    #[error("invalid model parameters: {0}")]
    InvalidParameters(String),
    #[error("frame rejected: {0}")]
    Rejected(String),
    #[error("stream has already ended")]
    StreamEnded,
    #[error("no output is ready")]
    NoOutput,
    #[error("output carries no pixel data")]
    NoPixels,
    #[error("output buffer holds {actual} samples, {needed} needed")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("processor worker has stopped")]
    WorkerGone,
}

/// Catalog and factory side of an inference engine.
pub trait Engine {
    fn devices(&self) -> Vec<DeviceInfo>;

    fn models(&self, model_type: ModelType) -> Vec<ModelDescriptor>;

    /// Mirrors the host's log level into the engine.
    fn set_logging(&self, _verbose: bool) {}

    fn processor_name(&self, model: &str, index: i32) -> String {
        format!("{}-{}", model, index)
    }

    fn create(&self, info: &ProcessorInfo) -> Result<Box<dyn Processor>, EngineError>;
}

/// One running inference session. Calls are synchronous; the work behind them
/// may not be.
pub trait Processor: Send {
    /// Submits one frame. The buffer is only borrowed for the call.
    fn process(&mut self, input: InputBuffer<'_>) -> Result<(), EngineError>;

    /// Outputs ready to be pulled right now.
    fn output_count(&mut self) -> usize;

    /// Pulls the next ready output into `target` and returns its pts.
    fn output_frame(&mut self, target: OutputTarget<'_>) -> Result<i64, EngineError>;

    /// No more submissions follow; buffered work keeps flowing.
    fn end_stream(&mut self);

    /// Outputs not pulled yet, including work still in flight.
    fn remaining_frames(&mut self) -> usize;

    /// Output size chosen by the processor, when it differs from the link.
    fn output_size(&mut self) -> Option<(u32, u32)> {
        None
    }
}
