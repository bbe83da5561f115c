// Per-stage options and the immutable stream configuration derived from them
//
// Option structs double as clap argument groups for the CLI and as serde
// records echoed into the run report. `validate` enforces the documented
// ranges for callers that build options without going through clap.

use crate::engine::ModelType;
use crate::error::{FilterError, Result};
use crate::filter::retiming::RetimingSchedule;
use crate::frame::Rational;
use clap::ArgAction;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(FilterError::Configuration(format!(
            "{} = {} is outside [{}, {}]",
            name, value, min, max
        )));
    }
    Ok(())
}

fn check_model_name(model: &str) -> Result<()> {
    if model.trim().is_empty() {
        return Err(FilterError::Configuration("model name is empty".to_string()));
    }
    Ok(())
}

#[derive(clap::Args, Debug, Clone, Serialize, Deserialize)]
pub struct DeviceArgs {
    /// Device index (auto: -2, CPU: -1, GPU0: 0, ...)
    #[arg(long = "device", default_value_t = -2, allow_negative_numbers = true)]
    pub index: i32,

    /// Allow the engine to download models that are not available locally
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub download: bool,
}

impl Default for DeviceArgs {
    fn default() -> Self {
        Self {
            index: -2,
            download: true,
        }
    }
}

impl DeviceArgs {
    fn validate(&self) -> Result<()> {
        check_range("device", self.index as f64, -2.0, 8.0)
    }
}

#[derive(clap::Args, Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceArgs {
    /// Number of extra model instances to use on the device
    #[arg(long, default_value_t = 0)]
    pub instances: u32,

    /// Fraction of device memory the model may use
    #[arg(long, default_value_t = 1.0)]
    pub vram: f64,
}

impl Default for PerformanceArgs {
    fn default() -> Self {
        Self {
            instances: 0,
            vram: 1.0,
        }
    }
}

impl PerformanceArgs {
    fn validate(&self) -> Result<()> {
        check_range("instances", self.instances as f64, 0.0, 3.0)?;
        check_range("vram", self.vram, 0.1, 1.0)
    }
}

/// Camera pose estimation.
#[derive(clap::Args, Debug, Clone, Serialize, Deserialize)]
pub struct CpeOptions {
    /// Model short name
    #[arg(long, default_value = "cpe-1")]
    pub model: String,

    #[command(flatten)]
    pub device: DeviceArgs,

    /// Pose output file written by the engine
    #[arg(long, default_value = "cpe.json")]
    pub filename: PathBuf,
}

impl Default for CpeOptions {
    fn default() -> Self {
        Self {
            model: "cpe-1".to_string(),
            device: DeviceArgs::default(),
            filename: PathBuf::from("cpe.json"),
        }
    }
}

impl CpeOptions {
    pub fn validate(&self) -> Result<()> {
        check_model_name(&self.model)?;
        self.device.validate()
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            model_type: ModelType::CamPoseEstimation,
            model: self.model.clone(),
            processor_index: 0,
            device: self.device.index,
            extra_instances: 0,
            vram: 1.0,
            scale: 1,
            can_download: self.device.download,
            frame_count: 0,
            params: StageParams::PoseEstimation {
                filename: self.filename.to_string_lossy().into_owned(),
                // every model after the first generation corrects rolling shutter
                rolling_shutter: self.model != "cpe-1",
            },
        }
    }
}

/// Parameter estimation.
#[derive(clap::Args, Debug, Clone, Serialize, Deserialize)]
pub struct PeOptions {
    /// Model short name
    #[arg(long, default_value = "prap-3")]
    pub model: String,

    #[command(flatten)]
    pub device: DeviceArgs,
}

impl Default for PeOptions {
    fn default() -> Self {
        Self {
            model: "prap-3".to_string(),
            device: DeviceArgs::default(),
        }
    }
}

impl PeOptions {
    pub fn validate(&self) -> Result<()> {
        check_model_name(&self.model)?;
        self.device.validate()
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            model_type: ModelType::ParameterEstimation,
            model: self.model.clone(),
            processor_index: 0,
            device: self.device.index,
            extra_instances: 0,
            vram: 1.0,
            scale: 1,
            can_download: self.device.download,
            frame_count: 0,
            params: StageParams::ParameterEstimation,
        }
    }
}

/// Frame interpolation, slow motion and frame-rate conversion.
#[derive(clap::Args, Debug, Clone, Serialize, Deserialize)]
pub struct FiOptions {
    /// Model short name
    #[arg(long, default_value = "chr-1")]
    pub model: String,

    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub performance: PerformanceArgs,

    /// Slow-motion factor applied to the input
    #[arg(long, default_value_t = 1.0)]
    pub slowmo: f64,

    /// Duplicate replacement threshold (0 or below keeps duplicates)
    #[arg(long, default_value_t = 0.01, allow_negative_numbers = true)]
    pub rdt: f64,

    /// Output frame rate; 0 keeps the input rate
    #[arg(long, default_value = "0")]
    pub fps: Rational,
}

impl Default for FiOptions {
    fn default() -> Self {
        Self {
            model: "chr-1".to_string(),
            device: DeviceArgs::default(),
            performance: PerformanceArgs::default(),
            slowmo: 1.0,
            rdt: 0.01,
            fps: Rational::ZERO,
        }
    }
}

impl FiOptions {
    pub fn validate(&self) -> Result<()> {
        check_model_name(&self.model)?;
        self.device.validate()?;
        self.performance.validate()?;
        check_range("slowmo", self.slowmo, 0.1, 16.0)?;
        check_range("rdt", self.rdt, -0.01, 0.2)?;
        if self.fps.num < 0 || self.fps.den <= 0 {
            return Err(FilterError::Configuration(format!(
                "fps = {} is not a valid frame rate",
                self.fps
            )));
        }
        Ok(())
    }

    pub fn stream_config(&self, schedule: &RetimingSchedule) -> StreamConfig {
        StreamConfig {
            model_type: ModelType::FrameInterpolation,
            model: self.model.clone(),
            processor_index: 0,
            device: self.device.index,
            extra_instances: self.performance.instances,
            vram: self.performance.vram,
            scale: 1,
            can_download: self.device.download,
            frame_count: 0,
            params: StageParams::Interpolation {
                threshold: schedule.threshold,
                fps_factor: schedule.fps_factor,
                slowmo: self.slowmo,
                rdt: self.rdt,
            },
        }
    }
}

/// Upscaling and enhancement.
#[derive(clap::Args, Debug, Clone, Serialize, Deserialize)]
pub struct UpOptions {
    /// Model short name
    #[arg(long, default_value = "amq-13")]
    pub model: String,

    /// Output scale; 0 derives it from --w/--h
    #[arg(long, default_value_t = 1)]
    pub scale: u32,

    /// Target output width used to derive the scale
    #[arg(long, default_value_t = 0)]
    pub w: u32,

    /// Target output height used to derive the scale
    #[arg(long, default_value_t = 0)]
    pub h: u32,

    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub performance: PerformanceArgs,

    /// Frames used for automatic parameter estimation, 0 disables it
    #[arg(long, default_value_t = 0)]
    pub estimate: u64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub preblur: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub noise: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub details: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub halo: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub blur: f64,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub compression: f64,

    /// Noise added to the input before processing
    #[arg(long, default_value_t = 0.0)]
    pub prenoise: f64,

    /// Grain added to the output
    #[arg(long, default_value_t = 0.0)]
    pub grain: f64,

    #[arg(long, default_value_t = 0.0)]
    pub gsize: f64,

    /// Run extra color correction when the model needs it
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub kcolor: bool,

    /// Amount of input blended into the output
    #[arg(long, default_value_t = 0.0)]
    pub blend: f64,
}

impl Default for UpOptions {
    fn default() -> Self {
        Self {
            model: "amq-13".to_string(),
            scale: 1,
            w: 0,
            h: 0,
            device: DeviceArgs::default(),
            performance: PerformanceArgs::default(),
            estimate: 0,
            preblur: 0.0,
            noise: 0.0,
            details: 0.0,
            halo: 0.0,
            blur: 0.0,
            compression: 0.0,
            prenoise: 0.0,
            grain: 0.0,
            gsize: 0.0,
            kcolor: true,
            blend: 0.0,
        }
    }
}

impl UpOptions {
    pub fn validate(&self) -> Result<()> {
        check_model_name(&self.model)?;
        self.device.validate()?;
        self.performance.validate()?;
        check_range("scale", self.scale as f64, 0.0, 4.0)?;
        check_range("w", self.w as f64, 0.0, 100000.0)?;
        check_range("h", self.h as f64, 0.0, 100000.0)?;
        check_range("estimate", self.estimate as f64, 0.0, 1000000.0)?;
        for (name, value) in [
            ("preblur", self.preblur),
            ("noise", self.noise),
            ("details", self.details),
            ("halo", self.halo),
            ("blur", self.blur),
            ("compression", self.compression),
        ] {
            check_range(name, value, -1.0, 1.0)?;
        }
        check_range("prenoise", self.prenoise, 0.0, 0.1)?;
        check_range("grain", self.grain, 0.0, 0.1)?;
        check_range("gsize", self.gsize, 0.0, 5.0)?;
        check_range("blend", self.blend, 0.0, 1.0)
    }

    /// `scale` is the resolved scale, never 0.
    pub fn stream_config(&self, scale: u32) -> StreamConfig {
        let values = [
            self.preblur as f32,
            self.noise as f32,
            self.details as f32,
            self.halo as f32,
            self.blur as f32,
            self.compression as f32,
            0.0,
            self.prenoise as f32,
            self.grain as f32,
            self.gsize as f32,
            if self.kcolor { 1.0 } else { 0.0 },
            self.blend as f32,
        ];
        StreamConfig {
            model_type: ModelType::Upscaling,
            model: self.model.clone(),
            processor_index: (self.estimate > 0) as i32,
            device: self.device.index,
            extra_instances: self.performance.instances,
            vram: self.performance.vram,
            scale,
            can_download: self.device.download,
            frame_count: self.estimate,
            params: StageParams::Upscale { values },
        }
    }
}

/// Stabilization.
#[derive(clap::Args, Debug, Clone, Serialize, Deserialize)]
pub struct StbOptions {
    /// Model short name
    #[arg(long, default_value = "ref-2")]
    pub model: String,

    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub performance: PerformanceArgs,

    /// Full-frame stabilization; when off the output is auto-cropped
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub full: bool,

    /// Pose file produced by a previous cpe pass
    #[arg(long, default_value = "cpe.json")]
    pub filename: PathBuf,

    /// Filler used for uncovered canvas areas
    #[arg(long, default_value = "")]
    pub filler: String,

    /// Read start time relative to the pose file, in seconds
    #[arg(long, default_value_t = 0.0)]
    pub rst: f64,

    /// Write start time relative to the read start time, in seconds
    #[arg(long, default_value_t = 0.0)]
    pub wst: f64,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub postflight: bool,

    /// Window size for full-frame synthesis
    #[arg(long, default_value_t = 64)]
    pub ws: u32,

    /// Canvas scale relative to input width
    #[arg(long, default_value_t = 2.0)]
    pub csx: f64,

    /// Canvas scale relative to input height
    #[arg(long, default_value_t = 2.0)]
    pub csy: f64,

    /// Smoothing applied to the camera trajectory
    #[arg(long, default_value_t = 6.0)]
    pub smoothness: f64,

    /// Frames kept in the memory cache
    #[arg(long, default_value_t = 128)]
    pub cache: u32,

    /// Stabilized motions as digits: rotation, horizontal pan, vertical pan, zoom
    #[arg(long, default_value_t = 1111)]
    pub dof: u32,

    /// Rolling shutter correction
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub roll: bool,

    /// Motion jitter reduction passes
    #[arg(long, default_value_t = 0)]
    pub reduce: u32,
}

impl Default for StbOptions {
    fn default() -> Self {
        Self {
            model: "ref-2".to_string(),
            device: DeviceArgs::default(),
            performance: PerformanceArgs::default(),
            full: true,
            filename: PathBuf::from("cpe.json"),
            filler: String::new(),
            rst: 0.0,
            wst: 0.0,
            postflight: true,
            ws: 64,
            csx: 2.0,
            csy: 2.0,
            smoothness: 6.0,
            cache: 128,
            dof: 1111,
            roll: false,
            reduce: 0,
        }
    }
}

impl StbOptions {
    pub fn validate(&self) -> Result<()> {
        check_model_name(&self.model)?;
        self.device.validate()?;
        self.performance.validate()?;
        check_range("rst", self.rst, 0.0, f64::MAX)?;
        check_range("wst", self.wst, 0.0, f64::MAX)?;
        check_range("ws", self.ws as f64, 0.0, 512.0)?;
        check_range("csx", self.csx, 1.0, 8.0)?;
        check_range("csy", self.csy, 1.0, 8.0)?;
        check_range("smoothness", self.smoothness, 0.0, 16.0)?;
        check_range("cache", self.cache as f64, 0.0, 256.0)?;
        check_range("dof", self.dof as f64, 0.0, 1111.0)?;
        check_range("reduce", self.reduce as f64, 0.0, 5.0)
    }

    pub fn stream_config(&self) -> StreamConfig {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let values = [
            self.smoothness as f32,
            self.ws as f32,
            flag(self.postflight),
            self.csx as f32,
            self.csy as f32,
            self.cache as f32,
            self.dof as f32,
            flag(self.roll),
            self.rst as f32,
            self.wst as f32,
            self.reduce as f32,
        ];
        StreamConfig {
            model_type: ModelType::Stabilization,
            model: self.model.clone(),
            processor_index: self.full as i32,
            device: self.device.index,
            extra_instances: self.performance.instances,
            vram: self.performance.vram,
            scale: 1,
            can_download: self.device.download,
            frame_count: 0,
            params: StageParams::Stabilization {
                full_frame: self.full,
                values,
                filename: self.filename.to_string_lossy().into_owned(),
                filler: self.filler.clone(),
            },
        }
    }
}

/// Stage-specific model parameters, in the order the engine expects them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageParams {
    PoseEstimation {
        filename: String,
        rolling_shutter: bool,
    },
    ParameterEstimation,
    Interpolation {
        threshold: f64,
        fps_factor: f64,
        slowmo: f64,
        rdt: f64,
    },
    Upscale {
        values: [f32; 12],
    },
    Stabilization {
        full_frame: bool,
        values: [f32; 11],
        filename: String,
        filler: String,
    },
}

impl StageParams {
    pub fn values(&self) -> Vec<f32> {
        match self {
            Self::PoseEstimation {
                rolling_shutter, ..
            } => vec![if *rolling_shutter { 1.0 } else { 0.0 }],
            Self::ParameterEstimation => Vec::new(),
            Self::Interpolation {
                threshold,
                fps_factor,
                slowmo,
                rdt,
            } => vec![
                *threshold as f32,
                *fps_factor as f32,
                *slowmo as f32,
                *rdt as f32,
            ],
            Self::Upscale { values } => values.to_vec(),
            Self::Stabilization { values, .. } => values.to_vec(),
        }
    }

    pub fn options(&self) -> Vec<String> {
        match self {
            Self::PoseEstimation { filename, .. } => vec![filename.clone()],
            Self::Stabilization {
                filename, filler, ..
            } => vec![filename.clone(), filler.clone()],
            _ => Vec::new(),
        }
    }
}

/// Immutable per-stream parameters, captured once when the output link is
/// configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamConfig {
    pub model_type: ModelType,
    pub model: String,
    pub processor_index: i32,
    pub device: i32,
    pub extra_instances: u32,
    pub vram: f64,
    pub scale: u32,
    pub can_download: bool,
    pub frame_count: u64,
    pub params: StageParams,
}
