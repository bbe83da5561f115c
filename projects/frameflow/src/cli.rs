use crate::config::{CpeOptions, FiOptions, PeOptions, StbOptions, UpOptions};
use crate::frame::Rational;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of synthetic input frames
    #[arg(long, global = true, default_value_t = 48)]
    pub frames: u64,

    /// Input width in pixels
    #[arg(long, global = true, default_value_t = 320)]
    pub width: u32,

    /// Input height in pixels
    #[arg(long, global = true, default_value_t = 180)]
    pub height: u32,

    /// Input frame rate, e.g. 30, 30000/1001 or 29.97
    #[arg(long, global = true, default_value = "30")]
    pub input_fps: Rational,

    /// Simulated per-frame processing latency in milliseconds
    #[arg(long, global = true, env = "FRAMEFLOW_ENGINE_LATENCY_MS", default_value_t = 2)]
    pub engine_latency_ms: u64,

    /// Number of simulated GPUs
    #[arg(long, global = true, env = "FRAMEFLOW_GPUS", default_value_t = 1)]
    pub gpus: u32,

    /// Make the engine reject every Nth submitted frame
    #[arg(long, global = true)]
    pub reject_every: Option<u64>,

    /// Override the stage's drain poll interval in milliseconds
    #[arg(long, global = true)]
    pub drain_interval_ms: Option<u64>,

    /// Override the number of polls without progress before a drain times out
    #[arg(long, global = true)]
    pub drain_max_stalls: Option<u32>,

    /// Keep pulling frames after a frame fails to process
    #[arg(long, global = true)]
    pub keep_going: bool,

    /// Where to write the JSON run report
    #[arg(long, global = true, env = "FRAMEFLOW_REPORT")]
    pub report: Option<PathBuf>,

    /// Directory for PNG dumps of emitted frames
    #[arg(long, global = true)]
    pub dump_dir: Option<PathBuf>,

    /// Maximum number of frames to dump
    #[arg(long, global = true, default_value_t = 8)]
    pub dump_limit: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Camera pose estimation; frames pass through, poses go to a JSON file
    Cpe(CpeOptions),
    /// Parameter estimation; frames pass through
    Pe(PeOptions),
    /// Frame interpolation and slow motion
    Fi(FiOptions),
    /// Upscaling and enhancement
    Up(UpOptions),
    /// Stabilization
    Stb(StbOptions),
    /// List the simulated engine's devices and models
    Models,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
