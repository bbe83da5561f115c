use super::link::{Flow, FrameSource};
use crate::error::Result;
use crate::filter::FilterContext;
use indicatif::ProgressBar;
use serde::Serialize;
use std::time::Instant;

/// What the host does when a single frame fails to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failure.
    Abort,
    /// Log recoverable failures and keep pulling.
    Continue,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub requests: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub submission_failures: u64,
    pub reached_eof: bool,
    pub drain_polls: u32,
    pub elapsed_ms: f64,
}

/// Pulls frames through `ctx` until end of stream.
pub fn run_stage(
    ctx: &mut FilterContext,
    source: &mut dyn FrameSource,
    policy: FailurePolicy,
    progress: Option<&ProgressBar>,
) -> Result<RunStats> {
    let started = Instant::now();
    let mut requests = 0u64;

    loop {
        requests += 1;
        match ctx.request_frame(source) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Eof) => break,
            Err(e) if e.is_recoverable() && policy == FailurePolicy::Continue => {
                tracing::warn!("Continuing after failure: {}", e);
            }
            Err(e) => {
                tracing::error!("Stage {} failed: {} (code {})", ctx.name(), e, e.host_code());
                return Err(e);
            }
        }
        if let Some(pb) = progress {
            pb.set_position(ctx.frames_in());
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("Done");
    }

    let stats = ctx.stats();
    Ok(RunStats {
        requests,
        frames_in: stats.frames_in,
        frames_out: stats.frames_out,
        submission_failures: stats.submission_failures,
        reached_eof: stats.eof_sent,
        drain_polls: stats.drain_polls,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}
