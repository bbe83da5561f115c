use crate::config::StreamConfig;
use crate::filter::drain::StreamState;
use crate::pipeline::runner::{FailurePolicy, RunStats};
use crate::pipeline::sink::SinkStats;
use crate::pipeline::LinkProps;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Everything a stage run produced, written next to the outputs as JSON.
#[derive(Serialize, Debug, Clone)]
pub struct RunReport {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub failure_policy: FailurePolicy,
    pub input: LinkProps,
    pub output: Option<LinkProps>,
    pub stream_config: Option<StreamConfig>,
    /// The stage's options exactly as parsed.
    pub options: serde_json::Value,
    pub final_state: StreamState,
    pub stats: RunStats,
    pub sink: SinkStats,
    pub error: Option<String>,
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(report)?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    tracing::info!("Wrote run report to {}", path.display());
    Ok(())
}
