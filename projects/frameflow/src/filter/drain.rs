// End-of-stream draining
//
// Once upstream runs dry the processor stream is ended and polled until every
// buffered output has been pulled. Polling is bounded: a processor whose
// remaining count stops moving for `max_stalled_polls` polls in a row fails
// the drain instead of hanging the pipeline.

use crate::engine::ProcessorHandle;
use crate::error::{FilterError, Result};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Streaming,
    Draining,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainPolicy {
    pub interval: Duration,
    pub max_stalled_polls: u32,
}

impl DrainPolicy {
    /// Pass-through estimators poll often; their outputs are discarded.
    pub fn estimation() -> Self {
        Self {
            interval: Duration::from_millis(20),
            max_stalled_polls: 250,
        }
    }

    /// Synthesizing stages wait longer per poll.
    pub fn postflight() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_stalled_polls: 50,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_stalled_polls(mut self, polls: u32) -> Self {
        self.max_stalled_polls = polls;
        self
    }

    /// Longest a drain can wait without any progress.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_stalled_polls
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DrainReport {
    pub polls: u32,
    pub waited: Duration,
}

/// Ends the stream on `handle` and runs `step` until nothing remains.
///
/// `step` pulls whatever is ready; it runs before each wait. The handle is
/// closed on success and left draining on failure.
pub fn drain<F>(handle: &mut ProcessorHandle, policy: &DrainPolicy, mut step: F) -> Result<DrainReport>
where
    F: FnMut(&mut ProcessorHandle) -> Result<()>,
{
    handle.end_stream();
    let started = Instant::now();
    let mut polls = 0u32;
    let mut stalled = 0u32;
    let mut remaining = handle.remaining();

    while remaining > 0 {
        if stalled >= policy.max_stalled_polls {
            let waited = started.elapsed();
            tracing::warn!(
                "{}: gave up draining with {} outputs left after {:?}",
                handle.model(),
                remaining,
                waited
            );
            return Err(FilterError::DrainTimeout {
                remaining,
                polls,
                waited,
            });
        }
        step(handle)?;
        std::thread::sleep(policy.interval);
        polls += 1;

        let now = handle.remaining();
        if now == remaining {
            stalled += 1;
        } else {
            stalled = 0;
        }
        remaining = now;
    }

    handle.close();
    let report = DrainReport {
        polls,
        waited: started.elapsed(),
    };
    tracing::debug!(
        "{}: drained after {} polls ({:?})",
        handle.model(),
        report.polls,
        report.waited
    );
    Ok(report)
}
