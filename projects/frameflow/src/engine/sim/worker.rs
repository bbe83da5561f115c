use super::kernels::{Kernel, SimFrame, SimOutput};
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub enum Job {
    Frame(SimFrame),
    End,
}

/// Runs submitted jobs through `kernel` until the job channel closes.
///
/// Outputs are sent before `outstanding` is decremented, so a reader that sees
/// the counter drop will find the outputs already queued.
pub fn processor_worker(
    mut kernel: Box<dyn Kernel>,
    jobs: Receiver<Job>,
    results: Sender<SimOutput>,
    outstanding: Arc<AtomicUsize>,
    latency: Duration,
) {
    let mut produced = Vec::new();
    for job in jobs {
        match job {
            Job::Frame(frame) => {
                if !latency.is_zero() {
                    std::thread::sleep(latency);
                }
                kernel.push(frame, &mut produced);
            }
            Job::End => {
                kernel.finish(&mut produced);
            }
        }
        for output in produced.drain(..) {
            if results.send(output).is_err() {
                tracing::debug!("Processor worker: result receiver dropped, stopping");
                return;
            }
        }
        outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
