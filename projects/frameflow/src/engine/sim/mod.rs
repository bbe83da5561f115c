// In-process engine that honours the processor contract with cheap kernels
//
// Every processor owns a worker thread. Submissions travel over one crossbeam
// channel and outputs come back over another, so outputs show up some time
// after the frame that caused them, the way a real asynchronous engine
// behaves.

pub mod kernels;
mod worker;

use super::verify::{check_device, check_model, check_scale};
use super::{
    DeviceInfo, Engine, EngineError, InputBuffer, ModelDescriptor, ModelType, OutputTarget,
    Processor, ProcessorInfo,
};
use crate::frame::PixelFormat;
use crossbeam::channel::{self, Receiver, Sender};
use kernels::{SimFrame, SimOutput};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use worker::Job;

pub struct SimulatedEngine {
    gpus: usize,
    latency: Duration,
    reject_every: Option<u64>,
    catalog: Vec<ModelDescriptor>,
    verbose: AtomicBool,
}

fn model(name: &str, model_type: ModelType, scales: &[u32], local: bool) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_string(),
        model_type,
        scales: scales.to_vec(),
        local,
    }
}

impl SimulatedEngine {
    pub fn new(gpus: usize, latency: Duration) -> Self {
        let catalog = vec![
            model("chr-1", ModelType::FrameInterpolation, &[1], true),
            model("apo-8", ModelType::FrameInterpolation, &[1], true),
            model("chf-3", ModelType::FrameInterpolation, &[1], false),
            model("prap-3", ModelType::ParameterEstimation, &[1], true),
            model("cpe-1", ModelType::CamPoseEstimation, &[1], true),
            model("cpe-2", ModelType::CamPoseEstimation, &[1], true),
            model("amq-13", ModelType::Upscaling, &[1, 2, 4], true),
            model("prob-4", ModelType::Upscaling, &[1, 2, 4], true),
            model("ahq-12", ModelType::Upscaling, &[1, 2], false),
            model("ref-2", ModelType::Stabilization, &[1], true),
        ];
        Self {
            gpus,
            latency,
            reject_every: None,
            catalog,
            verbose: AtomicBool::new(false),
        }
    }

    /// Rejects every `n`th submission of each processor.
    pub fn with_reject_every(mut self, n: Option<u64>) -> Self {
        self.reject_every = n.filter(|&n| n > 0);
        self
    }

    pub fn catalog(&self) -> &[ModelDescriptor] {
        &self.catalog
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }
}

impl Engine for SimulatedEngine {
    fn devices(&self) -> Vec<DeviceInfo> {
        (0..self.gpus)
            .map(|index| DeviceInfo {
                index: index as i32,
                name: format!("sim-gpu-{}", index),
            })
            .collect()
    }

    fn models(&self, model_type: ModelType) -> Vec<ModelDescriptor> {
        self.catalog
            .iter()
            .filter(|m| m.model_type == model_type)
            .cloned()
            .collect()
    }

    fn set_logging(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    fn create(&self, info: &ProcessorInfo) -> Result<Box<dyn Processor>, EngineError> {
        let descriptor = check_model(self, info.model_type, &info.model_name)?;
        check_device(self, info.device)?;
        check_scale(&descriptor, info.scale)?;
        if !descriptor.local && !info.can_download_model {
            return Err(EngineError::DownloadDenied(descriptor.name));
        }

        let kernel = kernels::build(info)?;
        let output_size = kernels::stabilization_crop(info);
        if self.is_verbose() {
            tracing::debug!(
                "Creating {} ({}) for {}x{} at {:.3} fps",
                info.processor_name,
                info.model_type,
                info.input_width,
                info.input_height,
                info.framerate
            );
        }

        let (job_tx, job_rx) = channel::unbounded();
        let (result_tx, result_rx) = channel::unbounded();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let worker_outstanding = outstanding.clone();
        let latency = self.latency;
        let worker = std::thread::Builder::new()
            .name(info.processor_name.clone())
            .spawn(move || {
                worker::processor_worker(kernel, job_rx, result_tx, worker_outstanding, latency)
            })
            .map_err(|e| EngineError::Rejected(format!("could not start worker: {}", e)))?;

        Ok(Box::new(SimProcessor {
            name: info.processor_name.clone(),
            input_width: info.input_width,
            input_height: info.input_height,
            jobs: Some(job_tx),
            results: result_rx,
            ready: VecDeque::new(),
            outstanding,
            worker: Some(worker),
            submissions: 0,
            reject_every: self.reject_every,
            ended: false,
            output_size,
        }))
    }
}

struct SimProcessor {
    name: String,
    input_width: u32,
    input_height: u32,
    jobs: Option<Sender<Job>>,
    results: Receiver<SimOutput>,
    ready: VecDeque<SimOutput>,
    outstanding: Arc<AtomicUsize>,
    worker: Option<JoinHandle<()>>,
    submissions: u64,
    reject_every: Option<u64>,
    ended: bool,
    output_size: Option<(u32, u32)>,
}

impl SimProcessor {
    fn collect(&mut self) {
        self.ready.extend(self.results.try_iter());
    }

    fn send(&mut self, job: Job) -> Result<(), EngineError> {
        let jobs = self.jobs.as_ref().ok_or(EngineError::WorkerGone)?;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if jobs.send(job).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::WorkerGone);
        }
        Ok(())
    }
}

impl Processor for SimProcessor {
    fn process(&mut self, input: InputBuffer<'_>) -> Result<(), EngineError> {
        if self.ended {
            return Err(EngineError::StreamEnded);
        }
        self.submissions += 1;
        if let Some(n) = self.reject_every {
            if self.submissions % n == 0 {
                return Err(EngineError::Rejected(format!(
                    "injected failure on submission {}",
                    self.submissions
                )));
            }
        }
        if input.width != self.input_width || input.height != self.input_height {
            return Err(EngineError::Rejected(format!(
                "expected {}x{}, got {}x{}",
                self.input_width, self.input_height, input.width, input.height
            )));
        }

        let row = input.width as usize * PixelFormat::CHANNELS;
        let needed = input.line_size * (input.height as usize).saturating_sub(1) + row;
        if input.line_size < row || input.data.len() < needed {
            return Err(EngineError::BufferTooSmall {
                needed,
                actual: input.data.len(),
            });
        }
        let mut data = Vec::with_capacity(row * input.height as usize);
        for y in 0..input.height as usize {
            data.extend_from_slice(&input.data[y * input.line_size..y * input.line_size + row]);
        }

        self.send(Job::Frame(SimFrame {
            width: input.width,
            height: input.height,
            pts: input.pts,
            data,
        }))
    }

    fn output_count(&mut self) -> usize {
        self.collect();
        self.ready.len()
    }

    fn output_frame(&mut self, target: OutputTarget<'_>) -> Result<i64, EngineError> {
        let output = self.ready.pop_front().ok_or(EngineError::NoOutput)?;
        match target {
            OutputTarget::Discard => Ok(output.pts),
            OutputTarget::Buffer { data, line_size } => {
                let pixels = output.data.ok_or(EngineError::NoPixels)?;
                let row = output.width as usize * PixelFormat::CHANNELS;
                let needed = line_size * (output.height as usize).saturating_sub(1) + row;
                if line_size < row || data.len() < needed {
                    return Err(EngineError::BufferTooSmall {
                        needed,
                        actual: data.len(),
                    });
                }
                for (y, src) in pixels.chunks_exact(row.max(1)).enumerate() {
                    data[y * line_size..y * line_size + row].copy_from_slice(src);
                }
                Ok(output.pts)
            }
        }
    }

    fn end_stream(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if let Err(e) = self.send(Job::End) {
            tracing::warn!("{}: could not end stream: {}", self.name, e);
        }
    }

    fn remaining_frames(&mut self) -> usize {
        // read the in-flight count before collecting; see processor_worker
        let in_flight = self.outstanding.load(Ordering::SeqCst);
        self.collect();
        in_flight + self.ready.len()
    }

    fn output_size(&mut self) -> Option<(u32, u32)> {
        self.output_size
    }
}

impl Drop for SimProcessor {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("{}: processor worker panicked", self.name);
            }
        }
    }
}
