// Scripted engine for deterministic protocol tests
//
// Every processor created from a `ScriptedEngine` shares one `Script`, so a
// test can steer behaviour and inspect calls after the handle is gone.

use super::{
    DeviceInfo, Engine, EngineError, InputBuffer, ModelDescriptor, ModelType, OutputTarget,
    Processor, ProcessorInfo,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct Script {
    // knobs
    pub fail_pts: Vec<i64>,
    /// Inputs whose outputs come back with a negative pts.
    pub suppress_pts: Vec<i64>,
    pub outputs_per_input: usize,
    /// Outputs held back per input until the stream ends.
    pub lag: usize,
    /// Never release held outputs.
    pub stall: bool,
    pub fail_create: Option<EngineError>,
    pub fail_output: bool,
    pub output_size: Option<(u32, u32)>,

    // observations
    pub submitted: Vec<i64>,
    pub created: usize,
    pub destroyed: usize,
    pub end_stream_calls: usize,
    pub remaining_calls: usize,
    pub last_info: Option<ProcessorInfo>,

    ready: VecDeque<(i64, u16)>,
    held: VecDeque<(i64, u16)>,
}

impl Script {
    pub fn shared() -> Arc<Mutex<Script>> {
        Arc::new(Mutex::new(Script {
            outputs_per_input: 1,
            ..Script::default()
        }))
    }

    pub fn processor(script: &Arc<Mutex<Script>>) -> Box<dyn Processor> {
        Box::new(ScriptedProcessor {
            script: script.clone(),
        })
    }

    pub fn pending(&self) -> usize {
        self.ready.len() + self.held.len()
    }
}

pub struct ScriptedEngine {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            script: Script::shared(),
        }
    }
}

impl Engine for ScriptedEngine {
    fn devices(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            index: 0,
            name: "scripted".to_string(),
        }]
    }

    fn models(&self, model_type: ModelType) -> Vec<ModelDescriptor> {
        let (name, scales) = match model_type {
            ModelType::FrameInterpolation => ("chr-1", vec![1]),
            ModelType::ParameterEstimation => ("prap-3", vec![1]),
            ModelType::CamPoseEstimation => ("cpe-1", vec![1]),
            ModelType::Upscaling => ("amq-13", vec![1, 2, 4]),
            ModelType::Stabilization => ("ref-2", vec![1]),
        };
        vec![ModelDescriptor {
            name: name.to_string(),
            model_type,
            scales,
            local: true,
        }]
    }

    fn create(&self, info: &ProcessorInfo) -> Result<Box<dyn Processor>, EngineError> {
        let mut script = self.script.lock().unwrap();
        if let Some(err) = script.fail_create.clone() {
            return Err(err);
        }
        script.created += 1;
        script.last_info = Some(info.clone());
        Ok(Script::processor(&self.script))
    }
}

struct ScriptedProcessor {
    script: Arc<Mutex<Script>>,
}

impl Processor for ScriptedProcessor {
    fn process(&mut self, input: InputBuffer<'_>) -> Result<(), EngineError> {
        let mut script = self.script.lock().unwrap();
        if script.fail_pts.contains(&input.pts) {
            return Err(EngineError::Rejected(format!("scripted failure at {}", input.pts)));
        }
        script.submitted.push(input.pts);
        let n = script.outputs_per_input;
        let suppressed = script.suppress_pts.contains(&input.pts);
        let fill = input.data.first().copied().unwrap_or(0);
        for i in 0..n {
            let pts = if suppressed {
                -1
            } else {
                input.pts * n as i64 + i as i64
            };
            script.held.push_back((pts, fill));
        }
        let keep = script.lag * n;
        while script.held.len() > keep {
            if let Some(out) = script.held.pop_front() {
                script.ready.push_back(out);
            }
        }
        Ok(())
    }

    fn output_count(&mut self) -> usize {
        self.script.lock().unwrap().ready.len()
    }

    fn output_frame(&mut self, target: OutputTarget<'_>) -> Result<i64, EngineError> {
        let mut script = self.script.lock().unwrap();
        let (pts, fill) = script.ready.pop_front().ok_or(EngineError::NoOutput)?;
        if script.fail_output {
            return Err(EngineError::NoPixels);
        }
        if let OutputTarget::Buffer { data, .. } = target {
            data.fill(fill);
        }
        Ok(pts)
    }

    fn end_stream(&mut self) {
        self.script.lock().unwrap().end_stream_calls += 1;
    }

    fn remaining_frames(&mut self) -> usize {
        let mut script = self.script.lock().unwrap();
        script.remaining_calls += 1;
        if script.end_stream_calls > 0 && !script.stall {
            if let Some(out) = script.held.pop_front() {
                script.ready.push_back(out);
            }
        }
        script.pending()
    }

    fn output_size(&mut self) -> Option<(u32, u32)> {
        self.script.lock().unwrap().output_size
    }
}

impl Drop for ScriptedProcessor {
    fn drop(&mut self) {
        if let Ok(mut script) = self.script.lock() {
            script.destroyed += 1;
        }
    }
}
