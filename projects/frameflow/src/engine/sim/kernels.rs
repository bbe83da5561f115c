// Cheap deterministic stand-ins for the model families
//
// Each kernel runs on the processor's worker thread. `push` sees one submitted
// frame, `finish` runs once after the stream ends; both append whatever
// outputs became ready.

use crate::engine::{EngineError, ModelType, ProcessorInfo};
use crate::frame::PixelFormat;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

const SAMPLE_MAX: f64 = u16::MAX as f64;

/// Packed copy of a submitted frame.
#[derive(Debug, Clone)]
pub struct SimFrame {
    pub width: u32,
    pub height: u32,
    pub pts: i64,
    pub data: Vec<u16>,
}

impl SimFrame {
    fn row(&self) -> usize {
        self.width as usize * PixelFormat::CHANNELS
    }
}

#[derive(Debug, Clone)]
pub struct SimOutput {
    pub width: u32,
    pub height: u32,
    pub pts: i64,
    /// Estimation outputs carry no pixels.
    pub data: Option<Vec<u16>>,
}

impl SimOutput {
    fn pixels(frame: SimFrame) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            pts: frame.pts,
            data: Some(frame.data),
        }
    }

    fn marker(pts: i64) -> Self {
        Self {
            width: 0,
            height: 0,
            pts,
            data: None,
        }
    }
}

pub trait Kernel: Send {
    fn push(&mut self, frame: SimFrame, out: &mut Vec<SimOutput>);

    fn finish(&mut self, _out: &mut Vec<SimOutput>) {}
}

pub fn build(info: &ProcessorInfo) -> Result<Box<dyn Kernel>, EngineError> {
    let params = &info.model_parameters;
    let kernel: Box<dyn Kernel> = match info.model_type {
        ModelType::ParameterEstimation => Box::new(EstimationKernel::default()),
        ModelType::CamPoseEstimation => {
            let filename = info.options.first().ok_or_else(|| {
                EngineError::InvalidParameters("pose estimation needs an output filename".to_string())
            })?;
            Box::new(PoseKernel {
                path: PathBuf::from(filename),
                model: info.model_name.clone(),
                rolling_shutter: params.first().copied().unwrap_or(0.0) > 0.0,
                poses: Vec::new(),
            })
        }
        ModelType::Upscaling => Box::new(UpscaleKernel { scale: info.scale.max(1) }),
        ModelType::FrameInterpolation => {
            let [threshold, fps_factor, _slowmo, rdt] = params[..] else {
                return Err(EngineError::InvalidParameters(format!(
                    "interpolation expects 4 parameters, got {}",
                    params.len()
                )));
            };
            if !(fps_factor.is_finite() && fps_factor > 0.0) {
                return Err(EngineError::InvalidParameters(format!(
                    "fps factor {} must be positive",
                    fps_factor
                )));
            }
            Box::new(InterpolationKernel::new(fps_factor as f64, threshold as f64, rdt as f64))
        }
        ModelType::Stabilization => {
            if params.len() != 11 {
                return Err(EngineError::InvalidParameters(format!(
                    "stabilization expects 11 parameters, got {}",
                    params.len()
                )));
            }
            let window = (params[1].max(0.0) as usize).min(params[5].max(0.0) as usize);
            Box::new(StabilizationKernel {
                window,
                crop: stabilization_crop(info),
                held: VecDeque::new(),
            })
        }
    };
    Ok(kernel)
}

/// Auto-crop size for stabilization, `None` for full-frame output.
pub fn stabilization_crop(info: &ProcessorInfo) -> Option<(u32, u32)> {
    if info.model_type != ModelType::Stabilization || info.processor_index > 0 {
        return None;
    }
    let smoothness = info.model_parameters.first().copied().unwrap_or(0.0) as f64;
    let keep = 1.0 - (smoothness / 100.0).clamp(0.0, 0.16);
    let even = |v: u32| {
        let cropped = (v as f64 * keep).round() as u32 & !1;
        cropped.max(2).min(v)
    };
    Some((even(info.input_width), even(info.input_height)))
}

#[derive(Default)]
struct EstimationKernel {
    frames: u64,
    mean_sum: f64,
    deviation_sum: f64,
}

impl Kernel for EstimationKernel {
    fn push(&mut self, frame: SimFrame, out: &mut Vec<SimOutput>) {
        let n = frame.data.len().max(1) as f64;
        let mean = frame.data.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = frame
            .data
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        self.frames += 1;
        self.mean_sum += mean / SAMPLE_MAX;
        self.deviation_sum += variance.sqrt() / SAMPLE_MAX;
        out.push(SimOutput::marker(frame.pts));
    }

    fn finish(&mut self, _out: &mut Vec<SimOutput>) {
        if self.frames == 0 {
            return;
        }
        let n = self.frames as f64;
        tracing::info!(
            "Parameter estimation over {} frames: mean {:.4}, deviation {:.4}",
            self.frames,
            self.mean_sum / n,
            self.deviation_sum / n
        );
    }
}

#[derive(Debug, Serialize)]
struct Pose {
    pts: i64,
    x: f64,
    y: f64,
    intensity: f64,
}

#[derive(Serialize)]
struct PoseFile<'a> {
    model: &'a str,
    rolling_shutter: bool,
    frames: &'a [Pose],
}

struct PoseKernel {
    path: PathBuf,
    model: String,
    rolling_shutter: bool,
    poses: Vec<Pose>,
}

impl PoseKernel {
    fn write(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(
            writer,
            &PoseFile {
                model: &self.model,
                rolling_shutter: self.rolling_shutter,
                frames: &self.poses,
            },
        )?;
        Ok(())
    }
}

impl Kernel for PoseKernel {
    fn push(&mut self, frame: SimFrame, out: &mut Vec<SimOutput>) {
        let row = frame.row();
        let (mut total, mut sx, mut sy) = (0.0, 0.0, 0.0);
        for y in 0..frame.height as usize {
            for (x, px) in frame.data[y * row..(y + 1) * row]
                .chunks_exact(PixelFormat::CHANNELS)
                .enumerate()
            {
                let w: f64 = px.iter().map(|&v| v as f64).sum();
                total += w;
                sx += w * x as f64;
                sy += w * y as f64;
            }
        }
        let (x, y) = if total > 0.0 {
            (sx / total, sy / total)
        } else {
            (frame.width as f64 / 2.0, frame.height as f64 / 2.0)
        };
        let pixels = (frame.width as f64 * frame.height as f64).max(1.0);
        self.poses.push(Pose {
            pts: frame.pts,
            x,
            y,
            intensity: total / (pixels * PixelFormat::CHANNELS as f64 * SAMPLE_MAX),
        });
        out.push(SimOutput::marker(frame.pts));
    }

    fn finish(&mut self, _out: &mut Vec<SimOutput>) {
        match self.write() {
            Ok(()) => tracing::info!(
                "Wrote {} camera poses to {}",
                self.poses.len(),
                self.path.display()
            ),
            Err(e) => tracing::error!("Failed to write poses to {}: {}", self.path.display(), e),
        }
    }
}

struct UpscaleKernel {
    scale: u32,
}

impl Kernel for UpscaleKernel {
    fn push(&mut self, frame: SimFrame, out: &mut Vec<SimOutput>) {
        let scale = self.scale as usize;
        if scale == 1 {
            out.push(SimOutput::pixels(frame));
            return;
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        let out_row = w * scale * PixelFormat::CHANNELS;
        let mut data = Vec::with_capacity(out_row * h * scale);
        for y in 0..h * scale {
            let src = &frame.data[(y / scale) * frame.row()..(y / scale + 1) * frame.row()];
            for x in 0..w * scale {
                let offset = (x / scale) * PixelFormat::CHANNELS;
                data.extend_from_slice(&src[offset..offset + PixelFormat::CHANNELS]);
            }
        }
        out.push(SimOutput {
            width: frame.width * self.scale,
            height: frame.height * self.scale,
            pts: frame.pts,
            data: Some(data),
        });
    }
}

/// Emits frames at positions `k * fps_factor`, measured in input frames.
struct InterpolationKernel {
    fps_factor: f64,
    threshold: f64,
    rdt: f64,
    /// Last distinct input and its position.
    anchor: Option<(f64, SimFrame)>,
    /// Position and pts of the newest input, held duplicates included.
    last_input: Option<(f64, i64)>,
    inputs: u64,
    next_output: u64,
    pts_step: f64,
}

impl InterpolationKernel {
    fn new(fps_factor: f64, threshold: f64, rdt: f64) -> Self {
        Self {
            fps_factor,
            threshold,
            rdt,
            anchor: None,
            last_input: None,
            inputs: 0,
            next_output: 0,
            pts_step: 1.0,
        }
    }

    fn position(&self) -> f64 {
        self.next_output as f64 * self.fps_factor
    }

    fn is_duplicate(&self, a: &SimFrame, b: &SimFrame) -> bool {
        if self.rdt <= 0.0 || a.data.len() != b.data.len() || a.data.is_empty() {
            return false;
        }
        let diff: f64 = a
            .data
            .iter()
            .zip(&b.data)
            .map(|(&x, &y)| (x as f64 - y as f64).abs())
            .sum();
        diff / (a.data.len() as f64 * SAMPLE_MAX) < self.rdt
    }
}

fn blend(a: &SimFrame, b: &SimFrame, t: f64) -> Vec<u16> {
    a.data
        .iter()
        .zip(&b.data)
        .map(|(&x, &y)| (x as f64 + (y as f64 - x as f64) * t).round() as u16)
        .collect()
}

impl Kernel for InterpolationKernel {
    fn push(&mut self, frame: SimFrame, out: &mut Vec<SimOutput>) {
        let position = self.inputs as f64;
        self.inputs += 1;
        self.last_input = Some((position, frame.pts));

        let Some((anchor_pos, anchor)) = self.anchor.take() else {
            self.anchor = Some((position, frame));
            return;
        };

        if self.is_duplicate(&anchor, &frame) {
            tracing::debug!("Holding duplicate input pts {}", frame.pts);
            self.anchor = Some((anchor_pos, anchor));
            return;
        }

        let span = position - anchor_pos;
        self.pts_step = (frame.pts - anchor.pts) as f64 / span;
        while self.position() < position {
            let p = self.position();
            let t = (p - anchor_pos) / span;
            let pts = anchor.pts + ((frame.pts - anchor.pts) as f64 * t).round() as i64;
            let data = if p - anchor_pos <= self.threshold {
                anchor.data.clone()
            } else if position - p <= self.threshold {
                frame.data.clone()
            } else {
                blend(&anchor, &frame, t)
            };
            out.push(SimOutput {
                width: frame.width,
                height: frame.height,
                pts,
                data: Some(data),
            });
            self.next_output += 1;
        }
        self.anchor = Some((position, frame));
    }

    fn finish(&mut self, out: &mut Vec<SimOutput>) {
        let Some((anchor_pos, anchor)) = self.anchor.take() else {
            return;
        };
        if let Some((last_pos, last_pts)) = self.last_input {
            if last_pos > anchor_pos {
                self.pts_step = (last_pts - anchor.pts) as f64 / (last_pos - anchor_pos);
            }
        }
        let last = self.inputs.saturating_sub(1) as f64;
        while self.position() <= last + 1e-9 {
            let p = self.position();
            let pts = anchor.pts + ((p - anchor_pos) * self.pts_step).round() as i64;
            out.push(SimOutput {
                width: anchor.width,
                height: anchor.height,
                pts,
                data: Some(anchor.data.clone()),
            });
            self.next_output += 1;
        }
    }
}

/// Holds a look-ahead window and emits one frame per input.
struct StabilizationKernel {
    window: usize,
    crop: Option<(u32, u32)>,
    held: VecDeque<SimFrame>,
}

impl StabilizationKernel {
    fn emit(&self, frame: SimFrame) -> SimOutput {
        let Some((cw, ch)) = self.crop else {
            return SimOutput::pixels(frame);
        };
        let x0 = ((frame.width - cw) / 2) as usize;
        let y0 = ((frame.height - ch) / 2) as usize;
        let row = frame.row();
        let mut data = Vec::with_capacity(cw as usize * ch as usize * PixelFormat::CHANNELS);
        for y in y0..y0 + ch as usize {
            let start = y * row + x0 * PixelFormat::CHANNELS;
            data.extend_from_slice(&frame.data[start..start + cw as usize * PixelFormat::CHANNELS]);
        }
        SimOutput {
            width: cw,
            height: ch,
            pts: frame.pts,
            data: Some(data),
        }
    }
}

impl Kernel for StabilizationKernel {
    fn push(&mut self, frame: SimFrame, out: &mut Vec<SimOutput>) {
        self.held.push_back(frame);
        while self.held.len() > self.window {
            if let Some(front) = self.held.pop_front() {
                out.push(self.emit(front));
            }
        }
    }

    fn finish(&mut self, out: &mut Vec<SimOutput>) {
        while let Some(front) = self.held.pop_front() {
            out.push(self.emit(front));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u16, pts: i64) -> SimFrame {
        SimFrame {
            width: 4,
            height: 2,
            pts,
            data: vec![value; 4 * 2 * 3],
        }
    }

    fn run(kernel: &mut dyn Kernel, frames: Vec<SimFrame>) -> Vec<SimOutput> {
        let mut out = Vec::new();
        for f in frames {
            kernel.push(f, &mut out);
        }
        kernel.finish(&mut out);
        out
    }

    #[test]
    fn test_interpolation_count_and_order() {
        let mut kernel = InterpolationKernel::new(0.5, 0.15, 0.0);
        let inputs = (0..5).map(|i| frame(i as u16 * 1000, i * 100)).collect();
        let out = run(&mut kernel, inputs);
        // floor(4 / 0.5) + 1
        assert_eq!(out.len(), 9);
        assert!(out.windows(2).all(|w| w[0].pts <= w[1].pts));
        assert_eq!(out[1].pts, 50);
        assert_eq!(out[1].data.as_ref().unwrap()[0], 500);
        assert_eq!(out[8].pts, 400);
    }

    #[test]
    fn test_interpolation_near_anchor_copies() {
        let mut kernel = InterpolationKernel::new(0.25, 0.3, 0.0);
        let out = run(&mut kernel, vec![frame(0, 0), frame(4000, 4)]);
        // positions 0, 0.25 copy the first frame, 0.5 blends, 0.75 and 1.0 copy the second
        let firsts: Vec<u16> = out.iter().map(|o| o.data.as_ref().unwrap()[0]).collect();
        assert_eq!(firsts, vec![0, 0, 2000, 4000, 4000]);
    }

    #[test]
    fn test_interpolation_skips_duplicate_anchor() {
        let mut kernel = InterpolationKernel::new(1.0, 0.3, 0.05);
        let out = run(&mut kernel, vec![frame(0, 0), frame(10, 1), frame(30000, 2)]);
        assert_eq!(out.len(), 3);
        // the held duplicate is replaced by a blend between its neighbours
        assert_eq!(out[1].data.as_ref().unwrap()[0], 15000);
    }

    #[test]
    fn test_static_clip_keeps_pts_spacing() {
        let mut kernel = InterpolationKernel::new(0.5, 0.15, 0.01);
        let out = run(&mut kernel, vec![frame(7, 0), frame(7, 1000), frame(7, 2000)]);
        let pts: Vec<i64> = out.iter().map(|o| o.pts).collect();
        assert_eq!(pts, vec![0, 500, 1000, 1500, 2000]);
    }

    #[test]
    fn test_trailing_duplicates_keep_pts_spacing() {
        let mut kernel = InterpolationKernel::new(0.5, 0.15, 0.01);
        let inputs = vec![frame(0, 0), frame(30000, 1000), frame(30000, 2000)];
        let out = run(&mut kernel, inputs);
        let pts: Vec<i64> = out.iter().map(|o| o.pts).collect();
        assert_eq!(pts, vec![0, 500, 1000, 1500, 2000]);
    }

    #[test]
    fn test_upscale_nearest_neighbour() {
        let mut kernel = UpscaleKernel { scale: 2 };
        let mut src = frame(0, 7);
        src.data[0] = 9;
        let out = run(&mut kernel, vec![src]);
        assert_eq!((out[0].width, out[0].height), (8, 4));
        let data = out[0].data.as_ref().unwrap();
        assert_eq!(data.len(), 8 * 4 * 3);
        assert_eq!(data[0], 9);
        assert_eq!(data[3], 9);
        assert_eq!(data[24], 9);
        assert_eq!(data[6], 0);
    }

    #[test]
    fn test_stabilization_window_and_crop() {
        let mut kernel = StabilizationKernel {
            window: 2,
            crop: Some((2, 2)),
            held: VecDeque::new(),
        };
        let mut out = Vec::new();
        for i in 0..3 {
            kernel.push(frame(1, i), &mut out);
        }
        assert_eq!(out.len(), 1);
        kernel.finish(&mut out);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|o| (o.width, o.height) == (2, 2)));
        assert_eq!(out[0].data.as_ref().unwrap().len(), 12);
    }

    #[test]
    fn test_pose_file_written() {
        let dir = std::env::temp_dir().join(format!("frameflow-pose-{}", std::process::id()));
        let path = dir.join("cpe.json");
        let mut kernel = PoseKernel {
            path: path.clone(),
            model: "cpe-1".to_string(),
            rolling_shutter: false,
            poses: Vec::new(),
        };
        let out = run(&mut kernel, vec![frame(100, 0), frame(200, 1)]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.data.is_none()));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["frames"].as_array().unwrap().len(), 2);
        assert_eq!(written["model"], "cpe-1");
        std::fs::remove_dir_all(&dir).ok();
    }
}
