use super::drain::{DrainPolicy, DrainReport};
use super::{finish_synthesis, synthesize, PreviousFrame, Session, VideoFilter};
use crate::config::{StreamConfig, UpOptions};
use crate::engine::Engine;
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{LinkProps, OutputLink};

/// Picks the model scale closest to a requested output size. A zero
/// target dimension does not contribute.
pub fn derive_scale(w: u32, h: u32, in_w: u32, in_h: u32) -> u32 {
    let ratio = |target: u32, input: u32| {
        if input == 0 {
            0.0
        } else {
            target as f64 / input as f64
        }
    };
    let v = ratio(w, in_w).max(ratio(h, in_h));
    if v > 2.4 {
        4
    } else if v > 1.2 {
        2
    } else {
        1
    }
}

pub struct Upscaling {
    options: UpOptions,
    session: Session,
    previous: PreviousFrame,
}

impl Upscaling {
    pub fn new(options: UpOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            session: Session::new(DrainPolicy::postflight()),
            previous: PreviousFrame::default(),
        })
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.session.set_policy(policy);
        self
    }
}

impl VideoFilter for Upscaling {
    fn name(&self) -> &'static str {
        "up"
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb48
    }

    fn config_props(&mut self, engine: &dyn Engine, inlink: &LinkProps) -> Result<LinkProps> {
        self.previous.clear();
        let scale = match self.options.scale {
            0 => {
                let derived =
                    derive_scale(self.options.w, self.options.h, inlink.width, inlink.height);
                tracing::info!(
                    "up: derived scale {} for {}x{} -> {}x{}",
                    derived,
                    inlink.width,
                    inlink.height,
                    self.options.w,
                    self.options.h
                );
                derived
            }
            scale => scale,
        };
        self.session.open(engine, self.options.stream_config(scale), inlink)
    }

    fn filter_frame(&mut self, frame: Frame, out: &mut OutputLink) -> Result<()> {
        synthesize(&mut self.session, &mut self.previous, frame, out).map(|_| ())
    }

    fn drain(&mut self, out: &mut OutputLink) -> Result<DrainReport> {
        finish_synthesis(&mut self.session, &mut self.previous, out)
    }

    fn uninit(&mut self) {
        self.session.close();
        self.previous.clear();
    }

    fn stream_config(&self) -> Option<&StreamConfig> {
        self.session.config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::SimulatedEngine;
    use crate::error::FilterError;
    use crate::filter::FilterContext;
    use crate::frame::{FramePool, Rational};
    use crate::pipeline::sink::CollectSink;
    use crate::pipeline::source::SyntheticSource;
    use crate::pipeline::{Flow, FrameSource};
    use std::time::Duration;

    #[test]
    fn test_derive_scale_thresholds() {
        assert_eq!(derive_scale(0, 0, 640, 360), 1);
        assert_eq!(derive_scale(768, 0, 640, 360), 1);
        assert_eq!(derive_scale(769, 0, 640, 360), 2);
        assert_eq!(derive_scale(1280, 720, 640, 360), 2);
        assert_eq!(derive_scale(0, 864, 640, 360), 2);
        assert_eq!(derive_scale(0, 865, 640, 360), 4);
        assert_eq!(derive_scale(2560, 0, 640, 360), 4);
        // integer division would have called this 1
        assert_eq!(derive_scale(1000, 0, 640, 360), 2);
    }

    fn run(options: UpOptions, frames: u64) -> (LinkProps, Vec<Frame>, usize) {
        let engine = SimulatedEngine::new(1, Duration::ZERO);
        let pool = FramePool::new();
        let stage = Upscaling::new(options)
            .unwrap()
            .with_drain_policy(DrainPolicy::postflight().with_interval(Duration::from_millis(1)));
        let (sink, collected) = CollectSink::new();
        let mut ctx = FilterContext::new(Box::new(stage), Box::new(sink), pool.clone());
        let mut source =
            SyntheticSource::new(6, 4, PixelFormat::Rgb48, Rational::new(25, 1), frames, pool);
        let props = ctx.configure(&engine, &source.props()).unwrap();
        while ctx.request_frame(&mut source).unwrap() == Flow::Continue {}

        let mut collected = collected.lock().unwrap();
        let eof = collected.eof_count;
        (props, std::mem::take(&mut collected.frames), eof)
    }

    #[test]
    fn test_frames_are_enlarged() {
        let (props, frames, eof) = run(
            UpOptions {
                scale: 2,
                ..UpOptions::default()
            },
            4,
        );
        assert_eq!((props.width, props.height), (12, 8));
        assert_eq!(props.frame_rate, Rational::new(25, 1));
        assert_eq!(frames.len(), 4);
        assert_eq!(eof, 1);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!((frame.width, frame.height), (12, 8));
            assert_eq!(frame.pts, i as i64 * 1000);
            // nearest neighbour: each source pixel covers a 2x2 block
            assert_eq!(frame.pixel(0, 0), frame.pixel(1, 1));
            assert_eq!(frame.pixel(10, 6), frame.pixel(11, 7));
        }
    }

    #[test]
    fn test_scale_zero_derives_from_target() {
        let (props, frames, _) = run(
            UpOptions {
                scale: 0,
                w: 24,
                ..UpOptions::default()
            },
            2,
        );
        assert_eq!((props.width, props.height), (24, 16));
        assert!(frames.iter().all(|f| f.width == 24 && f.height == 16));
    }

    #[test]
    fn test_disallowed_scale_fails_configuration() {
        let engine = SimulatedEngine::new(1, Duration::ZERO);
        let mut stage = Upscaling::new(UpOptions {
            model: "ahq-12".to_string(),
            scale: 4,
            ..UpOptions::default()
        })
        .unwrap();
        let inlink = SyntheticSource::new(
            6,
            4,
            PixelFormat::Rgb48,
            Rational::new(25, 1),
            1,
            FramePool::new(),
        )
        .props();
        let err = stage.config_props(&engine, &inlink).unwrap_err();
        assert!(matches!(err, FilterError::Create(_)));
        assert!(stage.stream_config().is_none());
    }
}
