use super::drain::{DrainPolicy, DrainReport};
use super::{finish_synthesis, synthesize, PreviousFrame, Session, VideoFilter};
use crate::config::{StbOptions, StreamConfig};
use crate::engine::Engine;
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{LinkProps, OutputLink};

/// Stabilization. Emits one frame per input, at full size or at the
/// processor's auto-crop size when full-frame mode is off.
pub struct Stabilization {
    options: StbOptions,
    session: Session,
    previous: PreviousFrame,
}

impl Stabilization {
    pub fn new(options: StbOptions) -> Result<Self> {
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

impl VideoFilter for Stabilization {
    fn name(&self) -> &'static str {
        "stb"
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Bgr48
    }

    fn config_props(&mut self, engine: &dyn Engine, inlink: &LinkProps) -> Result<LinkProps> {
        self.previous.clear();
        let mut outlink = self.session.open(engine, self.options.stream_config(), inlink)?;
        if !self.options.full {
            if let Some((width, height)) = self.session.handle_mut().and_then(|h| h.output_size()) {
                tracing::info!(
                    "stb: auto-crop {}x{} -> {}x{}",
                    inlink.width,
                    inlink.height,
                    width,
                    height
                );
                outlink.width = width;
                outlink.height = height;
            }
        }
        Ok(outlink)
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
