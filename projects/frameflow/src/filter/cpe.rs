use super::drain::{DrainPolicy, DrainReport};
use super::{ignore_output, submit, Session, VideoFilter};
use crate::config::{CpeOptions, StreamConfig};
use crate::engine::Engine;
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{LinkProps, OutputLink};

/// Camera pose estimation. Frames pass through untouched; the engine writes
/// the pose file when the stream ends.
pub struct CamPoseEstimation {
    options: CpeOptions,
    session: Session,
}

impl CamPoseEstimation {
    pub fn new(options: CpeOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            session: Session::new(DrainPolicy::estimation()),
        })
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.session.set_policy(policy);
        self
    }
}

impl VideoFilter for CamPoseEstimation {
    fn name(&self) -> &'static str {
        "cpe"
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Bgr48
    }

    fn config_props(&mut self, engine: &dyn Engine, inlink: &LinkProps) -> Result<LinkProps> {
        let config = self.options.stream_config();
        tracing::debug!(
            "cpe: model {} writing poses to {}",
            config.model,
            self.options.filename.display()
        );
        self.session.open(engine, config, inlink)
    }

    fn filter_frame(&mut self, frame: Frame, out: &mut OutputLink) -> Result<()> {
        let frame = submit(self.session.handle_mut(), frame)?;
        if let Some(handle) = self.session.handle_mut() {
            ignore_output(handle);
        }
        out.push_frame(frame)
    }

    fn drain(&mut self, _out: &mut OutputLink) -> Result<DrainReport> {
        self.session.drain_with(|handle| {
            ignore_output(handle);
            Ok(())
        })
    }

    fn uninit(&mut self) {
        self.session.close();
    }

    fn stream_config(&self) -> Option<&StreamConfig> {
        self.session.config()
    }
}
