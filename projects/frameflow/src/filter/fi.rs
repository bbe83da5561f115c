use super::drain::{DrainPolicy, DrainReport};
use super::retiming::RetimingSchedule;
use super::{finish_synthesis, synthesize, PreviousFrame, Session, VideoFilter};
use crate::config::{FiOptions, StreamConfig};
use crate::engine::Engine;
use crate::error::Result;
use crate::frame::{Frame, PixelFormat};
use crate::pipeline::{LinkProps, OutputLink};

/// Frame interpolation. Emits frames at the retimed rate, anchored on the
/// most recently submitted input.
pub struct FrameInterpolation {
    options: FiOptions,
    session: Session,
    previous: PreviousFrame,
    schedule: Option<RetimingSchedule>,
}

impl FrameInterpolation {
    pub fn new(options: FiOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            session: Session::new(DrainPolicy::postflight()),
            previous: PreviousFrame::default(),
            schedule: None,
        })
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.session.set_policy(policy);
        self
    }

    pub fn schedule(&self) -> Option<&RetimingSchedule> {
        self.schedule.as_ref()
    }
}

impl VideoFilter for FrameInterpolation {
    fn name(&self) -> &'static str {
        "fi"
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb48
    }

    fn config_props(&mut self, engine: &dyn Engine, inlink: &LinkProps) -> Result<LinkProps> {
        self.previous.clear();
        let schedule =
            RetimingSchedule::compute(self.options.slowmo, self.options.fps, inlink.frame_rate)?;
        let config = self.options.stream_config(&schedule);
        let mut outlink = self.session.open(engine, config, inlink)?;
        outlink.time_base = inlink.time_base;
        outlink.frame_rate = schedule.output_frame_rate;
        tracing::debug!(
            "fi: time base {} -> {}, frame rate {} -> {}",
            inlink.time_base,
            outlink.time_base,
            inlink.frame_rate,
            outlink.frame_rate
        );
        self.schedule = Some(schedule);
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
