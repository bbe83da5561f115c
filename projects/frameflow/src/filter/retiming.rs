use crate::error::{FilterError, Result};
use crate::frame::Rational;
use serde::Serialize;

/// Spacing of synthesized frames, in input-frame units, for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetimingSchedule {
    pub fps_factor: f64,
    /// Distance to an input frame under which the input is copied as is.
    pub threshold: f64,
    pub output_frame_rate: Rational,
}

impl RetimingSchedule {
    /// `target` of zero keeps the input rate and only applies slow motion.
    pub fn compute(slowmo: f64, target: Rational, input_rate: Rational) -> Result<Self> {
        if !slowmo.is_finite() || slowmo <= 0.0 {
            return Err(FilterError::Configuration(format!(
                "slow-motion factor must be positive, got {}",
                slowmo
            )));
        }
        if !input_rate.is_specified() {
            return Err(FilterError::Configuration(format!(
                "input frame rate {} is not usable for retiming",
                input_rate
            )));
        }
        if target.num < 0 || target.den <= 0 {
            return Err(FilterError::Configuration(format!(
                "target frame rate {} is malformed",
                target
            )));
        }

        let (fps_factor, output_frame_rate) = if target.is_specified() {
            let ratio = target.checked_div(&input_rate).ok_or_else(|| {
                FilterError::Configuration(format!("cannot convert {} to {}", input_rate, target))
            })?;
            (1.0 / (slowmo * ratio.to_f64()), target)
        } else {
            (1.0 / slowmo, input_rate)
        };

        if !fps_factor.is_finite() || fps_factor <= 0.0 {
            return Err(FilterError::Configuration(format!(
                "fps factor {} derived from slowmo {} and rate {} is invalid",
                fps_factor, slowmo, target
            )));
        }

        let schedule = Self {
            fps_factor,
            threshold: fps_factor * 0.3,
            output_frame_rate,
        };
        tracing::debug!(
            "Retiming {} -> {}: fps factor {:.4} ({:.2} frames per input)",
            input_rate,
            output_frame_rate,
            fps_factor,
            1.0 / fps_factor
        );
        Ok(schedule)
    }
}
