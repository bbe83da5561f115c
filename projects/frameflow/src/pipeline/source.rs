use super::link::{FrameSource, LinkProps};
use crate::error::Result;
use crate::frame::{Frame, FramePool, PixelFormat, Rational};
#[cfg(test)]
use std::collections::VecDeque;

/// Ticks per frame in the synthetic clip's time base.
const PTS_STEP: i64 = 1000;

/// Generates a moving diagonal gradient, one frame per request.
pub struct SyntheticSource {
    props: LinkProps,
    total: u64,
    next: u64,
    pool: FramePool,
}

impl SyntheticSource {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        frame_rate: Rational,
        total: u64,
        pool: FramePool,
    ) -> Self {
        let time_base = Rational::new(frame_rate.den, frame_rate.num.saturating_mul(PTS_STEP));
        Self {
            props: LinkProps {
                width,
                height,
                format,
                time_base,
                frame_rate,
                sample_aspect_ratio: Rational::new(1, 1),
            },
            total,
            next: 0,
            pool,
        }
    }

    fn render(&self, index: u64) -> Frame {
        let mut frame = self
            .pool
            .alloc(self.props.width, self.props.height, self.props.format);
        let shift = index as usize * 4;
        let line_size = frame.line_size;
        for y in 0..frame.height as usize {
            let row = &mut frame.data[y * line_size..(y + 1) * line_size];
            for (x, px) in row.chunks_exact_mut(PixelFormat::CHANNELS).enumerate() {
                let base = ((x + y + shift) * 257) % 65536;
                px[0] = base as u16;
                px[1] = ((base + 21845) % 65536) as u16;
                px[2] = (65535 - base) as u16;
            }
        }
        frame.pts = index as i64 * PTS_STEP;
        frame
    }
}

impl FrameSource for SyntheticSource {
    fn props(&self) -> LinkProps {
        self.props.clone()
    }

    fn request_frame(&mut self) -> Result<Option<Frame>> {
        if self.next >= self.total {
            return Ok(None);
        }
        let frame = self.render(self.next);
        self.next += 1;
        Ok(Some(frame))
    }
}

/// Replays a fixed list of frames.
#[cfg(test)]
pub struct VecSource {
    props: LinkProps,
    frames: VecDeque<Frame>,
}

#[cfg(test)]
impl VecSource {
    pub fn new(props: LinkProps, frames: Vec<Frame>) -> Self {
        Self {
            props,
            frames: frames.into(),
        }
    }
}

#[cfg(test)]
impl FrameSource for VecSource {
    fn props(&self) -> LinkProps {
        self.props.clone()
    }

    fn request_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_clip_timing() {
        let pool = FramePool::new();
        let mut source =
            SyntheticSource::new(8, 4, PixelFormat::Bgr48, Rational::new(30, 1), 3, pool.clone());
        assert_eq!(source.props().time_base, Rational::new(1, 30000));

        let mut pts = Vec::new();
        while let Some(frame) = source.request_frame().unwrap() {
            assert_eq!(frame.format, PixelFormat::Bgr48);
            pts.push(frame.pts);
        }
        assert_eq!(pts, vec![0, 1000, 2000]);
        assert!(source.request_frame().unwrap().is_none());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_frames_change_over_time() {
        let source =
            SyntheticSource::new(8, 4, PixelFormat::Rgb48, Rational::new(24, 1), 2, FramePool::new());
        assert_ne!(source.render(0).data, source.render(1).data);
    }
}
