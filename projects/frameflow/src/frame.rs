// Frame model shared by sources, stages and sinks
//
// Frames move by value: whoever holds a `Frame` owns it, and pushing it
// downstream hands it over for good. Frames allocated from a `FramePool` are
// counted while alive so leaks and double releases show up in the counters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Interleaved 16-bit-per-channel layouts understood by the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb48,
    Bgr48,
}

impl PixelFormat {
    /// Samples per pixel.
    pub const CHANNELS: usize = 3;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgb48 => "rgb48",
            Self::Bgr48 => "bgr48",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact rational used for time bases, frame rates and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// A rate or ratio counts as specified only when both terms are positive.
    pub fn is_specified(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// `self / other`, or `None` when either side has a zero term.
    pub fn checked_div(&self, other: &Rational) -> Option<Rational> {
        if self.den == 0 || other.den == 0 || other.num == 0 {
            return None;
        }
        let num = self.num.checked_mul(other.den)?;
        let den = self.den.checked_mul(other.num)?;
        Rational::new(num, den).reduced()
    }

    /// Lowest terms with a positive denominator, or `None` if the sign flip overflows.
    fn reduced(self) -> Option<Rational> {
        let (mut num, mut den) = (self.num, self.den);
        if den < 0 {
            num = num.checked_neg()?;
            den = den.checked_neg()?;
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs());
        if g > 1 {
            num /= g as i64;
            den /= g as i64;
        }
        Some(Rational { num, den })
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid rational '{0}', expected N, N/D or a decimal")]
pub struct ParseRationalError(String);

impl FromStr for Rational {
    type Err = ParseRationalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ParseRationalError(s.to_string());

        if let Some((num, den)) = s.split_once(&['/', ':'][..]) {
            let num: i64 = num.trim().parse().map_err(|_| invalid())?;
            let den: i64 = den.trim().parse().map_err(|_| invalid())?;
            if den == 0 {
                return Err(invalid());
            }
            return Rational::new(num, den).reduced().ok_or_else(invalid);
        }

        if let Ok(whole) = s.parse::<i64>() {
            return Ok(Rational::new(whole, 1));
        }

        let value: f64 = s.parse().map_err(|_| invalid())?;
        if !value.is_finite() {
            return Err(invalid());
        }
        Rational::new((value * 1000.0).round() as i64, 1000)
            .reduced()
            .ok_or_else(invalid)
    }
}

/// Live-allocation counter shared by every frame a pool hands out.
#[derive(Debug, Clone, Default)]
pub struct FramePool {
    live: Arc<AtomicUsize>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a zeroed frame with a tightly packed line size.
    pub fn alloc(&self, width: u32, height: u32, format: PixelFormat) -> Frame {
        let line_size = width as usize * PixelFormat::CHANNELS;
        let data = vec![0u16; line_size * height as usize];
        self.from_samples(width, height, format, data)
    }

    pub fn from_samples(&self, width: u32, height: u32, format: PixelFormat, data: Vec<u16>) -> Frame {
        let mut frame = Frame::new(width, height, format, data);
        frame.lease = Some(Lease::acquire(self.live.clone()));
        frame
    }

    /// Frames from this pool that have not been dropped yet.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct Lease(Arc<AtomicUsize>);

impl Lease {
    fn acquire(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Lease(counter)
    }
}

impl Clone for Lease {
    fn clone(&self) -> Self {
        Lease::acquire(self.0.clone())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A decoded video frame with interleaved 16-bit samples.
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: i64,
    pub sample_aspect_ratio: Rational,
    /// Samples per row, at least `width * 3`.
    pub line_size: usize,
    pub data: Vec<u16>,
    lease: Option<Lease>,
}

impl Frame {
    /// Builds an unpooled frame with a tightly packed line size.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u16>) -> Self {
        Self {
            width,
            height,
            format,
            pts: 0,
            sample_aspect_ratio: Rational::new(1, 1),
            line_size: width as usize * PixelFormat::CHANNELS,
            data,
            lease: None,
        }
    }

    /// Copies the timing and geometry metadata of `other`, leaving pixels alone.
    pub fn copy_props_from(&mut self, other: &Frame) {
        self.pts = other.pts;
        self.sample_aspect_ratio = other.sample_aspect_ratio;
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u16; 3] {
        let offset = y as usize * self.line_size + x as usize * PixelFormat::CHANNELS;
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    /// Row-major samples without line padding.
    pub fn packed_samples(&self) -> Vec<u16> {
        let row = self.width as usize * PixelFormat::CHANNELS;
        if self.line_size == row {
            return self.data[..row * self.height as usize].to_vec();
        }
        (0..self.height as usize)
            .flat_map(|y| self.data[y * self.line_size..y * self.line_size + row].iter().copied())
            .collect()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("pts", &self.pts)
            .field("line_size", &self.line_size)
            .field("pooled", &self.lease.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_tracks_live_frames() {
        let pool = FramePool::new();
        let a = pool.alloc(4, 2, PixelFormat::Rgb48);
        let b = pool.alloc(4, 2, PixelFormat::Rgb48);
        assert_eq!(pool.live(), 2);

        drop(a);
        assert_eq!(pool.live(), 1);

        let c = b.clone();
        assert_eq!(pool.live(), 2);
        drop(b);
        drop(c);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_alloc_is_tightly_packed() {
        let frame = FramePool::new().alloc(5, 3, PixelFormat::Bgr48);
        assert_eq!(frame.line_size, 15);
        assert_eq!(frame.data.len(), 45);
        assert_eq!(frame.packed_samples().len(), 45);
    }

    #[test]
    fn test_rational_parse() {
        assert_eq!("30".parse::<Rational>().unwrap(), Rational::new(30, 1));
        assert_eq!("30000/1001".parse::<Rational>().unwrap(), Rational::new(30000, 1001));
        assert_eq!("60:2".parse::<Rational>().unwrap(), Rational::new(30, 1));
        assert_eq!("23.976".parse::<Rational>().unwrap(), Rational::new(2997, 125));
        assert!("1/0".parse::<Rational>().is_err());
        assert!("fast".parse::<Rational>().is_err());
    }

    #[test]
    fn test_rational_parse_rejects_unrepresentable_sign() {
        assert!("-9223372036854775808/-1".parse::<Rational>().is_err());
        assert_eq!("-30/-1".parse::<Rational>().unwrap(), Rational::new(30, 1));
        assert_eq!("9223372036854775807/-1".parse::<Rational>().unwrap(), Rational::new(-i64::MAX, 1));
    }

    #[test]
    fn test_rational_division() {
        let out = Rational::new(60, 1);
        let input = Rational::new(30, 1);
        assert_eq!(out.checked_div(&input), Some(Rational::new(2, 1)));
        assert_eq!(out.checked_div(&Rational::ZERO), None);
        assert!(!Rational::ZERO.is_specified());
    }
}
