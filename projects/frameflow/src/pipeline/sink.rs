use super::link::FrameSink;
use crate::frame::{Frame, PixelFormat};
use anyhow::{Context, Result};
use image::{ImageBuffer, Rgb};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    Frame(i64),
    Eof,
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct Collected {
    pub frames: Vec<Frame>,
    pub eof_count: usize,
    /// Frames and end of stream in arrival order.
    pub events: Vec<SinkEvent>,
}

/// Keeps every frame it receives.
#[cfg(test)]
pub struct CollectSink {
    collected: Arc<Mutex<Collected>>,
    reject_pts: Vec<i64>,
}

#[cfg(test)]
impl CollectSink {
    pub fn new() -> (Self, Arc<Mutex<Collected>>) {
        let collected = Arc::new(Mutex::new(Collected::default()));
        (
            Self {
                collected: collected.clone(),
                reject_pts: Vec::new(),
            },
            collected,
        )
    }

    /// Refuses frames with these pts.
    pub fn rejecting(mut self, pts: Vec<i64>) -> Self {
        self.reject_pts = pts;
        self
    }
}

#[cfg(test)]
impl FrameSink for CollectSink {
    fn filter_frame(&mut self, frame: Frame) -> Result<()> {
        if self.reject_pts.contains(&frame.pts) {
            anyhow::bail!("frame {} refused", frame.pts);
        }
        let mut collected = self
            .collected
            .lock()
            .map_err(|_| anyhow::anyhow!("collector poisoned"))?;
        collected.events.push(SinkEvent::Frame(frame.pts));
        collected.frames.push(frame);
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<()> {
        let mut collected = self
            .collected
            .lock()
            .map_err(|_| anyhow::anyhow!("collector poisoned"))?;
        collected.eof_count += 1;
        collected.events.push(SinkEvent::Eof);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SinkStats {
    pub frames: u64,
    pub eof_count: u32,
    pub first_pts: Option<i64>,
    pub last_pts: Option<i64>,
    /// Frames whose pts went backwards.
    pub out_of_order: u64,
    pub width: u32,
    pub height: u32,
    pub dumped: u32,
}

/// Counts frames and optionally writes the first few as 16-bit PNGs.
pub struct StatsSink {
    stats: Arc<Mutex<SinkStats>>,
    dump_dir: Option<PathBuf>,
    dump_limit: u32,
}

impl StatsSink {
    pub fn new(dump_dir: Option<PathBuf>, dump_limit: u32) -> (Self, Arc<Mutex<SinkStats>>) {
        let stats = Arc::new(Mutex::new(SinkStats::default()));
        (
            Self {
                stats: stats.clone(),
                dump_dir,
                dump_limit,
            },
            stats,
        )
    }

    fn dump(&self, frame: &Frame, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating dump directory {}", dir.display()))?;
        let mut samples = frame.packed_samples();
        if frame.format == PixelFormat::Bgr48 {
            for px in samples.chunks_exact_mut(PixelFormat::CHANNELS) {
                px.swap(0, 2);
            }
        }
        let img: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_raw(frame.width, frame.height, samples)
                .ok_or_else(|| anyhow::anyhow!("frame {} has too few samples", frame.pts))?;
        let path = dir.join(format!("frame_{:08}.png", frame.pts));
        img.save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

impl FrameSink for StatsSink {
    fn filter_frame(&mut self, frame: Frame) -> Result<()> {
        let mut stats = self
            .stats
            .lock()
            .map_err(|_| anyhow::anyhow!("stats poisoned"))?;
        if let Some(last) = stats.last_pts {
            if frame.pts < last {
                stats.out_of_order += 1;
            }
        }
        stats.first_pts.get_or_insert(frame.pts);
        stats.last_pts = Some(frame.pts);
        stats.frames += 1;
        stats.width = frame.width;
        stats.height = frame.height;

        if let Some(dir) = &self.dump_dir {
            if stats.dumped < self.dump_limit {
                match self.dump(&frame, dir) {
                    Ok(path) => {
                        stats.dumped += 1;
                        tracing::debug!("Dumped frame {} to {}", frame.pts, path.display());
                    }
                    Err(e) => tracing::warn!("Failed to dump frame {}: {:#}", frame.pts, e),
                }
            }
        }
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<()> {
        let mut stats = self
            .stats
            .lock()
            .map_err(|_| anyhow::anyhow!("stats poisoned"))?;
        stats.eof_count += 1;
        tracing::info!("Sink reached end of stream after {} frames", stats.frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePool;

    #[test]
    fn test_collect_records_event_order() {
        let (sink, collected) = CollectSink::new();
        let mut sink = sink.rejecting(vec![1]);
        let pool = FramePool::new();
        for pts in 0..3 {
            let mut frame = pool.alloc(2, 2, PixelFormat::Rgb48);
            frame.pts = pts;
            let _ = sink.filter_frame(frame);
        }
        sink.end_of_stream().unwrap();
        let collected = collected.lock().unwrap();
        assert_eq!(
            collected.events,
            vec![SinkEvent::Frame(0), SinkEvent::Frame(2), SinkEvent::Eof]
        );
        assert_eq!(collected.eof_count, 1);
    }

    #[test]
    fn test_stats_track_order() {
        let (mut sink, stats) = StatsSink::new(None, 0);
        let pool = FramePool::new();
        for pts in [0, 2, 1, 3] {
            let mut frame = pool.alloc(4, 4, PixelFormat::Rgb48);
            frame.pts = pts;
            sink.filter_frame(frame).unwrap();
        }
        sink.end_of_stream().unwrap();
        let stats = stats.lock().unwrap();
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.out_of_order, 1);
        assert_eq!(stats.first_pts, Some(0));
        assert_eq!(stats.last_pts, Some(3));
        assert_eq!(stats.eof_count, 1);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_dumps_png_up_to_limit() {
        let dir = std::env::temp_dir().join(format!("frameflow-dump-{}", std::process::id()));
        let (mut sink, stats) = StatsSink::new(Some(dir.clone()), 1);
        let pool = FramePool::new();
        for pts in 0..2 {
            let mut frame = pool.alloc(3, 2, PixelFormat::Bgr48);
            frame.data[0] = 1000;
            frame.pts = pts;
            sink.filter_frame(frame).unwrap();
        }
        assert_eq!(stats.lock().unwrap().dumped, 1);

        let img = image::open(dir.join("frame_00000000.png")).unwrap().into_rgb16();
        assert_eq!(img.dimensions(), (3, 2));
        // BGR input: blue sample lands in the third channel
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 1000]);
        assert!(!dir.join("frame_00000001.png").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
