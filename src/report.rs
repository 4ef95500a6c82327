//! Report emitter: accumulates per-segment download records behind a
//! single owner and serializes a JSON sidecar at session end.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::PlaybackMode;

#[derive(Debug, Clone, Serialize)]
pub struct SegmentRecord {
    pub url: String,
    pub size_bytes: usize,
    pub duration_secs: f64,
    pub rate_mbps: f64,
    pub rate_mbytes_per_sec: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    playback_mode: String,
    available_bitrates_bps: Vec<u64>,
    segments: Vec<SegmentRecord>,
    up_shifts: u64,
    down_shifts: u64,
}

struct Inner {
    report: Report,
}

/// The single owner of report state, shared through the session as an
/// `Arc<ReportHandle>` rather than behind a global.
pub struct ReportHandle {
    inner: Mutex<Inner>,
}

impl ReportHandle {
    pub fn new(playback_mode: PlaybackMode, available_bitrates_bps: Vec<u64>) -> Self {
        let playback_mode = match playback_mode {
            PlaybackMode::Basic => "basic",
            PlaybackMode::Sara => "sara",
            PlaybackMode::Netflix => "netflix",
            PlaybackMode::All => "all",
        }
        .to_string();

        Self {
            inner: Mutex::new(Inner {
                report: Report {
                    playback_mode,
                    available_bitrates_bps,
                    segments: Vec::new(),
                    up_shifts: 0,
                    down_shifts: 0,
                },
            }),
        }
    }

    pub fn record_segment(
        &self,
        url: String,
        size_bytes: usize,
        duration_secs: f64,
    ) {
        let rate_bytes_per_sec = if duration_secs > 0.0 {
            size_bytes as f64 / duration_secs
        } else {
            0.0
        };
        let rate_bits_per_sec = rate_bytes_per_sec * 8.0;

        let record = SegmentRecord {
            url,
            size_bytes,
            duration_secs,
            rate_mbps: rate_bits_per_sec / 1_000_000.0,
            rate_mbytes_per_sec: rate_bytes_per_sec / (1024.0 * 1024.0),
            timestamp: Utc::now(),
        };
        self.inner.lock().report.segments.push(record);
    }

    /// Records a bitrate change from `previous` to `next`; a no-op if they
    /// are equal (matches the reference client's `previous_bitrate <
    /// current_bitrate` / `>` pair, which only counts actual shifts).
    pub fn record_bitrate_shift(&self, previous: u64, next: u64) {
        let mut inner = self.inner.lock();
        if next > previous {
            inner.report.up_shifts += 1;
        } else if next < previous {
            inner.report.down_shifts += 1;
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let inner = self.inner.lock();
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &inner.report)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_segments_and_shifts() {
        let handle = ReportHandle::new(PlaybackMode::Sara, vec![500_000, 1_000_000]);
        handle.record_segment("http://x/seg-1.m4s".into(), 1_000_000, 4.0);
        handle.record_bitrate_shift(500_000, 1_000_000);
        handle.record_bitrate_shift(1_000_000, 500_000);
        handle.record_bitrate_shift(500_000, 500_000);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        handle.write_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"up_shifts\": 1"));
        assert!(contents.contains("\"down_shifts\": 1"));
        assert!(contents.contains("seg-1.m4s"));
    }
}
