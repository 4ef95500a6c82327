//! Basic ABR strategy: steps the current bitrate index up or down by one
//! level based on how the average of recent segment download times
//! compares to playback time, with an optional direct-rate override mode.

use std::collections::VecDeque;

use crate::abr::throughput::ThroughputWindow;
use crate::abr::Decision;
use crate::config::{BASIC_SAMPLE_COUNT, BASIC_STEP_UP_FRACTION, BASIC_THRESHOLD};

#[derive(Debug, Clone)]
pub struct BasicState {
    current_index: usize,
    /// Wall-clock seconds for each of the last `BASIC_SAMPLE_COUNT`
    /// completed segments, oldest first — spec.md §3's "vector of recent
    /// segment download times".
    recent_download_times: VecDeque<f64>,
    /// Byte size of each of those same segments; not read by `pick` today
    /// (the comparator only needs elapsed time) but carried per the ABR
    /// State shape in spec.md §3 and available to future size-aware
    /// variants of the comparator.
    recent_segment_sizes: VecDeque<u64>,
}

impl BasicState {
    pub fn new() -> Self {
        Self {
            current_index: 0,
            recent_download_times: VecDeque::with_capacity(BASIC_SAMPLE_COUNT),
            recent_segment_sizes: VecDeque::with_capacity(BASIC_SAMPLE_COUNT),
        }
    }

    /// Called by the scheduler after every successfully completed segment
    /// download while Basic is the active strategy, regardless of whether
    /// that decision came from the rate-override path or the comparator —
    /// the window always reflects the most recent real transfers.
    pub fn record_completion(&mut self, size_bytes: u64, elapsed_secs: f64) {
        if self.recent_download_times.len() == BASIC_SAMPLE_COUNT {
            self.recent_download_times.pop_front();
            self.recent_segment_sizes.pop_front();
        }
        self.recent_download_times.push_back(elapsed_secs);
        self.recent_segment_sizes.push_back(size_bytes);
    }

    fn average_download_time(&self) -> Option<f64> {
        if self.recent_download_times.is_empty() {
            return None;
        }
        let sum: f64 = self.recent_download_times.iter().sum();
        Some(sum / self.recent_download_times.len() as f64)
    }

    /// `parallel_dwn_rate_mbps`, when set, bypasses the mean-time comparator
    /// entirely and picks the highest bitrate the given rate can sustain —
    /// the two modes are never combined (spec.md §9 Open Question 3).
    /// Pacing delay is `max(0, buffer_depth - BASIC_THRESHOLD)` regardless
    /// of which path chose the bitrate.
    pub fn pick(
        &mut self,
        bitrates: &[u64],
        _throughput: &ThroughputWindow,
        segment_duration_secs: f64,
        buffer_depth_segments: f64,
        parallel_dwn_rate_mbps: Option<f64>,
    ) -> Decision {
        self.current_index = self.current_index.min(bitrates.len() - 1);

        if let Some(rate_mbps) = parallel_dwn_rate_mbps {
            self.current_index = Self::index_for_rate(bitrates, rate_mbps);
            return self.decision(bitrates, buffer_depth_segments);
        }

        if let Some(avg_secs) = self.average_download_time() {
            if avg_secs > segment_duration_secs {
                self.current_index = self.current_index.saturating_sub(1);
            } else if avg_secs < BASIC_STEP_UP_FRACTION * segment_duration_secs
                && self.current_index + 1 < bitrates.len()
            {
                self.current_index += 1;
            }
        }

        self.decision(bitrates, buffer_depth_segments)
    }

    fn decision(&self, bitrates: &[u64], buffer_depth_segments: f64) -> Decision {
        Decision {
            bitrate: bitrates[self.current_index],
            pacing_delay_segments: (buffer_depth_segments - BASIC_THRESHOLD as f64).max(0.0),
        }
    }

    fn index_for_rate(bitrates: &[u64], rate_mbps: f64) -> usize {
        let rate_bps = rate_mbps * 1_000_000.0;
        bitrates
            .iter()
            .rposition(|&b| (b as f64) <= rate_bps)
            .unwrap_or(0)
    }
}

impl Default for BasicState {
    fn default() -> Self {
        Self::new()
    }
}
