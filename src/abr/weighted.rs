//! Weighted/SARA ABR strategy: picks the highest bitrate whose predicted
//! download time, computed from the weighted-mean throughput estimator,
//! fits within a safety-factored share of the current buffer depth.

use crate::abr::throughput::ThroughputWindow;
use crate::abr::Decision;
use crate::config::{SARA_SAFETY_FACTOR, SARA_UPPER_WATERMARK};

#[derive(Debug, Clone, Default)]
pub struct WeightedState;

impl WeightedState {
    /// `next_segment_sizes`, when the catalog supplied per-segment byte
    /// sizes, gives the real `S_b` for each bitrate in `bitrates` order.
    /// Absent that, `S_b` is estimated from a constant-bitrate assumption:
    /// `8*S_b = bitrate * segment_duration`.
    pub fn pick(
        &self,
        bitrates: &[u64],
        throughput: &ThroughputWindow,
        segment_duration_secs: f64,
        buffer_depth_segments: f64,
        next_segment_sizes: Option<&[u64]>,
    ) -> Decision {
        let est_mbps = throughput
            .weighted_mean()
            .unwrap_or_else(|| bitrates[0] as f64 / 1_000_000.0);
        let est_bps = est_mbps * 1_000_000.0;
        let buffer_depth_secs = buffer_depth_segments * segment_duration_secs;
        let budget_secs = buffer_depth_secs * SARA_SAFETY_FACTOR;

        let bitrate = bitrates
            .iter()
            .enumerate()
            .rev()
            .find(|(i, &b)| {
                let predicted_secs = match next_segment_sizes.and_then(|sizes| sizes.get(*i)) {
                    Some(&size_bytes) => (8.0 * size_bytes as f64) / est_bps,
                    None => (b as f64 * segment_duration_secs) / est_bps,
                };
                predicted_secs <= budget_secs
            })
            .map(|(_, &b)| b)
            .unwrap_or(bitrates[0]);

        let pacing_delay_segments =
            (buffer_depth_segments - SARA_UPPER_WATERMARK as f64).max(0.0);

        Decision { bitrate, pacing_delay_segments }
    }
}
