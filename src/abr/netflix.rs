//! Netflix buffer-based ABR strategy: an INITIAL/RUNNING state machine.
//! INITIAL steps the bitrate up gradually while the download rate comfortably
//! outpaces playback, then hands off to a strict floor lookup against the
//! rate map, keyed by buffer-fraction, once RUNNING.

use crate::abr::rate_map::RateMap;
use crate::abr::Decision;
use crate::config::{NETFLIX_BUFFER_SIZE, NETFLIX_INITIAL_BUFFER, NETFLIX_INITIAL_FACTOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    Running,
}

#[derive(Debug, Clone)]
pub struct NetflixState {
    phase: Phase,
    current_index: usize,
}

/// Everything `NetflixState::pick` needs beyond the sorted bitrate list and
/// rate map: the buffer signal and the last completed segment's observed
/// download rate, from which `delta_B` (spec.md §4.2 INITIAL) is derived.
pub struct NetflixObservations {
    /// Raw playback-buffer depth, in segments.
    pub buffer_depth_segments: f64,
    /// The buffer's own `initial_buffer` threshold; subtracted from raw
    /// depth to get the "available" occupancy the Netflix state machine
    /// reasons about.
    pub buffer_initial_buffer_segments: f64,
    pub segment_duration_secs: f64,
    /// `avg_size[current_bitrate]`: mean segment size, in bytes, for the
    /// bitrate currently selected.
    pub avg_size_bytes_for_current_bitrate: f64,
    /// Bytes/sec observed downloading the most recently completed segment.
    /// Zero (no sample yet) yields `delta_B = 0`.
    pub last_segment_rate_bytes_per_sec: f64,
}

impl NetflixState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Initial,
            current_index: 0,
        }
    }

    pub fn pick(
        &mut self,
        bitrates: &[u64],
        rate_map: &RateMap,
        obs: &NetflixObservations,
    ) -> Decision {
        // current_bitrate not in the catalog any more (e.g. a manifest
        // refresh dropped a rendition): fall back to minimum, keep state.
        self.current_index = self.current_index.min(bitrates.len().saturating_sub(1));

        let available =
            (obs.buffer_depth_segments - obs.buffer_initial_buffer_segments).max(0.0);
        let phi = available / NETFLIX_BUFFER_SIZE;

        let bitrate = match self.phase {
            Phase::Initial => {
                let delta_b = if obs.last_segment_rate_bytes_per_sec > 0.0 {
                    obs.segment_duration_secs
                        - obs.avg_size_bytes_for_current_bitrate
                            / obs.last_segment_rate_bytes_per_sec
                } else {
                    0.0
                };

                if delta_b > NETFLIX_INITIAL_FACTOR * obs.segment_duration_secs
                    && self.current_index + 1 < bitrates.len()
                {
                    self.current_index += 1;
                }
                let tentative = bitrates[self.current_index];

                if available >= NETFLIX_INITIAL_BUFFER {
                    let rate_map_bitrate = rate_map.lookup_clamped(phi);
                    if rate_map_bitrate > tentative {
                        self.phase = Phase::Running;
                        if let Some(idx) = bitrates.iter().position(|&b| b == rate_map_bitrate) {
                            self.current_index = idx;
                        }
                        rate_map_bitrate
                    } else {
                        tentative
                    }
                } else {
                    tentative
                }
            }
            Phase::Running => {
                let bitrate = rate_map.lookup_clamped(phi);
                if let Some(idx) = bitrates.iter().position(|&b| b == bitrate) {
                    self.current_index = idx;
                }
                bitrate
            }
        };

        // once the buffer reaches BUFFER_SIZE the scheduler must pace by
        // (depth - BUFFER_SIZE + 1) segment-durations; see spec S5.
        let pacing_delay_segments = if obs.buffer_depth_segments >= NETFLIX_BUFFER_SIZE {
            obs.buffer_depth_segments - NETFLIX_BUFFER_SIZE + 1.0
        } else {
            0.0
        };

        Decision { bitrate, pacing_delay_segments }
    }
}

impl Default for NetflixState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(buffer_depth_segments: f64) -> NetflixObservations {
        NetflixObservations {
            buffer_depth_segments,
            buffer_initial_buffer_segments: 0.0,
            segment_duration_secs: 4.0,
            avg_size_bytes_for_current_bitrate: 0.0,
            last_segment_rate_bytes_per_sec: 0.0,
        }
    }

    #[test]
    fn stays_at_lowest_bitrate_until_initial_buffer_fills() {
        let mut state = NetflixState::new();
        let bitrates = [500_000, 1_000_000, 2_000_000];
        let rate_map = RateMap::build(&bitrates).unwrap();
        let picked = state.pick(&bitrates, &rate_map, &obs(0.0)).bitrate;
        assert_eq!(picked, 500_000);
    }

    #[test]
    fn steps_up_during_initial_when_delta_b_is_large() {
        let mut state = NetflixState::new();
        let bitrates = [500_000, 1_000_000, 2_000_000];
        let rate_map = RateMap::build(&bitrates).unwrap();
        // avg size for current (500_000) at 4s would be 250_000 bytes at the
        // nominal bitrate; a rate far above that makes delta_B close to the
        // full segment duration, well past the 0.5x threshold.
        let mut o = obs(0.0);
        o.avg_size_bytes_for_current_bitrate = 100_000.0;
        o.last_segment_rate_bytes_per_sec = 10_000_000.0;
        let picked = state.pick(&bitrates, &rate_map, &o).bitrate;
        assert_eq!(picked, 1_000_000);
    }

    #[test]
    fn switches_to_running_once_available_crosses_initial_buffer_and_rate_map_exceeds() {
        let mut state = NetflixState::new();
        let bitrates = [500_000, 1_000_000, 2_000_000];
        let rate_map = RateMap::build(&bitrates).unwrap();
        // phi = 0.7 (available = 21 of 30) sits past this rate map's
        // intermediate marker (0.6375), so the rate-map bitrate (1_000_000)
        // exceeds the INITIAL tentative pick (500_000, delta_B is zero here)
        // and the strategy adopts it and transitions to RUNNING.
        let o = obs(0.7 * NETFLIX_BUFFER_SIZE);
        let decision = state.pick(&bitrates, &rate_map, &o);
        assert_eq!(decision.bitrate, 1_000_000);
        assert_eq!(state.phase, Phase::Running);
    }

    #[test]
    fn running_phase_uses_floor_lookup() {
        let mut state = NetflixState {
            phase: Phase::Running,
            current_index: 0,
        };
        let bitrates = [500_000, 1_000_000, 2_000_000];
        let rate_map = RateMap::build(&bitrates).unwrap();
        let depth = NETFLIX_BUFFER_SIZE * 0.95;
        let picked = state.pick(&bitrates, &rate_map, &obs(depth)).bitrate;
        assert_eq!(picked, rate_map.lookup_clamped(0.95));
    }

    #[test]
    fn paces_once_buffer_reaches_buffer_size() {
        // S5: BUFFER_SIZE = 10, depth = 12 -> pacing = (12 - 10 + 1) = 3
        // segment-durations (scaled against NETFLIX_BUFFER_SIZE here since
        // that constant, not a literal 10, is this strategy's BUFFER_SIZE).
        let mut state = NetflixState {
            phase: Phase::Running,
            current_index: 2,
        };
        let bitrates = [500_000, 1_000_000, 2_000_000];
        let rate_map = RateMap::build(&bitrates).unwrap();
        let depth = NETFLIX_BUFFER_SIZE + 2.0;
        let decision = state.pick(&bitrates, &rate_map, &obs(depth));
        assert_eq!(decision.pacing_delay_segments, 3.0);
    }

    #[test]
    fn no_pacing_below_buffer_size() {
        let mut state = NetflixState {
            phase: Phase::Running,
            current_index: 0,
        };
        let bitrates = [500_000, 1_000_000, 2_000_000];
        let rate_map = RateMap::build(&bitrates).unwrap();
        let decision = state.pick(&bitrates, &rate_map, &obs(NETFLIX_BUFFER_SIZE - 1.0));
        assert_eq!(decision.pacing_delay_segments, 0.0);
    }

    #[test]
    fn single_bitrate_is_returned_forever() {
        let mut state = NetflixState::new();
        let bitrates = [750_000];
        let rate_map = RateMap::build(&bitrates).unwrap();
        for depth in [0.0, 5.0, NETFLIX_BUFFER_SIZE, NETFLIX_BUFFER_SIZE * 2.0] {
            assert_eq!(state.pick(&bitrates, &rate_map, &obs(depth)).bitrate, 750_000);
        }
    }
}
