//! ABR decision strategies, composed as a single tagged enum rather than a
//! trait-object hierarchy: each variant owns its own state and the
//! scheduler dispatches through `Strategy::pick` without caring which one
//! is active.

pub mod basic;
pub mod netflix;
pub mod rate_map;
pub mod throughput;

use thiserror::Error;

use crate::abr::basic::BasicState;
use crate::abr::netflix::NetflixState;
use crate::abr::rate_map::RateMap;
use crate::abr::throughput::ThroughputWindow;
use crate::abr::weighted::WeightedState;
use crate::catalog::ManifestError;

pub mod weighted;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("ABR state became inconsistent: {0}")]
    Inconsistent(String),
}

/// Everything a strategy needs to make one bitrate decision.
pub struct DecisionContext<'a> {
    pub bitrates: &'a [u64],
    pub throughput: &'a ThroughputWindow,
    pub segment_duration_secs: f64,
    pub buffer_occupancy_segments: f64,
    /// Basic only: a direct throughput-rate override, mutually exclusive
    /// with Basic's mean-time comparator.
    pub parallel_dwn_rate_mbps: Option<f64>,
    /// Weighted/SARA only: the next segment's byte size at each bitrate in
    /// `bitrates` order, when the catalog supplied per-segment sizes.
    /// Falls back to a constant-bitrate estimate when absent.
    pub next_segment_sizes: Option<&'a [u64]>,
    /// Netflix only: buffer/rate observations for the INITIAL state's
    /// `delta_B` computation and the `available`/`phi` buffer fraction.
    pub netflix: Option<crate::abr::netflix::NetflixObservations>,
}

/// One ABR decision: the chosen bitrate plus how many segment-durations the
/// scheduler should pace before dispatching the next download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub bitrate: u64,
    pub pacing_delay_segments: f64,
}

pub enum Strategy {
    Basic(BasicState),
    Weighted(WeightedState),
    Netflix(NetflixState, RateMap),
}

impl Strategy {
    pub fn basic() -> Self {
        Strategy::Basic(BasicState::new())
    }

    pub fn weighted() -> Self {
        Strategy::Weighted(WeightedState::default())
    }

    pub fn netflix(bitrates: &[u64]) -> Result<Self, ManifestError> {
        let rate_map = RateMap::build(bitrates)?;
        Ok(Strategy::Netflix(NetflixState::new(), rate_map))
    }

    pub fn pick(&mut self, ctx: &DecisionContext) -> Result<Decision, StateError> {
        if ctx.bitrates.is_empty() {
            return Err(StateError::Inconsistent(
                "decision requested with no bitrates available".into(),
            ));
        }

        let decision = match self {
            Strategy::Basic(state) => state.pick(
                ctx.bitrates,
                ctx.throughput,
                ctx.segment_duration_secs,
                ctx.buffer_occupancy_segments,
                ctx.parallel_dwn_rate_mbps,
            ),
            Strategy::Weighted(state) => state.pick(
                ctx.bitrates,
                ctx.throughput,
                ctx.segment_duration_secs,
                ctx.buffer_occupancy_segments,
                ctx.next_segment_sizes,
            ),
            Strategy::Netflix(state, rate_map) => {
                let obs = ctx.netflix.as_ref().ok_or_else(|| {
                    StateError::Inconsistent(
                        "netflix strategy invoked without netflix observations".into(),
                    )
                })?;
                state.pick(ctx.bitrates, rate_map, obs)
            }
        };

        if !ctx.bitrates.contains(&decision.bitrate) {
            return Err(StateError::Inconsistent(format!(
                "strategy returned bitrate {} outside the catalog",
                decision.bitrate
            )));
        }
        Ok(decision)
    }

    /// Recovery path for a `StateError`: resets to the strategy's initial
    /// state, which always starts at the minimum bitrate.
    pub fn reset(&mut self) {
        match self {
            Strategy::Basic(state) => *state = BasicState::new(),
            Strategy::Weighted(state) => *state = WeightedState::default(),
            Strategy::Netflix(state, _) => *state = NetflixState::new(),
        }
    }
}
