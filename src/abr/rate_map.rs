//! Rate Map Builder: maps a buffer-fraction marker to the bitrate the
//! Netflix strategy should pick once occupancy crosses that marker.
//!
//! Grounded in the reference `get_rate_map`: the reservoir marker keys the
//! lowest bitrate, the cushion marker keys the highest, and any bitrates in
//! between get equally spaced markers across `(reservoir, cushion)`.

use std::collections::BTreeMap;

use crate::catalog::ManifestError;
use crate::config::{NETFLIX_CUSHION, NETFLIX_RESERVOIR};

/// Buffer-fraction -> bitrate (bps), ordered ascending by marker.
#[derive(Debug, Clone)]
pub struct RateMap {
    entries: BTreeMap<OrderedF64, u64>,
}

/// `f64` wrapper giving `BTreeMap` a total order; markers are always finite
/// values built from division, never NaN.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct OrderedF64(f64);
impl Eq for OrderedF64 {}
impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl RateMap {
    /// Builds the rate map for a sorted-ascending list of bitrates. Rejects
    /// an empty list up front rather than deferring to an out-of-bounds
    /// index on the first lookup.
    pub fn build(bitrates: &[u64]) -> Result<Self, ManifestError> {
        if bitrates.is_empty() {
            return Err(ManifestError::NoRepresentations);
        }

        let mut sorted = bitrates.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut entries = BTreeMap::new();
        entries.insert(OrderedF64(NETFLIX_RESERVOIR), sorted[0]);
        entries.insert(OrderedF64(NETFLIX_CUSHION), *sorted.last().unwrap());

        // `sorted.len() - 1` only; for a single bitrate `sorted.len()` is 1
        // and there is no intermediate range at all (slicing `[1..0]` would
        // panic on a reversed range).
        let intermediate: &[u64] = if sorted.len() > 2 { &sorted[1..sorted.len() - 1] } else { &[] };
        if !intermediate.is_empty() {
            let span = NETFLIX_CUSHION - NETFLIX_RESERVOIR;
            let step = span / (intermediate.len() + 1) as f64;
            for (i, bitrate) in intermediate.iter().enumerate() {
                let marker = NETFLIX_RESERVOIR + step * (i + 1) as f64;
                entries.insert(OrderedF64(marker), *bitrate);
            }
        }

        Ok(Self { entries })
    }

    /// Looks up the bitrate for a buffer-fraction `phi`, using strict
    /// floor semantics: the highest marker strictly below `phi`. Returns
    /// the lowest bitrate if `phi` is at or below every marker.
    pub fn lookup(&self, phi: f64) -> u64 {
        self.entries
            .iter()
            .rev()
            .find(|(marker, _)| marker.0 < phi)
            .map(|(_, bitrate)| *bitrate)
            .unwrap_or_else(|| *self.entries.values().next().unwrap())
    }

    /// `get_rate_netflix`'s full decision: `phi <= reservoir` clamps to the
    /// minimum bitrate, `phi >= cushion` clamps to the maximum, and only the
    /// interior is resolved by the strict-floor `lookup`. Distinct from
    /// `lookup` itself, which has no special-cased boundary and is used
    /// directly where the spec's round-trip/floor properties are tested.
    pub fn lookup_clamped(&self, phi: f64) -> u64 {
        if phi <= NETFLIX_RESERVOIR {
            self.reservoir_bitrate()
        } else if phi >= NETFLIX_CUSHION {
            self.cushion_bitrate()
        } else {
            self.lookup(phi)
        }
    }

    pub fn reservoir_bitrate(&self) -> u64 {
        *self.entries.get(&OrderedF64(NETFLIX_RESERVOIR)).unwrap()
    }

    pub fn cushion_bitrate(&self) -> u64 {
        *self.entries.get(&OrderedF64(NETFLIX_CUSHION)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_bitrate_list() {
        let err = RateMap::build(&[]).unwrap_err();
        assert!(matches!(err, ManifestError::NoRepresentations));
    }

    #[test]
    fn single_bitrate_maps_both_endpoints_to_it() {
        let map = RateMap::build(&[750_000]).unwrap();
        assert_eq!(map.reservoir_bitrate(), 750_000);
        assert_eq!(map.cushion_bitrate(), 750_000);
        assert_eq!(map.lookup_clamped(0.5), 750_000);
    }

    #[test]
    fn two_bitrates_get_endpoint_markers_only() {
        let map = RateMap::build(&[500_000, 2_000_000]).unwrap();
        assert_eq!(map.reservoir_bitrate(), 500_000);
        assert_eq!(map.cushion_bitrate(), 2_000_000);
    }

    #[test]
    fn intermediate_bitrates_get_equally_spaced_markers() {
        let map = RateMap::build(&[100, 200, 300, 400]).unwrap();
        assert_eq!(map.reservoir_bitrate(), 100);
        assert_eq!(map.cushion_bitrate(), 400);
        // below every marker -> floor falls back to the lowest bitrate
        assert_eq!(map.lookup(0.0), 100);
        // above the cushion marker -> highest bitrate
        assert_eq!(map.lookup(1.0), 400);
    }

    #[test]
    fn lookup_is_strict_floor_at_equality() {
        let map = RateMap::build(&[100, 400]).unwrap();
        // exactly at the reservoir marker: not strictly less, falls through
        // to the lowest bitrate via the fallback path.
        assert_eq!(map.lookup(NETFLIX_RESERVOIR), 100);
    }

    #[test]
    fn lookup_clamped_is_inclusive_at_both_boundaries() {
        let map = RateMap::build(&[100, 200, 300, 400]).unwrap();
        assert_eq!(map.lookup_clamped(NETFLIX_RESERVOIR), 100);
        assert_eq!(map.lookup_clamped(NETFLIX_CUSHION), 400);
        assert_eq!(map.lookup_clamped(0.6), map.lookup(0.6));
    }

    #[test]
    fn duplicate_bitrates_collapse() {
        let map = RateMap::build(&[100, 100, 400]).unwrap();
        assert_eq!(map.reservoir_bitrate(), 100);
        assert_eq!(map.cushion_bitrate(), 400);
    }
}
