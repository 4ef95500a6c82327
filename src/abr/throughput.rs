//! Throughput Window: a bounded FIFO of recent per-segment throughput
//! samples (Mbps), read by the ABR strategies and written by the
//! downloader after every completed segment.

use std::collections::VecDeque;
use parking_lot::Mutex;

use crate::config::THROUGHPUT_WINDOW_SIZE;

#[derive(Debug, Default)]
pub struct ThroughputWindow {
    samples: Mutex<VecDeque<f64>>,
}

impl ThroughputWindow {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(THROUGHPUT_WINDOW_SIZE)),
        }
    }

    /// Appends a new throughput sample, in Mbps, evicting the oldest once
    /// the window exceeds `THROUGHPUT_WINDOW_SIZE`.
    pub fn record(&self, mbps: f64) {
        let mut samples = self.samples.lock();
        if samples.len() == THROUGHPUT_WINDOW_SIZE {
            samples.pop_front();
        }
        samples.push_back(mbps);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn samples(&self) -> Vec<f64> {
        self.samples.lock().iter().copied().collect()
    }

    /// Plain arithmetic mean of the current window. `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        }
    }

    /// Weighted mean favouring the most recent samples: sample `i` (0 =
    /// oldest) gets weight `i + 1`, per the SARA estimator.
    pub fn weighted_mean(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, sample) in samples.iter().enumerate() {
            let weight = (i + 1) as f64;
            weighted_sum += sample * weight;
            weight_total += weight;
        }
        Some(weighted_sum / weight_total)
    }
}
