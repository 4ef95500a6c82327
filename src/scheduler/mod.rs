//! Scheduler: drives the per-segment loop — choose a bitrate, admit up to
//! `MAX_PARALLEL` in-flight downloads, reorder out-of-order completions
//! into the playback buffer, pace dispatch against buffer health, and
//! terminate once every segment has been handled and the buffer has
//! drained to a terminal state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::abr::throughput::ThroughputWindow;
use crate::abr::{Decision, DecisionContext, Strategy};
use crate::buffer::{BufferState, PlaybackBuffer};
use crate::catalog::PlaybackCatalog;
use crate::config::{BUFFER_FULL_RETRY_INTERVAL, PLAYBACK_TICK_INTERVAL};
use crate::downloader::{DownloadedSegment, SegmentDownloader, TransportError};
use crate::error::{AbrError, Result};
use crate::session::SessionContext;

pub struct Scheduler {
    downloader: Arc<SegmentDownloader>,
    buffer: Arc<PlaybackBuffer>,
    throughput: Arc<ThroughputWindow>,
    strategy: Strategy,
    session: Arc<SessionContext>,
}

impl Scheduler {
    pub fn new(
        downloader: Arc<SegmentDownloader>,
        buffer: Arc<PlaybackBuffer>,
        strategy: Strategy,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            downloader,
            buffer,
            throughput: Arc::new(ThroughputWindow::new()),
            strategy,
            session,
        }
    }

    pub fn throughput(&self) -> &Arc<ThroughputWindow> {
        &self.throughput
    }

    /// Runs the adaptive loop to completion over `catalog`, bounded by the
    /// session's segment limit if one was set.
    pub async fn run(&mut self, catalog: &PlaybackCatalog) -> Result<()> {
        let bitrates = catalog.bitrates();
        let start = catalog.start();
        let total_segments = catalog.segment_count();
        let limit = self
            .session
            .segment_limit
            .map(|l| l.min(total_segments))
            .unwrap_or(total_segments);
        let max_parallel = self.session.max_parallel();
        let buffer_capacity = self.session.buffer_capacity;

        // drives the playback clock (§5: "one playback timer (consumer of
        // the Buffer)") so the buffer actually drains instead of only
        // filling; the dispatch loop below relies on this to relieve
        // buffer-full backpressure.
        let playback_task = tokio::spawn(drive_playback(Arc::clone(&self.buffer)));

        // keyed by catalog-wide segment index; reorders out-of-order
        // completions before they reach the (strictly-ordered) buffer.
        let mut pending: BTreeMap<usize, DownloadedSegment> = BTreeMap::new();
        // segments whose download failed: tracked separately from `pending`
        // so a failure that resolves out of order (concurrent mode) still
        // advances the reorder buffer past its index instead of stalling
        // it forever (§7: TransportError is recoverable, "skip that
        // segment").
        let mut failed: BTreeSet<usize> = BTreeSet::new();
        let mut next_to_buffer = start;
        let mut next_dispatch = start;
        let mut last_bitrate: Option<u64> = None;
        // Netflix INITIAL's delta_B term: bytes/sec of the most recently
        // completed download, zero until the first segment lands.
        let mut last_segment_rate_bytes_per_sec = 0.0_f64;

        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < max_parallel && next_dispatch < start + limit {
                // gate the second concurrent slot until throughput has a
                // real sample to estimate from; otherwise two segments
                // race on a blind guess (spec S4).
                if in_flight.len() >= 1 && self.throughput.is_empty() {
                    break;
                }

                // buffer-full backpressure: an in-flight + reordered
                // segment count at or above capacity means the next
                // dispatch must wait at least one segment_duration (spec
                // boundary test, §8 "Buffer full").
                let occupied = self.buffer.depth() + pending.len() + in_flight.len();
                if occupied >= buffer_capacity {
                    break;
                }

                let buffer_occupancy_segments = self.buffer.depth() as f64;
                let next_sizes = catalog.segment_sizes_for_index(next_dispatch, &bitrates);
                let current_bitrate = last_bitrate.unwrap_or(bitrates[0]);
                let netflix_obs = matches!(self.strategy, Strategy::Netflix(..)).then(|| {
                    crate::abr::netflix::NetflixObservations {
                        buffer_depth_segments: buffer_occupancy_segments,
                        buffer_initial_buffer_segments: self.buffer.min_start_segments() as f64,
                        segment_duration_secs: catalog.segment_duration_secs,
                        avg_size_bytes_for_current_bitrate: catalog
                            .average_segment_size_bytes(current_bitrate),
                        last_segment_rate_bytes_per_sec,
                    }
                });
                // in concurrent mode the Throughput Window is "the only
                // signal consumed by strategies" (§4.4); feed its mean to
                // Basic's rate-override path so the second in-flight slot
                // actually uses it rather than the serial-mode comparator.
                let parallel_dwn_rate_mbps =
                    if self.session.use_concurrent { self.throughput.mean() } else { None };
                let ctx = DecisionContext {
                    bitrates: &bitrates,
                    throughput: &self.throughput,
                    segment_duration_secs: catalog.segment_duration_secs,
                    buffer_occupancy_segments,
                    parallel_dwn_rate_mbps,
                    next_segment_sizes: next_sizes.as_deref(),
                    netflix: netflix_obs,
                };
                // StateError (an out-of-range bitrate from the strategy) is
                // recoverable: reset the strategy to its initial state and
                // minimum bitrate rather than aborting the session (§7).
                let decision = match self.strategy.pick(&ctx) {
                    Ok(decision) => decision,
                    Err(err) => {
                        tracing::warn!(error = %err, "ABR state error, resetting to minimum bitrate");
                        self.strategy.reset();
                        Decision { bitrate: bitrates[0], pacing_delay_segments: 0.0 }
                    }
                };
                if let Some(previous) = last_bitrate {
                    self.session.report.record_bitrate_shift(previous, decision.bitrate);
                }
                last_bitrate = Some(decision.bitrate);

                if decision.pacing_delay_segments > 0.0 {
                    let delay =
                        Duration::from_secs_f64(decision.pacing_delay_segments * catalog.segment_duration_secs);
                    tokio::time::sleep(delay).await;
                }

                let representation = catalog
                    .representation_for_bitrate(decision.bitrate)
                    .ok_or_else(|| {
                        AbrError::State(crate::abr::StateError::Inconsistent(format!(
                            "no representation for chosen bitrate {}",
                            decision.bitrate
                        )))
                    })?;
                let index = next_dispatch;
                let local_index = index - representation.start;
                let url = representation.segment_urls[local_index].clone();
                next_dispatch += 1;

                let downloader = Arc::clone(&self.downloader);
                let throughput = Arc::clone(&self.throughput);
                let dest_dir = self.session.download_dir().to_path_buf();
                in_flight.push(async move {
                    let result = downloader.download_segment(&url, &dest_dir, &throughput).await;
                    (index, url, result)
                });
            }

            if in_flight.is_empty() {
                if next_dispatch >= start + limit {
                    // every segment dispatched and none still in flight:
                    // the session is genuinely done (§4.6 step 6).
                    break;
                }
                // nothing in flight to await on, but dispatch is blocked on
                // buffer-full backpressure (or the concurrent throughput
                // gate): pace instead of terminating, and let the playback
                // timer drain the buffer in the meantime.
                tokio::time::sleep(BUFFER_FULL_RETRY_INTERVAL).await;
                continue;
            }

            let (index, url, result) = in_flight.next().await.expect("in_flight is non-empty");
            match result {
                Ok(segment) => {
                    self.session.report.record_segment(
                        url,
                        segment.bytes_written as usize,
                        segment.elapsed_secs,
                    );
                    if segment.elapsed_secs > 0.0 {
                        last_segment_rate_bytes_per_sec =
                            segment.bytes_written as f64 / segment.elapsed_secs;
                    }
                    if let Strategy::Basic(state) = &mut self.strategy {
                        state.record_completion(segment.bytes_written, segment.elapsed_secs);
                    }
                    pending.insert(index, segment);
                }
                Err(TransportError::Status(_))
                | Err(TransportError::Decode(_))
                | Err(TransportError::Io(_)) => {
                    tracing::warn!(index, url, "segment download failed, skipping");
                    failed.insert(index);
                }
                Err(err @ TransportError::Request(_)) => {
                    tracing::warn!(index, url, error = %err, "transport error, skipping segment");
                    failed.insert(index);
                }
            }
            self.drain_pending(&mut pending, &mut failed, &mut next_to_buffer, start, catalog.segment_duration_secs);
        }

        self.buffer.mark_end_of_stream();
        // §4.6 step 6: wait for the buffer to reach a terminal state before
        // returning, rather than leaving unconsumed segments stranded.
        while self.buffer.state() != BufferState::Stopped {
            tokio::time::sleep(PLAYBACK_TICK_INTERVAL).await;
        }
        playback_task.await.ok();

        Ok(())
    }

    /// `next_to_buffer` is in catalog-wide segment-index space; the buffer
    /// itself is indexed from zero, so every push/skip is normalized by
    /// `start` here rather than threading the offset through `PlaybackBuffer`.
    /// Advances past both segments sitting in `pending` (pushed) and
    /// segments recorded in `failed` (skipped) — a failure that completes
    /// out of order must not permanently stall the reorder buffer at the
    /// gap it leaves behind.
    fn drain_pending(
        &self,
        pending: &mut BTreeMap<usize, DownloadedSegment>,
        failed: &mut BTreeSet<usize>,
        next_to_buffer: &mut usize,
        start: usize,
        segment_duration_secs: f64,
    ) {
        loop {
            if let Some(segment) = pending.remove(next_to_buffer) {
                let pushed = self.buffer.push(*next_to_buffer - start, segment_duration_secs);
                debug_assert!(pushed, "reorder stage guarantees in-order pushes");
                *next_to_buffer += 1;
            } else if failed.remove(next_to_buffer) {
                self.buffer.skip(*next_to_buffer - start);
                *next_to_buffer += 1;
            } else {
                break;
            }
        }
    }
}

/// Ticks `buffer.consume` once per `PLAYBACK_TICK_INTERVAL` of wall-clock
/// time, simulating the downstream decoder/renderer's real-time playout
/// (out of scope per spec.md §1) for as long as it takes to drain the
/// buffer. Exits once the buffer reaches its terminal `Stopped` state.
async fn drive_playback(buffer: Arc<PlaybackBuffer>) {
    let mut interval = tokio::time::interval(PLAYBACK_TICK_INTERVAL);
    loop {
        interval.tick().await;
        buffer.consume(PLAYBACK_TICK_INTERVAL.as_secs_f64());
        if buffer.state() == BufferState::Stopped {
            break;
        }
    }
}
