//! Playback Buffer: the bounded FIFO of downloaded-but-not-yet-played
//! segments, and the state machine the ABR strategies read back as their
//! primary feedback signal.

use std::collections::VecDeque;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    InitialBuffering,
    Play,
    Buffering,
    Stopped,
}

#[derive(Debug, Clone)]
struct BufferedSegment {
    index: usize,
    duration_secs: f64,
}

struct Inner {
    segments: VecDeque<BufferedSegment>,
    state: BufferState,
    expected_index: usize,
    capacity: usize,
    min_start_segments: usize,
    end_of_stream: bool,
}

/// Single-producer (the scheduler, after reordering), single-consumer
/// (the simulated playback clock) bounded buffer. Segments must arrive in
/// strictly increasing index order — the scheduler's reorder stage
/// guarantees this before calling `push`; a violation here is a logic bug,
/// not a recoverable condition.
pub struct PlaybackBuffer {
    inner: Mutex<Inner>,
}

impl PlaybackBuffer {
    pub fn new(capacity: usize, min_start_segments: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                segments: VecDeque::with_capacity(capacity),
                state: BufferState::InitialBuffering,
                expected_index: 0,
                capacity,
                min_start_segments,
                end_of_stream: false,
            }),
        }
    }

    /// Pushes the next in-order segment. Returns `false` (and logs) if the
    /// index is out of order or the buffer is at capacity — both are
    /// `BufferOverflow`-class conditions: asserted in debug builds, logged
    /// and dropped in release.
    pub fn push(&self, index: usize, duration_secs: f64) -> bool {
        let mut inner = self.inner.lock();

        if index != inner.expected_index {
            debug_assert!(
                false,
                "playback buffer received segment {index} out of order, expected {}",
                inner.expected_index
            );
            tracing::warn!(index, expected = inner.expected_index, "dropping out-of-order segment");
            return false;
        }
        if inner.segments.len() >= inner.capacity {
            debug_assert!(false, "playback buffer overflow at capacity {}", inner.capacity);
            tracing::warn!(index, capacity = inner.capacity, "dropping segment: buffer at capacity");
            return false;
        }

        inner.segments.push_back(BufferedSegment { index, duration_secs });
        inner.expected_index += 1;

        let min_start = inner.min_start_segments;
        match inner.state {
            BufferState::InitialBuffering if inner.segments.len() >= min_start => {
                inner.state = BufferState::Play;
            }
            BufferState::Buffering if !inner.segments.is_empty() => {
                inner.state = BufferState::Play;
            }
            _ => {}
        }
        true
    }

    /// Advances the simulated playback clock by `elapsed_secs`, draining
    /// whole segments from the front. Transitions to `Buffering` once
    /// drained dry (unless end-of-stream was already signalled, in which
    /// case it transitions to `Stopped`).
    pub fn consume(&self, elapsed_secs: f64) {
        let mut inner = self.inner.lock();
        if inner.state != BufferState::Play {
            return;
        }

        let mut remaining = elapsed_secs;
        while remaining > 0.0 {
            let Some(front) = inner.segments.front().cloned() else {
                break;
            };
            if front.duration_secs <= remaining {
                remaining -= front.duration_secs;
                inner.segments.pop_front();
            } else {
                break;
            }
        }

        if inner.segments.is_empty() {
            inner.state = if inner.end_of_stream {
                BufferState::Stopped
            } else {
                BufferState::Buffering
            };
        }
    }

    /// Marks that no further segments will ever arrive; once the buffer
    /// drains it settles in `Stopped` rather than bouncing back to
    /// `Buffering`. A buffer still waiting to cross `min_start_segments`
    /// (short manifest, or a run cut short by `--segment-limit`) has
    /// nothing left to wait for either, so it is released into `Play`
    /// immediately rather than sitting in `InitialBuffering` forever.
    pub fn mark_end_of_stream(&self) {
        let mut inner = self.inner.lock();
        inner.end_of_stream = true;
        if inner.segments.is_empty() {
            inner.state = BufferState::Stopped;
        } else if inner.state == BufferState::InitialBuffering {
            inner.state = BufferState::Play;
        }
    }

    /// Advances the expected index without buffering any bytes — the
    /// recoverable path for a segment download that failed after retries:
    /// playback will glitch through the gap rather than stall forever
    /// waiting for a segment that will never arrive.
    pub fn skip(&self, index: usize) -> bool {
        let mut inner = self.inner.lock();
        if index != inner.expected_index {
            debug_assert!(
                false,
                "skip called for segment {index} out of order, expected {}",
                inner.expected_index
            );
            return false;
        }
        inner.expected_index += 1;
        true
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().segments.len()
    }

    pub fn occupancy_secs(&self) -> f64 {
        self.inner.lock().segments.iter().map(|s| s.duration_secs).sum()
    }

    pub fn state(&self) -> BufferState {
        self.inner.lock().state
    }

    pub fn next_expected_index(&self) -> usize {
        self.inner.lock().expected_index
    }

    /// Segments the buffer must accumulate before leaving `InitialBuffering`;
    /// also the threshold the Netflix ABR strategy subtracts from raw depth
    /// to get its "available" buffer occupancy.
    pub fn min_start_segments(&self) -> usize {
        self.inner.lock().min_start_segments
    }
}
