//! Tunables shared across the ABR strategies, scheduler, and downloader.
//!
//! Values mirror the defaults documented in the paper behind the Netflix
//! buffer-based scheme and the reference client this crate's behaviour is
//! modelled on; they are overridable from the CLI where a flag exists.

use std::time::Duration;

/// Lower buffer-fraction threshold below which Netflix picks the minimum bitrate.
pub const NETFLIX_RESERVOIR: f64 = 0.375;
/// Upper buffer-fraction threshold above which Netflix picks the maximum bitrate.
pub const NETFLIX_CUSHION: f64 = 0.9;
/// Segments of "available" buffer (above `initial_buffer`) required before
/// the Netflix strategy may leave the INITIAL state.
pub const NETFLIX_INITIAL_BUFFER: f64 = 5.0;
/// Multiplier applied to `segment_duration` when deciding whether INITIAL
/// may step up a bitrate level.
pub const NETFLIX_INITIAL_FACTOR: f64 = 0.5;
/// Denominator for the buffer-fraction `phi = available / BUFFER_SIZE`.
pub const NETFLIX_BUFFER_SIZE: f64 = 30.0;

/// Basic strategy: pacing kicks in once queued segments exceed this depth.
pub const BASIC_THRESHOLD: u64 = 2;
/// Basic strategy: number of most-recent segment download times averaged
/// for the step-up/step-down comparator.
pub const BASIC_SAMPLE_COUNT: usize = 3;
/// Basic strategy: step up one bitrate level when the average download
/// time falls below this fraction of `segment_duration`.
pub const BASIC_STEP_UP_FRACTION: f64 = 0.5;

/// Weighted/SARA: number of most-recent segment throughput samples folded
/// into the weighted mean.
pub const SARA_SAMPLE_COUNT: usize = 5;
/// Weighted/SARA: safety factor `f` applied to the buffer-depth budget.
pub const SARA_SAFETY_FACTOR: f64 = 0.8;
/// Weighted/SARA: buffer depth above which a pacing delay is emitted.
pub const SARA_UPPER_WATERMARK: u64 = 15;

/// Throughput Window: number of most recent per-interval samples retained.
pub const THROUGHPUT_WINDOW_SIZE: usize = 5;
/// Throughput Window: interval between rate samples during a download.
pub const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_millis(100);

/// Segment Downloader: per-request hard timeout.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Segment Downloader: chunk size for the streaming read loop.
pub const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

/// PEP Tunnel: socket buffer size applied to both sides of a relay.
pub const PEP_SOCKET_BUFFER_BYTES: usize = 256 * 1024;
/// PEP Tunnel: per-read chunk cap during the relay loop.
pub const PEP_RELAY_CHUNK_BYTES: usize = 64 * 1024;
/// PEP Tunnel: poll timeout while waiting for either socket to be readable.
pub const PEP_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// PEP Tunnel: keepalive idle time before probes begin.
pub const PEP_KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
/// PEP Tunnel: interval between keepalive probes.
pub const PEP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
/// PEP Tunnel: number of failed keepalive probes before the connection is dropped.
pub const PEP_KEEPALIVE_RETRIES: u32 = 6;

/// Scheduler: in-flight downloads when `--use-concurrent` is not passed.
pub const MAX_PARALLEL_SERIAL: usize = 1;
/// Scheduler: in-flight downloads when `--use-concurrent` is passed.
pub const MAX_PARALLEL_CONCURRENT: usize = 2;

/// Playback timer: wall-clock tick driving `PlaybackBuffer::consume`.
pub const PLAYBACK_TICK_INTERVAL: Duration = Duration::from_millis(250);
/// Scheduler: how long to wait before re-checking admission when the
/// buffer is full and nothing is currently in flight to await on.
pub const BUFFER_FULL_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// ABR strategy selected via `--playback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PlaybackMode {
    Basic,
    Sara,
    Netflix,
    /// Parallel bulk downloader — not an adaptive loop, see spec §6.
    All,
}
