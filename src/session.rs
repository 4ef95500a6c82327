//! `SessionContext`: the explicit value carrying configuration, the report
//! accumulator, and the session's temp directory through every component,
//! in place of a global mutable config or logger.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::config::{PlaybackMode, MAX_PARALLEL_CONCURRENT, MAX_PARALLEL_SERIAL};
use crate::report::ReportHandle;

/// Whether the session's segment directory is cleaned up automatically.
/// `Managed` deletes everything on drop (the default); `Kept` leaked the
/// `TempDir` into a plain path via `into_path`, so nothing is removed.
enum DownloadDir {
    Managed(TempDir),
    Kept(PathBuf),
}

impl DownloadDir {
    fn path(&self) -> &std::path::Path {
        match self {
            DownloadDir::Managed(dir) => dir.path(),
            DownloadDir::Kept(path) => path.as_path(),
        }
    }
}

pub struct SessionContext {
    pub playback_mode: PlaybackMode,
    pub use_pep: bool,
    pub pep_host: String,
    pub pep_port: u16,
    pub buffer_capacity: usize,
    pub use_concurrent: bool,
    pub segment_limit: Option<usize>,
    pub keep_downloads: bool,
    download_dir: DownloadDir,
    pub report: Arc<ReportHandle>,
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        playback_mode: PlaybackMode,
        use_pep: bool,
        pep_host: String,
        pep_port: u16,
        buffer_capacity: usize,
        use_concurrent: bool,
        segment_limit: Option<usize>,
        keep_downloads: bool,
        available_bitrates_bps: Vec<u64>,
    ) -> std::io::Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("TEMP_").tempdir()?;
        // `--download` keeps the segments: persist the directory by
        // consuming the `TempDir` handle, which disarms its drop-cleanup.
        let download_dir = if keep_downloads {
            DownloadDir::Kept(temp_dir.into_path())
        } else {
            DownloadDir::Managed(temp_dir)
        };
        let report = Arc::new(ReportHandle::new(playback_mode, available_bitrates_bps));

        Ok(Self {
            playback_mode,
            use_pep,
            pep_host,
            pep_port,
            buffer_capacity,
            use_concurrent,
            segment_limit,
            keep_downloads,
            download_dir,
            report,
        })
    }

    pub fn max_parallel(&self) -> usize {
        if self.use_concurrent {
            MAX_PARALLEL_CONCURRENT
        } else {
            MAX_PARALLEL_SERIAL
        }
    }

    /// Path downloaded segments are written under during the session.
    pub fn download_dir(&self) -> &std::path::Path {
        self.download_dir.path()
    }

    /// Where the JSON report is written: always alongside the working
    /// directory, never inside the temp directory, since the report must
    /// survive even when `--download` was not passed and the temp
    /// directory's segment bytes are discarded.
    pub fn report_output_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from("report.json")
    }

    /// Serializes the accumulated report to `path`, called explicitly by
    /// the caller once the session loop ends — independent of whether the
    /// temp directory holding downloaded segment bytes is kept or cleaned
    /// up, since the report is never a discardable artifact.
    pub fn finalize(&self, path: &std::path::Path) -> std::io::Result<()> {
        self.report.write_to(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybackMode;

    #[test]
    fn managed_download_dir_is_removed_once_the_session_drops() {
        let session = SessionContext::new(
            PlaybackMode::Sara,
            false,
            "127.0.0.1".into(),
            8080,
            30,
            false,
            None,
            false,
            vec![500_000],
        )
        .unwrap();
        let path = session.download_dir().to_path_buf();
        assert!(path.exists());
        drop(session);
        assert!(!path.exists());
    }

    #[test]
    fn kept_download_dir_survives_the_session() {
        let session = SessionContext::new(
            PlaybackMode::Sara,
            false,
            "127.0.0.1".into(),
            8080,
            30,
            false,
            None,
            true,
            vec![500_000],
        )
        .unwrap();
        let path = session.download_dir().to_path_buf();
        assert!(path.exists());
        drop(session);
        assert!(path.exists());
        std::fs::remove_dir_all(&path).ok();
    }
}
