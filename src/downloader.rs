//! Segment Downloader: fetches one segment over a directly-owned HTTP
//! connection, writes it to `<dir>/<basename>`, and samples throughput
//! every `THROUGHPUT_LOG_INTERVAL` into the shared `ThroughputWindow`
//! rather than reaching into the HTTP client's internals.

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::abr::throughput::ThroughputWindow;
use crate::config::{DOWNLOAD_TIMEOUT, THROUGHPUT_LOG_INTERVAL};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("segment decode error: {0}")]
    Decode(String),
    #[error("failed to write segment to disk: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct DownloadedSegment {
    pub bytes_written: u64,
    pub local_path: PathBuf,
    pub elapsed_secs: f64,
}

/// Derives the destination filename from a segment URL's last path
/// component, stripped of any query string; falls back to a placeholder
/// name for a URL with no path component at all (malformed input the
/// catalog should never produce, but the downloader must not panic on).
fn basename_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "segment.bin".to_string(),
    }
}

pub struct SegmentDownloader {
    client: reqwest::Client,
}

impl SegmentDownloader {
    /// Plain direct-connection downloader.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// A downloader whose requests are routed through the local PEP
    /// tunnel. The tunnel is a plain TCP relay the HTTP client drives via
    /// `CONNECT`; this downloader never touches the tunnel directly.
    pub fn with_pep_proxy(pep_host: &str, pep_port: u16) -> Result<Self, TransportError> {
        let proxy_url = format!("http://{pep_host}:{pep_port}");
        let proxy = reqwest::Proxy::http(&proxy_url)?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Downloads one segment into `<dest_dir>/<basename>`, recording a
    /// throughput sample (Mbps) into `throughput` roughly every
    /// `THROUGHPUT_LOG_INTERVAL` during the transfer, plus a final sample
    /// for the whole transfer. The decoder downstream of the playback
    /// buffer is out of scope, so the body is streamed straight to disk
    /// rather than held in memory.
    pub async fn download_segment(
        &self,
        url: &str,
        dest_dir: &Path,
        throughput: &ThroughputWindow,
    ) -> Result<DownloadedSegment, TransportError> {
        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        let local_path = dest_dir.join(basename_from_url(url));
        let mut file = tokio::fs::File::create(&local_path).await?;

        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;
        let mut bytes_since_log = 0usize;
        let mut last_log = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.inspect_err(|_| {
                // best-effort cleanup of the partial file; a failed remove
                // just leaves a zero/partial-sized file behind, which the
                // scheduler never hands to the buffer anyway.
                let _ = std::fs::remove_file(&local_path);
            })?;
            bytes_since_log += chunk.len();
            bytes_written += chunk.len() as u64;
            if let Err(e) = file.write_all(&chunk).await {
                let _ = tokio::fs::remove_file(&local_path).await;
                return Err(TransportError::Io(e));
            }

            if last_log.elapsed() >= THROUGHPUT_LOG_INTERVAL {
                let secs = last_log.elapsed().as_secs_f64();
                if secs > 0.0 {
                    let mbps = (bytes_since_log as f64 * 8.0) / (secs * 1_000_000.0);
                    throughput.record(mbps);
                }
                bytes_since_log = 0;
                last_log = Instant::now();
            }
        }
        file.flush().await?;

        if bytes_written == 0 {
            let _ = tokio::fs::remove_file(&local_path).await;
            return Err(TransportError::Decode(format!("empty segment body from {url}")));
        }

        let elapsed_secs = start.elapsed().as_secs_f64();
        if elapsed_secs > 0.0 {
            let overall_mbps = (bytes_written as f64 * 8.0) / (elapsed_secs * 1_000_000.0);
            throughput.record(overall_mbps);
        }

        Ok(DownloadedSegment {
            bytes_written,
            local_path,
            elapsed_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn downloads_segment_and_records_throughput() {
        let mut server = mockito::Server::new_async().await;
        let body = vec![0u8; 32 * 1024];
        let mock = server
            .mock("GET", "/seg-1.m4s")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let downloader = SegmentDownloader::new().unwrap();
        let throughput = ThroughputWindow::new();
        let dest_dir = tempfile::tempdir().unwrap();
        let url = format!("{}/seg-1.m4s", server.url());
        let segment = downloader
            .download_segment(&url, dest_dir.path(), &throughput)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(segment.bytes_written, body.len() as u64);
        assert_eq!(segment.local_path, dest_dir.path().join("seg-1.m4s"));
        let on_disk = std::fs::metadata(&segment.local_path).unwrap();
        assert_eq!(on_disk.len(), body.len() as u64);
        assert!(!throughput.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.m4s")
            .with_status(404)
            .create_async()
            .await;

        let downloader = SegmentDownloader::new().unwrap();
        let throughput = ThroughputWindow::new();
        let dest_dir = tempfile::tempdir().unwrap();
        let url = format!("{}/missing.m4s", server.url());
        let err = downloader
            .download_segment(&url, dest_dir.path(), &throughput)
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, TransportError::Status(_)));
    }

    #[test]
    fn basename_strips_query_string() {
        assert_eq!(basename_from_url("http://x/video/seg-7.m4s?token=abc"), "seg-7.m4s");
        assert_eq!(basename_from_url("http://x/init.mp4"), "init.mp4");
    }
}
