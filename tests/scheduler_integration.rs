//! End-to-end exercise of the Scheduler against a mocked HTTP origin: every
//! segment across two representations is served, and the resulting buffer
//! and report are checked against the ordering and bitrate-closure
//! invariants from spec.md §8.

use std::sync::Arc;

use dash_abr_client::abr::Strategy;
use dash_abr_client::buffer::{BufferState, PlaybackBuffer};
use dash_abr_client::catalog::{PlaybackCatalog, Representation};
use dash_abr_client::config::PlaybackMode;
use dash_abr_client::downloader::SegmentDownloader;
use dash_abr_client::scheduler::Scheduler;
use dash_abr_client::session::SessionContext;

fn catalog(base_url: &str) -> PlaybackCatalog {
    let lo = Representation {
        id: "lo".into(),
        bandwidth_bps: 500_000,
        init_url: None,
        start: 0,
        segment_urls: (0..3).map(|i| format!("{base_url}/lo-{i}.m4s")).collect(),
        segment_sizes: None,
    };
    let hi = Representation {
        id: "hi".into(),
        bandwidth_bps: 2_000_000,
        init_url: None,
        start: 0,
        segment_urls: (0..3).map(|i| format!("{base_url}/hi-{i}.m4s")).collect(),
        segment_sizes: None,
    };
    PlaybackCatalog {
        representations: vec![lo, hi],
        // short enough that the playback timer (real wall-clock, §5) drains
        // the buffer to its terminal state well within the test's lifetime.
        segment_duration_secs: 0.01,
        playback_duration_secs: 0.03,
        min_buffer_time_secs: 0.02,
    }
}

async fn session() -> Arc<SessionContext> {
    Arc::new(
        SessionContext::new(
            PlaybackMode::Basic,
            false,
            "127.0.0.1".into(),
            0,
            30,
            false,
            None,
            false,
            vec![500_000, 2_000_000],
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn drains_every_segment_in_order_and_records_the_report() {
    let mut server = mockito::Server::new_async().await;
    let body = vec![0u8; 16 * 1024];
    for rep in ["lo", "hi"] {
        for i in 0..3 {
            server
                .mock("GET", format!("/{rep}-{i}.m4s").as_str())
                .with_status(200)
                .with_body(body.clone())
                .create_async()
                .await;
        }
    }

    let catalog = catalog(&server.url());
    let session = session().await;
    let buffer = Arc::new(PlaybackBuffer::new(30, 2));
    let downloader = Arc::new(SegmentDownloader::new().unwrap());
    let strategy = Strategy::basic();

    let mut scheduler = Scheduler::new(downloader, Arc::clone(&buffer), strategy, session.clone());
    scheduler.run(&catalog).await.unwrap();

    // every segment landed, in order, and `run` does not return until the
    // playback timer has drained the buffer to its terminal state (§4.6
    // step 6).
    assert_eq!(buffer.next_expected_index(), 3);
    assert_eq!(buffer.state(), BufferState::Stopped);

    let report_path = std::env::temp_dir().join("scheduler_integration_report.json");
    session.finalize(&report_path).unwrap();
    let contents = std::fs::read_to_string(&report_path).unwrap();
    assert!(contents.contains("\"playback_mode\": \"basic\""));
    let segment_count = contents.matches("\"url\"").count();
    assert_eq!(segment_count, 3);
    std::fs::remove_file(&report_path).ok();
}

#[tokio::test]
async fn netflix_strategy_only_ever_returns_catalog_bitrates() {
    let mut server = mockito::Server::new_async().await;
    let body = vec![0u8; 4 * 1024];
    for rep in ["lo", "hi"] {
        for i in 0..3 {
            server
                .mock("GET", format!("/{rep}-{i}.m4s").as_str())
                .with_status(200)
                .with_body(body.clone())
                .create_async()
                .await;
        }
    }

    let catalog = catalog(&server.url());
    let session = session().await;
    let buffer = Arc::new(PlaybackBuffer::new(30, 2));
    let downloader = Arc::new(SegmentDownloader::new().unwrap());
    let strategy = Strategy::netflix(&catalog.bitrates()).unwrap();

    let mut scheduler = Scheduler::new(downloader, buffer, strategy, session);
    // bitrate-closure is asserted inside Strategy::pick itself (it errors
    // on an out-of-catalog bitrate); reaching completion without a logged
    // reset is the end-to-end confirmation of spec.md §8 invariant 1.
    scheduler.run(&catalog).await.unwrap();
}
