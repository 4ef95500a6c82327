use std::sync::Arc;

use clap::Parser;
use dash_abr_client::abr::Strategy;
use dash_abr_client::buffer::PlaybackBuffer;
use dash_abr_client::catalog::{HttpMpdSource, MpdSource};
use dash_abr_client::config::PlaybackMode;
use dash_abr_client::downloader::SegmentDownloader;
use dash_abr_client::pep::PepTunnel;
use dash_abr_client::scheduler::Scheduler;
use dash_abr_client::session::SessionContext;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Adaptive bitrate client for MPEG-DASH video streaming.
#[derive(Debug, Parser)]
#[command(name = "dash-abr-client", version, about)]
struct Cli {
    /// URL of the DASH MPD manifest to stream.
    #[arg(long)]
    mpd: String,

    /// Print the manifest's representations and exit, without streaming.
    #[arg(long)]
    list: bool,

    /// ABR decision strategy, or `all` for the non-adaptive bulk downloader.
    #[arg(long, value_enum, default_value = "sara")]
    playback: PlaybackMode,

    /// Stop after this many segments (defaults to the full manifest).
    #[arg(long)]
    segment_limit: Option<usize>,

    /// Keep downloaded segment bytes on disk after the session ends.
    #[arg(long)]
    download: bool,

    /// Route segment downloads through a local PEP tunnel.
    #[arg(long)]
    use_pep: bool,

    /// PEP tunnel bind host.
    #[arg(long, default_value = "127.0.0.1")]
    pep_host: String,

    /// PEP tunnel bind port.
    #[arg(long, default_value_t = 8080)]
    pep_port: u16,

    /// Playback buffer capacity, in segments.
    #[arg(long, default_value_t = 30)]
    buffer_size: usize,

    /// Allow up to two segments in flight instead of one.
    #[arg(long)]
    use_concurrent: bool,
}

#[tokio::main]
async fn main() -> dash_abr_client::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dash_abr_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mpd_source = HttpMpdSource::new(reqwest::Client::new());
    let catalog = mpd_source.load(&cli.mpd).await?;
    info!(representations = catalog.representations.len(), "loaded manifest");

    if cli.list {
        for rep in &catalog.representations {
            println!("{}\t{} bps\t{} segments", rep.id, rep.bandwidth_bps, rep.segment_urls.len());
        }
        return Ok(());
    }

    let session = Arc::new(SessionContext::new(
        cli.playback,
        cli.use_pep,
        cli.pep_host.clone(),
        cli.pep_port,
        cli.buffer_size,
        cli.use_concurrent,
        cli.segment_limit,
        cli.download,
        catalog.bitrates(),
    )?);

    let pep_handle = if cli.use_pep {
        let tunnel = PepTunnel::new(&cli.pep_host, cli.pep_port)?;
        Some(tokio::spawn(async move {
            if let Err(err) = tunnel.run().await {
                warn!(error = %err, "PEP tunnel exited");
            }
        }))
    } else {
        None
    };

    let downloader = if cli.use_pep {
        SegmentDownloader::with_pep_proxy(&cli.pep_host, cli.pep_port)?
    } else {
        SegmentDownloader::new()?
    };

    if cli.playback == PlaybackMode::All {
        run_bulk_download(&catalog, Arc::new(downloader), Arc::clone(&session)).await?;
    } else {
        let strategy = match cli.playback {
            PlaybackMode::Basic => Strategy::basic(),
            PlaybackMode::Sara => Strategy::weighted(),
            PlaybackMode::Netflix => Strategy::netflix(&catalog.bitrates())?,
            PlaybackMode::All => unreachable!(),
        };

        let min_start_segments = 2.min(cli.buffer_size).max(1);
        let buffer = Arc::new(PlaybackBuffer::new(cli.buffer_size, min_start_segments));
        let mut scheduler = Scheduler::new(Arc::new(downloader), buffer, strategy, Arc::clone(&session));
        scheduler.run(&catalog).await?;
    }

    session.finalize(&session.report_output_path())?;
    info!(path = %session.report_output_path().display(), "wrote report");

    if let Some(handle) = pep_handle {
        handle.abort();
    }

    Ok(())
}

/// `--playback all`: fetches every representation's full segment list
/// concurrently, with no adaptive decision loop — grounded in the
/// reference client's bulk "get media all" mode used for exhaustive
/// throughput profiling rather than real-time playback.
async fn run_bulk_download(
    catalog: &dash_abr_client::catalog::PlaybackCatalog,
    downloader: Arc<SegmentDownloader>,
    session: Arc<SessionContext>,
) -> dash_abr_client::Result<()> {
    use dash_abr_client::abr::throughput::ThroughputWindow;
    use futures::stream::{self, StreamExt};

    let throughput = Arc::new(ThroughputWindow::new());
    let limit = session.segment_limit;

    let jobs: Vec<(String, String)> = catalog
        .representations
        .iter()
        .flat_map(|rep| {
            let urls = match limit {
                Some(n) => &rep.segment_urls[..n.min(rep.segment_urls.len())],
                None => &rep.segment_urls[..],
            };
            urls.iter().map(move |url| (rep.id.clone(), url.clone()))
        })
        .collect();

    stream::iter(jobs)
        .for_each_concurrent(session.max_parallel().max(4), |(rep_id, url)| {
            let downloader = Arc::clone(&downloader);
            let throughput = Arc::clone(&throughput);
            let session = Arc::clone(&session);
            async move {
                let dest_dir = session.download_dir();
                match downloader.download_segment(&url, dest_dir, &throughput).await {
                    Ok(segment) => {
                        session.report.record_segment(
                            url,
                            segment.bytes_written as usize,
                            segment.elapsed_secs,
                        );
                    }
                    Err(err) => warn!(rep_id, url, error = %err, "bulk download failed"),
                }
            }
        })
        .await;

    Ok(())
}
