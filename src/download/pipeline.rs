use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::download::mux::Ffmpeg;
use crate::download::playlist::segment::{plan_segments, BatchReport, SegmentDownloader, SegmentOutcome};
use crate::download::playlist::variant::select_variant;
use crate::download::playlist::{is_master, segment_lines, EXTINF_TAG, SEGMENT_SUFFIX};
use crate::download::resolve::{base_of, origin_of, resolve};
use crate::download::{fetch_text, Fetch};
use crate::error::Error;
use crate::options::Options;

pub const MASTER_FILENAME: &str = "master.m3u8";
pub const VARIANT_FILENAME: &str = "variant.m3u8";
pub const PLAYLIST_FILENAME: &str = "playlist.m3u8";
pub const OUTPUT_FILENAME: &str = "output.mp4";
pub const REPORT_FILENAME: &str = "report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    ResolveMaster,
    SelectVariant,
    FetchVariantPlaylist,
    ExtractSegments,
    DownloadSegments,
    Mux,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PipelineState::ResolveMaster => "resolving master playlist",
            PipelineState::SelectVariant => "selecting variant",
            PipelineState::FetchVariantPlaylist => "fetching variant playlist",
            PipelineState::ExtractSegments => "extracting segments",
            PipelineState::DownloadSegments => "downloading segments",
            PipelineState::Mux => "muxing",
            PipelineState::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// The `Failed` state: which step failed and why.
#[derive(Debug, thiserror::Error)]
#[error("{state} failed: {source}")]
pub struct PipelineError {
    pub state: PipelineState,
    #[source]
    pub source: Error,
}

fn at(state: PipelineState) -> impl FnOnce(Error) -> PipelineError {
    move |source| PipelineError { state, source }
}

#[derive(Debug, Serialize)]
pub struct FailedSegment {
    pub url: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Written to `report.json` after the download phase.
#[derive(Debug, Serialize)]
pub struct DownloadReport {
    pub playlist: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedSegment>,
    pub elapsed_ms: u64,
}

impl DownloadReport {
    fn new(playlist: &Url, batch: &BatchReport) -> Self {
        let failed = batch
            .failed()
            .map(|outcome| FailedSegment {
                url: outcome.task.url.to_string(),
                path: outcome.task.path.clone(),
                reason: match &outcome.result {
                    Err(err) => err.to_string(),
                    Ok(_) => String::new(),
                },
            })
            .collect();

        Self {
            playlist: playlist.to_string(),
            total: batch.total(),
            succeeded: batch.succeeded_count(),
            failed,
            elapsed_ms: batch.elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub output_dir: PathBuf,
    pub playlist_url: Url,
    pub report: DownloadReport,
    /// `None` when muxing was skipped.
    pub output: Option<PathBuf>,
}

/// Replaces every segment line with its local path and drops segments that
/// were not downloaded, along with their `#EXTINF` tag.
pub fn rewrite_playlist(playlist: &str, outcomes: &[SegmentOutcome]) -> String {
    let mut outcomes = outcomes.iter();
    let mut lines: Vec<String> = Vec::new();

    for line in playlist.lines() {
        if !line.ends_with(SEGMENT_SUFFIX) {
            lines.push(line.to_string());
            continue;
        }

        match outcomes.next() {
            Some(outcome) if outcome.result.is_ok() => {
                let local = outcome
                    .task
                    .path
                    .iter()
                    .map(|part| part.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                lines.push(local);
            }
            _ => {
                if lines.last().is_some_and(|last| last.starts_with(EXTINF_TAG)) {
                    lines.pop();
                }
            }
        }
    }

    let mut rewritten = lines.join("\n");
    rewritten.push('\n');
    rewritten
}

pub struct Pipeline {
    fetcher: Arc<dyn Fetch>,
    options: Options,
    muxer: Option<Ffmpeg>,
    token: CancellationToken,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetch>, options: Options) -> Self {
        let muxer = (!options.no_mux).then(|| Ffmpeg::new(options.ffmpeg.clone()));

        Self {
            fetcher,
            options,
            muxer,
            token: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    fn enter(&self, state: PipelineState) {
        debug!(%state, "pipeline state");
    }

    async fn save(&self, filename: &str, content: &str) -> Result<(), Error> {
        let path = self.options.output_dir.join(filename);
        tokio::fs::write(&path, content)
            .await
            .map_err(|err| Error::filesystem(path, err))
    }

    /// Checks the muxer and creates the output directory, before anything is
    /// downloaded.
    async fn prepare(&self) -> Result<(), PipelineError> {
        if let Some(muxer) = &self.muxer {
            muxer.probe().await.map_err(at(PipelineState::Mux))?;
        }

        let output_dir = &self.options.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|err| Error::filesystem(output_dir, err))
            .map_err(at(PipelineState::ResolveMaster))?;

        info!(output_dir = %output_dir.display(), "Saving to");
        Ok(())
    }

    /// Fetches a manifest, giving up as soon as the run is cancelled.
    async fn fetch_manifest(&self, url: &Url) -> Result<String, Error> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            manifest = fetch_text(self.fetcher.as_ref(), url) => manifest,
        }
    }

    /// Downloads the stream behind `url`, which may be a master playlist or a
    /// media playlist.
    pub async fn run(&self, url: &Url) -> Result<RunSummary, PipelineError> {
        self.prepare().await?;

        self.enter(PipelineState::ResolveMaster);
        info!(%url, "Master file URL");
        let manifest = self
            .fetch_manifest(url)
            .await
            .map_err(at(PipelineState::ResolveMaster))?;
        self.save(MASTER_FILENAME, &manifest)
            .await
            .map_err(at(PipelineState::ResolveMaster))?;

        if !is_master(&manifest) {
            info!("No variants listed, downloading the playlist directly");
            return self.download(url, &base_of(url), &manifest).await;
        }

        self.enter(PipelineState::SelectVariant);
        let variant = select_variant(&manifest).map_err(at(PipelineState::SelectVariant))?;
        let variant_url = resolve(variant.playlist, &base_of(url)).map_err(at(PipelineState::SelectVariant))?;
        info!(%variant_url, "Best resolution playlist");

        self.enter(PipelineState::FetchVariantPlaylist);
        let playlist = self
            .fetch_manifest(&variant_url)
            .await
            .map_err(at(PipelineState::FetchVariantPlaylist))?;

        self.download(&variant_url, &base_of(&variant_url), &playlist).await
    }

    /// Downloads a media playlist that was obtained without a URL of its own;
    /// its segments are resolved against the origin of `url`.
    pub async fn run_local_playlist(&self, url: &Url, playlist: &str) -> Result<RunSummary, PipelineError> {
        self.prepare().await?;
        self.download(url, &origin_of(url), playlist).await
    }

    async fn download(&self, playlist_url: &Url, base: &Url, playlist: &str) -> Result<RunSummary, PipelineError> {
        self.save(VARIANT_FILENAME, playlist)
            .await
            .map_err(at(PipelineState::FetchVariantPlaylist))?;

        self.enter(PipelineState::ExtractSegments);
        info!(%base, "Segment base URL");
        let references = segment_lines(playlist);
        if references.is_empty() {
            return Err(PipelineError {
                state: PipelineState::ExtractSegments,
                source: Error::EmptyPlaylist {
                    url: playlist_url.clone(),
                },
            });
        }
        let tasks = plan_segments(base, &references).map_err(at(PipelineState::ExtractSegments))?;

        self.enter(PipelineState::DownloadSegments);
        let downloader = SegmentDownloader::new(Arc::clone(&self.fetcher), &self.options, self.token.clone());
        let batch = downloader.download(tasks).await;

        let report = DownloadReport::new(playlist_url, &batch);
        self.write_report(&report).await.map_err(at(PipelineState::DownloadSegments))?;
        self.check_batch(&batch).map_err(at(PipelineState::DownloadSegments))?;

        self.enter(PipelineState::Mux);
        self.save(PLAYLIST_FILENAME, &rewrite_playlist(playlist, &batch.outcomes))
            .await
            .map_err(at(PipelineState::Mux))?;

        let output = match &self.muxer {
            Some(muxer) => Some(
                muxer
                    .mux(&self.options.output_dir, PLAYLIST_FILENAME, OUTPUT_FILENAME)
                    .await
                    .map_err(at(PipelineState::Mux))?,
            ),
            None => {
                info!("Skipping mux, segments are in {}", self.options.output_dir.display());
                None
            }
        };

        self.enter(PipelineState::Done);
        Ok(RunSummary {
            output_dir: self.options.output_dir.clone(),
            playlist_url: playlist_url.clone(),
            report,
            output,
        })
    }

    async fn write_report(&self, report: &DownloadReport) -> Result<(), Error> {
        let path = self.options.output_dir.join(REPORT_FILENAME);
        let json = serde_json::to_vec_pretty(report)
            .map_err(|err| Error::filesystem(&path, std::io::Error::other(err)))?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|err| Error::filesystem(path, err))
    }

    fn check_batch(&self, batch: &BatchReport) -> Result<(), Error> {
        if batch.was_cancelled() {
            return Err(Error::Cancelled);
        }

        let failed = batch.failed_count();
        if failed == 0 {
            return Ok(());
        }

        for outcome in batch.failed() {
            if let Err(err) = &outcome.result {
                error!(url = %outcome.task.url, path = %outcome.task.path.display(), "{}", err);
            }
        }

        let total = batch.total();
        if self.options.strict || failed == total {
            return Err(Error::SegmentsFailed { failed, total });
        }

        warn!(
            failed,
            total,
            report = REPORT_FILENAME,
            "Some segments failed, continuing without them"
        );
        Ok(())
    }
}
