use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::download::resolve::{filename_of, local_path, resolve};
use crate::download::Fetch;
use crate::error::Error;
use crate::options::Options;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTask {
    /// Position in the playlist.
    pub index: usize,
    /// The line as it appeared in the playlist.
    pub reference: String,
    pub url: Url,
    /// Relative to the output directory.
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct SegmentOutcome {
    pub task: SegmentTask,
    /// Bytes written on success.
    pub result: Result<u64, Error>,
}

#[derive(Debug)]
pub struct BatchReport {
    /// In dispatch order.
    pub outcomes: Vec<SegmentOutcome>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SegmentOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.total() - self.failed_count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| matches!(outcome.result, Err(Error::Cancelled)))
    }
}

/// Resolves every segment reference against `base` and picks its local path.
///
/// No two tasks share a path: when one is already taken, the filename gets the
/// task's index as a prefix.
pub fn plan_segments(base: &Url, references: &[&str]) -> Result<Vec<SegmentTask>, Error> {
    let mut taken = HashSet::new();
    let mut tasks = Vec::with_capacity(references.len());

    for (index, reference) in references.iter().enumerate() {
        let url = resolve(reference, base)?;
        let mut path = local_path(&url, base);

        let mut prefix = index;
        while !taken.insert(path.clone()) {
            let renamed = path.with_file_name(format!("{prefix}_{}", filename_of(&url)));
            debug!(from = %path.display(), to = %renamed.display(), "Local path already taken");
            path = renamed;
            prefix += references.len();
        }

        tasks.push(SegmentTask {
            index,
            reference: reference.to_string(),
            url,
            path,
        });
    }

    Ok(tasks)
}

pub struct SegmentDownloader {
    fetcher: Arc<dyn Fetch>,
    output_dir: PathBuf,
    max_parallel_downloads: usize,
    segment_timeout: Duration,
    token: CancellationToken,
}

impl SegmentDownloader {
    pub fn new(fetcher: Arc<dyn Fetch>, options: &Options, token: CancellationToken) -> Self {
        Self {
            fetcher,
            output_dir: options.output_dir.clone(),
            max_parallel_downloads: options.max_parallel_downloads.max(1),
            segment_timeout: options.segment_timeout,
            token,
        }
    }

    /// Downloads every task and waits for all of them; one failure never stops
    /// the others.
    pub async fn download(&self, tasks: Vec<SegmentTask>) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_downloads));
        let downloaded_segments = Arc::new(AtomicUsize::new(0));
        let total_segments = tasks.len();
        let start = Instant::now();

        info!(
            segments = total_segments,
            parallel = self.max_parallel_downloads,
            "Starting segments download"
        );

        let handles = tasks
            .into_iter()
            .map(|task| {
                let semaphore = Arc::clone(&semaphore);
                let fetcher = Arc::clone(&self.fetcher);
                let downloaded_segments = Arc::clone(&downloaded_segments);
                let token = self.token.clone();
                let output_dir = self.output_dir.clone();
                let timeout = self.segment_timeout;
                let job = task.clone();

                let handle = tokio::spawn(async move {
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(Error::Cancelled),
                        result = async {
                            match semaphore.acquire().await {
                                Ok(_permit) => download_segment(fetcher.as_ref(), &job, &output_dir, timeout).await,
                                Err(_) => Err(Error::Cancelled),
                            }
                        } => result,
                    };

                    match &result {
                        Ok(_) => {
                            let done = downloaded_segments.fetch_add(1, Ordering::Relaxed) + 1;
                            info!(
                                "{:width$} / {:width$} segs ({:5.2}%)\t {}",
                                done,
                                total_segments,
                                (done as f64 / total_segments as f64) * 100.0,
                                job.path.display(),
                                width = total_segments.to_string().len()
                            );
                        }
                        Err(Error::Cancelled) => debug!(url = %job.url, "segment cancelled"),
                        Err(err) => warn!(reference = %job.reference, "Error downloading segment: {}", err),
                    }

                    result
                });

                (task, handle)
            })
            .collect::<Vec<_>>();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (task, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => Err(Error::fetch_failed(&task.url, format!("worker failed: {err}"))),
            };
            outcomes.push(SegmentOutcome { task, result });
        }

        let report = BatchReport {
            outcomes,
            elapsed: start.elapsed(),
        };

        info!(
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            "Downloaded segments in {:.2?}",
            report.elapsed
        );

        report
    }
}

async fn download_segment(
    fetcher: &dyn Fetch,
    task: &SegmentTask,
    output_dir: &Path,
    timeout: Duration,
) -> Result<u64, Error> {
    let bytes = match tokio::time::timeout(timeout, fetcher.fetch(&task.url)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::fetch_failed(&task.url, format!("timed out after {timeout:?}"))),
    };

    let path = output_dir.join(&task.path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| Error::filesystem(parent, err))?;
    }

    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|err| Error::filesystem(&path, err))?;

    debug!(url = %task.url, path = %path.display(), "Downloaded segment");
    Ok(bytes.len() as u64)
}
