//! Concurrent tile downloading with bounded retries.
//!
//! Each request is attempted up to [`RetryPolicy::max_attempts`] times with a
//! fixed delay in between. A request that never succeeds is logged and
//! recorded in the [`FetchReport`]; it does not stop the rest of the batch.

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::region::GeometryError;

/// Fatal errors: bad configuration or setup, never a single failed tile.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Unknown tile API {name:?}; available: {available}")]
    UnknownApi { name: String, available: String },

    #[error("Failed to read API table {path}: {source}")]
    ApiTableRead { path: PathBuf, source: io::Error },

    #[error("Invalid API table {path}: {source}")]
    ApiTableParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Zoom {zoom} is deeper than the supported maximum of {max}")]
    ZoomOutOfRange { zoom: u8, max: u8 },

    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Why one download attempt failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DownloadError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}

/// A tile that could not be fetched within the retry budget.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Giving up on {url} -> {} after {attempts} attempts: {last_error}", .destination.display())]
pub struct TileFetchError {
    pub url: String,
    pub destination: PathBuf,
    pub attempts: u32,
    pub last_error: DownloadError,
}

/// One tile to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileRequest {
    pub url: String,
    pub destination: PathBuf,
}

/// Fetches a URL into a file. The seam tests use to avoid the network.
pub trait Downloader: Send + Sync {
    fn download(
        &self,
        url: &str,
        destination: &Path,
    ) -> impl Future<Output = Result<(), DownloadError>> + Send;
}

/// Identifies us to tile servers; OpenStreetMap rejects anonymous clients.
const USER_AGENT: &str = concat!("tile-sampler/", env!("CARGO_PKG_VERSION"));

/// HTTP downloader backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestDownloader {
    client: reqwest::Client,
}

impl ReqwestDownloader {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Downloader for ReqwestDownloader {
    async fn download(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
        trace!(url = url, "HTTP GET request starting");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| DownloadError::Request {
            url: url.to_string(),
            message: format!("failed to read body: {}", e),
        })?;

        tokio::fs::write(destination, &body)
            .await
            .map_err(|e| DownloadError::Write {
                path: destination.to_path_buf(),
                message: e.to_string(),
            })?;

        trace!(url = url, bytes = body.len(), "Tile written");
        Ok(())
    }
}

/// How often and how patiently to retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per request, the first one included
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Deadline for a single attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
            attempt_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Downloads in flight at once
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Leave tiles that are already on disk alone
    pub skip_existing: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            retry: RetryPolicy::default(),
            skip_existing: false,
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum TileOutcome {
    Downloaded { attempts: u32 },
    Skipped,
    Failed(TileFetchError),
}

/// Totals for a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: Vec<TileFetchError>,
}

impl FetchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, outcome: TileOutcome) {
        match outcome {
            TileOutcome::Downloaded { .. } => self.succeeded += 1,
            TileOutcome::Skipped => self.skipped += 1,
            TileOutcome::Failed(e) => self.failed.push(e),
        }
    }
}

pub struct TileFetcher<D> {
    downloader: D,
    config: FetchConfig,
    cancel: CancellationToken,
}

impl<D: Downloader> TileFetcher<D> {
    pub fn new(downloader: D, config: FetchConfig) -> Self {
        Self {
            downloader,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    /// Fetches every request with at most `concurrency` in flight.
    pub async fn fetch_all(&self, requests: Vec<TileRequest>) -> Result<FetchReport, FetchError> {
        self.fetch_all_with_progress(requests, |_| {}).await
    }

    /// Like [`TileFetcher::fetch_all`], calling `on_outcome` as each request finishes.
    ///
    /// Requests sharing a destination are fetched once. Parent directories
    /// are created up front.
    pub async fn fetch_all_with_progress<F>(
        &self,
        requests: Vec<TileRequest>,
        mut on_outcome: F,
    ) -> Result<FetchReport, FetchError>
    where
        F: FnMut(&TileOutcome),
    {
        let submitted = requests.len();
        let requests = dedupe_by_destination(requests);
        if requests.len() < submitted {
            debug!(
                submitted = submitted,
                unique = requests.len(),
                "Dropped requests with duplicate destinations"
            );
        }

        create_parent_dirs(&requests).await?;

        info!(
            requests = requests.len(),
            concurrency = self.config.concurrency,
            "Fetching tiles"
        );

        let mut outcomes = stream::iter(requests.iter())
            .map(|request| self.fetch_one(request))
            .buffer_unordered(self.config.concurrency.max(1));

        let mut report = FetchReport::default();
        while let Some(outcome) = outcomes.next().await {
            on_outcome(&outcome);
            report.record(outcome);
        }

        if report.is_complete() {
            info!(
                succeeded = report.succeeded,
                skipped = report.skipped,
                "All tiles fetched"
            );
        } else {
            error!(
                succeeded = report.succeeded,
                skipped = report.skipped,
                failed = report.failed.len(),
                "Some tiles could not be fetched"
            );
        }

        Ok(report)
    }

    /// Attempts a single request until it succeeds or the retry budget runs out.
    ///
    /// The destination's directory is created first; if that fails nothing
    /// is downloaded.
    pub async fn fetch_one(&self, request: &TileRequest) -> TileOutcome {
        if self.config.skip_existing
            && tokio::fs::try_exists(&request.destination)
                .await
                .unwrap_or(false)
        {
            trace!(path = %request.destination.display(), "Tile exists, skipping");
            return TileOutcome::Skipped;
        }

        if let Some(parent) = request.destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let failure = TileFetchError {
                    url: request.url.clone(),
                    destination: request.destination.clone(),
                    attempts: 0,
                    last_error: DownloadError::Write {
                        path: parent.to_path_buf(),
                        message: e.to_string(),
                    },
                };
                error!(error = %failure, "Cannot create tile directory");
                return TileOutcome::Failed(failure);
            }
        }

        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_error = DownloadError::Cancelled;

        while attempts < max_attempts {
            if self.cancel.is_cancelled() {
                last_error = DownloadError::Cancelled;
                break;
            }
            attempts += 1;

            let download = self.downloader.download(&request.url, &request.destination);
            let result = match policy.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, download)
                    .await
                    .unwrap_or(Err(DownloadError::Timeout(limit))),
                None => download.await,
            };

            match result {
                Ok(()) => {
                    debug!(url = %request.url, attempts = attempts, "Tile downloaded");
                    return TileOutcome::Downloaded { attempts };
                }
                Err(e) => {
                    warn!(
                        url = %request.url,
                        attempt = attempts,
                        max_attempts = max_attempts,
                        error = %e,
                        "Download failed"
                    );
                    last_error = e;
                }
            }

            if attempts < max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = self.cancel.cancelled() => {
                        last_error = DownloadError::Cancelled;
                        break;
                    }
                }
            }
        }

        let failure = TileFetchError {
            url: request.url.clone(),
            destination: request.destination.clone(),
            attempts,
            last_error,
        };
        error!(error = %failure, "Max retries reached, giving up");
        TileOutcome::Failed(failure)
    }
}

/// Keeps the first request for each destination, in order.
pub fn dedupe_by_destination(requests: Vec<TileRequest>) -> Vec<TileRequest> {
    let mut seen = HashSet::new();
    requests
        .into_iter()
        .filter(|r| seen.insert(r.destination.clone()))
        .collect()
}

async fn create_parent_dirs(requests: &[TileRequest]) -> Result<(), FetchError> {
    let parents: HashSet<&Path> = requests
        .iter()
        .filter_map(|r| r.destination.parent())
        .collect();

    for parent in parents {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| FetchError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}
