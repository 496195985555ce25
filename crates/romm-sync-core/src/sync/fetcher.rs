//! Idempotent, rate-limited asset downloads and deletions

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::catalog::{CatalogRecord, Session};
use crate::error::Error;
use crate::http::{HttpRequest, HttpTransport, RetryPolicy};

/// Timeout for a single cover image
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a single binary download
pub const BINARY_TIMEOUT: Duration = Duration::from_secs(300);

/// Downloads between rate-limit pauses
pub const RATE_LIMIT_EVERY: u32 = 10;
/// Length of a rate-limit pause
pub const RATE_LIMIT_PAUSE: Duration = Duration::from_millis(500);

/// Result of one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded { bytes: u64 },
    /// Destination already existed; nothing was requested
    AlreadyPresent,
    /// The remote has no such asset (404, or an external host refused access)
    Unavailable,
    Failed(String),
}

impl FetchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of one deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete
    AlreadyAbsent,
    Failed(String),
}

/// Run-scoped download counter that pauses after every `every` downloads
#[derive(Debug, Clone)]
pub struct RateLimiter {
    every: u32,
    pause: Duration,
    count: u32,
    pauses: u32,
}

impl RateLimiter {
    pub fn new(every: u32, pause: Duration) -> Self {
        Self {
            every: every.max(1),
            pause,
            count: 0,
            pauses: 0,
        }
    }

    /// Count one download and pause if a batch is complete
    pub fn record(&mut self) {
        self.count += 1;
        if self.count % self.every == 0 {
            self.pauses += 1;
            tracing::debug!("Rate limit: pausing {:?} after {} downloads", self.pause, self.count);
            if !self.pause.is_zero() {
                thread::sleep(self.pause);
            }
        }
    }

    /// Downloads counted so far
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Pauses taken so far
    pub fn pauses(&self) -> u32 {
        self.pauses
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_EVERY, RATE_LIMIT_PAUSE)
    }
}

/// Request for a record's cover art.
///
/// The external URL is preferred; the server-hosted cover is used only when
/// no external URL exists. Server requests carry the session credentials.
pub fn cover_request(session: &Session, record: &CatalogRecord) -> Option<HttpRequest> {
    let url = match (&record.cover_url, &record.local_cover_ref) {
        (Some(url), _) => url.clone(),
        (None, Some(_)) => session.cover_url(record.id),
        (None, None) => return None,
    };

    let request = HttpRequest::get(url, IMAGE_TIMEOUT);
    if session.is_server_url(&request.url) {
        Some(request.with_credentials(session.credentials().clone()))
    } else {
        Some(request)
    }
}

/// Request for a record's binary.
///
/// Streamed, so [`BINARY_TIMEOUT`] limits stalls rather than total size.
pub fn binary_request(session: &Session, record: &CatalogRecord) -> HttpRequest {
    HttpRequest::get(session.download_url(record.id), BINARY_TIMEOUT)
        .with_credentials(session.credentials().clone())
        .streamed()
}

/// Downloads images and binaries, deletes removed files
pub struct AssetFetcher {
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl AssetFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::asset(),
            limiter: RateLimiter::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetch cover art to `dest` unless it already exists
    pub fn fetch_image(&mut self, request: &HttpRequest, dest: &Path) -> FetchOutcome {
        self.fetch(request, dest, "image")
    }

    /// Fetch a binary to `dest` unless it already exists.
    ///
    /// The body streams into `<dest>.part`, renamed on completion.
    pub fn fetch_binary(&mut self, request: &HttpRequest, dest: &Path) -> FetchOutcome {
        self.fetch(request, dest, "binary")
    }

    /// Remove a file; a missing file is already satisfied
    pub fn delete(&self, path: &Path) -> DeleteOutcome {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::info!("Deleted {}", path.display());
                DeleteOutcome::Deleted
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => DeleteOutcome::AlreadyAbsent,
            Err(e) => {
                tracing::warn!("Could not delete {}: {}", path.display(), e);
                DeleteOutcome::Failed(e.to_string())
            }
        }
    }

    fn fetch(&mut self, request: &HttpRequest, dest: &Path, kind: &str) -> FetchOutcome {
        if dest.exists() {
            tracing::debug!("{} already present: {}", kind, dest.display());
            return FetchOutcome::AlreadyPresent;
        }

        let result = self.retry.send(self.transport.as_ref(), request);
        self.limiter.record();

        let response = match result {
            Ok(response) => response,
            Err(Error::NotFound(url)) => {
                tracing::debug!("No {} at {}; skipping", kind, url);
                return FetchOutcome::Unavailable;
            }
            Err(Error::HttpStatus { status: 401 | 403, url }) if request.credentials.is_none() => {
                tracing::debug!("{} at {} requires authentication; skipping", kind, url);
                return FetchOutcome::Unavailable;
            }
            Err(e) => {
                tracing::warn!("Failed to download {} to {}: {}", kind, dest.display(), e);
                return FetchOutcome::Failed(e.to_string());
            }
        };

        match write_streamed(response.into_reader(), dest) {
            Ok(bytes) => {
                tracing::debug!("Downloaded {} ({} bytes) to {}", kind, bytes, dest.display());
                FetchOutcome::Downloaded { bytes }
            }
            Err(e) => {
                tracing::warn!("Failed to write {} to {}: {}", kind, dest.display(), e);
                FetchOutcome::Failed(e.to_string())
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn write_streamed(mut body: Box<dyn io::Read + Send>, dest: &Path) -> io::Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let part = part_path(dest);
    let result = fs::File::create(&part)
        .and_then(|mut file| io::copy(&mut body, &mut file))
        .and_then(|bytes| fs::rename(&part, dest).map(|()| bytes));

    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}
