//! HTTP client wrapper for archive traffic.
//!
//! [`HttpClient`] owns one pooled `reqwest` client and offers the three
//! fetch shapes the crate needs: typed JSON documents, plain text, and
//! streamed binary artifacts. It does no pacing or retrying on its own;
//! callers wrap it in [`retry_with_backoff`](super::retry_with_backoff).

use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, Proxy};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// Pooled HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the default timeouts (30s connect, 5min read).
    ///
    /// # Panics
    ///
    /// Panics if the static client configuration cannot be built, which only
    /// happens when the TLS backend fails to initialise. Runs built from user
    /// configuration go through [`with_timeouts`](Self::with_timeouts).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] when the builder fails, or panics
    /// even with system proxy discovery disabled.
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Self, DownloadError> {
        let client = build_client(connect_timeout_secs, read_timeout_secs)?;
        Ok(Self { client })
    }

    /// Fetches `url` and decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Transport and status errors as from [`get_text`](Self::get_text), plus
    /// [`DownloadError::Decode`] when the body is not the expected shape.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DownloadError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| DownloadError::decode(url, e))
    }

    /// Fetches `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on invalid URLs, transport failures,
    /// non-success statuses or empty bodies.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self.send(url).await?;
        let body = response.text().await.map_err(|e| map_transport(url, e))?;
        if body.trim().is_empty() {
            return Err(DownloadError::empty_body(url));
        }
        Ok(body)
    }

    /// Streams a binary artifact from `url` into `dest`, returning bytes written.
    ///
    /// HTML responses are rejected before anything is written: the archive
    /// answers throttled or missing scans with an HTML page and status 200.
    /// On any error the partially written file is removed.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on transport failures, non-success statuses,
    /// HTML content, empty bodies or local I/O errors.
    #[instrument(skip(self, dest), fields(url = %url, dest = %dest.display()))]
    pub async fn stream_to_path(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let response = self.send(url).await?;

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && content_type.to_ascii_lowercase().starts_with("text/html")
        {
            return Err(DownloadError::unexpected_content(url, content_type));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        let outcome = match stream_to_file(&mut file, response, url, dest).await {
            Ok(0) => Err(DownloadError::empty_body(url)),
            other => other,
        };
        drop(file);

        if outcome.is_err() {
            if let Err(e) = tokio::fs::remove_file(dest).await {
                debug!(error = %e, "could not remove partial artifact");
            }
        }
        let bytes = outcome?;
        debug!(bytes, "artifact streamed");
        Ok(bytes)
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        if reqwest::Url::parse(url).is_err() {
            return Err(DownloadError::invalid_url(url));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }
        Ok(response)
    }

    /// Returns the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn map_transport(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| map_transport(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;
    Ok(bytes_written)
}

fn build_client(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Client, DownloadError> {
    let failure = match try_build_client(connect_timeout_secs, read_timeout_secs, false) {
        Ok(client) => return Ok(client),
        Err(BuildClientFailure::Build(error)) => error,
        Err(BuildClientFailure::Panic) => {
            warn!("system proxy lookup panicked while building HTTP client; using env proxies only");
            match try_build_client(connect_timeout_secs, read_timeout_secs, true) {
                Ok(client) => return Ok(client),
                Err(BuildClientFailure::Build(error)) => error,
                Err(BuildClientFailure::Panic) => {
                    return Err(DownloadError::client_build(
                        "builder panicked with system proxy lookup disabled",
                    ));
                }
            }
        }
    };
    Err(DownloadError::client_build(failure.to_string()))
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

// Serialises panic-hook swaps; the hook is process global.
static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
    env_proxies_only: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        #[cfg(test)]
        maybe_inject_client_build_panic();

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .user_agent(user_agent::default_user_agent());
        if env_proxies_only {
            builder = apply_env_proxies(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn apply_env_proxies(mut builder: ClientBuilder) -> ClientBuilder {
    for (scheme, names) in [
        ("https", ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        ("http", ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
    ] {
        let Some(proxy) = first_env_value(&names) else {
            continue;
        };
        let resolved = if scheme == "https" {
            Proxy::https(&proxy)
        } else {
            Proxy::http(&proxy)
        };
        if let Ok(resolved) = resolved {
            builder = builder.proxy(resolved);
        }
    }
    builder
}

fn first_env_value(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
static CLIENT_BUILD_PANIC_INJECTION_COUNT: std::sync::atomic::AtomicUsize =
    std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
fn maybe_inject_client_build_panic() {
    use std::sync::atomic::Ordering;

    if CLIENT_BUILD_PANIC_INJECTION_COUNT
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        panic!("injected HTTP client builder panic");
    }
}
