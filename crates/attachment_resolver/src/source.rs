use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agent_provider::{await_or_cancel, is_cancelled, CancelSignal};
use futures_util::future::BoxFuture;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::error::AttachmentError;
use crate::retry::{is_retryable_fetch_error, retry_delay, BASE_DELAY_MS, MAX_RETRIES};

/// Storage collaborator that locates and downloads attachment bytes.
pub trait AttachmentSource: Send + Sync + 'static {
    /// Resolves a storage reference to a fetchable URL.
    fn resolve_url(&self, source_ref: &str) -> BoxFuture<'static, Result<Url, AttachmentError>>;

    /// Downloads the raw bytes behind `url`, giving up once `cancel` is set.
    fn fetch(&self, url: Url, cancel: CancelSignal) -> BoxFuture<'static, Result<Vec<u8>, AttachmentError>>;
}

/// Transport configuration for [`HttpAttachmentSource`].
#[derive(Debug, Clone)]
pub struct HttpAttachmentSourceConfig {
    /// Base URL storage references are joined onto. Absolute references are
    /// used as-is.
    pub base_url: Option<Url>,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for HttpAttachmentSourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Some(Duration::from_secs(60)),
            max_retries: MAX_RETRIES,
            retry_base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }
}

impl HttpAttachmentSourceConfig {
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

/// Fetches attachments over HTTP(S) with retry on transient failures.
#[derive(Debug, Clone)]
pub struct HttpAttachmentSource {
    http: Client,
    config: HttpAttachmentSourceConfig,
}

impl HttpAttachmentSource {
    pub fn new(config: HttpAttachmentSourceConfig) -> Result<Self, AttachmentError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|error| AttachmentError::Request(error.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpAttachmentSourceConfig {
        &self.config
    }
}

impl AttachmentSource for HttpAttachmentSource {
    fn resolve_url(&self, source_ref: &str) -> BoxFuture<'static, Result<Url, AttachmentError>> {
        let resolved = match Url::parse(source_ref) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.config.base_url {
                Some(base) => base
                    .join(source_ref)
                    .map_err(|error| AttachmentError::invalid_url(source_ref, error)),
                None => Err(AttachmentError::invalid_url(source_ref, "no base URL configured")),
            },
            Err(error) => Err(AttachmentError::invalid_url(source_ref, error)),
        };
        Box::pin(async move { resolved })
    }

    fn fetch(&self, url: Url, cancel: CancelSignal) -> BoxFuture<'static, Result<Vec<u8>, AttachmentError>> {
        let http = self.http.clone();
        let max_retries = self.config.max_retries;
        let base_delay = self.config.retry_base_delay;

        Box::pin(async move {
            let mut last_error = String::new();

            for attempt in 0..=max_retries {
                if is_cancelled(&cancel) {
                    return Err(AttachmentError::Cancelled);
                }

                let outcome = fetch_once(&http, &url, &cancel).await;
                let (status, message) = match outcome {
                    Ok(bytes) => {
                        debug!(url = %url, bytes = bytes.len(), attempt, "attachment fetched");
                        return Ok(bytes);
                    }
                    Err(FetchFailure::Cancelled) => return Err(AttachmentError::Cancelled),
                    Err(FetchFailure::Status(status, message)) => (Some(status), message),
                    Err(FetchFailure::Request(message)) => (None, message),
                };

                last_error = message.clone();
                let retryable = is_retryable_fetch_error(status.map(|value| value.as_u16()), &message);
                if attempt < max_retries && retryable {
                    warn!(url = %url, attempt, error = %message, "retrying attachment fetch");
                    await_or_cancel(tokio::time::sleep(retry_delay(base_delay, attempt)), &cancel).await?;
                    continue;
                }

                return Err(match status {
                    Some(status) if !retryable => AttachmentError::Status {
                        status: status.as_u16(),
                        message,
                    },
                    None if !retryable => AttachmentError::Request(message),
                    _ => AttachmentError::RetryExhausted {
                        attempts: attempt + 1,
                        last_error,
                    },
                });
            }

            Err(AttachmentError::RetryExhausted {
                attempts: max_retries + 1,
                last_error,
            })
        })
    }
}

enum FetchFailure {
    Status(StatusCode, String),
    Request(String),
    Cancelled,
}

async fn fetch_once(http: &Client, url: &Url, cancel: &CancelSignal) -> Result<Vec<u8>, FetchFailure> {
    let response = await_or_cancel(http.get(url.clone()).send(), cancel)
        .await
        .map_err(|_| FetchFailure::Cancelled)?
        .map_err(|error| FetchFailure::Request(error.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = status.canonical_reason().unwrap_or("request failed").to_string();
        return Err(FetchFailure::Status(status, message));
    }

    let bytes = await_or_cancel(response.bytes(), cancel)
        .await
        .map_err(|_| FetchFailure::Cancelled)?
        .map_err(|error| FetchFailure::Request(error.to_string()))?;
    Ok(bytes.to_vec())
}

/// In-process source keyed by storage reference. Useful for tests and local
/// development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAttachmentSource {
    objects: Arc<Mutex<HashMap<String, Result<Vec<u8>, String>>>>,
    fetches: Arc<AtomicUsize>,
}

impl InMemoryAttachmentSource {
    pub const SCHEME: &'static str = "memory";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source_ref: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        lock_unpoisoned(&self.objects).insert(source_ref.into(), Ok(bytes.into()));
    }

    /// Makes every fetch of `source_ref` fail with `message`.
    pub fn fail(&self, source_ref: impl Into<String>, message: impl Into<String>) {
        lock_unpoisoned(&self.objects).insert(source_ref.into(), Err(message.into()));
    }

    /// Number of fetches attempted so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl AttachmentSource for InMemoryAttachmentSource {
    fn resolve_url(&self, source_ref: &str) -> BoxFuture<'static, Result<Url, AttachmentError>> {
        let resolved = Url::parse(&format!("{}:///", Self::SCHEME))
            .and_then(|base| base.join(source_ref))
            .map_err(|error| AttachmentError::invalid_url(source_ref, error));
        Box::pin(async move { resolved })
    }

    fn fetch(&self, url: Url, _cancel: CancelSignal) -> BoxFuture<'static, Result<Vec<u8>, AttachmentError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = url.path().trim_start_matches('/').to_string();
        let object = lock_unpoisoned(&self.objects).get(&key).cloned();

        Box::pin(async move {
            match object {
                Some(Ok(bytes)) => Ok(bytes),
                Some(Err(message)) => Err(AttachmentError::Request(message)),
                None => Err(AttachmentError::Status {
                    status: 404,
                    message: format!("no object stored for {key}"),
                }),
            }
        })
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use agent_provider::cancel_signal;

    use super::*;

    #[tokio::test]
    async fn http_source_joins_relative_refs_onto_base() {
        let base = Url::parse("https://files.example.com/storage/").expect("base url");
        let source = HttpAttachmentSource::new(HttpAttachmentSourceConfig::default().with_base_url(base))
            .expect("client should build");

        let url = source.resolve_url("abc123").await.expect("ref should resolve");
        assert_eq!(url.as_str(), "https://files.example.com/storage/abc123");

        let url = source
            .resolve_url("https://cdn.example.com/x.png")
            .await
            .expect("absolute ref should resolve");
        assert_eq!(url.as_str(), "https://cdn.example.com/x.png");
    }

    #[tokio::test]
    async fn http_source_without_base_rejects_relative_refs() {
        let source = HttpAttachmentSource::new(HttpAttachmentSourceConfig::default())
            .expect("client should build");

        let error = source.resolve_url("abc123").await.expect_err("relative ref needs base");
        assert!(matches!(error, AttachmentError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn in_memory_source_serves_and_fails_objects() {
        let source = InMemoryAttachmentSource::new();
        source.insert("a", b"hello".to_vec());
        source.fail("b", "storage offline");

        let url = source.resolve_url("a").await.expect("ref should resolve");
        assert_eq!(source.fetch(url, cancel_signal()).await, Ok(b"hello".to_vec()));

        let url = source.resolve_url("b").await.expect("ref should resolve");
        assert_eq!(
            source.fetch(url, cancel_signal()).await,
            Err(AttachmentError::Request("storage offline".to_string()))
        );

        let url = source.resolve_url("missing").await.expect("ref should resolve");
        assert!(matches!(
            source.fetch(url, cancel_signal()).await,
            Err(AttachmentError::Status { status: 404, .. })
        ));
        assert_eq!(source.fetch_count(), 3);
    }
}
