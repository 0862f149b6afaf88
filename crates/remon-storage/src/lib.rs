//! Page capture, rate-limited HTTP fetching, and the listing record store.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remon_core::{SourceSite, TrackedListing, TransportFailure, TransportFailureKind};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

mod sqlite;
mod store;

pub use sqlite::SqliteListingStore;
pub use store::{ListingStore, MemoryListingStore};

pub const CRATE_NAME: &str = "remon-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const CAPTURE_LOG: &str = "captures.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
    pub byte_size: usize,
}

#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub record: CaptureRecord,
    pub relative_path: PathBuf,
    pub deduplicated: bool,
}

/// Archive of fetched pages under `<root>/<site>/<listing id>/`.
///
/// Each distinct page body is kept once as `<sha256>.html`; every fetch adds
/// a line to the listing's capture log, so the log shows when the page changed.
#[derive(Debug, Clone)]
pub struct PageCaptureStore {
    root: PathBuf,
}

impl PageCaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn listing_path(listing: &TrackedListing) -> PathBuf {
        PathBuf::from(listing.source_site.slug()).join(&listing.listing_id)
    }

    pub async fn store_page(
        &self,
        listing: &TrackedListing,
        fetched_at: DateTime<Utc>,
        html: &str,
    ) -> anyhow::Result<CapturedPage> {
        let listing_path = Self::listing_path(listing);
        let dir = self.root.join(&listing_path);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating capture directory {}", dir.display()))?;

        let content_hash = hex::encode(Sha256::digest(html.as_bytes()));
        let file_name = format!("{content_hash}.html");
        let body_path = dir.join(&file_name);
        let deduplicated = fs::try_exists(&body_path)
            .await
            .with_context(|| format!("checking capture {}", body_path.display()))?;
        if !deduplicated {
            let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
            fs::write(&temp_path, html)
                .await
                .with_context(|| format!("writing {}", temp_path.display()))?;
            if let Err(err) = fs::rename(&temp_path, &body_path).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(err).with_context(|| format!("moving capture to {}", body_path.display()));
            }
        }

        let record = CaptureRecord {
            url: listing.canonical_url.clone(),
            fetched_at,
            content_hash,
            byte_size: html.len(),
        };
        let mut line = serde_json::to_string(&record).context("encoding capture record")?;
        line.push('\n');
        let log_path = dir.join(CAPTURE_LOG);
        let mut log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .with_context(|| format!("opening {}", log_path.display()))?;
        log.write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending to {}", log_path.display()))?;

        Ok(CapturedPage {
            record,
            relative_path: listing_path.join(file_name),
            deduplicated,
        })
    }

    pub async fn captures(&self, listing: &TrackedListing) -> anyhow::Result<Vec<CaptureRecord>> {
        let log_path = self.root.join(Self::listing_path(listing)).join(CAPTURE_LOG);
        if !fs::try_exists(&log_path).await? {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&log_path)
            .await
            .with_context(|| format!("reading {}", log_path.display()))?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("decoding capture record"))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub min_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: StdMutex<Duration>,
    sleeps: StdMutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: StdMutex::new(Duration::ZERO),
            sleeps: StdMutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get(&self, site: SourceSite, url: &str) -> Result<TransportResponse, TransportFailure>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let user_agent = config
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn site_headers(site: SourceSite) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let referer = match site {
            SourceSite::UtahRealEstate => "https://www.utahrealestate.com/",
            SourceSite::Zillow => "https://www.zillow.com/",
        };
        headers.insert(REFERER, HeaderValue::from_static(referer));
        headers
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> TransportFailureKind {
    if err.is_timeout() {
        TransportFailureKind::Timeout
    } else {
        TransportFailureKind::NetworkError
    }
}

#[async_trait]
impl PageTransport for ReqwestTransport {
    async fn get(&self, site: SourceSite, url: &str) -> Result<TransportResponse, TransportFailure> {
        let resp = self
            .client
            .get(url)
            .headers(Self::site_headers(site))
            .send()
            .await
            .map_err(|err| TransportFailure::new(classify_reqwest_error(&err), err.to_string()))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|err| TransportFailure::new(classify_reqwest_error(&err), err.to_string()))?;
        Ok(TransportResponse {
            status,
            final_url,
            body,
        })
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        site: SourceSite,
        url: &str,
        policy: &RateLimitPolicy,
    ) -> Result<String, TransportFailure>;
}

/// Rate-limited, retrying fetcher.
///
/// Fetches are serialized through one lock that also holds the per-site time
/// of the last request, so `min_interval` holds across retries and across
/// listings.
#[derive(Debug)]
pub struct HttpFetcher<T = ReqwestTransport> {
    transport: T,
    clock: Arc<dyn Clock>,
    last_request: Mutex<HashMap<SourceSite, Instant>>,
}

impl HttpFetcher<ReqwestTransport> {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self::with_transport(
            ReqwestTransport::new(config)?,
            Arc::new(TokioClock),
        ))
    }
}

impl<T: PageTransport> HttpFetcher<T> {
    pub fn with_transport(transport: T, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    async fn wait_for_slot(
        &self,
        last_request: &HashMap<SourceSite, Instant>,
        site: SourceSite,
        min_interval: Duration,
    ) {
        let Some(previous) = last_request.get(&site) else {
            return;
        };
        let ready_at = *previous + min_interval;
        let now = self.clock.now();
        if ready_at > now {
            let wait = ready_at - now;
            debug!(site = site.slug(), ?wait, "waiting for request slot");
            self.clock.sleep(wait).await;
        }
    }

    async fn fetch_with_retries(
        &self,
        site: SourceSite,
        url: &str,
        policy: &RateLimitPolicy,
    ) -> Result<String, TransportFailure> {
        let mut last_request = self.last_request.lock().await;
        let mut attempt = 0usize;

        loop {
            self.wait_for_slot(&last_request, site, policy.min_interval)
                .await;
            last_request.insert(site, self.clock.now());

            let failure = match self.transport.get(site, url).await {
                Ok(resp) => match TransportFailureKind::from_status(resp.status) {
                    None => return Ok(resp.body),
                    Some(kind) => TransportFailure::new(
                        kind,
                        format!("HTTP {} for {}", resp.status, resp.final_url),
                    ),
                },
                Err(failure) => failure,
            };

            if !failure.kind.is_retryable() || attempt >= policy.backoff.max_retries {
                return Err(failure);
            }

            let delay = policy.backoff.delay_for_attempt(attempt);
            warn!(
                attempt = attempt + 1,
                max_retries = policy.backoff.max_retries,
                ?delay,
                kind = %failure.kind,
                "fetch failed; backing off before retry"
            );
            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl<T: PageTransport> PageFetcher for HttpFetcher<T> {
    async fn fetch_page(
        &self,
        site: SourceSite,
        url: &str,
        policy: &RateLimitPolicy,
    ) -> Result<String, TransportFailure> {
        let span = info_span!("http_fetch", site = site.slug(), url);
        self.fetch_with_retries(site, url, policy)
            .instrument(span)
            .await
    }
}
