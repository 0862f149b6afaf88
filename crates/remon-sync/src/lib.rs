//! Refresh orchestration: adding listings, refresh cycles, auto-refresh.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use remon_adapters::extractor_for_site;
use remon_core::{
    resolve_identifier, FetchOutcome, ListingKey, ListingSnapshot, ListingStatus,
    MalformedIdentifier, StatusTransitionEvent, TrackedListing,
};
use remon_storage::{
    BackoffPolicy, Clock, HttpClientConfig, ListingStore, PageCaptureStore, PageFetcher,
    RateLimitPolicy, TokioClock,
};
use serde::Serialize;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

mod tracker;

pub use tracker::{decide, failure_note, Decision, TrackedOutcome, TransitionTracker};

pub const CRATE_NAME: &str = "remon-sync";

pub const AUTO_REFRESH_ENABLED_KEY: &str = "auto_refresh_enabled";
pub const REFRESH_INTERVAL_DAYS_KEY: &str = "refresh_interval_days";
pub const LAST_REFRESH_KEY: &str = "last_refresh";

pub const MIN_REFRESH_INTERVAL_DAYS: u32 = 1;
pub const MAX_REFRESH_INTERVAL_DAYS: u32 = 30;

pub fn clamp_interval_days(days: u32) -> u32 {
    days.clamp(MIN_REFRESH_INTERVAL_DAYS, MAX_REFRESH_INTERVAL_DAYS)
}

pub const TYPICAL_FETCH_LATENCY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub database_url: String,
    pub capture_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub http_timeout_secs: u64,
    pub min_interval_ms: u64,
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub batch_budget_secs: Option<u64>,
    pub scheduler_cron: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://properties.db".to_string(),
            capture_dir: None,
            user_agent: None,
            http_timeout_secs: 10,
            min_interval_ms: 2_000,
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 16_000,
            batch_budget_secs: None,
            scheduler_cron: "0 0 * * * *".to_string(),
        }
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_nonempty("REMON_DATABASE_URL").unwrap_or(defaults.database_url),
            capture_dir: env_nonempty("REMON_CAPTURE_DIR").map(PathBuf::from),
            user_agent: env_nonempty("REMON_USER_AGENT"),
            http_timeout_secs: env_parsed("REMON_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            min_interval_ms: env_parsed("REMON_MIN_INTERVAL_MS").unwrap_or(defaults.min_interval_ms),
            max_retries: env_parsed("REMON_MAX_RETRIES").unwrap_or(defaults.max_retries),
            backoff_base_ms: env_parsed("REMON_BACKOFF_BASE_MS").unwrap_or(defaults.backoff_base_ms),
            backoff_max_ms: env_parsed("REMON_BACKOFF_MAX_MS").unwrap_or(defaults.backoff_max_ms),
            batch_budget_secs: env_parsed("REMON_BATCH_BUDGET_SECS"),
            scheduler_cron: env_nonempty("REMON_SCHEDULER_CRON").unwrap_or(defaults.scheduler_cron),
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            min_interval: Duration::from_millis(self.min_interval_ms),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn batch_budget(&self) -> Option<Duration> {
        self.batch_budget_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Error)]
pub enum AddError {
    #[error(transparent)]
    Malformed(#[from] MalformedIdentifier),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("listing {0} is not tracked")]
    NotTracked(ListingKey),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub listing: TrackedListing,
    pub already_tracked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub listing: TrackedListing,
    pub outcome: FetchOutcome,
    pub transition: Option<StatusTransitionEvent>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "row")]
pub enum BatchRow {
    Refreshed(RefreshReport),
    Failed {
        listing: TrackedListing,
        error: String,
    },
}

impl BatchRow {
    pub fn listing(&self) -> &TrackedListing {
        match self {
            BatchRow::Refreshed(report) => &report.listing,
            BatchRow::Failed { listing, .. } => listing,
        }
    }

    pub fn report(&self) -> Option<&RefreshReport> {
        match self {
            BatchRow::Refreshed(report) => Some(report),
            BatchRow::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshBatch {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One row per attempted listing, in tracked order.
    pub rows: Vec<BatchRow>,
    /// Listings not started because the batch budget ran out.
    pub skipped: Vec<TrackedListing>,
}

impl RefreshBatch {
    pub fn succeeded(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.report().is_some_and(|r| r.outcome.is_success()))
            .count()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &StatusTransitionEvent> {
        self.rows
            .iter()
            .filter_map(|row| row.report()?.transition.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoRefreshSettings {
    pub enabled: bool,
    pub interval_days: u32,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Default for AutoRefreshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_days: 1,
            last_refresh: None,
        }
    }
}

impl AutoRefreshSettings {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(last) = self.last_refresh else {
            return true;
        };
        // An unrepresentable next-refresh time is never reached.
        chrono::Duration::try_days(i64::from(self.interval_days))
            .and_then(|interval| last.checked_add_signed(interval))
            .is_some_and(|next| now >= next)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingOverview {
    pub listing: TrackedListing,
    pub known_status: Option<ListingStatus>,
    pub snapshot: Option<ListingSnapshot>,
}

pub fn estimate_batch_duration(count: usize, policy: &RateLimitPolicy) -> Duration {
    let per_listing = TYPICAL_FETCH_LATENCY + policy.min_interval;
    per_listing.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
}

pub struct RefreshOrchestrator {
    store: Arc<dyn ListingStore>,
    fetcher: Arc<dyn PageFetcher>,
    tracker: TransitionTracker,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
    batch_budget: Option<Duration>,
    capture: Option<PageCaptureStore>,
}

impl RefreshOrchestrator {
    pub fn new(store: Arc<dyn ListingStore>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            tracker: TransitionTracker::new(store.clone()),
            store,
            fetcher,
            clock: Arc::new(TokioClock),
            policy: RateLimitPolicy::default(),
            batch_budget: None,
            capture: None,
        }
    }

    pub fn from_config(
        config: &MonitorConfig,
        store: Arc<dyn ListingStore>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let orchestrator = Self::new(store, fetcher)
            .with_policy(config.rate_limit_policy())
            .with_batch_budget(config.batch_budget());
        match &config.capture_dir {
            Some(dir) => orchestrator.with_capture_store(PageCaptureStore::new(dir.clone())),
            None => orchestrator,
        }
    }

    pub fn with_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_budget(mut self, budget: Option<Duration>) -> Self {
        self.batch_budget = budget;
        self
    }

    pub fn with_capture_store(mut self, capture: PageCaptureStore) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub async fn resolve_and_add(&self, raw: &str) -> Result<AddOutcome, AddError> {
        let resolved = resolve_identifier(raw)?;
        let key = resolved.key();
        let listing = resolved.into_tracked(raw.trim(), Utc::now());
        let added = self.store.add_listing(&listing).await?;
        if added {
            info!(listing = %key, url = %listing.canonical_url, "tracking new listing");
            return Ok(AddOutcome {
                listing,
                already_tracked: false,
            });
        }
        let existing = self.store.get_tracked_listing(&key).await?;
        Ok(AddOutcome {
            listing: existing.unwrap_or(listing),
            already_tracked: true,
        })
    }

    pub async fn remove(&self, key: &ListingKey) -> Result<bool> {
        let removed = self.store.remove_listing(key).await?;
        self.tracker.forget(key);
        if removed {
            info!(listing = %key, "stopped tracking listing");
        }
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        for listing in self.store.get_tracked_listings().await? {
            if self.remove(&listing.key()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn overview(&self) -> Result<Vec<ListingOverview>> {
        let mut rows = Vec::new();
        for listing in self.store.get_tracked_listings().await? {
            let key = listing.key();
            rows.push(ListingOverview {
                known_status: self.store.get_known_status(&key).await?,
                snapshot: self.store.get_current_snapshot(&key).await?,
                listing,
            });
        }
        Ok(rows)
    }

    pub async fn refresh_one(&self, key: &ListingKey) -> Result<RefreshReport, RefreshError> {
        let listing = self
            .store
            .get_tracked_listing(key)
            .await?
            .ok_or_else(|| RefreshError::NotTracked(key.clone()))?;
        let policy = self.policy;
        let report = self
            .refresh_listing(&listing, &policy)
            .instrument(info_span!("refresh_listing", listing = %key))
            .await?;
        Ok(report)
    }

    /// Refresh every tracked listing, one at a time, in tracked order.
    ///
    /// Per-listing failures become rows; only failing to load the tracked
    /// set fails the batch.
    pub async fn refresh_all(&self, policy: &RateLimitPolicy) -> Result<RefreshBatch> {
        let run_id = Uuid::new_v4();
        self.refresh_all_inner(run_id, policy)
            .instrument(info_span!("refresh_batch", %run_id))
            .await
    }

    async fn refresh_all_inner(&self, run_id: Uuid, policy: &RateLimitPolicy) -> Result<RefreshBatch> {
        let started_at = Utc::now();
        let started = self.clock.now();
        let listings = self
            .store
            .get_tracked_listings()
            .await
            .context("loading tracked listings")?;
        info!(listings = listings.len(), "starting refresh batch");

        let mut rows = Vec::with_capacity(listings.len());
        let mut skipped = Vec::new();
        let mut pending = listings.into_iter();
        while let Some(listing) = pending.next() {
            if let Some(budget) = self.batch_budget {
                let elapsed = self.clock.now().saturating_duration_since(started);
                if elapsed >= budget {
                    skipped.push(listing);
                    skipped.extend(pending.by_ref());
                    warn!(?budget, skipped = skipped.len(), "refresh batch budget exhausted");
                    break;
                }
            }

            let key = listing.key();
            let row = match self
                .refresh_listing(&listing, policy)
                .instrument(info_span!("refresh_listing", listing = %key))
                .await
            {
                Ok(report) => BatchRow::Refreshed(report),
                Err(err) => {
                    warn!(listing = %key, error = %format!("{err:#}"), "refresh could not be recorded");
                    BatchRow::Failed {
                        listing,
                        error: format!("{err:#}"),
                    }
                }
            };
            rows.push(row);
        }

        let finished_at = Utc::now();
        self.store
            .set_setting(LAST_REFRESH_KEY, &finished_at.to_rfc3339())
            .await
            .context("recording last refresh time")?;

        let batch = RefreshBatch {
            run_id,
            started_at,
            finished_at,
            rows,
            skipped,
        };
        info!(
            attempted = batch.rows.len(),
            succeeded = batch.succeeded(),
            transitions = batch.transitions().count(),
            skipped = batch.skipped.len(),
            "refresh batch finished"
        );
        Ok(batch)
    }

    pub async fn history(&self, key: &ListingKey) -> Result<Vec<StatusTransitionEvent>> {
        self.store.get_transitions(key).await
    }

    pub async fn auto_refresh_settings(&self) -> Result<AutoRefreshSettings> {
        let defaults = AutoRefreshSettings::default();
        let enabled = match self.store.get_setting(AUTO_REFRESH_ENABLED_KEY).await? {
            Some(value) => value == "true",
            None => defaults.enabled,
        };
        let interval_days = self
            .store
            .get_setting(REFRESH_INTERVAL_DAYS_KEY)
            .await?
            .and_then(|value| value.parse().ok())
            .map(clamp_interval_days)
            .unwrap_or(defaults.interval_days);
        let last_refresh = match self.store.get_setting(LAST_REFRESH_KEY).await? {
            Some(value) => match DateTime::parse_from_rfc3339(&value) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(err) => {
                    warn!(value = %value, %err, "ignoring unparseable last refresh time");
                    None
                }
            },
            None => None,
        };
        Ok(AutoRefreshSettings {
            enabled,
            interval_days,
            last_refresh,
        })
    }

    /// The interval is clamped to 1..=30 days. `last_refresh` is owned by
    /// [`Self::refresh_all`].
    pub async fn set_auto_refresh_settings(&self, enabled: bool, interval_days: u32) -> Result<()> {
        self.store
            .set_setting(AUTO_REFRESH_ENABLED_KEY, if enabled { "true" } else { "false" })
            .await?;
        self.store
            .set_setting(REFRESH_INTERVAL_DAYS_KEY, &clamp_interval_days(interval_days).to_string())
            .await
    }

    pub async fn should_auto_refresh(&self, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.auto_refresh_settings().await?.is_due(now))
    }

    pub async fn refresh_all_if_due(&self) -> Result<Option<RefreshBatch>> {
        if !self.should_auto_refresh(Utc::now()).await? {
            debug!("auto-refresh not due");
            return Ok(None);
        }
        let policy = self.policy;
        self.refresh_all(&policy).await.map(Some)
    }

    async fn refresh_listing(
        &self,
        listing: &TrackedListing,
        policy: &RateLimitPolicy,
    ) -> Result<RefreshReport> {
        let outcome = self.fetch_outcome(listing, policy).await;
        let tracked = self.tracker.reconcile(listing, outcome).await?;
        if let Some(note) = &tracked.note {
            debug!(outcome = tracked.outcome.label(), note = %note, "refresh note");
        }
        Ok(RefreshReport {
            listing: listing.clone(),
            outcome: tracked.outcome,
            transition: tracked.transition,
            note: tracked.note,
        })
    }

    async fn fetch_outcome(&self, listing: &TrackedListing, policy: &RateLimitPolicy) -> FetchOutcome {
        let html = match self
            .fetcher
            .fetch_page(listing.source_site, &listing.canonical_url, policy)
            .await
        {
            Ok(html) => html,
            Err(failure) => {
                warn!(kind = %failure.kind, "listing fetch failed");
                return FetchOutcome::TransportFailure(failure);
            }
        };
        let fetched_at = Utc::now();

        if let Some(capture) = &self.capture {
            match capture.store_page(listing, fetched_at, &html).await {
                Ok(page) => debug!(
                    path = %page.relative_path.display(),
                    deduplicated = page.deduplicated,
                    "captured listing page"
                ),
                Err(err) => warn!(error = %format!("{err:#}"), "failed to capture listing page"),
            }
        }

        match extractor_for_site(listing.source_site).extract(&html, fetched_at) {
            Ok(snapshot) => FetchOutcome::Success(snapshot),
            Err(failure) => FetchOutcome::ExtractionFailure(failure),
        }
    }
}

pub async fn maybe_build_scheduler(
    orchestrator: Arc<RefreshOrchestrator>,
    cron: &str,
) -> Result<Option<JobScheduler>> {
    if !orchestrator.auto_refresh_settings().await?.enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            match orchestrator.refresh_all_if_due().await {
                Ok(Some(batch)) => info!(
                    run_id = %batch.run_id,
                    succeeded = batch.succeeded(),
                    "scheduled refresh finished"
                ),
                Ok(None) => debug!("scheduled check: refresh not due"),
                Err(err) => warn!(error = %format!("{err:#}"), "scheduled refresh failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use remon_storage::MemoryListingStore;

    struct NoNetwork;

    #[async_trait::async_trait]
    impl PageFetcher for NoNetwork {
        async fn fetch_page(
            &self,
            _site: remon_core::SourceSite,
            _url: &str,
            _policy: &RateLimitPolicy,
        ) -> Result<String, remon_core::TransportFailure> {
            Err(remon_core::TransportFailure::new(
                remon_core::TransportFailureKind::NetworkError,
                "offline",
            ))
        }
    }

    fn orchestrator() -> RefreshOrchestrator {
        RefreshOrchestrator::new(Arc::new(MemoryListingStore::new()), Arc::new(NoNetwork))
    }

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = MonitorConfig::default();
        let policy = config.rate_limit_policy();
        assert_eq!(policy, RateLimitPolicy::default());
        assert_eq!(config.http_client_config().timeout, Duration::from_secs(10));
        assert_eq!(config.batch_budget(), None);
        assert_eq!(config.database_url, "sqlite://properties.db");
    }

    #[test]
    fn auto_refresh_due_follows_flag_and_interval() {
        let mut settings = AutoRefreshSettings::default();
        assert!(settings.is_due(ts("2026-03-01T00:00:00Z")));

        settings.last_refresh = Some(ts("2026-03-01T08:00:00Z"));
        settings.interval_days = 2;
        assert!(!settings.is_due(ts("2026-03-03T07:59:59Z")));
        assert!(settings.is_due(ts("2026-03-03T08:00:00Z")));

        settings.enabled = false;
        assert!(!settings.is_due(ts("2026-04-01T00:00:00Z")));
    }

    #[test]
    fn estimate_counts_latency_and_spacing() {
        let estimate = estimate_batch_duration(10, &RateLimitPolicy::default());
        assert_eq!(estimate, Duration::from_secs(40));
    }

    #[tokio::test]
    async fn add_is_idempotent_and_rejects_malformed_input() {
        let orchestrator = orchestrator();
        let first = orchestrator.resolve_and_add(" MLS# 1987654 ").await.unwrap();
        assert!(!first.already_tracked);
        assert_eq!(first.listing.input_text, "MLS# 1987654");

        let again = orchestrator
            .resolve_and_add("https://www.utahrealestate.com/report/1987654")
            .await
            .unwrap();
        assert!(again.already_tracked);
        assert_eq!(again.listing.input_text, "MLS# 1987654");
        assert_eq!(orchestrator.overview().await.unwrap().len(), 1);

        let err = orchestrator
            .resolve_and_add("123 Main St, Salt Lake City")
            .await
            .unwrap_err();
        assert!(matches!(err, AddError::Malformed(_)));
    }

    #[tokio::test]
    async fn settings_round_trip_and_gate_refresh() {
        let orchestrator = orchestrator();
        assert_eq!(
            orchestrator.auto_refresh_settings().await.unwrap(),
            AutoRefreshSettings::default()
        );

        orchestrator.set_auto_refresh_settings(false, 3).await.unwrap();
        let settings = orchestrator.auto_refresh_settings().await.unwrap();
        assert!(!settings.enabled);
        assert_eq!(settings.interval_days, 3);
        assert!(orchestrator.refresh_all_if_due().await.unwrap().is_none());

        orchestrator.set_auto_refresh_settings(true, 1).await.unwrap();
        let batch = orchestrator.refresh_all_if_due().await.unwrap();
        assert!(batch.is_some());
        assert!(orchestrator.auto_refresh_settings().await.unwrap().last_refresh.is_some());
        // Just refreshed, so the next check is not due.
        assert!(orchestrator.refresh_all_if_due().await.unwrap().is_none());
    }

    #[test]
    fn far_future_refresh_time_is_never_due() {
        let settings = AutoRefreshSettings {
            enabled: true,
            interval_days: u32::MAX,
            last_refresh: Some(DateTime::<Utc>::MAX_UTC - chrono::Duration::days(1)),
        };
        assert!(!settings.is_due(DateTime::<Utc>::MAX_UTC - chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn interval_is_clamped_and_due_check_survives_huge_values() {
        let orchestrator = orchestrator();
        orchestrator.refresh_all(&RateLimitPolicy::default()).await.unwrap();

        orchestrator.set_auto_refresh_settings(true, u32::MAX).await.unwrap();
        assert_eq!(orchestrator.auto_refresh_settings().await.unwrap().interval_days, 30);
        assert!(orchestrator.refresh_all_if_due().await.unwrap().is_none());

        orchestrator.set_auto_refresh_settings(true, 0).await.unwrap();
        assert_eq!(orchestrator.auto_refresh_settings().await.unwrap().interval_days, 1);

        // Values written before clamping existed are clamped on read.
        orchestrator
            .store
            .set_setting(REFRESH_INTERVAL_DAYS_KEY, "4294967295")
            .await
            .unwrap();
        assert_eq!(orchestrator.auto_refresh_settings().await.unwrap().interval_days, 30);
        assert!(orchestrator.refresh_all_if_due().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_all_removes_every_listing_but_keeps_settings() {
        let orchestrator = orchestrator();
        for input in ["1987654", "ZPID 12345678", "URE-2000001"] {
            orchestrator.resolve_and_add(input).await.unwrap();
        }
        orchestrator.set_auto_refresh_settings(false, 7).await.unwrap();

        assert_eq!(orchestrator.clear_all().await.unwrap(), 3);
        assert!(orchestrator.overview().await.unwrap().is_empty());
        assert_eq!(orchestrator.clear_all().await.unwrap(), 0);
        assert_eq!(orchestrator.auto_refresh_settings().await.unwrap().interval_days, 7);
    }

    #[tokio::test]
    async fn refreshing_an_untracked_listing_is_an_error() {
        let orchestrator = orchestrator();
        let key = ListingKey::new(remon_core::SourceSite::Zillow, "12345678");
        let err = orchestrator.refresh_one(&key).await.unwrap_err();
        assert!(matches!(err, RefreshError::NotTracked(_)));
    }
}
