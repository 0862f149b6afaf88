use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use remon_core::{
    ExtractionFailureKind, FetchOutcome, ListingKey, ListingStatus, SourceSite, TransportFailure,
    TransportFailureKind,
};
use remon_storage::{
    ListingStore, ManualClock, MemoryListingStore, PageFetcher, RateLimitPolicy,
    SqliteListingStore,
};
use remon_sync::{BatchRow, RefreshOrchestrator};

#[derive(Default)]
struct FakeFetcher {
    pages: Mutex<HashMap<String, Result<String, TransportFailureKind>>>,
    requests: Mutex<Vec<String>>,
    clock: Option<Arc<ManualClock>>,
    latency: Duration,
}

impl FakeFetcher {
    fn with_clock(clock: Arc<ManualClock>, latency: Duration) -> Self {
        Self {
            clock: Some(clock),
            latency,
            ..Default::default()
        }
    }

    fn serve(&self, url: &str, page: Result<String, TransportFailureKind>) {
        self.pages.lock().unwrap().insert(url.to_string(), page);
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch_page(
        &self,
        _site: SourceSite,
        url: &str,
        _policy: &RateLimitPolicy,
    ) -> Result<String, TransportFailure> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(clock) = &self.clock {
            clock.advance(self.latency);
        }
        match self.pages.lock().unwrap().get(url).cloned() {
            Some(Ok(html)) => Ok(html),
            Some(Err(kind)) => Err(TransportFailure::new(kind, "scripted failure")),
            None => Err(TransportFailure::new(TransportFailureKind::NotFound, "no page")),
        }
    }
}

fn utah_page(status: &str, price: &str) -> String {
    format!(
        r#"<html><body>
        <h2>1234 E Maple Ridge Dr</h2>
        <div id="location-data">, Sandy, UT 84092</div>
        <ul class="facts">
          <li><span class="facts-header">Status</span> {status}</li>
          <li><span class="facts-header">List Price</span> {price}</li>
          <li><span class="facts-header">MLS#</span> 1987654</li>
        </ul>
        </body></html>"#
    )
}

fn zillow_page(home_status: &str, price: u64) -> String {
    format!(
        r#"<html><body><h1>4821 S Aspen Hollow Ln</h1>
        <script>{{"zpid":12345678,"homeStatus":"{home_status}","price":{price}}}</script>
        </body></html>"#
    )
}

const URE_URL: &str = "https://www.utahrealestate.com/report/1987654";
const URE_OTHER_URL: &str = "https://www.utahrealestate.com/report/2000001";
const ZILLOW_URL: &str = "https://www.zillow.com/homedetails/12345678_zpid/";

async fn track_three(orchestrator: &RefreshOrchestrator) {
    for input in ["1987654", "ZPID 12345678", "URE-2000001"] {
        orchestrator.resolve_and_add(input).await.unwrap();
    }
}

#[tokio::test]
async fn batch_continues_past_a_failed_listing_in_order() {
    let store = Arc::new(MemoryListingStore::new());
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(URE_URL, Ok(utah_page("Active", "$625,000")));
    fetcher.serve(ZILLOW_URL, Ok("<html><body><h1>Search results</h1></body></html>".into()));
    fetcher.serve(URE_OTHER_URL, Ok(utah_page("Sold", "$410,000")));
    let orchestrator = RefreshOrchestrator::new(store.clone(), fetcher.clone());
    track_three(&orchestrator).await;

    let batch = orchestrator.refresh_all(&RateLimitPolicy::default()).await.unwrap();

    let ids: Vec<&str> = batch.rows.iter().map(|r| r.listing().listing_id.as_str()).collect();
    assert_eq!(ids, vec!["1987654", "12345678", "2000001"]);
    assert_eq!(batch.succeeded(), 2);
    assert!(batch.skipped.is_empty());

    let middle = batch.rows[1].report().expect("report");
    match &middle.outcome {
        FetchOutcome::ExtractionFailure(failure) => {
            assert_eq!(failure.kind, ExtractionFailureKind::NotAListingPage)
        }
        other => panic!("expected extraction failure, got {other:?}"),
    }
    assert!(middle.note.is_some());

    let sold = batch.rows[2].report().unwrap().outcome.snapshot().unwrap();
    assert_eq!(sold.status, ListingStatus::Sold);
    assert_eq!(sold.price, Some(410_000));
    assert_eq!(fetcher.requests(), vec![URE_URL, ZILLOW_URL, URE_OTHER_URL]);
    assert!(orchestrator.auto_refresh_settings().await.unwrap().last_refresh.is_some());
}

#[tokio::test]
async fn status_change_is_recorded_once_and_unknown_keeps_it() {
    let store = Arc::new(MemoryListingStore::new());
    let fetcher = Arc::new(FakeFetcher::default());
    let orchestrator = RefreshOrchestrator::new(store.clone(), fetcher.clone());
    let added = orchestrator.resolve_and_add("ZPID 12345678").await.unwrap();
    let key = added.listing.key();

    fetcher.serve(ZILLOW_URL, Ok(zillow_page("FOR_SALE", 500_000)));
    let first = orchestrator.refresh_one(&key).await.unwrap();
    assert!(first.transition.is_none());

    fetcher.serve(ZILLOW_URL, Ok(zillow_page("PENDING", 495_000)));
    let second = orchestrator.refresh_one(&key).await.unwrap();
    let event = second.transition.expect("for sale -> pending");
    assert_eq!((event.from_status, event.to_status), (ListingStatus::ForSale, ListingStatus::Pending));

    fetcher.serve(ZILLOW_URL, Ok(zillow_page("AUCTION", 480_000)));
    let third = orchestrator.refresh_one(&key).await.unwrap();
    assert!(third.transition.is_none());
    assert_eq!(store.get_known_status(&key).await.unwrap(), Some(ListingStatus::Pending));
    let current = store.get_current_snapshot(&key).await.unwrap().unwrap();
    assert_eq!(current.price, Some(480_000));
    assert_eq!(current.raw_status.as_deref(), Some("AUCTION"));

    assert_eq!(orchestrator.history(&key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn transport_failure_leaves_snapshot_and_history_alone() {
    let store = Arc::new(MemoryListingStore::new());
    let fetcher = Arc::new(FakeFetcher::default());
    let orchestrator = RefreshOrchestrator::new(store.clone(), fetcher.clone());
    let key = orchestrator.resolve_and_add("1987654").await.unwrap().listing.key();

    fetcher.serve(URE_URL, Ok(utah_page("Active", "$625,000")));
    orchestrator.refresh_one(&key).await.unwrap();
    let before = store.get_current_snapshot(&key).await.unwrap();

    fetcher.serve(URE_URL, Err(TransportFailureKind::Blocked(429)));
    let report = orchestrator.refresh_one(&key).await.unwrap();
    assert!(matches!(
        report.outcome,
        FetchOutcome::TransportFailure(TransportFailure { kind: TransportFailureKind::Blocked(429), .. })
    ));
    assert!(report.note.unwrap().contains("HTTP 429"));
    assert_eq!(store.get_current_snapshot(&key).await.unwrap(), before);
    assert!(orchestrator.history(&key).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_budget_skips_remaining_listings() {
    let clock = Arc::new(ManualClock::new());
    let fetcher = Arc::new(FakeFetcher::with_clock(clock.clone(), Duration::from_secs(30)));
    for url in [URE_URL, ZILLOW_URL, URE_OTHER_URL] {
        fetcher.serve(url, Err(TransportFailureKind::Timeout));
    }
    let orchestrator = RefreshOrchestrator::new(Arc::new(MemoryListingStore::new()), fetcher.clone())
        .with_batch_budget(Some(Duration::from_secs(45)))
        .with_clock(clock.clone());
    track_three(&orchestrator).await;

    let batch = orchestrator.refresh_all(&RateLimitPolicy::default()).await.unwrap();

    assert_eq!(batch.rows.len(), 2);
    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].listing_id, "2000001");
    assert_eq!(fetcher.requests().len(), 2);
    assert_eq!(clock.elapsed(), Duration::from_secs(60));
}

#[tokio::test]
async fn pages_are_captured_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(URE_URL, Ok(utah_page("Active", "$625,000")));
    let captures = remon_storage::PageCaptureStore::new(dir.path());
    let orchestrator = RefreshOrchestrator::new(Arc::new(MemoryListingStore::new()), fetcher)
        .with_capture_store(captures.clone());
    let added = orchestrator.resolve_and_add("1987654").await.unwrap();
    let key = added.listing.key();

    orchestrator.refresh_one(&key).await.unwrap();
    orchestrator.refresh_one(&key).await.unwrap();

    let log = captures.captures(&added.listing).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].url, URE_URL);
    assert_eq!(log[0].content_hash, log[1].content_hash);
    let listing_dir = dir.path().join("utahrealestate").join("1987654");
    assert!(listing_dir.join(format!("{}.html", log[0].content_hash)).exists());
}

#[tokio::test]
async fn sqlite_store_backs_a_full_cycle() {
    let store = Arc::new(SqliteListingStore::connect("sqlite::memory:").await.unwrap());
    let fetcher = Arc::new(FakeFetcher::default());
    let orchestrator = RefreshOrchestrator::new(store.clone(), fetcher.clone());
    let key = orchestrator
        .resolve_and_add("https://www.utahrealestate.com/report/1987654")
        .await
        .unwrap()
        .listing
        .key();

    fetcher.serve(URE_URL, Ok(utah_page("Active", "$625,000")));
    orchestrator.refresh_all(&RateLimitPolicy::default()).await.unwrap();
    fetcher.serve(URE_URL, Ok(utah_page("Under Contract", "$615,000")));
    let batch = orchestrator.refresh_all(&RateLimitPolicy::default()).await.unwrap();

    assert!(matches!(batch.rows[0], BatchRow::Refreshed(_)));
    assert_eq!(batch.transitions().count(), 1);
    assert_eq!(store.get_known_status(&key).await.unwrap(), Some(ListingStatus::Pending));

    assert!(orchestrator.remove(&key).await.unwrap());
    assert!(orchestrator.history(&key).await.unwrap().is_empty());
    assert!(orchestrator
        .refresh_one(&ListingKey::new(SourceSite::UtahRealEstate, "1987654"))
        .await
        .is_err());
}
