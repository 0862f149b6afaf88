//! Last-known-status bookkeeping and transition detection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use remon_core::{
    FetchOutcome, ListingKey, ListingSnapshot, ListingStatus, SnapshotField, StatusTransitionEvent,
    TrackedListing, TrackerState, TransportFailureKind,
};
use remon_storage::ListingStore;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedOutcome {
    pub outcome: FetchOutcome,
    pub transition: Option<StatusTransitionEvent>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub next_state: TrackerState,
    pub transition: Option<(ListingStatus, ListingStatus)>,
}

/// An `Unknown` snapshot status never overwrites or transitions a known one.
pub fn decide(prior: TrackerState, snapshot: &ListingSnapshot) -> Decision {
    let observed = snapshot.status;
    match prior {
        _ if !observed.is_known() => Decision {
            next_state: prior,
            transition: None,
        },
        TrackerState::NoHistory => Decision {
            next_state: TrackerState::Known(observed),
            transition: None,
        },
        TrackerState::Known(previous) if previous == observed => Decision {
            next_state: prior,
            transition: None,
        },
        TrackerState::Known(previous) => Decision {
            next_state: TrackerState::Known(observed),
            transition: Some((previous, observed)),
        },
    }
}

pub struct TransitionTracker {
    store: Arc<dyn ListingStore>,
    locks: StdMutex<HashMap<ListingKey, Arc<Mutex<()>>>>,
}

impl TransitionTracker {
    pub fn new(store: Arc<dyn ListingStore>) -> Self {
        Self {
            store,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &ListingKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    pub fn forget(&self, key: &ListingKey) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(key);
    }

    /// Failures leave the store untouched. A successful snapshot always
    /// replaces the current one, together with any transition, in one commit.
    pub async fn reconcile(
        &self,
        listing: &TrackedListing,
        outcome: FetchOutcome,
    ) -> Result<TrackedOutcome> {
        let key = listing.key();
        let slot = self.lock_for(&key);
        let _guard = slot.lock().await;

        let FetchOutcome::Success(snapshot) = &outcome else {
            let note = failure_note(listing, &outcome);
            debug!(listing = %key, outcome = outcome.label(), "refresh failed; state untouched");
            return Ok(TrackedOutcome {
                outcome,
                transition: None,
                note,
            });
        };

        let prior = TrackerState::from_known_status(self.store.get_known_status(&key).await?);
        let decision = decide(prior, snapshot);
        let transition = decision
            .transition
            .map(|(from_status, to_status)| StatusTransitionEvent {
                listing: key.clone(),
                from_status,
                to_status,
                observed_at: snapshot.fetched_at,
            });

        self.store
            .apply_refresh(
                &key,
                snapshot,
                decision.next_state.known_status(),
                transition.as_ref(),
            )
            .await?;

        if let Some(event) = &transition {
            info!(
                listing = %key,
                from = %event.from_status,
                to = %event.to_status,
                "listing status changed"
            );
        }

        let note = snapshot_note(prior, snapshot);
        Ok(TrackedOutcome {
            outcome,
            transition,
            note,
        })
    }
}

pub fn failure_note(listing: &TrackedListing, outcome: &FetchOutcome) -> Option<String> {
    let site = listing.source_site.display_name();
    let url = &listing.canonical_url;
    let note = match outcome {
        FetchOutcome::Success(_) => return None,
        FetchOutcome::TransportFailure(failure) => match failure.kind {
            TransportFailureKind::Blocked(status) => format!(
                "{site} refused the request (HTTP {status}). The site is likely rate limiting \
                 automated access; wait a few hours before refreshing, or open {url} in a browser."
            ),
            TransportFailureKind::NotFound => format!(
                "{site} has no page at {url}. The listing may have been withdrawn; \
                 remove it from tracking if it does not come back."
            ),
            TransportFailureKind::Timeout => format!(
                "{site} did not answer in time. Check your connection and try again later."
            ),
            TransportFailureKind::NetworkError => format!(
                "could not reach {site} ({}). Check your connection and try again.",
                failure.message
            ),
            TransportFailureKind::UnexpectedStatus(status) => format!(
                "{site} answered with HTTP {status}. Try again later, or open {url} in a browser."
            ),
        },
        FetchOutcome::ExtractionFailure(failure) => format!(
            "the page from {site} does not look like a listing ({}). The listing may have been \
             taken down or the site layout changed; check {url}.",
            failure.message
        ),
    };
    Some(note)
}

fn snapshot_note(prior: TrackerState, snapshot: &ListingSnapshot) -> Option<String> {
    let mut parts = Vec::new();
    if !snapshot.status.is_known() {
        let kept = match prior.known_status() {
            Some(status) => format!("keeping last known status {status}"),
            None => "no status recorded yet".to_string(),
        };
        match &snapshot.raw_status {
            Some(raw) => parts.push(format!("status text {raw:?} is not recognized; {kept}")),
            None => parts.push(format!("status not found on the page; {kept}")),
        }
    }
    let missing: Vec<&str> = snapshot
        .raw_field_gaps
        .iter()
        .filter(|field| **field != SnapshotField::Status)
        .map(SnapshotField::as_str)
        .collect();
    if !missing.is_empty() {
        parts.push(format!("could not read: {}", missing.join(", ")));
    }
    (!parts.is_empty()).then(|| parts.join(". "))
}
