//! Listing record store contract and an in-memory implementation.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use remon_core::{ListingKey, ListingSnapshot, ListingStatus, StatusTransitionEvent, TrackedListing};
use tokio::sync::RwLock;

/// Persistence collaborator for tracked listings.
///
/// Every method is atomic for the listing it touches. Callers that need a
/// read-modify-write across methods (the transition tracker) serialize per
/// listing key themselves.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn add_listing(&self, listing: &TrackedListing) -> Result<bool>;

    async fn remove_listing(&self, key: &ListingKey) -> Result<bool>;

    async fn get_tracked_listings(&self) -> Result<Vec<TrackedListing>>;

    async fn get_tracked_listing(&self, key: &ListingKey) -> Result<Option<TrackedListing>>;

    async fn get_current_snapshot(&self, key: &ListingKey) -> Result<Option<ListingSnapshot>>;

    /// Last status that was read reliably; never `Unknown`.
    async fn get_known_status(&self, key: &ListingKey) -> Result<Option<ListingStatus>>;

    async fn upsert_snapshot(
        &self,
        key: &ListingKey,
        snapshot: &ListingSnapshot,
        known_status: Option<ListingStatus>,
    ) -> Result<()>;

    async fn append_transition(&self, event: &StatusTransitionEvent) -> Result<()>;

    async fn apply_refresh(
        &self,
        key: &ListingKey,
        snapshot: &ListingSnapshot,
        known_status: Option<ListingStatus>,
        transition: Option<&StatusTransitionEvent>,
    ) -> Result<()> {
        if let Some(event) = transition {
            self.append_transition(event).await?;
        }
        self.upsert_snapshot(key, snapshot, known_status).await
    }

    async fn get_transitions(&self, key: &ListingKey) -> Result<Vec<StatusTransitionEvent>>;

    async fn get_setting(&self, name: &str) -> Result<Option<String>>;

    async fn set_setting(&self, name: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct ListingRecord {
    listing: Option<TrackedListing>,
    snapshot: Option<ListingSnapshot>,
    known_status: Option<ListingStatus>,
    transitions: Vec<StatusTransitionEvent>,
}

#[derive(Debug, Default)]
struct MemoryState {
    order: Vec<ListingKey>,
    records: HashMap<ListingKey, ListingRecord>,
    settings: HashMap<String, String>,
}

impl MemoryState {
    fn tracked_mut(&mut self, key: &ListingKey) -> Result<&mut ListingRecord> {
        match self.records.get_mut(key) {
            Some(record) => Ok(record),
            None => bail!("listing {key} is not tracked"),
        }
    }

    fn write_snapshot(
        &mut self,
        key: &ListingKey,
        snapshot: &ListingSnapshot,
        known_status: Option<ListingStatus>,
    ) -> Result<()> {
        let record = self.tracked_mut(key)?;
        record.snapshot = Some(snapshot.clone());
        record.known_status = known_status.filter(ListingStatus::is_known);
        Ok(())
    }

    fn push_transition(&mut self, event: &StatusTransitionEvent) -> Result<()> {
        self.tracked_mut(&event.listing)?
            .transitions
            .push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryListingStore {
    state: RwLock<MemoryState>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn add_listing(&self, listing: &TrackedListing) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = listing.key();
        if state.records.contains_key(&key) {
            return Ok(false);
        }
        state.order.push(key.clone());
        state.records.insert(
            key,
            ListingRecord {
                listing: Some(listing.clone()),
                ..Default::default()
            },
        );
        Ok(true)
    }

    async fn remove_listing(&self, key: &ListingKey) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.records.remove(key).is_none() {
            return Ok(false);
        }
        state.order.retain(|k| k != key);
        Ok(true)
    }

    async fn get_tracked_listings(&self) -> Result<Vec<TrackedListing>> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|key| state.records.get(key))
            .filter_map(|record| record.listing.clone())
            .collect())
    }

    async fn get_tracked_listing(&self, key: &ListingKey) -> Result<Option<TrackedListing>> {
        let state = self.state.read().await;
        Ok(state.records.get(key).and_then(|r| r.listing.clone()))
    }

    async fn get_current_snapshot(&self, key: &ListingKey) -> Result<Option<ListingSnapshot>> {
        let state = self.state.read().await;
        Ok(state.records.get(key).and_then(|r| r.snapshot.clone()))
    }

    async fn get_known_status(&self, key: &ListingKey) -> Result<Option<ListingStatus>> {
        let state = self.state.read().await;
        Ok(state.records.get(key).and_then(|r| r.known_status))
    }

    async fn upsert_snapshot(
        &self,
        key: &ListingKey,
        snapshot: &ListingSnapshot,
        known_status: Option<ListingStatus>,
    ) -> Result<()> {
        self.state
            .write()
            .await
            .write_snapshot(key, snapshot, known_status)
    }

    async fn append_transition(&self, event: &StatusTransitionEvent) -> Result<()> {
        self.state.write().await.push_transition(event)
    }

    async fn apply_refresh(
        &self,
        key: &ListingKey,
        snapshot: &ListingSnapshot,
        known_status: Option<ListingStatus>,
        transition: Option<&StatusTransitionEvent>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        // Both keys are checked before anything is mutated.
        state.tracked_mut(key)?;
        if let Some(event) = transition {
            if &event.listing != key {
                bail!("transition for {} applied to {key}", event.listing);
            }
            state.push_transition(event)?;
        }
        state.write_snapshot(key, snapshot, known_status)
    }

    async fn get_transitions(&self, key: &ListingKey) -> Result<Vec<StatusTransitionEvent>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(key)
            .map(|r| r.transitions.clone())
            .unwrap_or_default())
    }

    async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.settings.get(name).cloned())
    }

    async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        self.state
            .write()
            .await
            .settings
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}
