//! SQLite-backed listing store.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remon_core::{
    ListingKey, ListingSnapshot, ListingStatus, SourceSite, StatusTransitionEvent, TrackedListing,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::store::ListingStore;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tracked_listings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_site TEXT NOT NULL,
        listing_id TEXT NOT NULL,
        canonical_url TEXT NOT NULL,
        input_text TEXT NOT NULL,
        added_at TEXT NOT NULL,
        known_status TEXT,
        snapshot_json TEXT,
        last_checked TEXT,
        UNIQUE (source_site, listing_id)
    )",
    "CREATE TABLE IF NOT EXISTS status_transitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_site TEXT NOT NULL,
        listing_id TEXT NOT NULL,
        from_status TEXT NOT NULL,
        to_status TEXT NOT NULL,
        observed_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_status_transitions_listing
        ON status_transitions (source_site, listing_id, id)",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// One pooled connection, so `sqlite::memory:` lives as long as the store.
#[derive(Debug, Clone)]
pub struct SqliteListingStore {
    pool: SqlitePool,
}

impl SqliteListingStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("parsing database url {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("opening sqlite database {database_url}"))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("applying listing store schema")?;
        }
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("parsing timestamp {value:?}"))?
        .with_timezone(&Utc))
}

fn parse_status(value: &str) -> Result<ListingStatus> {
    value.parse().map_err(|e: String| anyhow!(e))
}

fn row_to_listing(row: &SqliteRow) -> Result<TrackedListing> {
    let site: String = row.try_get("source_site")?;
    let added_at: String = row.try_get("added_at")?;
    Ok(TrackedListing {
        source_site: SourceSite::from_str(&site).map_err(|e| anyhow!(e))?,
        listing_id: row.try_get("listing_id")?,
        canonical_url: row.try_get("canonical_url")?,
        input_text: row.try_get("input_text")?,
        added_at: parse_timestamp(&added_at)?,
    })
}

fn row_to_transition(row: &SqliteRow) -> Result<StatusTransitionEvent> {
    let site: String = row.try_get("source_site")?;
    let from_status: String = row.try_get("from_status")?;
    let to_status: String = row.try_get("to_status")?;
    let observed_at: String = row.try_get("observed_at")?;
    Ok(StatusTransitionEvent {
        listing: ListingKey::new(
            SourceSite::from_str(&site).map_err(|e| anyhow!(e))?,
            row.try_get::<String, _>("listing_id")?,
        ),
        from_status: parse_status(&from_status)?,
        to_status: parse_status(&to_status)?,
        observed_at: parse_timestamp(&observed_at)?,
    })
}

async fn write_snapshot(
    conn: &mut SqliteConnection,
    key: &ListingKey,
    snapshot: &ListingSnapshot,
    known_status: Option<ListingStatus>,
) -> Result<()> {
    let snapshot_json = serde_json::to_string(snapshot).context("serializing snapshot")?;
    let known_status = known_status.filter(ListingStatus::is_known);
    let result = sqlx::query(
        "UPDATE tracked_listings
            SET snapshot_json = ?, known_status = ?, last_checked = ?
          WHERE source_site = ? AND listing_id = ?",
    )
    .bind(snapshot_json)
    .bind(known_status.map(|s| s.as_str()))
    .bind(snapshot.fetched_at.to_rfc3339())
    .bind(key.source_site.slug())
    .bind(&key.listing_id)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("writing snapshot for {key}"))?;
    if result.rows_affected() == 0 {
        bail!("listing {key} is not tracked");
    }
    Ok(())
}

async fn insert_transition(conn: &mut SqliteConnection, event: &StatusTransitionEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO status_transitions (source_site, listing_id, from_status, to_status, observed_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(event.listing.source_site.slug())
    .bind(&event.listing.listing_id)
    .bind(event.from_status.as_str())
    .bind(event.to_status.as_str())
    .bind(event.observed_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("appending transition for {}", event.listing))?;
    Ok(())
}

#[async_trait]
impl ListingStore for SqliteListingStore {
    async fn add_listing(&self, listing: &TrackedListing) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO tracked_listings (source_site, listing_id, canonical_url, input_text, added_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (source_site, listing_id) DO NOTHING",
        )
        .bind(listing.source_site.slug())
        .bind(&listing.listing_id)
        .bind(&listing.canonical_url)
        .bind(&listing.input_text)
        .bind(listing.added_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("adding listing {}", listing.key()))?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_listing(&self, key: &ListingKey) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;
        sqlx::query("DELETE FROM status_transitions WHERE source_site = ? AND listing_id = ?")
            .bind(key.source_site.slug())
            .bind(&key.listing_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("deleting history for {key}"))?;
        let result = sqlx::query("DELETE FROM tracked_listings WHERE source_site = ? AND listing_id = ?")
            .bind(key.source_site.slug())
            .bind(&key.listing_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("deleting listing {key}"))?;
        tx.commit().await.context("committing listing removal")?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_tracked_listings(&self) -> Result<Vec<TrackedListing>> {
        let rows = sqlx::query(
            "SELECT source_site, listing_id, canonical_url, input_text, added_at
               FROM tracked_listings ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("loading tracked listings")?;
        rows.iter().map(row_to_listing).collect()
    }

    async fn get_tracked_listing(&self, key: &ListingKey) -> Result<Option<TrackedListing>> {
        let row = sqlx::query(
            "SELECT source_site, listing_id, canonical_url, input_text, added_at
               FROM tracked_listings WHERE source_site = ? AND listing_id = ?",
        )
        .bind(key.source_site.slug())
        .bind(&key.listing_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading listing {key}"))?;
        row.as_ref().map(row_to_listing).transpose()
    }

    async fn get_current_snapshot(&self, key: &ListingKey) -> Result<Option<ListingSnapshot>> {
        let json: Option<Option<String>> = sqlx::query_scalar(
            "SELECT snapshot_json FROM tracked_listings WHERE source_site = ? AND listing_id = ?",
        )
        .bind(key.source_site.slug())
        .bind(&key.listing_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading snapshot for {key}"))?;
        json.flatten()
            .map(|text| {
                serde_json::from_str(&text).with_context(|| format!("decoding snapshot for {key}"))
            })
            .transpose()
    }

    async fn get_known_status(&self, key: &ListingKey) -> Result<Option<ListingStatus>> {
        let status: Option<Option<String>> = sqlx::query_scalar(
            "SELECT known_status FROM tracked_listings WHERE source_site = ? AND listing_id = ?",
        )
        .bind(key.source_site.slug())
        .bind(&key.listing_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading known status for {key}"))?;
        status.flatten().as_deref().map(parse_status).transpose()
    }

    async fn upsert_snapshot(
        &self,
        key: &ListingKey,
        snapshot: &ListingSnapshot,
        known_status: Option<ListingStatus>,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        write_snapshot(&mut conn, key, snapshot, known_status).await
    }

    async fn append_transition(&self, event: &StatusTransitionEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        insert_transition(&mut conn, event).await
    }

    async fn apply_refresh(
        &self,
        key: &ListingKey,
        snapshot: &ListingSnapshot,
        known_status: Option<ListingStatus>,
        transition: Option<&StatusTransitionEvent>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("starting transaction")?;
        if let Some(event) = transition {
            insert_transition(&mut tx, event).await?;
        }
        // An error here drops `tx`, rolling back the transition insert.
        write_snapshot(&mut tx, key, snapshot, known_status).await?;
        tx.commit()
            .await
            .with_context(|| format!("committing refresh for {key}"))
    }

    async fn get_transitions(&self, key: &ListingKey) -> Result<Vec<StatusTransitionEvent>> {
        let rows = sqlx::query(
            "SELECT source_site, listing_id, from_status, to_status, observed_at
               FROM status_transitions
              WHERE source_site = ? AND listing_id = ?
              ORDER BY id",
        )
        .bind(key.source_site.slug())
        .bind(&key.listing_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("loading transitions for {key}"))?;
        rows.iter().map(row_to_transition).collect()
    }

    async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("reading setting {name}"))
    }

    async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("writing setting {name}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remon_core::{resolve_identifier, SnapshotField};
    use tempfile::tempdir;

    async fn memory_store() -> SqliteListingStore {
        SqliteListingStore::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite")
    }

    fn listing(input: &str) -> TrackedListing {
        resolve_identifier(input)
            .unwrap()
            .into_tracked(input, Utc::now())
    }

    #[tokio::test]
    async fn add_is_idempotent_and_ordered() {
        let store = memory_store().await;
        assert!(store.add_listing(&listing("1987654")).await.unwrap());
        assert!(store.add_listing(&listing("zpid 12345678")).await.unwrap());
        assert!(!store.add_listing(&listing("https://www.utahrealestate.com/report/1987654")).await.unwrap());

        let tracked = store.get_tracked_listings().await.unwrap();
        assert_eq!(tracked.len(), 2);
        assert_eq!(tracked[0].listing_id, "1987654");
        assert_eq!(tracked[1].source_site, SourceSite::Zillow);
    }

    #[tokio::test]
    async fn refresh_round_trips_snapshot_status_and_history() {
        let store = memory_store().await;
        let listing = listing("1987654");
        let key = listing.key();
        store.add_listing(&listing).await.unwrap();

        let mut snapshot = ListingSnapshot::new(Utc::now());
        snapshot.status = ListingStatus::Pending;
        snapshot.price = Some(525_000);
        snapshot.record_gap(SnapshotField::AgentName);
        let event = StatusTransitionEvent {
            listing: key.clone(),
            from_status: ListingStatus::ForSale,
            to_status: ListingStatus::Pending,
            observed_at: snapshot.fetched_at,
        };
        store
            .apply_refresh(&key, &snapshot, Some(ListingStatus::Pending), Some(&event))
            .await
            .unwrap();

        let stored = store.get_current_snapshot(&key).await.unwrap().unwrap();
        assert_eq!(stored.price, Some(525_000));
        assert!(stored.has_gap(SnapshotField::AgentName));
        assert_eq!(store.get_known_status(&key).await.unwrap(), Some(ListingStatus::Pending));
        let history = store.get_transitions(&key).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to_status, ListingStatus::Pending);
    }

    #[tokio::test]
    async fn failed_refresh_rolls_back_transition() {
        let store = memory_store().await;
        let key = ListingKey::new(SourceSite::Zillow, "999999");
        let event = StatusTransitionEvent {
            listing: key.clone(),
            from_status: ListingStatus::ForSale,
            to_status: ListingStatus::Sold,
            observed_at: Utc::now(),
        };
        let result = store
            .apply_refresh(&key, &ListingSnapshot::new(Utc::now()), None, Some(&event))
            .await;
        assert!(result.is_err());
        assert!(store.get_transitions(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_discards_history() {
        let store = memory_store().await;
        let listing = listing("1987654");
        let key = listing.key();
        store.add_listing(&listing).await.unwrap();
        store
            .append_transition(&StatusTransitionEvent {
                listing: key.clone(),
                from_status: ListingStatus::ForSale,
                to_status: ListingStatus::Sold,
                observed_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(store.remove_listing(&key).await.unwrap());
        assert!(store.get_tracked_listing(&key).await.unwrap().is_none());
        assert!(store.get_transitions(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn settings_upsert_and_persist_on_disk() {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("properties.db").display());
        {
            let store = SqliteListingStore::connect(&url).await.unwrap();
            assert_eq!(store.get_setting("refresh_interval_days").await.unwrap(), None);
            store.set_setting("refresh_interval_days", "1").await.unwrap();
            store.set_setting("refresh_interval_days", "3").await.unwrap();
            store.pool.close().await;
        }
        let reopened = SqliteListingStore::connect(&url).await.unwrap();
        assert_eq!(
            reopened.get_setting("refresh_interval_days").await.unwrap().as_deref(),
            Some("3")
        );
    }
}
