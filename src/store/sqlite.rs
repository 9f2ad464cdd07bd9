//! SQLite-backed [`DispatchStore`].
//!
//! Migration is applied inline via `include_str!` on open. Timestamps are
//! stored as epoch milliseconds so claim and TTL checks compare integers.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use super::{ContactGroup, DispatchStore, StoreError};
use crate::model::{Campaign, CampaignStatus, ContactProfile, DispatchItem, ItemStatus};
use crate::payload::Payload;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT_SECS: u64 = 5;

const ITEM_COLUMNS: &str = "id, campaign_id, contact, session_name, message_order, payload, \
     status, scheduled_at, error, created_at, updated_at";

type ItemRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    Option<i64>,
    Option<String>,
    i64,
    i64,
);

/// A new queue entry written by a producer.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Owning campaign.
    pub campaign_id: String,
    /// Target contact.
    pub contact: String,
    /// Sending channel session.
    pub session_name: String,
    /// Position within the contact's sequence.
    pub message_order: i64,
    /// Raw payload text.
    pub payload: String,
    /// Earliest claim instant, if deferred.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewItem {
    /// Build an item from a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn with_payload(
        campaign_id: &str,
        contact: &str,
        session_name: &str,
        message_order: i64,
        payload: &Payload,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            campaign_id: campaign_id.to_owned(),
            contact: contact.to_owned(),
            session_name: session_name.to_owned(),
            message_order,
            payload: serde_json::to_string(payload)?,
            scheduled_at: None,
        })
    }

    /// Defer the item until `at`.
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Dispatch store over a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path, max_connections: u32) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open dispatch db at {}", path.display()))?;

        Self::from_pool(pool)
            .await
            .context("failed to apply dispatch schema migration")
    }

    /// Wrap an existing pool, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration fails.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let migration_sql = include_str!("../../migrations/001_dispatch_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Producer-side helpers
    // -----------------------------------------------------------------------

    /// Insert or replace a campaign's configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or a delay does not fit in SQLite.
    pub async fn upsert_campaign(&self, campaign: &Campaign) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO campaigns (id, delay_ms, contact_delay_ms, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                delay_ms = excluded.delay_ms,
                contact_delay_ms = excluded.contact_delay_ms,
                status = excluded.status",
        )
        .bind(&campaign.id)
        .bind(campaign.delay_ms.map(saturating_i64))
        .bind(campaign.contact_delay_ms.map(saturating_i64))
        .bind(campaign.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip a campaign between active and paused.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE campaigns SET status = ?2 WHERE id = ?1")
            .bind(campaign_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert or replace a contact profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn upsert_contact_profile(&self, profile: &ContactProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO contact_profiles (phone, name, email, company)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(phone) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                company = excluded.company",
        )
        .bind(&profile.phone)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.company)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Queue a new pending item and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, including a duplicate
    /// `(campaign_id, contact, message_order)`.
    pub async fn enqueue_item(&self, item: &NewItem) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            "INSERT INTO dispatch_items
                (id, campaign_id, contact, session_name, message_order, payload,
                 status, scheduled_at, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, NULL, ?8, ?8)",
        )
        .bind(&id)
        .bind(&item.campaign_id)
        .bind(&item.contact)
        .bind(&item.session_name)
        .bind(item.message_order)
        .bind(&item.payload)
        .bind(item.scheduled_at.map(|at| at.timestamp_millis()))
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(item_id = %id, campaign_id = %item.campaign_id, contact = %item.contact, "item enqueued");
        Ok(id)
    }

    /// Fetch one item by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the row is malformed.
    pub async fn item(&self, item_id: &str) -> Result<Option<DispatchItem>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM dispatch_items WHERE id = ?1");
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .map(item_from_row)
            .transpose()
    }

    /// All items of a campaign ordered by contact and message order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a row is malformed.
    pub async fn items_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<DispatchItem>, StoreError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM dispatch_items
             WHERE campaign_id = ?1
             ORDER BY contact ASC, message_order ASC"
        );
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(item_from_row)
            .collect()
    }
}

#[async_trait]
impl DispatchStore for SqliteStore {
    async fn find_ready_item(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchItem>, StoreError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM dispatch_items d
             WHERE d.campaign_id = ?1
               AND d.status = 'pending'
               AND (d.scheduled_at IS NULL OR d.scheduled_at <= ?2)
               AND NOT EXISTS (
                   SELECT 1 FROM dispatch_items p
                   WHERE p.campaign_id = d.campaign_id
                     AND p.contact = d.contact
                     AND p.session_name = d.session_name
                     AND p.status = 'processing'
               )
             ORDER BY d.contact ASC, d.message_order ASC, d.created_at ASC
             LIMIT 1"
        );
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(campaign_id)
            .bind(now.timestamp_millis())
            .fetch_optional(&self.pool)
            .await?
            .map(item_from_row)
            .transpose()
    }

    async fn conditional_bulk_claim(
        &self,
        group: &ContactGroup,
        now: DateTime<Utc>,
        claimed_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        // SQLite evaluates the WHERE clause for every row before applying the
        // update, so the in-flight guard sees the pre-claim state of the group.
        let result = sqlx::query(
            "UPDATE dispatch_items
             SET status = 'processing', updated_at = ?5
             WHERE campaign_id = ?1
               AND contact = ?2
               AND session_name = ?3
               AND status = 'pending'
               AND (scheduled_at IS NULL OR scheduled_at <= ?4)
               AND NOT EXISTS (
                   SELECT 1 FROM dispatch_items p
                   WHERE p.campaign_id = ?1
                     AND p.contact = ?2
                     AND p.session_name = ?3
                     AND p.status = 'processing'
               )",
        )
        .bind(&group.campaign_id)
        .bind(&group.contact)
        .bind(&group.session_name)
        .bind(now.timestamp_millis())
        .bind(claimed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_claimed_batch(
        &self,
        group: &ContactGroup,
        claimed_at: DateTime<Utc>,
    ) -> Result<Vec<DispatchItem>, StoreError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM dispatch_items
             WHERE campaign_id = ?1
               AND contact = ?2
               AND session_name = ?3
               AND status = 'processing'
               AND updated_at >= ?4
             ORDER BY message_order ASC"
        );
        sqlx::query_as::<_, ItemRow>(&sql)
            .bind(&group.campaign_id)
            .bind(&group.contact)
            .bind(&group.session_name)
            .bind(claimed_at.timestamp_millis())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(item_from_row)
            .collect()
    }

    async fn find_campaign_config(
        &self,
        campaign_id: &str,
    ) -> Result<Option<Campaign>, StoreError> {
        let row = sqlx::query_as::<_, (String, Option<i64>, Option<i64>, String)>(
            "SELECT id, delay_ms, contact_delay_ms, status FROM campaigns WHERE id = ?1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, delay_ms, contact_delay_ms, status)| {
            Ok(Campaign {
                id,
                delay_ms: delay_ms.and_then(|v| u64::try_from(v).ok()),
                contact_delay_ms: contact_delay_ms.and_then(|v| u64::try_from(v).ok()),
                status: CampaignStatus::parse(&status)?,
            })
        })
        .transpose()
    }

    async fn find_contact_profile(
        &self,
        contact: &str,
    ) -> Result<Option<ContactProfile>, StoreError> {
        let row = sqlx::query_as::<_, (String, Option<String>, Option<String>, Option<String>)>(
            "SELECT phone, name, email, company FROM contact_profiles WHERE phone = ?1",
        )
        .bind(contact)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(phone, name, email, company)| ContactProfile {
            phone,
            name,
            email,
            company,
        }))
    }

    async fn find_distinct_ready_campaigns(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT d.campaign_id FROM dispatch_items d
             WHERE d.status = 'pending'
               AND (d.scheduled_at IS NULL OR d.scheduled_at <= ?1)
               AND NOT EXISTS (
                   SELECT 1 FROM dispatch_items p
                   WHERE p.campaign_id = d.campaign_id
                     AND p.contact = d.contact
                     AND p.session_name = d.session_name
                     AND p.status = 'processing'
               )
             ORDER BY d.campaign_id ASC",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn update_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE dispatch_items SET status = ?2, error = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'processing'",
        )
        .bind(item_id)
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revert_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE dispatch_items
             SET status = 'pending', updated_at = ?2
             WHERE status = 'processing' AND updated_at < ?1",
        )
        .bind(cutoff.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn item_from_row(row: ItemRow) -> Result<DispatchItem, StoreError> {
    let (
        id,
        campaign_id,
        contact,
        session_name,
        message_order,
        payload,
        status,
        scheduled_at,
        error,
        created_at,
        updated_at,
    ) = row;

    Ok(DispatchItem {
        id,
        campaign_id,
        contact,
        session_name,
        message_order,
        payload,
        status: ItemStatus::parse(&status)?,
        scheduled_at: scheduled_at
            .map(|ms| from_millis("dispatch_items.scheduled_at", ms))
            .transpose()?,
        error,
        created_at: from_millis("dispatch_items.created_at", created_at)?,
        updated_at: from_millis("dispatch_items.updated_at", updated_at)?,
    })
}

fn from_millis(field: &'static str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or(StoreError::InvalidTimestamp { field, millis })
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
