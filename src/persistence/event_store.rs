//! Event store for application streams
//!
//! Events are immutable rows keyed by `(aggregate_id, event_version)`; the
//! latest snapshot of each aggregate is kept next to them so loads only replay
//! the tail of the stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use crate::domain::{ApplicationEvent, ApplicationSnapshot, ApplicationState, EventEnvelope};
use crate::error::{GovernanceError, Result};

/// Metadata for stored events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation ID shared by every event written in one save
    pub correlation_id: Option<String>,
    /// Command or poller delivery that caused the event
    pub causation_id: Option<String>,
    /// User or system that triggered the event
    pub triggered_by: Option<String>,
    /// Aggregate operation that staged the event
    pub operation: Option<String>,
}

impl EventMetadata {
    pub fn with_correlation(correlation_id: &str) -> Self {
        Self {
            correlation_id: Some(correlation_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_causation(mut self, causation_id: &str) -> Self {
        self.causation_id = Some(causation_id.to_string());
        self
    }

    pub fn with_triggered_by(mut self, triggered_by: &str) -> Self {
        self.triggered_by = Some(triggered_by.to_string());
        self
    }

    fn for_operation(&self, operation: &str) -> Self {
        Self {
            operation: Some(operation.to_string()),
            ..self.clone()
        }
    }
}

/// A stored event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub aggregate_id: String,
    pub event_type: String,
    pub event_version: i64,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Decode the row back into a domain envelope
    pub fn into_envelope(self) -> Result<EventEnvelope> {
        let event = ApplicationEvent::decode(&self.event_type, &self.payload)?;
        let operation = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("operation"))
            .and_then(|op| op.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(EventEnvelope {
            aggregate_id: self.aggregate_id,
            sequence: self.event_version,
            operation,
            occurred_at: self.created_at,
            event,
        })
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> Self {
        Self {
            id: row.get("id"),
            aggregate_id: row.get("aggregate_id"),
            event_type: row.get("event_type"),
            event_version: row.get("event_version"),
            payload: row.get("payload"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
        }
    }
}

/// Postgres-backed event and snapshot storage
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Serialize writers of one aggregate until the transaction ends
    pub async fn lock_aggregate(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(aggregate_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Highest stored version for an aggregate, 0 for an empty stream
    pub async fn current_version(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(event_version), 0) AS max_version
            FROM application_events
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("max_version"))
    }

    /// Append one envelope at its sequence number
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
        metadata: &EventMetadata,
    ) -> Result<i64> {
        let payload = envelope.event.payload()?;
        let metadata_json = serde_json::to_value(metadata.for_operation(&envelope.operation))?;

        let row = sqlx::query(
            r#"
            INSERT INTO application_events (
                aggregate_id, event_version, event_type, payload, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&envelope.aggregate_id)
        .bind(envelope.sequence)
        .bind(envelope.event_type())
        .bind(&payload)
        .bind(&metadata_json)
        .bind(envelope.occurred_at)
        .fetch_one(&mut **tx)
        .await?;

        let id: i64 = row.get("id");
        debug!(
            "Appended event {} to {} (type: {}, version: {})",
            id,
            envelope.aggregate_id,
            envelope.event_type(),
            envelope.sequence
        );
        Ok(id)
    }

    /// Events recorded after `after_version`, in stream order
    pub async fn load_events(&self, aggregate_id: &str, after_version: i64) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, event_version, payload, metadata, created_at
            FROM application_events
            WHERE aggregate_id = $1 AND event_version > $2
            ORDER BY event_version ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(after_version)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(StoredEvent::from_row).collect())
    }

    /// Full stream read inside a transaction
    pub async fn load_events_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &str,
    ) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, event_type, event_version, payload, metadata, created_at
            FROM application_events
            WHERE aggregate_id = $1
            ORDER BY event_version ASC
            "#,
        )
        .bind(aggregate_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.iter().map(StoredEvent::from_row).collect())
    }

    pub async fn load_snapshot(&self, aggregate_id: &str) -> Result<Option<ApplicationSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT version, state
            FROM application_snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    pub async fn upsert_snapshot(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        snapshot: &ApplicationSnapshot,
    ) -> Result<()> {
        let state = serde_json::to_value(&snapshot.state)?;

        sqlx::query(
            r#"
            INSERT INTO application_snapshots (aggregate_id, version, state, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (aggregate_id) DO UPDATE SET
                version = EXCLUDED.version,
                state = EXCLUDED.state,
                updated_at = NOW()
            "#,
        )
        .bind(&snapshot.state.id)
        .bind(snapshot.version)
        .bind(&state)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Latest snapshot of an application in `status` owned by `address`
    pub async fn find_snapshot_by_address(
        &self,
        address: &str,
        status: &str,
    ) -> Result<Option<ApplicationSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT version, state
            FROM application_snapshots
            WHERE LOWER(state->'applicant'->>'address') = LOWER($1)
              AND state->>'status' = $2
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(address)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| snapshot_from_row(&r)).transpose()
    }

    /// Highest block recorded by a meta-allocator approval
    pub async fn max_meta_approval_block(&self) -> Result<Option<u64>> {
        let row = sqlx::query(
            r#"
            SELECT MAX((state->'meta_allocator_approval'->>'block_number')::BIGINT) AS max_block
            FROM application_snapshots
            WHERE state->'meta_allocator_approval' IS NOT NULL
              AND state->'meta_allocator_approval' <> 'null'::jsonb
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let block: Option<i64> = row.get("max_block");
        Ok(block.map(|b| b.max(0) as u64))
    }
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> Result<ApplicationSnapshot> {
    let version: i64 = row.get("version");
    let state: serde_json::Value = row.get("state");
    let state: ApplicationState = serde_json::from_value(state).map_err(|e| {
        GovernanceError::ReplayIntegrity(format!("undecodable snapshot: {}", e))
    })?;
    Ok(ApplicationSnapshot { version, state })
}
