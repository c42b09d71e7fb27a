//! Application repository
//!
//! Loads aggregates from their event streams and persists staged events
//! under optimistic concurrency.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::event_store::{EventMetadata, PgEventStore};
use crate::domain::{Application, ApplicationSnapshot, ApplicationStatus, EventEnvelope};
use crate::error::{GovernanceError, Result};

/// Version a save expects the stored stream to be at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip the check and append after whatever is stored
    Any,
    /// Fail unless the stored stream is exactly at this version
    Exact(i64),
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Application>;

    async fn save_with_metadata(
        &self,
        application: &mut Application,
        expected: ExpectedVersion,
        metadata: EventMetadata,
    ) -> Result<()>;

    async fn save(&self, application: &mut Application, expected: ExpectedVersion) -> Result<()> {
        self.save_with_metadata(application, expected, EventMetadata::default())
            .await
    }

    /// Application awaiting its on-chain approval for this applicant address
    async fn find_pending_meta_approval(&self, address: &str) -> Result<Option<Application>>;

    /// Highest block any application recorded a meta-allocator approval at
    async fn last_meta_approval_block(&self) -> Result<Option<u64>>;
}

/// Check the expected version and line staged events up behind `current`.
///
/// Returns true when the aggregate was loaded at an older version and its
/// events were moved to the end of the stream.
fn align_with_stream(
    application: &mut Application,
    expected: ExpectedVersion,
    current: i64,
) -> Result<bool> {
    if let ExpectedVersion::Exact(version) = expected {
        if version != current {
            return Err(GovernanceError::Concurrency {
                aggregate_id: application.id().to_string(),
                expected: version,
                actual: current,
            });
        }
    }

    if application.version() != current {
        application.rebase_uncommitted(current);
        return Ok(true);
    }
    Ok(false)
}

fn with_correlation(metadata: EventMetadata) -> EventMetadata {
    if metadata.correlation_id.is_some() {
        metadata
    } else {
        EventMetadata {
            correlation_id: Some(Uuid::new_v4().to_string()),
            ..metadata
        }
    }
}

fn matches_address(application: &Application, address: &str) -> bool {
    application
        .state()
        .applicant
        .address
        .eq_ignore_ascii_case(address)
}

// ============================================================================
// In-memory repository
// ============================================================================

struct StoredStream {
    events: Vec<EventEnvelope>,
    metadata: Vec<EventMetadata>,
    snapshot: ApplicationSnapshot,
}

/// Repository kept in process memory, with the same contract as Postgres
#[derive(Default)]
pub struct InMemoryApplicationRepository {
    streams: RwLock<HashMap<String, StoredStream>>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted stream for an application, oldest first
    pub async fn stream(&self, id: &str) -> Vec<EventEnvelope> {
        self.streams
            .read()
            .await
            .get(id)
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    pub async fn metadata(&self, id: &str) -> Vec<EventMetadata> {
        self.streams
            .read()
            .await
            .get(id)
            .map(|s| s.metadata.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn get_by_id(&self, id: &str) -> Result<Application> {
        let streams = self.streams.read().await;
        let stream = streams
            .get(id)
            .ok_or_else(|| GovernanceError::NotFound(id.to_string()))?;
        Application::restore(stream.snapshot.clone(), &[])
    }

    #[instrument(skip(self, application, metadata), fields(application_id = %application.id()))]
    async fn save_with_metadata(
        &self,
        application: &mut Application,
        expected: ExpectedVersion,
        metadata: EventMetadata,
    ) -> Result<()> {
        if application.uncommitted_events().is_empty() {
            return Ok(());
        }

        let mut streams = self.streams.write().await;
        let stored = streams.get(application.id());
        let current = stored.map(|s| s.events.len() as i64).unwrap_or(0);
        let rebased = align_with_stream(application, expected, current)?;

        let mut events = stored.map(|s| s.events.clone()).unwrap_or_default();
        events.extend(application.uncommitted_events().iter().cloned());
        let rebuilt = if rebased {
            Some(Application::from_history(application.id(), &events)?)
        } else {
            None
        };

        let metadata = with_correlation(metadata);
        let staged = application.take_uncommitted();
        if let Some(rebuilt) = rebuilt {
            *application = rebuilt;
        }

        let mut all_metadata = stored.map(|s| s.metadata.clone()).unwrap_or_default();
        all_metadata.extend(staged.iter().map(|e| EventMetadata {
            operation: Some(e.operation.clone()),
            ..metadata.clone()
        }));

        debug!(appended = staged.len(), version = application.version(), "saved application");
        streams.insert(
            application.id().to_string(),
            StoredStream {
                events,
                metadata: all_metadata,
                snapshot: application.snapshot(),
            },
        );
        Ok(())
    }

    async fn find_pending_meta_approval(&self, address: &str) -> Result<Option<Application>> {
        let streams = self.streams.read().await;
        for stream in streams.values() {
            let app = Application::restore(stream.snapshot.clone(), &[])?;
            if app.status() == ApplicationStatus::MetaApprovalPhase && matches_address(&app, address) {
                return Ok(Some(app));
            }
        }
        Ok(None)
    }

    async fn last_meta_approval_block(&self) -> Result<Option<u64>> {
        let streams = self.streams.read().await;
        Ok(streams
            .values()
            .filter_map(|s| s.snapshot.state.meta_allocator_approval.as_ref())
            .map(|approval| approval.block_number)
            .max())
    }
}

// ============================================================================
// Postgres repository
// ============================================================================

#[derive(Clone)]
pub struct PgApplicationRepository {
    store: PgEventStore,
}

impl PgApplicationRepository {
    pub fn new(store: PgEventStore) -> Self {
        Self { store }
    }

    /// Rebuild from the full stream, ignoring any snapshot
    pub async fn replay(&self, id: &str) -> Result<Application> {
        let envelopes = self
            .store
            .load_events(id, 0)
            .await?
            .into_iter()
            .map(|e| e.into_envelope())
            .collect::<Result<Vec<_>>>()?;
        if envelopes.is_empty() {
            return Err(GovernanceError::NotFound(id.to_string()));
        }
        Application::from_history(id, &envelopes)
    }
}

#[async_trait]
impl ApplicationRepository for PgApplicationRepository {
    async fn get_by_id(&self, id: &str) -> Result<Application> {
        let snapshot = self.store.load_snapshot(id).await?;
        let after = snapshot.as_ref().map(|s| s.version).unwrap_or(0);
        let envelopes = self
            .store
            .load_events(id, after)
            .await?
            .into_iter()
            .map(|e| e.into_envelope())
            .collect::<Result<Vec<_>>>()?;

        match snapshot {
            Some(snapshot) => Application::restore(snapshot, &envelopes),
            None if envelopes.is_empty() => Err(GovernanceError::NotFound(id.to_string())),
            None => Application::from_history(id, &envelopes),
        }
    }

    #[instrument(skip(self, application, metadata), fields(application_id = %application.id()))]
    async fn save_with_metadata(
        &self,
        application: &mut Application,
        expected: ExpectedVersion,
        metadata: EventMetadata,
    ) -> Result<()> {
        if application.uncommitted_events().is_empty() {
            return Ok(());
        }

        let metadata = with_correlation(metadata);
        let mut tx = self.store.begin().await?;
        self.store.lock_aggregate(&mut tx, application.id()).await?;

        let current = self.store.current_version(&mut tx, application.id()).await?;
        let rebased = align_with_stream(application, expected, current)?;

        for envelope in application.uncommitted_events() {
            self.store.append(&mut tx, envelope, &metadata).await?;
        }

        let rebuilt = if rebased {
            let envelopes = self
                .store
                .load_events_in(&mut tx, application.id())
                .await?
                .into_iter()
                .map(|e| e.into_envelope())
                .collect::<Result<Vec<_>>>()?;
            Some(Application::from_history(application.id(), &envelopes)?)
        } else {
            None
        };

        let snapshot = match &rebuilt {
            Some(app) => app.snapshot(),
            None => application.snapshot(),
        };
        self.store.upsert_snapshot(&mut tx, &snapshot).await?;
        tx.commit().await?;

        let staged = application.take_uncommitted();
        if let Some(rebuilt) = rebuilt {
            *application = rebuilt;
        }
        debug!(appended = staged.len(), version = snapshot.version, "saved application");
        Ok(())
    }

    async fn find_pending_meta_approval(&self, address: &str) -> Result<Option<Application>> {
        let snapshot = self
            .store
            .find_snapshot_by_address(address, ApplicationStatus::MetaApprovalPhase.as_str())
            .await?;
        snapshot.map(|s| Application::restore(s, &[])).transpose()
    }

    async fn last_meta_approval_block(&self) -> Result<Option<u64>> {
        self.store.max_meta_approval_block().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApplicantDetails, DEFAULT_RKH_APPROVAL_THRESHOLD};

    fn new_app(id: &str) -> Application {
        Application::create(
            id,
            7,
            ApplicantDetails {
                address: "f1owner".into(),
                ..Default::default()
            },
            DEFAULT_RKH_APPROVAL_THRESHOLD,
        )
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let repo = InMemoryApplicationRepository::new();
        let mut app = new_app("app-1");
        app.approve_kyc().unwrap();
        repo.save(&mut app, ExpectedVersion::Exact(0)).await.unwrap();

        assert_eq!(app.version(), 3);
        assert!(app.uncommitted_events().is_empty());

        let loaded = repo.get_by_id("app-1").await.unwrap();
        assert_eq!(loaded.state(), app.state());
        assert_eq!(loaded.version(), 3);
    }

    #[tokio::test]
    async fn test_missing_application_is_not_found() {
        let repo = InMemoryApplicationRepository::new();
        let err = repo.get_by_id("nope").await.unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_exact_version_conflicts() {
        let repo = InMemoryApplicationRepository::new();
        let mut app = new_app("app-1");
        repo.save(&mut app, ExpectedVersion::Exact(0)).await.unwrap();

        let mut first = repo.get_by_id("app-1").await.unwrap();
        let mut second = repo.get_by_id("app-1").await.unwrap();

        first.approve_kyc().unwrap();
        let v = first.version();
        repo.save(&mut first, ExpectedVersion::Exact(v)).await.unwrap();

        second.reject_kyc().unwrap();
        let v = second.version();
        let err = repo
            .save(&mut second, ExpectedVersion::Exact(v))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::Concurrency { expected: 1, actual: 3, .. }
        ));
        assert_eq!(repo.stream("app-1").await.len(), 3);
    }

    #[tokio::test]
    async fn test_any_version_appends_after_unseen_events() {
        let repo = InMemoryApplicationRepository::new();
        let mut app = new_app("app-1");
        repo.save(&mut app, ExpectedVersion::Exact(0)).await.unwrap();

        let mut stale = repo.get_by_id("app-1").await.unwrap();
        let mut fresh = repo.get_by_id("app-1").await.unwrap();
        fresh.approve_kyc().unwrap();
        repo.save(&mut fresh, ExpectedVersion::Any).await.unwrap();

        stale.set_allocator_multisig("f01", "f2msig", 1, vec![]).unwrap();
        repo.save(&mut stale, ExpectedVersion::Any).await.unwrap();

        let stream = repo.stream("app-1").await;
        let sequences: Vec<_> = stream.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);

        let loaded = repo.get_by_id("app-1").await.unwrap();
        let replayed = Application::from_history("app-1", &stream).unwrap();
        assert_eq!(loaded.state(), replayed.state());
        assert_eq!(stale.state(), replayed.state());
        assert_eq!(loaded.status(), ApplicationStatus::GovernanceReviewPhase);
    }

    #[tokio::test]
    async fn test_save_without_staged_events_is_noop() {
        let repo = InMemoryApplicationRepository::new();
        let mut app = new_app("app-1");
        repo.save(&mut app, ExpectedVersion::Exact(0)).await.unwrap();

        let mut loaded = repo.get_by_id("app-1").await.unwrap();
        repo.save(&mut loaded, ExpectedVersion::Exact(99)).await.unwrap();
        assert_eq!(repo.stream("app-1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_carries_operation_and_correlation() {
        let repo = InMemoryApplicationRepository::new();
        let mut app = new_app("app-1");
        app.approve_kyc().unwrap();
        repo.save_with_metadata(
            &mut app,
            ExpectedVersion::Exact(0),
            EventMetadata::default().with_triggered_by("api"),
        )
        .await
        .unwrap();

        let metadata = repo.metadata("app-1").await;
        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata[1].operation.as_deref(), Some("approve_kyc"));
        assert_eq!(metadata[1].triggered_by.as_deref(), Some("api"));
        assert!(metadata[0].correlation_id.is_some());
        assert_eq!(metadata[0].correlation_id, metadata[2].correlation_id);
    }
}
