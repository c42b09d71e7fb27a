//! Persistence layer
//!
//! - Event store with per-aggregate versions and latest snapshots
//! - Application repository with optimistic concurrency
//! - Refresh issue records consulted by the reconciliation poller

pub mod event_store;
pub mod issues;
pub mod repository;

pub use event_store::{EventMetadata, PgEventStore, StoredEvent};
pub use issues::{
    InMemoryRefreshIssueStore, PgRefreshIssueStore, RefreshIssue, RefreshIssueStatus,
    RefreshIssueStore,
};
pub use repository::{
    ApplicationRepository, ExpectedVersion, InMemoryApplicationRepository,
    PgApplicationRepository,
};
