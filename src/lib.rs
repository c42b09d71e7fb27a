//! Allocator application governance
//!
//! Event-sourced lifecycle for allocator applications, from KYC through
//! governance review to on-chain DataCap allocation, plus a poller that
//! reconciles meta-allocator approvals observed on chain.

pub mod api;
pub mod chain;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod reconciliation;
pub mod service;

pub use config::AppConfig;
pub use domain::{Application, ApplicationEvent, ApplicationStatus};
pub use error::{GovernanceError, Result};
pub use persistence::{
    ApplicationRepository, EventMetadata, ExpectedVersion, InMemoryApplicationRepository,
    PgApplicationRepository, PgEventStore,
};
pub use reconciliation::{ApprovalPoller, PollerSettings};
pub use service::ApplicationService;
