//! Approval resolver strategies
//!
//! Held in priority order by the poller: refresh issues first, then
//! applications. The first strategy that matches wins.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tracing::debug;

use super::ApprovalCommand;
use crate::chain::ApprovalLog;
use crate::error::Result;
use crate::persistence::{ApplicationRepository, RefreshIssueStore};

/// A decoded approval with its translated allocator address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalCandidate {
    pub log: ApprovalLog,
    /// Native form of the allocator address, when translation succeeded
    pub native_address: Option<String>,
}

impl ApprovalCandidate {
    /// Addresses to match against, native form first
    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses = Vec::with_capacity(2);
        if let Some(native) = &self.native_address {
            addresses.push(native.as_str());
        }
        if self.native_address.as_deref() != Some(self.log.allocator_address.as_str()) {
            addresses.push(self.log.allocator_address.as_str());
        }
        addresses
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApprovalResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Highest block already reflected in this record type
    async fn last_seen_block(&self) -> Result<Option<u64>>;

    async fn resolve(&self, candidate: &ApprovalCandidate) -> Result<Option<ApprovalCommand>>;
}

pub struct IssueResolver {
    issues: Arc<dyn RefreshIssueStore>,
}

impl IssueResolver {
    pub fn new(issues: Arc<dyn RefreshIssueStore>) -> Self {
        Self { issues }
    }
}

#[async_trait]
impl ApprovalResolver for IssueResolver {
    fn name(&self) -> &'static str {
        "issue"
    }

    async fn last_seen_block(&self) -> Result<Option<u64>> {
        self.issues.last_approval_block().await
    }

    async fn resolve(&self, candidate: &ApprovalCandidate) -> Result<Option<ApprovalCommand>> {
        for address in candidate.addresses() {
            if let Some(issue) = self.issues.find_pending_by_address(address).await? {
                debug!(issue = issue.issue_number, address, "approval matched refresh issue");
                return Ok(Some(ApprovalCommand::ApproveRefreshIssue {
                    issue_number: issue.issue_number,
                    application_id: issue.application_id,
                    block_number: candidate.log.block_number,
                    tx_hash: candidate.log.tx_hash.clone(),
                }));
            }
        }
        Ok(None)
    }
}

pub struct ApplicationResolver {
    repository: Arc<dyn ApplicationRepository>,
}

impl ApplicationResolver {
    pub fn new(repository: Arc<dyn ApplicationRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl ApprovalResolver for ApplicationResolver {
    fn name(&self) -> &'static str {
        "application"
    }

    async fn last_seen_block(&self) -> Result<Option<u64>> {
        self.repository.last_meta_approval_block().await
    }

    async fn resolve(&self, candidate: &ApprovalCandidate) -> Result<Option<ApprovalCommand>> {
        for address in candidate.addresses() {
            if let Some(app) = self.repository.find_pending_meta_approval(address).await? {
                debug!(application_id = %app.id(), address, "approval matched application");
                return Ok(Some(ApprovalCommand::CompleteMetaAllocatorApproval {
                    application_id: app.id().to_string(),
                    block_number: candidate.log.block_number,
                    tx_hash: candidate.log.tx_hash.clone(),
                }));
            }
        }
        Ok(None)
    }
}
