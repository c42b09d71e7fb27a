//! On-chain approval reconciliation
//!
//! Polls meta-allocator approval logs, matches each one to a pending refresh
//! issue or application, and dispatches the resulting command.

pub mod poller;
pub mod resolver;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use poller::{compute_block_range, ApprovalPoller, BlockRange, PollerSettings, PollerStats, TickReport};
pub use resolver::{ApplicationResolver, ApprovalCandidate, ApprovalResolver, IssueResolver};

/// Command produced by resolving an approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ApprovalCommand {
    /// Close a refresh issue and complete its application's approval
    ApproveRefreshIssue {
        issue_number: i64,
        application_id: String,
        block_number: u64,
        tx_hash: String,
    },
    CompleteMetaAllocatorApproval {
        application_id: String,
        block_number: u64,
        tx_hash: String,
    },
}

impl ApprovalCommand {
    pub fn application_id(&self) -> &str {
        match self {
            ApprovalCommand::ApproveRefreshIssue { application_id, .. }
            | ApprovalCommand::CompleteMetaAllocatorApproval { application_id, .. } => {
                application_id
            }
        }
    }
}

/// Executes approval commands against the aggregate layer
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: ApprovalCommand) -> Result<()>;
}
