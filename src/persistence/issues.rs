//! Refresh issue records
//!
//! A refresh requested through an issue is tracked here until the on-chain
//! allowance for the allocator lands. The reconciliation poller consults these
//! records before falling back to application records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::OnChainApproval;
use crate::error::{GovernanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshIssueStatus {
    Pending,
    Approved,
}

impl RefreshIssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshIssueStatus::Pending => "PENDING",
            RefreshIssueStatus::Approved => "APPROVED",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "PENDING" => Ok(RefreshIssueStatus::Pending),
            "APPROVED" => Ok(RefreshIssueStatus::Approved),
            other => Err(GovernanceError::Internal(format!(
                "unknown refresh issue status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshIssue {
    pub issue_number: i64,
    pub application_id: String,
    pub allocator_address: String,
    pub status: RefreshIssueStatus,
    pub approval: Option<OnChainApproval>,
    pub opened_at: DateTime<Utc>,
}

impl RefreshIssue {
    pub fn pending(issue_number: i64, application_id: &str, allocator_address: &str) -> Self {
        Self {
            issue_number,
            application_id: application_id.to_string(),
            allocator_address: allocator_address.to_string(),
            status: RefreshIssueStatus::Pending,
            approval: None,
            opened_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait RefreshIssueStore: Send + Sync {
    /// Record (or reopen) a refresh issue
    async fn open(&self, issue: RefreshIssue) -> Result<()>;

    /// Oldest pending issue for an allocator address
    async fn find_pending_by_address(&self, address: &str) -> Result<Option<RefreshIssue>>;

    async fn mark_approved(&self, issue_number: i64, approval: OnChainApproval) -> Result<()>;

    /// Highest block any issue was approved at
    async fn last_approval_block(&self) -> Result<Option<u64>>;
}

#[derive(Default)]
pub struct InMemoryRefreshIssueStore {
    issues: RwLock<BTreeMap<i64, RefreshIssue>>,
}

impl InMemoryRefreshIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, issue_number: i64) -> Option<RefreshIssue> {
        self.issues.read().await.get(&issue_number).cloned()
    }
}

#[async_trait]
impl RefreshIssueStore for InMemoryRefreshIssueStore {
    async fn open(&self, issue: RefreshIssue) -> Result<()> {
        self.issues.write().await.insert(issue.issue_number, issue);
        Ok(())
    }

    async fn find_pending_by_address(&self, address: &str) -> Result<Option<RefreshIssue>> {
        Ok(self
            .issues
            .read()
            .await
            .values()
            .filter(|i| i.status == RefreshIssueStatus::Pending)
            .filter(|i| i.allocator_address.eq_ignore_ascii_case(address))
            .min_by_key(|i| i.opened_at)
            .cloned())
    }

    async fn mark_approved(&self, issue_number: i64, approval: OnChainApproval) -> Result<()> {
        let mut issues = self.issues.write().await;
        let issue = issues
            .get_mut(&issue_number)
            .ok_or_else(|| GovernanceError::NotFound(format!("refresh issue {}", issue_number)))?;
        issue.status = RefreshIssueStatus::Approved;
        issue.approval = Some(approval);
        Ok(())
    }

    async fn last_approval_block(&self) -> Result<Option<u64>> {
        Ok(self
            .issues
            .read()
            .await
            .values()
            .filter_map(|i| i.approval.as_ref())
            .map(|a| a.block_number)
            .max())
    }
}

#[derive(Clone)]
pub struct PgRefreshIssueStore {
    pool: PgPool,
}

impl PgRefreshIssueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshIssueStore for PgRefreshIssueStore {
    async fn open(&self, issue: RefreshIssue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_issues (
                issue_number, application_id, allocator_address, status, opened_at
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (issue_number) DO UPDATE SET
                application_id = EXCLUDED.application_id,
                allocator_address = EXCLUDED.allocator_address,
                status = EXCLUDED.status,
                approved_block = NULL,
                approved_tx_hash = NULL
            "#,
        )
        .bind(issue.issue_number)
        .bind(&issue.application_id)
        .bind(&issue.allocator_address)
        .bind(issue.status.as_str())
        .bind(issue.opened_at)
        .execute(&self.pool)
        .await?;

        debug!(issue = issue.issue_number, application_id = %issue.application_id, "refresh issue opened");
        Ok(())
    }

    async fn find_pending_by_address(&self, address: &str) -> Result<Option<RefreshIssue>> {
        let row = sqlx::query(
            r#"
            SELECT issue_number, application_id, allocator_address, status,
                   approved_block, approved_tx_hash, opened_at
            FROM refresh_issues
            WHERE LOWER(allocator_address) = LOWER($1) AND status = 'PENDING'
            ORDER BY opened_at ASC
            LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let block: Option<i64> = r.get("approved_block");
            let tx_hash: Option<String> = r.get("approved_tx_hash");
            let status: String = r.get("status");
            Ok(RefreshIssue {
                issue_number: r.get("issue_number"),
                application_id: r.get("application_id"),
                allocator_address: r.get("allocator_address"),
                status: RefreshIssueStatus::parse(&status)?,
                approval: block.zip(tx_hash).map(|(b, tx)| OnChainApproval {
                    block_number: b.max(0) as u64,
                    tx_hash: tx,
                }),
                opened_at: r.get("opened_at"),
            })
        })
        .transpose()
    }

    async fn mark_approved(&self, issue_number: i64, approval: OnChainApproval) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_issues SET
                status = 'APPROVED',
                approved_block = $2,
                approved_tx_hash = $3
            WHERE issue_number = $1
            "#,
        )
        .bind(issue_number)
        .bind(approval.block_number as i64)
        .bind(&approval.tx_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GovernanceError::NotFound(format!(
                "refresh issue {}",
                issue_number
            )));
        }
        Ok(())
    }

    async fn last_approval_block(&self) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT MAX(approved_block) AS max_block FROM refresh_issues")
            .fetch_one(&self.pool)
            .await?;
        let block: Option<i64> = row.get("max_block");
        Ok(block.map(|b| b.max(0) as u64))
    }
}
