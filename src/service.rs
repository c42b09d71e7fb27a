//! Command layer
//!
//! Every command loads the aggregate, runs one operation and saves the staged
//! events with the version observed at load time.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RkhConfig;
use crate::domain::{
    AllocationPathResolver, ApplicantDetails, Application, ApplicationIngest, ApplicationStatus,
    OnChainApproval,
};
use crate::error::Result;
use crate::persistence::{
    ApplicationRepository, EventMetadata, ExpectedVersion, RefreshIssue, RefreshIssueStore,
};
use crate::reconciliation::{ApprovalCommand, CommandDispatcher};

/// Input for [`ApplicationService::create_application`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApplication {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub application_number: i64,
    #[serde(flatten)]
    pub applicant: ApplicantDetails,
}

pub struct ApplicationService {
    repository: Arc<dyn ApplicationRepository>,
    issues: Arc<dyn RefreshIssueStore>,
    resolver: AllocationPathResolver,
    rkh: RkhConfig,
}

impl ApplicationService {
    pub fn new(
        repository: Arc<dyn ApplicationRepository>,
        issues: Arc<dyn RefreshIssueStore>,
        resolver: AllocationPathResolver,
        rkh: RkhConfig,
    ) -> Self {
        Self {
            repository,
            issues,
            resolver,
            rkh,
        }
    }

    /// Load, run `operation`, save against the loaded version
    async fn execute<F>(&self, id: &str, metadata: EventMetadata, operation: F) -> Result<Application>
    where
        F: FnOnce(&mut Application) -> Result<()> + Send,
    {
        let mut application = self.repository.get_by_id(id).await?;
        let loaded = application.version();
        let status_before = application.status();

        operation(&mut application)?;
        self.repository
            .save_with_metadata(&mut application, ExpectedVersion::Exact(loaded), metadata)
            .await?;

        if application.status() != status_before {
            info!(
                application_id = %id,
                from = %status_before,
                to = %application.status(),
                "application status changed"
            );
        }
        Ok(application)
    }

    fn api_metadata() -> EventMetadata {
        EventMetadata::default().with_triggered_by("api")
    }

    pub async fn create_application(&self, request: CreateApplication) -> Result<Application> {
        let id = request
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut application = Application::create(
            id,
            request.application_number,
            request.applicant,
            self.rkh.approval_threshold,
        );
        self.repository
            .save_with_metadata(&mut application, ExpectedVersion::Exact(0), Self::api_metadata())
            .await?;

        info!(
            application_id = %application.id(),
            number = application.application_number(),
            "application created"
        );
        Ok(application)
    }

    pub async fn get(&self, id: &str) -> Result<Application> {
        self.repository.get_by_id(id).await
    }

    pub async fn approve_kyc(&self, id: &str) -> Result<Application> {
        self.execute(id, Self::api_metadata(), |app| app.approve_kyc())
            .await
    }

    pub async fn reject_kyc(&self, id: &str) -> Result<Application> {
        self.execute(id, Self::api_metadata(), |app| app.reject_kyc())
            .await
    }

    pub async fn revoke_kyc(&self, id: &str) -> Result<Application> {
        self.execute(id, Self::api_metadata(), |app| app.revoke_kyc())
            .await
    }

    pub async fn approve_governance_review(
        &self,
        id: &str,
        final_datacap: Decimal,
        allocator_type: &str,
        is_mdma_allocator: bool,
    ) -> Result<Application> {
        let resolver = &self.resolver;
        self.execute(id, Self::api_metadata(), |app| {
            app.approve_governance_review(final_datacap, allocator_type, is_mdma_allocator, resolver)
        })
        .await
    }

    pub async fn reject_governance_review(&self, id: &str) -> Result<Application> {
        self.execute(id, Self::api_metadata(), |app| app.reject_governance_review())
            .await
    }

    pub async fn update_rkh_approvals(&self, id: &str, approvals: Vec<String>) -> Result<Application> {
        let rkh_address = self.rkh.address.as_str();
        self.execute(id, Self::api_metadata(), |app| {
            app.update_rkh_approvals(approvals, rkh_address)
        })
        .await
    }

    pub async fn complete_meta_allocator_approval(
        &self,
        id: &str,
        block_number: u64,
        tx_hash: &str,
        metadata: EventMetadata,
    ) -> Result<Application> {
        self.execute(id, metadata, |app| {
            app.complete_meta_allocator_approval(block_number, tx_hash)
        })
        .await
    }

    /// Request a refresh; with an issue number the refresh is also tracked as
    /// a pending refresh issue for the allocator's address.
    pub async fn request_datacap_refresh(
        &self,
        id: &str,
        issue_number: Option<i64>,
    ) -> Result<Application> {
        let application = self
            .execute(id, Self::api_metadata(), |app| app.request_datacap_refresh())
            .await?;

        if let Some(issue_number) = issue_number {
            self.issues
                .open(RefreshIssue::pending(
                    issue_number,
                    application.id(),
                    &application.state().applicant.address,
                ))
                .await?;
        }
        Ok(application)
    }

    pub async fn set_allocator_multisig(
        &self,
        id: &str,
        actor_id: String,
        address: String,
        threshold: u32,
        signers: Vec<String>,
    ) -> Result<Application> {
        self.execute(id, Self::api_metadata(), |app| {
            app.set_allocator_multisig(actor_id, address, threshold, signers)
        })
        .await
    }

    pub async fn set_application_pull_request(
        &self,
        id: &str,
        number: u64,
        url: String,
        comment_id: u64,
    ) -> Result<Application> {
        self.execute(id, Self::api_metadata(), |app| {
            app.set_application_pull_request(number, url, comment_id)
        })
        .await
    }

    pub async fn edit(&self, id: &str, ingest: ApplicationIngest) -> Result<Application> {
        self.execute(id, Self::api_metadata(), |app| app.edit(&ingest))
            .await
    }

    /// Best-effort RKH completion; saved without a version check
    pub async fn update_datacap_allocation(&self, id: &str) -> Result<Application> {
        let mut application = self.repository.get_by_id(id).await?;
        application.update_datacap_allocation(&self.rkh.address)?;
        self.repository
            .save_with_metadata(&mut application, ExpectedVersion::Any, Self::api_metadata())
            .await?;
        Ok(application)
    }
}

#[async_trait]
impl CommandDispatcher for ApplicationService {
    async fn dispatch(&self, command: ApprovalCommand) -> Result<()> {
        match command {
            ApprovalCommand::CompleteMetaAllocatorApproval {
                application_id,
                block_number,
                tx_hash,
            } => {
                let metadata = EventMetadata::default()
                    .with_triggered_by("poller")
                    .with_causation(&tx_hash);
                self.complete_meta_allocator_approval(&application_id, block_number, &tx_hash, metadata)
                    .await?;
                info!(application_id = %application_id, block = block_number, tx_hash = %tx_hash, "meta-allocator approval recorded");
            }
            ApprovalCommand::ApproveRefreshIssue {
                issue_number,
                application_id,
                block_number,
                tx_hash,
            } => {
                let metadata = EventMetadata::default()
                    .with_triggered_by("poller")
                    .with_causation(&tx_hash);
                match self
                    .complete_meta_allocator_approval(&application_id, block_number, &tx_hash, metadata)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_invalid_phase() => {
                        // Only a redelivery after allocation may close the issue
                        let application = self.repository.get_by_id(&application_id).await?;
                        if application.status() != ApplicationStatus::DcAllocated {
                            debug!(
                                application_id = %application_id,
                                issue = issue_number,
                                status = %application.status(),
                                "refresh not ready for meta approval; issue stays pending"
                            );
                            return Err(e);
                        }
                        debug!(application_id = %application_id, issue = issue_number, "application already allocated; closing issue only");
                    }
                    Err(e) => return Err(e),
                }
                self.issues
                    .mark_approved(
                        issue_number,
                        OnChainApproval {
                            block_number,
                            tx_hash: tx_hash.clone(),
                        },
                    )
                    .await?;
                info!(issue = issue_number, block = block_number, tx_hash = %tx_hash, "refresh issue approved");
            }
        }
        Ok(())
    }
}
