//! Allocator application aggregate
//!
//! Owns the lifecycle of one allocator application. Each public operation
//! checks the current phase first, then stages events; the events are applied
//! to the in-memory state immediately and handed to the repository on save.
//! A rejected operation leaves the aggregate untouched.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::events::{ApplicationEvent, EventEnvelope};
use super::ingest::ApplicationIngest;
use super::instruction::{Instruction, InstructionLedger, DEFAULT_DATACAP_AMOUNT};
use super::pathway::{AllocationPathResolver, MDMA_PATHWAY, RKH_PATHWAY};
use super::status::{ApplicationStatus, StatusTimestamps};
use crate::error::{GovernanceError, Result};

/// Allocator actor id written when governance declines an application
pub const REJECTED_ACTOR_ID: &str = "f00";

/// Allocation-tooling marker for applications allocating through a contract
pub const SMART_CONTRACT_TOOLING: &str = "smart_contract_allocator";

/// Root key holder signatures needed unless configured otherwise
pub const DEFAULT_RKH_APPROVAL_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicantDetails {
    pub name: String,
    pub organization: String,
    /// Applicant's on-chain address
    pub address: String,
    pub associated_org_addresses: String,
    pub location: String,
    pub website: String,
    pub github_handle: String,
}

impl From<&ApplicationIngest> for ApplicantDetails {
    fn from(ingest: &ApplicationIngest) -> Self {
        Self {
            name: ingest.name.clone(),
            organization: ingest.organization.clone(),
            address: ingest.address.clone(),
            associated_org_addresses: ingest.associated_org_addresses.clone(),
            location: ingest.location.clone(),
            website: ingest.website.clone(),
            github_handle: ingest.github_handle.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigDetails {
    pub actor_id: String,
    pub address: String,
    pub threshold: u32,
    pub signers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
    pub comment_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainApproval {
    pub block_number: u64,
    pub tx_hash: String,
}

/// Allocation terms copied from the source file for contract allocators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTerms {
    pub tranche_schedule: String,
    pub audit: Vec<String>,
    pub distribution: Vec<String>,
    pub required_replicas: String,
    pub required_sps: String,
    pub bookkeeping_repo: String,
    pub max_client_cap: String,
    pub github_handles: Vec<String>,
    pub on_chain_address: String,
}

/// Full aggregate state; also the snapshot payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationState {
    pub id: String,
    pub application_number: i64,
    pub applicant: ApplicantDetails,
    pub status: ApplicationStatus,
    pub status_timestamps: StatusTimestamps,
    pub pathway: String,
    pub pathway_address: String,
    pub is_meta_allocator: bool,
    pub is_mdma: bool,
    pub allocator_actor_id: String,
    pub multisig: MultisigDetails,
    pub rkh_approvals: Vec<String>,
    pub rkh_approval_threshold: usize,
    pub instructions: InstructionLedger,
    pub pull_request: Option<PullRequestRef>,
    pub allocation_tooling: Vec<String>,
    pub allocation_terms: AllocationTerms,
    pub meta_allocator_approval: Option<OnChainApproval>,
    pub created_at: i64,
}

impl ApplicationState {
    /// State before `ApplicationCreated` has been applied
    pub(crate) fn blank(id: &str) -> Self {
        Self {
            id: id.to_string(),
            application_number: 0,
            applicant: ApplicantDetails::default(),
            status: ApplicationStatus::KycPhase,
            status_timestamps: StatusTimestamps::default(),
            pathway: String::new(),
            pathway_address: String::new(),
            is_meta_allocator: false,
            is_mdma: false,
            allocator_actor_id: String::new(),
            multisig: MultisigDetails::default(),
            rkh_approvals: Vec::new(),
            rkh_approval_threshold: DEFAULT_RKH_APPROVAL_THRESHOLD,
            instructions: InstructionLedger::default(),
            pull_request: None,
            allocation_tooling: Vec::new(),
            allocation_terms: AllocationTerms::default(),
            meta_allocator_approval: None,
            created_at: 0,
        }
    }
}

/// Persisted state plus the stream version it reflects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSnapshot {
    pub version: i64,
    pub state: ApplicationState,
}

/// The application aggregate root
#[derive(Debug, Clone)]
pub struct Application {
    state: ApplicationState,
    /// Last persisted stream position
    version: i64,
    pending: Vec<EventEnvelope>,
}

impl Application {
    // ==================== Construction ====================

    /// Start a new application in KYC_PHASE with one placeholder instruction
    pub fn create(
        id: impl Into<String>,
        application_number: i64,
        applicant: ApplicantDetails,
        rkh_approval_threshold: usize,
    ) -> Self {
        let id = id.into();
        let mut app = Self {
            state: ApplicationState::blank(&id),
            version: 0,
            pending: Vec::new(),
        };
        app.record(
            "create",
            ApplicationEvent::ApplicationCreated {
                application_number,
                applicant,
                rkh_approval_threshold,
                at: now_ms(),
            },
        );
        app
    }

    /// Rebuild from a persisted stream. The first event must create the
    /// application.
    pub fn from_history(id: &str, history: &[EventEnvelope]) -> Result<Self> {
        let Some(first) = history.first() else {
            return Err(GovernanceError::ReplayIntegrity(format!(
                "empty event stream for application {}",
                id
            )));
        };
        if !matches!(first.event, ApplicationEvent::ApplicationCreated { .. }) {
            return Err(GovernanceError::ReplayIntegrity(format!(
                "stream for application {} starts with {}",
                id,
                first.event_type()
            )));
        }

        let mut app = Self {
            state: ApplicationState::blank(id),
            version: 0,
            pending: Vec::new(),
        };
        app.replay(history)?;
        Ok(app)
    }

    /// Rehydrate from a snapshot, optionally followed by later events
    pub fn restore(snapshot: ApplicationSnapshot, later: &[EventEnvelope]) -> Result<Self> {
        let mut app = Self {
            state: snapshot.state,
            version: snapshot.version,
            pending: Vec::new(),
        };
        app.replay(later)?;
        Ok(app)
    }

    fn replay(&mut self, history: &[EventEnvelope]) -> Result<()> {
        for envelope in history {
            if envelope.sequence != self.version + 1 {
                return Err(GovernanceError::ReplayIntegrity(format!(
                    "application {} expected event {} but found {}",
                    self.state.id,
                    self.version + 1,
                    envelope.sequence
                )));
            }
            self.state.apply(&envelope.event);
            self.version = envelope.sequence;
        }
        Ok(())
    }

    // ==================== Accessors ====================

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn application_number(&self) -> i64 {
        self.state.application_number
    }

    pub fn status(&self) -> ApplicationStatus {
        self.state.status
    }

    pub fn state(&self) -> &ApplicationState {
        &self.state
    }

    pub fn instructions(&self) -> &InstructionLedger {
        &self.state.instructions
    }

    pub fn active_instruction(&self) -> Option<&Instruction> {
        self.state.instructions.active()
    }

    pub fn grant_cycle(&self) -> usize {
        self.state.instructions.grant_cycle()
    }

    pub fn rkh_approvals(&self) -> &[String] {
        &self.state.rkh_approvals
    }

    /// Last persisted stream position
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Events staged since the last save
    pub fn uncommitted_events(&self) -> &[EventEnvelope] {
        &self.pending
    }

    pub fn snapshot(&self) -> ApplicationSnapshot {
        ApplicationSnapshot {
            version: self.version + self.pending.len() as i64,
            state: self.state.clone(),
        }
    }

    /// Hand staged events to the repository and advance the version
    pub(crate) fn take_uncommitted(&mut self) -> Vec<EventEnvelope> {
        let events = std::mem::take(&mut self.pending);
        if let Some(last) = events.last() {
            self.version = last.sequence;
        }
        events
    }

    /// Re-base staged events onto a stream position observed at save time
    pub(crate) fn rebase_uncommitted(&mut self, current_version: i64) {
        self.version = current_version;
        for (offset, envelope) in self.pending.iter_mut().enumerate() {
            envelope.sequence = current_version + offset as i64 + 1;
        }
    }

    // ==================== KYC ====================

    pub fn approve_kyc(&mut self) -> Result<()> {
        self.ensure_status("approve_kyc", &[ApplicationStatus::KycPhase])?;
        let at = now_ms();
        self.record("approve_kyc", ApplicationEvent::KycApproved { at });
        self.record("approve_kyc", ApplicationEvent::GovernanceReviewStarted { at });
        Ok(())
    }

    pub fn reject_kyc(&mut self) -> Result<()> {
        self.ensure_status("reject_kyc", &[ApplicationStatus::KycPhase])?;
        self.record("reject_kyc", ApplicationEvent::KycRejected { at: now_ms() });
        Ok(())
    }

    pub fn revoke_kyc(&mut self) -> Result<()> {
        self.ensure_status("revoke_kyc", &[ApplicationStatus::GovernanceReviewPhase])?;
        self.record("revoke_kyc", ApplicationEvent::KycRevoked { at: now_ms() });
        Ok(())
    }

    // ==================== Governance review ====================

    /// Approve the application for `final_datacap` through the pathway named by
    /// `allocator_type`. MDMA allocators are granted immediately.
    pub fn approve_governance_review(
        &mut self,
        final_datacap: Decimal,
        allocator_type: &str,
        is_mdma_allocator: bool,
        resolver: &AllocationPathResolver,
    ) -> Result<()> {
        self.ensure_status(
            "approve_governance_review",
            &[ApplicationStatus::GovernanceReviewPhase],
        )?;
        let path = resolver.resolve(allocator_type)?;

        self.record(
            "approve_governance_review",
            ApplicationEvent::GovernanceReviewApproved {
                path,
                is_mdma: is_mdma_allocator,
                datacap_amount: final_datacap,
                at: now_ms(),
            },
        );
        Ok(())
    }

    pub fn reject_governance_review(&mut self) -> Result<()> {
        self.ensure_status(
            "reject_governance_review",
            &[ApplicationStatus::GovernanceReviewPhase],
        )?;
        self.record(
            "reject_governance_review",
            ApplicationEvent::GovernanceReviewRejected {
                allocator_actor_id: REJECTED_ACTOR_ID.to_string(),
                at: now_ms(),
            },
        );
        Ok(())
    }

    // ==================== Final approval ====================

    /// Replace the RKH signer list. A list of unchanged length is a no-op;
    /// reaching the threshold completes the approval.
    pub fn update_rkh_approvals(&mut self, approvals: Vec<String>, rkh_address: &str) -> Result<()> {
        self.ensure_status("update_rkh_approvals", &[ApplicationStatus::RkhApprovalPhase])?;
        if approvals.len() == self.state.rkh_approvals.len() {
            return Ok(());
        }

        let reached = approvals.len() >= self.state.rkh_approval_threshold;
        self.record(
            "update_rkh_approvals",
            ApplicationEvent::RkhApprovalsUpdated { approvals },
        );
        if reached {
            self.complete_rkh_approval(rkh_address)?;
        }
        Ok(())
    }

    pub fn complete_rkh_approval(&mut self, rkh_address: &str) -> Result<()> {
        self.ensure_status("complete_rkh_approval", &[ApplicationStatus::RkhApprovalPhase])?;
        self.record(
            "complete_rkh_approval",
            ApplicationEvent::RkhApprovalCompleted {
                rkh_address: rkh_address.to_string(),
                at: now_ms(),
            },
        );
        Ok(())
    }

    pub fn complete_meta_allocator_approval(
        &mut self,
        block_number: u64,
        tx_hash: impl Into<String>,
    ) -> Result<()> {
        self.ensure_status(
            "complete_meta_allocator_approval",
            &[ApplicationStatus::MetaApprovalPhase],
        )?;
        self.record(
            "complete_meta_allocator_approval",
            ApplicationEvent::MetaAllocatorApprovalCompleted {
                block_number,
                tx_hash: tx_hash.into(),
                at: now_ms(),
            },
        );
        Ok(())
    }

    /// Passive hook: try to complete an RKH approval, ignoring phase mismatch
    pub fn update_datacap_allocation(&mut self, rkh_address: &str) -> Result<()> {
        match self.complete_rkh_approval(rkh_address) {
            Err(e) if e.is_invalid_phase() => Ok(()),
            other => other,
        }
    }

    // ==================== Refresh ====================

    /// Open a new tranche at twice the previous amount and return to review
    pub fn request_datacap_refresh(&mut self) -> Result<()> {
        self.ensure_status("request_datacap_refresh", &[ApplicationStatus::DcAllocated])?;

        let at = now_ms();
        let (method, amount) = match self.state.instructions.active() {
            Some(previous) => (previous.method.clone(), previous.datacap_amount * Decimal::TWO),
            None => (self.state.pathway.clone(), DEFAULT_DATACAP_AMOUNT),
        };

        self.record(
            "request_datacap_refresh",
            ApplicationEvent::DatacapRefreshRequested {
                cycle: self.state.instructions.len() + 1,
                instruction: Instruction::pending(method, amount, at),
            },
        );
        Ok(())
    }

    // ==================== Metadata ====================

    pub fn set_allocator_multisig(
        &mut self,
        actor_id: impl Into<String>,
        address: impl Into<String>,
        threshold: u32,
        signers: Vec<String>,
    ) -> Result<()> {
        self.ensure_status("set_allocator_multisig", &[ApplicationStatus::KycPhase])?;
        self.record(
            "set_allocator_multisig",
            ApplicationEvent::AllocatorMultisigSet {
                actor_id: actor_id.into(),
                address: address.into(),
                threshold,
                signers,
            },
        );
        Ok(())
    }

    pub fn set_application_pull_request(
        &mut self,
        number: u64,
        url: impl Into<String>,
        comment_id: u64,
    ) -> Result<()> {
        self.ensure_status(
            "set_application_pull_request",
            &[ApplicationStatus::KycPhase, ApplicationStatus::DcAllocated],
        )?;
        let target_status = match self.state.status {
            ApplicationStatus::DcAllocated => ApplicationStatus::GovernanceReviewPhase,
            _ => ApplicationStatus::KycPhase,
        };

        self.record(
            "set_application_pull_request",
            ApplicationEvent::ApplicationPullRequestSet {
                pull_request: PullRequestRef {
                    number,
                    url: url.into(),
                    comment_id,
                },
                target_status,
                at: now_ms(),
            },
        );
        Ok(())
    }

    /// Rewrite descriptive fields from the source-of-truth application file.
    ///
    /// RKH-side phases pin the pathway to RKH. Contract-side phases of MDMA
    /// allocators also take over the allocation terms and rebuild the ledger
    /// from the file's audit history.
    pub fn edit(&mut self, ingest: &ApplicationIngest) -> Result<()> {
        let event = self.edit_event(ingest);
        self.record("edit", event);
        Ok(())
    }

    fn edit_event(&self, ingest: &ApplicationIngest) -> ApplicationEvent {
        let state = &self.state;
        let mut pathway = None;
        let mut allocation_tooling = None;
        let mut terms = None;
        let mut multisig_address = None;
        let mut multisig_signers = None;
        let mut instructions = None;

        if self.in_rkh_adjacent_phase() {
            if state.pathway.is_empty() {
                pathway = Some(RKH_PATHWAY.to_string());
            }
            if !state.is_meta_allocator {
                allocation_tooling = Some(Vec::new());
            }
        } else if self.in_meta_adjacent_phase() && state.is_mdma {
            let metapathway = ingest
                .metapathway_type
                .as_deref()
                .filter(|t| !t.trim().is_empty());

            pathway = Some(metapathway.unwrap_or(MDMA_PATHWAY).to_string());
            allocation_tooling = Some(vec![SMART_CONTRACT_TOOLING.to_string()]);

            let source = &ingest.application;
            terms = Some(AllocationTerms {
                tranche_schedule: source.tranche_schedule.clone(),
                audit: source.audit.clone(),
                distribution: source.distribution.clone(),
                required_replicas: source.required_replicas.clone(),
                required_sps: source.required_sps.clone(),
                bookkeeping_repo: source.allocation_bookkeeping.clone(),
                max_client_cap: source.max_dc_client.clone(),
                github_handles: source.github_handles.clone(),
                on_chain_address: ingest
                    .ma_address
                    .clone()
                    .unwrap_or_else(|| source.client_contract_address.clone()),
            });

            if let Some(addresses) = &ingest.pathway_addresses {
                multisig_address = Some(addresses.msig.clone());
                multisig_signers = Some(addresses.signers.clone());
            }

            let method = metapathway.unwrap_or("");
            instructions = Some(
                ingest
                    .audits
                    .iter()
                    .map(|audit| audit.to_instruction(method))
                    .collect(),
            );
        }

        ApplicationEvent::ApplicationEdited {
            applicant: ApplicantDetails::from(ingest),
            allocator_actor_id: ingest
                .allocator_id
                .as_ref()
                .filter(|id| !id.trim().is_empty())
                .cloned(),
            pathway,
            allocation_tooling,
            terms,
            multisig_address,
            multisig_signers,
            instructions,
        }
    }

    fn in_rkh_adjacent_phase(&self) -> bool {
        match self.state.status {
            ApplicationStatus::RkhApprovalPhase => true,
            ApplicationStatus::DcAllocated => !self.state.is_meta_allocator,
            _ => false,
        }
    }

    fn in_meta_adjacent_phase(&self) -> bool {
        match self.state.status {
            ApplicationStatus::MetaApprovalPhase => true,
            ApplicationStatus::DcAllocated => self.state.is_meta_allocator,
            _ => false,
        }
    }

    // ==================== Internals ====================

    fn ensure_status(&self, operation: &'static str, allowed: &[ApplicationStatus]) -> Result<()> {
        if allowed.contains(&self.state.status) {
            Ok(())
        } else {
            Err(GovernanceError::InvalidPhase {
                operation,
                status: self.state.status,
            })
        }
    }

    fn record(&mut self, operation: &str, event: ApplicationEvent) {
        self.state.apply(&event);
        let sequence = self.version + self.pending.len() as i64 + 1;
        self.pending.push(EventEnvelope {
            aggregate_id: self.state.id.clone(),
            sequence,
            operation: operation.to_string(),
            occurred_at: Utc::now(),
            event,
        });
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
