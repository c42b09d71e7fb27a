//! Application domain events
//!
//! Every aggregate operation stages one or more of these. The same apply
//! handlers run for live operations and for rebuilding an aggregate from its
//! persisted stream, so an event carries the resulting values rather than a
//! delta.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::application::{AllocationTerms, ApplicantDetails, ApplicationState, OnChainApproval, PullRequestRef};
use super::instruction::{Instruction, InstructionLedger, InstructionStatus};
use super::pathway::{AllocationPath, RKH_PATHWAY};
use super::status::{ApplicationStatus, StatusCheckpoint};
use crate::error::{GovernanceError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ApplicationEvent {
    ApplicationCreated {
        application_number: i64,
        applicant: ApplicantDetails,
        rkh_approval_threshold: usize,
        at: i64,
    },
    KycApproved {
        at: i64,
    },
    GovernanceReviewStarted {
        at: i64,
    },
    KycRejected {
        at: i64,
    },
    KycRevoked {
        at: i64,
    },
    GovernanceReviewApproved {
        path: AllocationPath,
        is_mdma: bool,
        datacap_amount: Decimal,
        at: i64,
    },
    GovernanceReviewRejected {
        allocator_actor_id: String,
        at: i64,
    },
    RkhApprovalsUpdated {
        approvals: Vec<String>,
    },
    RkhApprovalCompleted {
        rkh_address: String,
        at: i64,
    },
    MetaAllocatorApprovalCompleted {
        block_number: u64,
        tx_hash: String,
        at: i64,
    },
    DatacapRefreshRequested {
        /// 1-based position of the new instruction in the ledger
        cycle: usize,
        instruction: Instruction,
    },
    AllocatorMultisigSet {
        actor_id: String,
        address: String,
        threshold: u32,
        signers: Vec<String>,
    },
    ApplicationPullRequestSet {
        pull_request: PullRequestRef,
        /// Phase the application is headed to: KYC for new applications,
        /// governance review for refreshes
        target_status: ApplicationStatus,
        at: i64,
    },
    ApplicationEdited {
        applicant: ApplicantDetails,
        allocator_actor_id: Option<String>,
        pathway: Option<String>,
        allocation_tooling: Option<Vec<String>>,
        terms: Option<AllocationTerms>,
        multisig_address: Option<String>,
        multisig_signers: Option<Vec<String>>,
        instructions: Option<Vec<Instruction>>,
    },
}

impl ApplicationEvent {
    pub const NAMES: [&'static str; 14] = [
        "ApplicationCreated",
        "KycApproved",
        "GovernanceReviewStarted",
        "KycRejected",
        "KycRevoked",
        "GovernanceReviewApproved",
        "GovernanceReviewRejected",
        "RkhApprovalsUpdated",
        "RkhApprovalCompleted",
        "MetaAllocatorApprovalCompleted",
        "DatacapRefreshRequested",
        "AllocatorMultisigSet",
        "ApplicationPullRequestSet",
        "ApplicationEdited",
    ];

    pub fn event_type(&self) -> &'static str {
        match self {
            ApplicationEvent::ApplicationCreated { .. } => "ApplicationCreated",
            ApplicationEvent::KycApproved { .. } => "KycApproved",
            ApplicationEvent::GovernanceReviewStarted { .. } => "GovernanceReviewStarted",
            ApplicationEvent::KycRejected { .. } => "KycRejected",
            ApplicationEvent::KycRevoked { .. } => "KycRevoked",
            ApplicationEvent::GovernanceReviewApproved { .. } => "GovernanceReviewApproved",
            ApplicationEvent::GovernanceReviewRejected { .. } => "GovernanceReviewRejected",
            ApplicationEvent::RkhApprovalsUpdated { .. } => "RkhApprovalsUpdated",
            ApplicationEvent::RkhApprovalCompleted { .. } => "RkhApprovalCompleted",
            ApplicationEvent::MetaAllocatorApprovalCompleted { .. } => {
                "MetaAllocatorApprovalCompleted"
            }
            ApplicationEvent::DatacapRefreshRequested { .. } => "DatacapRefreshRequested",
            ApplicationEvent::AllocatorMultisigSet { .. } => "AllocatorMultisigSet",
            ApplicationEvent::ApplicationPullRequestSet { .. } => "ApplicationPullRequestSet",
            ApplicationEvent::ApplicationEdited { .. } => "ApplicationEdited",
        }
    }

    /// Payload as stored in the event store, without the type tag
    pub fn payload(&self) -> Result<serde_json::Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Rebuild an event from its stored type name and payload.
    ///
    /// Unknown types and undecodable payloads are replay integrity failures.
    pub fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Self> {
        if !Self::NAMES.contains(&event_type) {
            return Err(GovernanceError::ReplayIntegrity(format!(
                "unknown event type '{}'",
                event_type
            )));
        }

        let tagged = serde_json::json!({ "type": event_type, "data": payload });
        serde_json::from_value(tagged).map_err(|e| {
            GovernanceError::ReplayIntegrity(format!(
                "malformed '{}' payload: {}",
                event_type, e
            ))
        })
    }
}

/// A staged or persisted event with its stream position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub aggregate_id: String,
    /// 1-based position in the aggregate's stream
    pub sequence: i64,
    /// Aggregate operation that produced the event
    pub operation: String,
    pub occurred_at: DateTime<Utc>,
    pub event: ApplicationEvent,
}

impl EventEnvelope {
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

impl ApplicationState {
    /// Apply an event to the state. Pure: the result depends only on the
    /// current state and the payload.
    pub(crate) fn apply(&mut self, event: &ApplicationEvent) {
        match event {
            ApplicationEvent::ApplicationCreated {
                application_number,
                applicant,
                rkh_approval_threshold,
                at,
            } => {
                self.application_number = *application_number;
                self.applicant = applicant.clone();
                self.rkh_approval_threshold = *rkh_approval_threshold;
                self.status = ApplicationStatus::KycPhase;
                self.instructions = InstructionLedger::seeded(*at);
                self.created_at = *at;
            }
            ApplicationEvent::KycApproved { at } => {
                self.status_timestamps.mark(StatusCheckpoint::KycSubmitted, *at);
            }
            ApplicationEvent::GovernanceReviewStarted { .. } => {
                self.transition_to(ApplicationStatus::GovernanceReviewPhase);
            }
            ApplicationEvent::KycRejected { at } => {
                self.status_timestamps.mark(StatusCheckpoint::KycFailed, *at);
            }
            ApplicationEvent::KycRevoked { .. } => {
                self.status_timestamps.clear_kyc_submitted();
            }
            ApplicationEvent::GovernanceReviewApproved {
                path,
                is_mdma,
                datacap_amount,
                at,
            } => {
                self.pathway = path.pathway.clone();
                self.pathway_address = path.address.clone();
                self.is_meta_allocator = path.is_meta_allocator;
                self.is_mdma = *is_mdma;
                self.status_timestamps.mark(StatusCheckpoint::Approved, *at);

                let active = self.active_instruction_mut(*at);
                active.datacap_amount = *datacap_amount;
                active.method = path.pathway.clone();

                if *is_mdma {
                    self.grant_active(*at);
                } else if path.is_meta_allocator {
                    self.transition_to(ApplicationStatus::MetaApprovalPhase);
                } else {
                    self.transition_to(ApplicationStatus::RkhApprovalPhase);
                }
            }
            ApplicationEvent::GovernanceReviewRejected {
                allocator_actor_id,
                at,
            } => {
                let active = self.active_instruction_mut(*at);
                active.status = InstructionStatus::Denied;
                active.end_timestamp = Some(*at);
                self.allocator_actor_id = allocator_actor_id.clone();
                self.status_timestamps.mark(StatusCheckpoint::Declined, *at);
                self.transition_to(ApplicationStatus::Rejected);
            }
            ApplicationEvent::RkhApprovalsUpdated { approvals } => {
                self.rkh_approvals = approvals.clone();
            }
            ApplicationEvent::RkhApprovalCompleted { rkh_address, at } => {
                self.allocation_tooling.clear();
                self.pathway = RKH_PATHWAY.to_string();
                self.pathway_address = rkh_address.clone();
                self.grant_active(*at);
            }
            ApplicationEvent::MetaAllocatorApprovalCompleted {
                block_number,
                tx_hash,
                at,
            } => {
                self.meta_allocator_approval = Some(OnChainApproval {
                    block_number: *block_number,
                    tx_hash: tx_hash.clone(),
                });
                self.grant_active(*at);
            }
            ApplicationEvent::DatacapRefreshRequested { cycle, instruction } => {
                self.instructions.set_cycle(*cycle, instruction.clone());
                self.rkh_approvals.clear();
                // IN_REFRESH is passed through within this one event
                self.transition_to(ApplicationStatus::InRefresh);
                self.transition_to(ApplicationStatus::GovernanceReviewPhase);
            }
            ApplicationEvent::AllocatorMultisigSet {
                actor_id,
                address,
                threshold,
                signers,
            } => {
                self.multisig.actor_id = actor_id.clone();
                self.multisig.address = address.clone();
                self.multisig.threshold = *threshold;
                self.multisig.signers = signers.clone();
            }
            ApplicationEvent::ApplicationPullRequestSet {
                pull_request,
                target_status,
                at,
            } => {
                self.pull_request = Some(pull_request.clone());
                if *target_status == ApplicationStatus::KycPhase {
                    self.status_timestamps
                        .mark(StatusCheckpoint::ApplicationSubmitted, *at);
                }
            }
            ApplicationEvent::ApplicationEdited {
                applicant,
                allocator_actor_id,
                pathway,
                allocation_tooling,
                terms,
                multisig_address,
                multisig_signers,
                instructions,
            } => {
                self.applicant = applicant.clone();
                if let Some(actor_id) = allocator_actor_id {
                    self.allocator_actor_id = actor_id.clone();
                }
                if let Some(pathway) = pathway {
                    self.pathway = pathway.clone();
                }
                if let Some(tooling) = allocation_tooling {
                    self.allocation_tooling = tooling.clone();
                }
                if let Some(terms) = terms {
                    self.allocation_terms = terms.clone();
                }
                if let Some(address) = multisig_address {
                    self.multisig.address = address.clone();
                }
                if let Some(signers) = multisig_signers {
                    self.multisig.signers = signers.clone();
                }
                if let Some(instructions) = instructions {
                    self.instructions.replace_all(instructions.clone());
                }
            }
        }
    }

    fn active_instruction_mut(&mut self, at: i64) -> &mut Instruction {
        self.instructions
            .active_or_insert_with(|| Instruction::pending("", Decimal::ZERO, at))
    }

    fn grant_active(&mut self, at: i64) {
        let active = self.active_instruction_mut(at);
        active.status = InstructionStatus::Granted;
        active.end_timestamp = Some(at);
        self.status_timestamps.mark(StatusCheckpoint::DcAllocated, at);
        self.transition_to(ApplicationStatus::DcAllocated);
    }

    /// Live operations guard the phase before staging. A stream rebased past
    /// unseen events can still carry an edge outside the lifecycle graph; it
    /// is applied as stored and reported.
    fn transition_to(&mut self, next: ApplicationStatus) {
        if !self.status.can_transition_to(next) {
            warn!(
                application_id = %self.id,
                from = %self.status,
                to = %next,
                "status change outside the lifecycle graph"
            );
        }
        self.status = next;
    }
}
