//! End-to-end reconciliation against in-memory stores: logs come from a
//! scripted chain, commands go through the real application service.

use alloy::primitives::{address, Address, B256, U256};
use alloy::sol_types::SolEvent;
use allocator_governance::chain::{
    AddressTranslator, AllowanceChanged, ApprovalLogSource, RawApprovalLog,
};
use allocator_governance::config::{PathwayConfig, RkhConfig};
use allocator_governance::domain::{AllocationPathResolver, ApplicantDetails, ApplicationStatus};
use allocator_governance::error::{GovernanceError, Result};
use allocator_governance::persistence::{
    InMemoryApplicationRepository, InMemoryRefreshIssueStore, RefreshIssueStatus,
};
use allocator_governance::reconciliation::{
    ApplicationResolver, ApprovalPoller, ApprovalResolver, IssueResolver, PollerSettings,
};
use allocator_governance::service::{ApplicationService, CreateApplication};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

const CONTRACT: Address = address!("00000000000000000000000000000000000000aa");
const ALLOCATOR: Address = address!("abababababababababababababababababababab");
const NATIVE: &str = "f410fallocator";

#[derive(Default)]
struct ScriptedChain {
    head: Mutex<u64>,
    logs: Mutex<Vec<RawApprovalLog>>,
    /// Ignore the requested range and return every log
    replay_all: AtomicBool,
}

impl ScriptedChain {
    fn emit(&self, block: u64, tx: u8) {
        let event = AllowanceChanged {
            allocator: ALLOCATOR,
            allowanceBefore: U256::ZERO,
            allowanceAfter: U256::from(1_000u64),
        };
        let data = event.encode_log_data();
        self.logs.lock().unwrap().push(RawApprovalLog {
            address: CONTRACT,
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            block_number: Some(block),
            transaction_hash: Some(B256::repeat_byte(tx)),
            log_index: Some(0),
        });
        let mut head = self.head.lock().unwrap();
        *head = (*head).max(block + 1);
    }
}

#[async_trait]
impl ApprovalLogSource for ScriptedChain {
    async fn head_block(&self) -> Result<u64> {
        Ok(*self.head.lock().unwrap())
    }

    async fn fetch_logs(
        &self,
        from_block: u64,
        to_block: u64,
        _contracts: &[String],
    ) -> Result<Vec<RawApprovalLog>> {
        let replay_all = self.replay_all.load(Ordering::SeqCst);
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                replay_all || (from_block..=to_block).contains(&block)
            })
            .cloned()
            .collect())
    }
}

struct FixedTranslator;

#[async_trait]
impl AddressTranslator for FixedTranslator {
    async fn to_native(&self, address: &str) -> Result<String> {
        if address.eq_ignore_ascii_case(&ALLOCATOR.to_string()) {
            Ok(NATIVE.to_string())
        } else {
            Err(GovernanceError::AddressTranslation(address.to_string()))
        }
    }
}

struct Harness {
    chain: Arc<ScriptedChain>,
    issues: Arc<InMemoryRefreshIssueStore>,
    service: Arc<ApplicationService>,
    poller: Arc<ApprovalPoller>,
}

fn harness() -> Harness {
    let chain = Arc::new(ScriptedChain::default());
    let repository = Arc::new(InMemoryApplicationRepository::new());
    let issues = Arc::new(InMemoryRefreshIssueStore::new());
    let rkh = RkhConfig::default();
    let resolver = AllocationPathResolver::new(
        &rkh,
        &PathwayConfig {
            mdma_address: "0xmdma".into(),
            orma_address: CONTRACT.to_string(),
            ama_address: "0xama".into(),
        },
    );
    let service = Arc::new(ApplicationService::new(
        repository.clone(),
        issues.clone(),
        resolver,
        rkh,
    ));

    let resolvers: Vec<Arc<dyn ApprovalResolver>> = vec![
        Arc::new(IssueResolver::new(issues.clone())),
        Arc::new(ApplicationResolver::new(repository)),
    ];
    let poller = Arc::new(ApprovalPoller::new(
        chain.clone(),
        Arc::new(FixedTranslator),
        resolvers,
        service.clone(),
        PollerSettings {
            interval: Duration::from_millis(20),
            lookback_window_blocks: 2880,
            lookback_headroom_blocks: 20,
            valid_contract_addresses: vec![CONTRACT.to_string().to_lowercase()],
        },
    ));

    Harness {
        chain,
        issues,
        service,
        poller,
    }
}

async fn application_awaiting_meta_approval(service: &ApplicationService, id: &str) {
    assert_ok!(
        service
            .create_application(CreateApplication {
                id: Some(id.to_string()),
                application_number: 11,
                applicant: ApplicantDetails {
                    name: "Allocator".into(),
                    address: NATIVE.into(),
                    ..Default::default()
                },
            })
            .await
    );
    assert_ok!(service.approve_kyc(id).await);
    let app = service
        .approve_governance_review(id, dec!(10), "ORMA", false)
        .await
        .unwrap();
    assert_eq!(app.status(), ApplicationStatus::MetaApprovalPhase);
}

#[tokio::test]
async fn approval_log_completes_meta_allocator_approval() {
    let h = harness();
    application_awaiting_meta_approval(&h.service, "app-1").await;

    h.chain.emit(100, 1);
    let report = h.poller.poll_once().await;
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.unresolved, 0);

    let app = h.service.get("app-1").await.unwrap();
    assert_eq!(app.status(), ApplicationStatus::DcAllocated);
    let approval = app.state().meta_allocator_approval.clone().unwrap();
    assert_eq!(approval.block_number, 100);
    assert_eq!(approval.tx_hash, B256::repeat_byte(1).to_string());

    // Watermark moved past block 100
    let report = h.poller.poll_once().await;
    assert_eq!(report.from_block, Some(101));
    assert_eq!(report.fetched, 0);
}

#[tokio::test]
async fn redelivered_approval_is_a_harmless_duplicate() {
    let h = harness();
    application_awaiting_meta_approval(&h.service, "app-2").await;
    h.chain.emit(100, 2);
    assert_eq!(h.poller.poll_once().await.dispatched, 1);
    let version = h.service.get("app-2").await.unwrap().version();

    h.chain.replay_all.store(true, Ordering::SeqCst);
    let report = h.poller.poll_once().await;

    // Already allocated, so nothing is pending for the address any more
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(h.service.get("app-2").await.unwrap().version(), version);
}

#[tokio::test]
async fn refresh_issue_takes_precedence_and_is_closed() {
    let h = harness();
    application_awaiting_meta_approval(&h.service, "app-3").await;
    h.chain.emit(100, 3);
    assert_eq!(h.poller.poll_once().await.dispatched, 1);

    let app = h
        .service
        .request_datacap_refresh("app-3", Some(77))
        .await
        .unwrap();
    assert_eq!(app.status(), ApplicationStatus::GovernanceReviewPhase);
    assert_eq!(app.active_instruction().unwrap().datacap_amount, dec!(20));

    h.service
        .approve_governance_review("app-3", dec!(20), "ORMA", false)
        .await
        .unwrap();

    h.chain.emit(150, 4);
    let report = h.poller.poll_once().await;
    assert_eq!(report.dispatched, 1);

    let issue = h.issues.get(77).await.unwrap();
    assert_eq!(issue.status, RefreshIssueStatus::Approved);
    assert_eq!(issue.approval.unwrap().block_number, 150);

    let app = h.service.get("app-3").await.unwrap();
    assert_eq!(app.status(), ApplicationStatus::DcAllocated);
    assert_eq!(app.grant_cycle(), 2);
}

#[tokio::test]
async fn unknown_allocator_is_left_unresolved() {
    let h = harness();
    h.chain.emit(100, 5);

    let report = h.poller.poll_once().await;
    assert_eq!(report.decoded, 1);
    assert_eq!(report.unresolved, 1);
    assert_eq!(report.dispatched, 0);
}

#[tokio::test]
async fn background_loop_reconciles_and_stops() {
    let h = harness();
    application_awaiting_meta_approval(&h.service, "app-4").await;
    h.chain.emit(100, 6);

    h.poller.start().await;
    let mut allocated = false;
    for _ in 0..50 {
        if h.service.get("app-4").await.unwrap().status() == ApplicationStatus::DcAllocated {
            allocated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.poller.stop().await;

    assert!(allocated);
    assert!(!h.poller.is_running());
}
