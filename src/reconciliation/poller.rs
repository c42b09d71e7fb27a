//! Reconciliation poller
//!
//! Each tick resumes one block past the highest block any record type has
//! seen, clamps the start to what the RPC node still serves, and feeds every
//! approval log in range through the resolver chain. Failures are isolated
//! per log; a failed RPC call ends the tick early and is retried on the next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::resolver::{ApprovalCandidate, ApprovalResolver};
use super::{ApprovalCommand, CommandDispatcher};
use crate::chain::{decode_approval_log, is_native, AddressTranslator, ApprovalLogSource};
use crate::config::PollerConfig;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub lookback_window_blocks: u64,
    pub lookback_headroom_blocks: u64,
    pub valid_contract_addresses: Vec<String>,
}

impl From<&PollerConfig> for PollerSettings {
    fn from(config: &PollerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            lookback_window_blocks: config.lookback_window_blocks,
            lookback_headroom_blocks: config.lookback_headroom_blocks,
            valid_contract_addresses: config.valid_contract_addresses.clone(),
        }
    }
}

/// Inclusive block range for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
    /// Blocks past the watermark that fell outside the lookback window
    pub dropped_blocks: u64,
}

impl BlockRange {
    pub fn is_empty(&self) -> bool {
        self.from_block > self.to_block
    }
}

/// Compute the range to fetch.
///
/// Starts at `watermark + 1`, or at the lookback floor when nothing has been
/// seen yet. A start older than `head - (window - headroom)` is moved up to
/// that floor.
pub fn compute_block_range(
    watermark: Option<u64>,
    head: u64,
    window: u64,
    headroom: u64,
) -> BlockRange {
    let floor = head.saturating_sub(window.saturating_sub(headroom));
    let wanted = watermark.map(|w| w.saturating_add(1)).unwrap_or(floor);

    BlockRange {
        from_block: wanted.max(floor),
        to_block: head,
        dropped_blocks: floor.saturating_sub(wanted),
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub dropped_blocks: u64,
    pub fetched: usize,
    pub decoded: usize,
    /// Logs from unknown contracts, that failed to decode, or that did not
    /// raise the allowance
    pub skipped: usize,
    pub dispatched: usize,
    /// Approvals whose application was not in an approvable phase
    pub duplicates: usize,
    pub unresolved: usize,
    pub failed: usize,
    /// RPC failure that ended the tick early
    pub rpc_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    pub ticks: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

pub struct ApprovalPoller {
    source: Arc<dyn ApprovalLogSource>,
    translator: Arc<dyn AddressTranslator>,
    resolvers: Vec<Arc<dyn ApprovalResolver>>,
    dispatcher: Arc<dyn CommandDispatcher>,
    settings: PollerSettings,
    tick_lock: Mutex<()>,
    running: AtomicBool,
    shutdown: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: RwLock<PollerStats>,
}

impl ApprovalPoller {
    /// `resolvers` are tried in the given order
    pub fn new(
        source: Arc<dyn ApprovalLogSource>,
        translator: Arc<dyn AddressTranslator>,
        resolvers: Vec<Arc<dyn ApprovalResolver>>,
        dispatcher: Arc<dyn CommandDispatcher>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            translator,
            resolvers,
            dispatcher,
            settings,
            tick_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            handle: Mutex::new(None),
            stats: RwLock::new(PollerStats::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> PollerStats {
        self.stats.read().await.clone()
    }

    /// Spawn the polling loop. Calling it again while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Approval poller already running");
            return;
        }
        info!(
            "Approval poller started (interval: {}s, window: {} blocks)",
            self.settings.interval.as_secs(),
            self.settings.lookback_window_blocks
        );

        let poller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(poller.settings.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = poller.shutdown.notified() => break,
                }
                if !poller.is_running() {
                    break;
                }
                poller.poll_once().await;
            }

            info!("Approval poller stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop scheduling ticks and wait for the in-flight one to finish
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Approval poller task ended abnormally: {}", e);
            }
        }
    }

    /// Run one tick. Ticks never overlap.
    pub async fn poll_once(&self) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        let report = self.run_tick().await;

        if report.fetched > 0 || report.rpc_error.is_some() {
            info!(
                from_block = ?report.from_block,
                to_block = ?report.to_block,
                fetched = report.fetched,
                dispatched = report.dispatched,
                unresolved = report.unresolved,
                failed = report.failed,
                "approval poll tick finished"
            );
        } else {
            debug!(from_block = ?report.from_block, to_block = ?report.to_block, "approval poll tick idle");
        }

        let mut stats = self.stats.write().await;
        stats.ticks += 1;
        stats.last_run = Some(Utc::now());
        stats.last_report = Some(report.clone());
        report
    }

    async fn watermark(&self) -> Option<u64> {
        let mut watermark = None;
        for resolver in &self.resolvers {
            match resolver.last_seen_block().await {
                Ok(block) => watermark = watermark.max(block),
                Err(e) => warn!(resolver = resolver.name(), "failed to read last seen block: {}", e),
            }
        }
        watermark
    }

    async fn run_tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let head = match self.source.head_block().await {
            Ok(head) => head,
            Err(e) => {
                warn!("Approval poll skipped, head block unavailable: {}", e);
                report.rpc_error = Some(e.to_string());
                return report;
            }
        };

        let range = compute_block_range(
            self.watermark().await,
            head,
            self.settings.lookback_window_blocks,
            self.settings.lookback_headroom_blocks,
        );
        report.from_block = Some(range.from_block);
        report.to_block = Some(range.to_block);
        report.dropped_blocks = range.dropped_blocks;

        if range.dropped_blocks > 0 {
            warn!(
                dropped_blocks = range.dropped_blocks,
                from_block = range.from_block,
                "watermark is older than the RPC lookback window; skipping unreachable blocks"
            );
        }
        if range.is_empty() {
            return report;
        }

        let logs = match self
            .source
            .fetch_logs(
                range.from_block,
                range.to_block,
                &self.settings.valid_contract_addresses,
            )
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Failed to fetch approval logs: {}", e);
                report.rpc_error = Some(e.to_string());
                return report;
            }
        };
        report.fetched = logs.len();

        for raw in &logs {
            let contract = raw.address.to_string();
            if !self.is_allowed(&contract) {
                debug!(contract = %contract, "ignoring log from unlisted contract");
                report.skipped += 1;
                continue;
            }

            let log = match decode_approval_log(raw) {
                Ok(log) => log,
                Err(e) => {
                    warn!(contract = %contract, "skipping undecodable approval log: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            report.decoded += 1;

            if !log.allowance_increased {
                debug!(
                    block = log.block_number,
                    tx_hash = %log.tx_hash,
                    before = %log.allowance_before,
                    after = %log.allowance_after,
                    "allowance not raised, not an approval"
                );
                report.skipped += 1;
                continue;
            }

            let candidate = self.to_candidate(log).await;
            let Some(command) = self.resolve(&candidate).await else {
                warn!(
                    block = candidate.log.block_number,
                    tx_hash = %candidate.log.tx_hash,
                    allocator = %candidate.log.allocator_address,
                    "approval did not match any pending record"
                );
                report.unresolved += 1;
                continue;
            };

            self.dispatch(command, &mut report).await;
        }

        report
    }

    fn is_allowed(&self, contract: &str) -> bool {
        self.settings
            .valid_contract_addresses
            .iter()
            .any(|c| c.trim().eq_ignore_ascii_case(contract))
    }

    async fn to_candidate(&self, log: crate::chain::ApprovalLog) -> ApprovalCandidate {
        let native_address = if is_native(&log.allocator_address) {
            Some(log.allocator_address.clone())
        } else {
            match self.translator.to_native(&log.allocator_address).await {
                Ok(native) => Some(native),
                Err(e) => {
                    warn!(allocator = %log.allocator_address, "address translation failed: {}", e);
                    None
                }
            }
        };
        ApprovalCandidate {
            log,
            native_address,
        }
    }

    async fn resolve(&self, candidate: &ApprovalCandidate) -> Option<ApprovalCommand> {
        for resolver in &self.resolvers {
            debug!(resolver = resolver.name(), tx_hash = %candidate.log.tx_hash, "trying resolver");
            match resolver.resolve(candidate).await {
                Ok(Some(command)) => return Some(command),
                Ok(None) => {}
                Err(e) => {
                    warn!(resolver = resolver.name(), tx_hash = %candidate.log.tx_hash, "resolver failed: {}", e)
                }
            }
        }
        None
    }

    async fn dispatch(&self, command: ApprovalCommand, report: &mut TickReport) {
        let application_id = command.application_id().to_string();
        match self.dispatcher.dispatch(command).await {
            Ok(()) => report.dispatched += 1,
            Err(e) if e.is_invalid_phase() => {
                debug!(application_id = %application_id, "application not awaiting this approval: {}", e);
                report.duplicates += 1;
            }
            Err(e) => {
                error!(application_id = %application_id, "failed to dispatch approval: {}", e);
                report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::approvals::tests::{encoded_change, encoded_log};
    use crate::chain::{MockAddressTranslator, MockApprovalLogSource, RawApprovalLog};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use crate::domain::ApplicationStatus;
    use crate::error::GovernanceError;
    use crate::reconciliation::resolver::MockApprovalResolver;
    use crate::reconciliation::MockCommandDispatcher;
    use alloy::primitives::{address, Address};
    use mockall::predicate::eq;
    use mockall::Sequence;

    const CONTRACT: &str = "0x00000000000000000000000000000000000000aA";

    fn settings() -> PollerSettings {
        PollerSettings {
            interval: Duration::from_millis(10),
            lookback_window_blocks: 100,
            lookback_headroom_blocks: 10,
            valid_contract_addresses: vec![CONTRACT.to_string()],
        }
    }

    fn translator() -> Arc<MockAddressTranslator> {
        let mut translator = MockAddressTranslator::new();
        translator
            .expect_to_native()
            .returning(|addr| Ok(format!("f410f{}", &addr[2..8].to_lowercase())));
        Arc::new(translator)
    }

    fn resolver(name: &'static str, last_seen: Option<u64>) -> MockApprovalResolver {
        let mut resolver = MockApprovalResolver::new();
        resolver.expect_name().return_const(name);
        resolver
            .expect_last_seen_block()
            .returning(move || Ok(last_seen));
        resolver
    }

    fn meta_command(block: u64) -> ApprovalCommand {
        ApprovalCommand::CompleteMetaAllocatorApproval {
            application_id: "app-1".into(),
            block_number: block,
            tx_hash: "0x1".into(),
        }
    }

    #[test]
    fn test_range_resumes_after_watermark() {
        let range = compute_block_range(Some(950), 1_000, 100, 10);
        assert_eq!(range.from_block, 951);
        assert_eq!(range.to_block, 1_000);
        assert_eq!(range.dropped_blocks, 0);
    }

    #[test]
    fn test_range_clamps_to_lookback_window() {
        let range = compute_block_range(Some(100), 1_000, 100, 10);
        assert_eq!(range.from_block, 910);
        assert_eq!(range.dropped_blocks, 809);
        assert!(range.to_block - range.from_block < 100);
    }

    #[test]
    fn test_range_without_watermark_starts_at_floor() {
        let range = compute_block_range(None, 1_000, 2880, 20);
        assert_eq!(range.from_block, 0);
        let range = compute_block_range(None, 10_000, 2880, 20);
        assert_eq!(range.from_block, 7_140);
        assert_eq!(range.dropped_blocks, 0);
    }

    #[test]
    fn test_range_is_empty_when_caught_up() {
        assert!(compute_block_range(Some(1_000), 1_000, 100, 10).is_empty());
    }

    #[tokio::test]
    async fn test_rpc_head_failure_returns_empty_report() {
        let mut source = MockApprovalLogSource::new();
        source
            .expect_head_block()
            .returning(|| Err(GovernanceError::Rpc("connection refused".into())));
        source.expect_fetch_logs().never();

        let mut dispatcher = MockCommandDispatcher::new();
        dispatcher.expect_dispatch().never();

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![],
            Arc::new(dispatcher),
            settings(),
        );
        let report = poller.poll_once().await;
        assert!(report.rpc_error.is_some());
        assert_eq!(report.fetched, 0);
        assert_eq!(poller.stats().await.ticks, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_tolerated() {
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(500));
        source
            .expect_fetch_logs()
            .returning(|_, _, _| Err(GovernanceError::Rpc("timeout".into())));

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![Arc::new(resolver("application", Some(450)))],
            Arc::new(MockCommandDispatcher::new()),
            settings(),
        );
        let report = poller.poll_once().await;
        assert_eq!(report.from_block, Some(451));
        assert_eq!(report.rpc_error.as_deref(), Some("RPC error: timeout"));
    }

    #[tokio::test]
    async fn test_fetch_uses_highest_watermark_and_clamp() {
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(1_000));
        source
            .expect_fetch_logs()
            .with(eq(910u64), eq(1_000u64), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _| Ok(vec![]));

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![
                Arc::new(resolver("issue", Some(20))),
                Arc::new(resolver("application", Some(40))),
            ],
            Arc::new(MockCommandDispatcher::new()),
            settings(),
        );
        let report = poller.poll_once().await;
        assert_eq!(report.from_block, Some(910));
        assert_eq!(report.dropped_blocks, 869);
    }

    #[tokio::test]
    async fn test_bad_log_does_not_abort_batch() {
        let allocator = address!("2222222222222222222222222222222222222222");
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(60));
        source.expect_fetch_logs().returning(move |_, _, _| {
            let mut broken = encoded_log(allocator, 55, 1);
            broken.data = Default::default();
            let mut foreign = encoded_log(allocator, 56, 1);
            foreign.address = Address::repeat_byte(0x99);
            Ok(vec![broken, foreign, encoded_log(allocator, 57, 1)])
        });

        let mut application = resolver("application", Some(50));
        application
            .expect_resolve()
            .times(1)
            .returning(|c| Ok(Some(meta_command(c.log.block_number))));

        let mut dispatcher = MockCommandDispatcher::new();
        dispatcher
            .expect_dispatch()
            .with(eq(meta_command(57)))
            .times(1)
            .returning(|_| Ok(()));

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![Arc::new(application)],
            Arc::new(dispatcher),
            settings(),
        );
        let report = poller.poll_once().await;
        assert_eq!(report.fetched, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.decoded, 1);
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn test_issue_resolver_takes_precedence() {
        let allocator = address!("3333333333333333333333333333333333333333");
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(60));
        source
            .expect_fetch_logs()
            .returning(move |_, _, _| Ok(vec![encoded_log(allocator, 58, 1)]));

        let mut seq = Sequence::new();
        let mut issue = resolver("issue", None);
        issue
            .expect_resolve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|c| {
                Ok(Some(ApprovalCommand::ApproveRefreshIssue {
                    issue_number: 3,
                    application_id: "app-1".into(),
                    block_number: c.log.block_number,
                    tx_hash: c.log.tx_hash.clone(),
                }))
            });
        let mut application = resolver("application", None);
        application.expect_resolve().never();

        let mut dispatcher = MockCommandDispatcher::new();
        dispatcher
            .expect_dispatch()
            .withf(|c| matches!(c, ApprovalCommand::ApproveRefreshIssue { issue_number: 3, .. }))
            .times(1)
            .returning(|_| Ok(()));

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![Arc::new(issue), Arc::new(application)],
            Arc::new(dispatcher),
            settings(),
        );
        assert_eq!(poller.poll_once().await.dispatched, 1);
    }

    #[tokio::test]
    async fn test_fallback_to_application_and_unresolved() {
        let allocator = address!("4444444444444444444444444444444444444444");
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(60));
        source.expect_fetch_logs().returning(move |_, _, _| {
            Ok(vec![encoded_log(allocator, 51, 1), encoded_log(allocator, 52, 1)])
        });

        let mut issue = resolver("issue", None);
        issue.expect_resolve().times(2).returning(|_| Ok(None));
        let mut application = resolver("application", None);
        application.expect_resolve().times(2).returning(|c| {
            if c.log.block_number == 51 {
                assert_eq!(c.native_address.as_deref(), Some("f410f444444"));
                Ok(Some(meta_command(51)))
            } else {
                Ok(None)
            }
        });

        let mut dispatcher = MockCommandDispatcher::new();
        dispatcher.expect_dispatch().times(1).returning(|_| Ok(()));

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![Arc::new(issue), Arc::new(application)],
            Arc::new(dispatcher),
            settings(),
        );
        let report = poller.poll_once().await;
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.unresolved, 1);
    }

    #[tokio::test]
    async fn test_dispatch_failures_are_counted_per_approval() {
        let allocator = address!("5555555555555555555555555555555555555555");
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(60));
        source.expect_fetch_logs().returning(move |_, _, _| {
            Ok(vec![
                encoded_log(allocator, 53, 1),
                encoded_log(allocator, 54, 1),
                encoded_log(allocator, 55, 1),
            ])
        });

        let mut application = resolver("application", None);
        application
            .expect_resolve()
            .returning(|c| Ok(Some(meta_command(c.log.block_number))));

        let mut dispatcher = MockCommandDispatcher::new();
        dispatcher.expect_dispatch().returning(|c| match c {
            ApprovalCommand::CompleteMetaAllocatorApproval { block_number: 53, .. } => {
                Err(GovernanceError::InvalidPhase {
                    operation: "complete_meta_allocator_approval",
                    status: ApplicationStatus::DcAllocated,
                })
            }
            ApprovalCommand::CompleteMetaAllocatorApproval { block_number: 54, .. } => {
                Err(GovernanceError::Internal("database unavailable".into()))
            }
            _ => Ok(()),
        });

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![Arc::new(application)],
            Arc::new(dispatcher),
            settings(),
        );
        let report = poller.poll_once().await;
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn test_lowered_allowance_is_skipped() {
        let allocator = address!("6666666666666666666666666666666666666666");
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(60));
        source.expect_fetch_logs().returning(move |_, _, _| {
            Ok(vec![
                encoded_change(allocator, 51, 900, 100),
                encoded_change(allocator, 52, 100, 100),
                encoded_change(allocator, 53, 100, 400),
            ])
        });

        let mut application = resolver("application", None);
        application
            .expect_resolve()
            .times(1)
            .returning(|c| Ok(Some(meta_command(c.log.block_number))));

        let mut dispatcher = MockCommandDispatcher::new();
        dispatcher
            .expect_dispatch()
            .with(eq(meta_command(53)))
            .times(1)
            .returning(|_| Ok(()));

        let poller = ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![Arc::new(application)],
            Arc::new(dispatcher),
            settings(),
        );
        let report = poller.poll_once().await;
        assert_eq!(report.decoded, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.dispatched, 1);
    }

    /// Source that takes a while to answer and records how many calls overlap
    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl SlowSource {
        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ApprovalLogSource for SlowSource {
        async fn head_block(&self) -> Result<u64> {
            self.enter().await;
            Ok(60)
        }

        async fn fetch_logs(
            &self,
            _from_block: u64,
            _to_block: u64,
            _contracts: &[String],
        ) -> Result<Vec<RawApprovalLog>> {
            self.enter().await;
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_concurrent_ticks_do_not_overlap() {
        let source = Arc::new(SlowSource::default());
        let poller = ApprovalPoller::new(
            source.clone(),
            translator(),
            vec![],
            Arc::new(MockCommandDispatcher::new()),
            settings(),
        );

        let (first, second) = tokio::join!(poller.poll_once(), poller.poll_once());

        assert!(first.rpc_error.is_none());
        assert!(second.rpc_error.is_none());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(poller.stats().await.ticks, 2);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut source = MockApprovalLogSource::new();
        source.expect_head_block().returning(|| Ok(0));
        source.expect_fetch_logs().returning(|_, _, _| Ok(vec![]));

        let poller = Arc::new(ApprovalPoller::new(
            Arc::new(source),
            translator(),
            vec![],
            Arc::new(MockCommandDispatcher::new()),
            settings(),
        ));

        poller.start().await;
        assert!(poller.is_running());
        tokio::time::sleep(Duration::from_millis(35)).await;
        poller.stop().await;

        assert!(!poller.is_running());
        let ticks = poller.stats().await.ticks;
        assert!(ticks >= 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(poller.stats().await.ticks, ticks);
    }
}
