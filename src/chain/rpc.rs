use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use tracing::debug;

use super::approvals::{AllowanceChanged, RawApprovalLog};
use super::ApprovalLogSource;
use crate::error::{GovernanceError, Result};

/// Approval logs read over an EVM JSON-RPC endpoint
pub struct RpcApprovalLogSource {
    provider: DynProvider,
}

impl RpcApprovalLogSource {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| GovernanceError::Rpc(format!("Invalid RPC URL: {}", e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self { provider })
    }
}

fn parse_contracts(contracts: &[String]) -> Result<Vec<Address>> {
    contracts
        .iter()
        .map(|c| {
            c.trim().parse::<Address>().map_err(|e| {
                GovernanceError::Validation(format!("invalid contract address '{}': {}", c, e))
            })
        })
        .collect()
}

#[async_trait]
impl ApprovalLogSource for RpcApprovalLogSource {
    async fn head_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| GovernanceError::Rpc(format!("eth_blockNumber: {}", e)))
    }

    async fn fetch_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contracts: &[String],
    ) -> Result<Vec<RawApprovalLog>> {
        let addresses = parse_contracts(contracts)?;
        let filter = Filter::new()
            .address(addresses)
            .event_signature(AllowanceChanged::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| GovernanceError::Rpc(format!("eth_getLogs: {}", e)))?;

        debug!(from_block, to_block, count = logs.len(), "fetched approval logs");
        Ok(logs
            .into_iter()
            .map(|log| RawApprovalLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
                block_number: log.block_number,
                transaction_hash: log.transaction_hash,
                log_index: log.log_index,
            })
            .collect())
    }
}
