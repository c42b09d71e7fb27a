//! Chain integration: approval log source and address translation

pub mod address;
pub mod approvals;
pub mod rpc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::Result;

pub use address::{is_native, RpcAddressTranslator};
pub use approvals::{decode_approval_log, AllowanceChanged, ApprovalLog, RawApprovalLog};
pub use rpc::RpcApprovalLogSource;

/// Source of raw approval logs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApprovalLogSource: Send + Sync {
    /// Current chain head
    async fn head_block(&self) -> Result<u64>;

    /// Approval logs emitted by `contracts` in `[from_block, to_block]`
    async fn fetch_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contracts: &[String],
    ) -> Result<Vec<RawApprovalLog>>;
}

/// Converts foreign addresses to the native addressing scheme
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddressTranslator: Send + Sync {
    async fn to_native(&self, address: &str) -> Result<String>;
}
