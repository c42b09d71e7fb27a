//! Meta-allocator approval logs
//!
//! Decodes `AllowanceChanged` events emitted by meta-allocator contracts when
//! an allocator's allowance is raised on chain.

use alloy::primitives::{Address, Bytes, B256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};

use crate::error::{GovernanceError, Result};

sol! {
    /// Emitted by a meta-allocator contract when an allowance changes
    #[derive(Debug)]
    event AllowanceChanged(
        address indexed allocator,
        uint256 allowanceBefore,
        uint256 allowanceAfter
    );
}

/// Undecoded log as returned by the chain source
#[derive(Debug, Clone, PartialEq)]
pub struct RawApprovalLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// A decoded approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLog {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    /// Contract that emitted the event
    pub contract_address: String,
    /// Allocator address as emitted (0x form)
    pub allocator_address: String,
    /// Decimal string
    pub allowance_before: String,
    /// Decimal string
    pub allowance_after: String,
    /// Only a raised allowance counts as an approval
    pub allowance_increased: bool,
}

/// Decode a single log. Logs without block or transaction data, or whose
/// topics and data do not match the event, fail with a decode error.
pub fn decode_approval_log(raw: &RawApprovalLog) -> Result<ApprovalLog> {
    let event = AllowanceChanged::decode_raw_log(raw.topics.iter().copied(), &raw.data)
        .map_err(|e| GovernanceError::Decode(format!("AllowanceChanged: {}", e)))?;

    let block_number = raw
        .block_number
        .ok_or_else(|| GovernanceError::Decode("log without block number".into()))?;
    let tx_hash = raw
        .transaction_hash
        .ok_or_else(|| GovernanceError::Decode("log without transaction hash".into()))?;

    Ok(ApprovalLog {
        block_number,
        tx_hash: tx_hash.to_string(),
        log_index: raw.log_index.unwrap_or(0),
        contract_address: raw.address.to_string(),
        allocator_address: event.allocator.to_string(),
        allowance_before: event.allowanceBefore.to_string(),
        allowance_after: event.allowanceAfter.to_string(),
        allowance_increased: event.allowanceAfter > event.allowanceBefore,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::{address, U256};

    pub(crate) fn encoded_log(allocator: Address, block: u64, after: u64) -> RawApprovalLog {
        encoded_change(allocator, block, 0, after)
    }

    pub(crate) fn encoded_change(
        allocator: Address,
        block: u64,
        before: u64,
        after: u64,
    ) -> RawApprovalLog {
        let event = AllowanceChanged {
            allocator,
            allowanceBefore: U256::from(before),
            allowanceAfter: U256::from(after),
        };
        let data = event.encode_log_data();
        RawApprovalLog {
            address: address!("00000000000000000000000000000000000000aa"),
            topics: data.topics().to_vec(),
            data: data.data.clone(),
            block_number: Some(block),
            transaction_hash: Some(B256::repeat_byte(block as u8)),
            log_index: Some(0),
        }
    }

    #[test]
    fn test_decode_allowance_changed() {
        let allocator = address!("1111111111111111111111111111111111111111");
        let decoded = decode_approval_log(&encoded_log(allocator, 42, 1_000)).unwrap();

        assert_eq!(decoded.block_number, 42);
        assert_eq!(decoded.allowance_before, "0");
        assert_eq!(decoded.allowance_after, "1000");
        assert!(decoded
            .allocator_address
            .eq_ignore_ascii_case("0x1111111111111111111111111111111111111111"));
        assert!(decoded.allowance_increased);
    }

    #[test]
    fn test_decode_flags_lowered_allowance() {
        let lowered = decode_approval_log(&encoded_change(Address::ZERO, 7, 500, 200)).unwrap();
        assert!(!lowered.allowance_increased);

        let unchanged = decode_approval_log(&encoded_change(Address::ZERO, 7, 500, 500)).unwrap();
        assert!(!unchanged.allowance_increased);
    }

    #[test]
    fn test_decode_rejects_foreign_event() {
        let mut raw = encoded_log(Address::ZERO, 1, 1);
        raw.topics[0] = B256::repeat_byte(0xee);
        assert!(matches!(
            decode_approval_log(&raw),
            Err(GovernanceError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_pending_log() {
        let mut raw = encoded_log(Address::ZERO, 1, 1);
        raw.block_number = None;
        assert!(matches!(
            decode_approval_log(&raw),
            Err(GovernanceError::Decode(_))
        ));
    }
}
