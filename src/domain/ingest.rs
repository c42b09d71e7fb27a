//! Source-of-truth snapshot consumed by `Application::edit`
//!
//! Mirrors the JSON application file kept in the registry repository. Every
//! field is optional on the wire so that partially filled files still load.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instruction::{Instruction, InstructionStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationIngest {
    pub application_number: Option<i64>,
    pub name: String,
    pub organization: String,
    pub address: String,
    pub associated_org_addresses: String,
    pub location: String,
    pub website: String,
    pub github_handle: String,
    pub allocator_id: Option<String>,
    /// Meta-allocator flavour named in the file (e.g. "MDMA", "ORMA")
    pub metapathway_type: Option<String>,
    /// On-chain allocator contract address, when one is deployed
    pub ma_address: Option<String>,
    pub application: ApplicationTerms,
    pub audits: Vec<AuditEntry>,
    pub pathway_addresses: Option<PathwayAddresses>,
}

/// Allocation terms section of the application file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationTerms {
    pub allocations: Vec<String>,
    pub audit: Vec<String>,
    pub tranche_schedule: String,
    pub distribution: Vec<String>,
    pub required_sps: String,
    pub required_replicas: String,
    pub tooling: Vec<String>,
    #[serde(rename = "max_DC_client")]
    pub max_dc_client: String,
    pub github_handles: Vec<String>,
    pub allocation_bookkeeping: String,
    pub client_contract_address: String,
}

/// One audit round from the file's history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditEntry {
    pub started: Option<String>,
    pub ended: Option<String>,
    pub dc_allocated: Option<String>,
    pub outcome: Option<String>,
    pub datacap_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathwayAddresses {
    pub msig: String,
    pub signers: Vec<String>,
}

impl AuditEntry {
    /// Rebuild the ledger entry for this audit round
    pub fn to_instruction(&self, method: &str) -> Instruction {
        let end = self
            .dc_allocated
            .as_deref()
            .and_then(parse_calendar_millis)
            .or_else(|| self.ended.as_deref().and_then(parse_calendar_millis));

        Instruction {
            method: method.to_string(),
            datacap_amount: self.datacap_amount.unwrap_or(Decimal::ZERO),
            start_timestamp: self
                .started
                .as_deref()
                .and_then(parse_calendar_millis)
                .unwrap_or(0),
            end_timestamp: end,
            status: InstructionStatus::from_outcome(self.outcome.as_deref()),
        }
    }
}

/// Parse a calendar timestamp into epoch milliseconds.
///
/// Accepts RFC 3339, a naive `YYYY-MM-DD[T ]HH:MM:SS[.fff]` (read as UTC) or a
/// bare `YYYY-MM-DD` (midnight UTC). Blank or unparseable input yields `None`.
pub fn parse_calendar_millis(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
