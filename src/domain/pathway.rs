//! Allocation path resolution
//!
//! Maps the allocator-type classifier chosen during governance review onto the
//! pathway that will finalize the grant: the RKH multisig committee, or one of
//! the meta-allocator contracts.

use serde::{Deserialize, Serialize};

use crate::config::{PathwayConfig, RkhConfig};
use crate::error::{GovernanceError, Result};

pub const RKH_PATHWAY: &str = "RKH";
pub const MDMA_PATHWAY: &str = "MDMA";
pub const ORMA_PATHWAY: &str = "ORMA";
pub const AMA_PATHWAY: &str = "AMA";

/// Resolved pathway for an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPath {
    pub pathway: String,
    /// Multisig or contract address that grants the datacap
    pub address: String,
    pub is_meta_allocator: bool,
}

/// Deterministic classifier → pathway table
#[derive(Debug, Clone)]
pub struct AllocationPathResolver {
    rkh_address: String,
    mdma_address: String,
    orma_address: String,
    ama_address: String,
}

impl AllocationPathResolver {
    pub fn new(rkh: &RkhConfig, pathways: &PathwayConfig) -> Self {
        Self {
            rkh_address: rkh.address.clone(),
            mdma_address: pathways.mdma_address.clone(),
            orma_address: pathways.orma_address.clone(),
            ama_address: pathways.ama_address.clone(),
        }
    }

    pub fn rkh_address(&self) -> &str {
        &self.rkh_address
    }

    /// Resolve an allocator-type classifier (case-insensitive)
    pub fn resolve(&self, allocator_type: &str) -> Result<AllocationPath> {
        let normalized = allocator_type.trim().to_ascii_uppercase();
        let (pathway, address, is_meta_allocator) = match normalized.as_str() {
            "RKH" | "MANUAL" => (RKH_PATHWAY, &self.rkh_address, false),
            "MDMA" => (MDMA_PATHWAY, &self.mdma_address, true),
            "ORMA" => (ORMA_PATHWAY, &self.orma_address, true),
            "AMA" => (AMA_PATHWAY, &self.ama_address, true),
            _ => {
                return Err(GovernanceError::UnknownAllocatorType(
                    allocator_type.to_string(),
                ))
            }
        };

        Ok(AllocationPath {
            pathway: pathway.to_string(),
            address: address.clone(),
            is_meta_allocator,
        })
    }
}
