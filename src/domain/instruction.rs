use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Datacap requested by the placeholder instruction seeded on creation
pub const DEFAULT_DATACAP_AMOUNT: Decimal = dec!(5);

/// Lifecycle of a single funding tranche
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstructionStatus {
    Pending,
    Granted,
    Denied,
}

impl InstructionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionStatus::Pending => "PENDING",
            InstructionStatus::Granted => "GRANTED",
            InstructionStatus::Denied => "DENIED",
        }
    }

    /// Map an audit outcome onto an instruction status; unknown or missing
    /// outcomes stay pending.
    pub fn from_outcome(outcome: Option<&str>) -> Self {
        match outcome.map(|o| o.trim().to_ascii_uppercase()) {
            Some(o) if o == "GRANTED" => InstructionStatus::Granted,
            Some(o) if o == "DENIED" => InstructionStatus::Denied,
            _ => InstructionStatus::Pending,
        }
    }
}

impl fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One funding tranche
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Pathway that funds this tranche, empty until governance resolves it
    pub method: String,
    pub datacap_amount: Decimal,
    /// Creation time, epoch milliseconds
    pub start_timestamp: i64,
    /// Allocation or closing time, epoch milliseconds
    pub end_timestamp: Option<i64>,
    pub status: InstructionStatus,
}

impl Instruction {
    pub fn pending(method: impl Into<String>, datacap_amount: Decimal, start_timestamp: i64) -> Self {
        Self {
            method: method.into(),
            datacap_amount,
            start_timestamp,
            end_timestamp: None,
            status: InstructionStatus::Pending,
        }
    }
}

/// Append-only list of tranches; the last entry is the active one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionLedger {
    entries: Vec<Instruction>,
}

impl InstructionLedger {
    pub fn seeded(start_timestamp: i64) -> Self {
        Self {
            entries: vec![Instruction::pending("", DEFAULT_DATACAP_AMOUNT, start_timestamp)],
        }
    }

    pub fn entries(&self) -> &[Instruction] {
        &self.entries
    }

    pub fn active(&self) -> Option<&Instruction> {
        self.entries.last()
    }

    /// Active instruction, seeding one first if an edit emptied the ledger
    pub(crate) fn active_or_insert_with(
        &mut self,
        seed: impl FnOnce() -> Instruction,
    ) -> &mut Instruction {
        if self.entries.is_empty() {
            self.entries.push(seed());
        }
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// Number of tranches ever issued
    pub fn grant_cycle(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Place `instruction` at `cycle` (1-based), dropping anything after it.
    ///
    /// Applying the same refresh twice leaves one copy in the ledger.
    pub(crate) fn set_cycle(&mut self, cycle: usize, instruction: Instruction) {
        let index = cycle.saturating_sub(1).min(self.entries.len());
        self.entries.truncate(index);
        self.entries.push(instruction);
    }

    pub(crate) fn replace_all(&mut self, entries: Vec<Instruction>) {
        self.entries = entries;
    }
}
