//! Data models for eco-industrial park instances

use std::fmt;

use serde::{Deserialize, Serialize};

/// Company (follower) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub i64);

/// Process identifier; the id space is shared across companies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub i64);

/// A (company, process) pair, the unit every per-process constraint is indexed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessKey {
    pub company: CompanyId,
    pub process: ProcessId,
}

impl ProcessKey {
    pub fn new(company: i64, process: i64) -> Self {
        Self {
            company: CompanyId(company),
            process: ProcessId(process),
        }
    }
}

/// Potential transfer from the outlet of `from` to the inlet of `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub from: ProcessKey,
    pub to: ProcessKey,
}

impl FlowKey {
    pub fn new(from: ProcessKey, to: ProcessKey) -> Self {
        Self { from, to }
    }

    /// The company that controls this flow as a sender
    pub fn owner(&self) -> CompanyId {
        self.from.company
    }

    pub fn is_intra_company(&self) -> bool {
        self.from.company == self.to.company
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.company, self.process)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.from.company, self.from.process, self.to.company, self.to.process
        )
    }
}

/// One row of raw process data as loaded for a model instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub company: CompanyId,
    pub process: ProcessId,
    /// Contaminant mass entering the process
    pub load: f64,
    pub concentration_in_max: f64,
    pub concentration_out_max: f64,
}

impl ProcessRecord {
    pub fn key(&self) -> ProcessKey {
        ProcessKey {
            company: self.company,
            process: self.process,
        }
    }
}

/// Global cost coefficients of a model instance
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coefficients {
    /// Freshwater unit price
    pub alpha: f64,
    /// Discharge unit cost
    pub beta: f64,
    /// Inter-process pumping unit cost
    pub delta: f64,
}

/// Everything needed to formulate one model instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    pub model_id: i64,
    pub coefficients: Coefficients,
    pub processes: Vec<ProcessRecord>,
}

impl ModelInput {
    pub fn name(&self) -> String {
        format!("EIP_{}", self.model_id)
    }
}

/// Inequality follower constraints that carry a `mu` multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Family {
    /// Constraint 1: inlet concentration limit
    ConcentrationLimit,
    /// Constraint 4: net receipt bound
    NetReceipt,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::ConcentrationLimit, Family::NetReceipt];

    /// Numeric selector used in reports (1 or 4)
    pub fn id(self) -> u8 {
        match self {
            Family::ConcentrationLimit => 1,
            Family::NetReceipt => 4,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_owner_is_sender_company() {
        let flow = FlowKey::new(ProcessKey::new(1, 2), ProcessKey::new(3, 1));
        assert_eq!(flow.owner(), CompanyId(1));
        assert!(!flow.is_intra_company());
        assert_eq!(flow.to_string(), "(1, 2, 3, 1)");
    }

    #[test]
    fn family_ids_and_display() {
        assert_eq!(Family::ConcentrationLimit.id(), 1);
        assert_eq!(Family::NetReceipt.to_string(), "4");
    }
}
