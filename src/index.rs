//! Index sets of a model instance
//!
//! Every set is sorted, so formulation output does not depend on the order
//! in which process rows were loaded.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::error::ModelError;
use crate::models::{CompanyId, FlowKey, ProcessId, ProcessKey, ProcessRecord};

#[derive(Debug, Clone)]
pub struct IndexSets {
    processes: Vec<ProcessKey>,
    companies: Vec<CompanyId>,
    process_ids: Vec<ProcessId>,
    flows: Vec<FlowKey>,
    flow_lookup: HashSet<FlowKey>,
    process_counts: BTreeMap<CompanyId, usize>,
}

impl IndexSets {
    /// Build all index sets from raw process rows.
    ///
    /// Repeated rows with identical attributes collapse into one pair; a
    /// repeated key with different attributes is rejected.
    pub fn build(records: &[ProcessRecord]) -> Result<Self, ModelError> {
        if records.is_empty() {
            return Err(ModelError::MalformedInput(
                "model has no company/process rows".to_string(),
            ));
        }

        let mut seen: BTreeMap<ProcessKey, &ProcessRecord> = BTreeMap::new();
        for record in records {
            match seen.get(&record.key()) {
                Some(existing) if *existing != record => {
                    return Err(ModelError::MalformedInput(format!(
                        "process {} appears twice with conflicting attributes",
                        record.key()
                    )));
                }
                Some(_) => {}
                None => {
                    seen.insert(record.key(), record);
                }
            }
        }

        let processes: Vec<ProcessKey> = seen.into_keys().collect();
        let companies: Vec<CompanyId> = processes
            .iter()
            .map(|k| k.company)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let process_ids: Vec<ProcessId> = processes
            .iter()
            .map(|k| k.process)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut process_counts = BTreeMap::new();
        for key in &processes {
            *process_counts.entry(key.company).or_insert(0) += 1;
        }

        // Full cross product minus the diagonal.
        let mut flows = Vec::with_capacity(processes.len() * processes.len().saturating_sub(1));
        for from in &processes {
            for to in &processes {
                if from != to {
                    flows.push(FlowKey::new(*from, *to));
                }
            }
        }
        let flow_lookup = flows.iter().copied().collect();

        debug!(
            processes = processes.len(),
            companies = companies.len(),
            flows = flows.len(),
            "built index sets"
        );

        Ok(Self {
            processes,
            companies,
            process_ids,
            flows,
            flow_lookup,
            process_counts,
        })
    }

    /// All (company, process) pairs
    pub fn processes(&self) -> &[ProcessKey] {
        &self.processes
    }

    pub fn companies(&self) -> &[CompanyId] {
        &self.companies
    }

    pub fn process_ids(&self) -> &[ProcessId] {
        &self.process_ids
    }

    /// All directed flow candidates
    pub fn flows(&self) -> &[FlowKey] {
        &self.flows
    }

    pub fn process_count(&self, company: CompanyId) -> usize {
        self.process_counts.get(&company).copied().unwrap_or(0)
    }

    pub fn contains_process(&self, key: &ProcessKey) -> bool {
        self.processes.binary_search(key).is_ok()
    }

    pub fn contains_flow(&self, flow: &FlowKey) -> bool {
        self.flow_lookup.contains(flow)
    }

    /// Processes owned by `company`
    pub fn processes_of(&self, company: CompanyId) -> impl Iterator<Item = &ProcessKey> + '_ {
        self.processes.iter().filter(move |k| k.company == company)
    }

    /// Flow candidates delivering into `key`
    pub fn inbound(&self, key: ProcessKey) -> impl Iterator<Item = FlowKey> + '_ {
        self.processes
            .iter()
            .filter(move |other| **other != key)
            .map(move |other| FlowKey::new(*other, key))
    }

    /// Flow candidates leaving `key`
    pub fn outbound(&self, key: ProcessKey) -> impl Iterator<Item = FlowKey> + '_ {
        self.processes
            .iter()
            .filter(move |other| **other != key)
            .map(move |other| FlowKey::new(key, *other))
    }
}
