//! Parameter store: scalar cost coefficients and per-process technical data

use std::collections::BTreeMap;

use crate::error::ModelError;
use crate::index::IndexSets;
use crate::models::{Coefficients, ProcessKey, ProcessRecord};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessParams {
    pub load: f64,
    pub concentration_in_max: f64,
    pub concentration_out_max: f64,
}

#[derive(Debug, Clone)]
pub struct Parameters {
    pub coefficients: Coefficients,
    by_process: BTreeMap<ProcessKey, ProcessParams>,
}

impl Parameters {
    /// Collect the technical coefficients for every pair in `index`.
    pub fn new(
        coefficients: Coefficients,
        records: &[ProcessRecord],
        index: &IndexSets,
    ) -> Result<Self, ModelError> {
        for (name, value) in [
            ("alpha", coefficients.alpha),
            ("beta", coefficients.beta),
            ("delta", coefficients.delta),
        ] {
            if !value.is_finite() {
                return Err(ModelError::MalformedInput(format!(
                    "{name} is not a finite number"
                )));
            }
        }

        let mut by_process = BTreeMap::new();
        for record in records {
            let values = [
                record.load,
                record.concentration_in_max,
                record.concentration_out_max,
            ];
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(ModelError::MalformedInput(format!(
                    "process {} has a negative or non-finite coefficient",
                    record.key()
                )));
            }
            // The freshwater initialisation divides by the outlet limit.
            if record.concentration_out_max == 0.0 {
                return Err(ModelError::MalformedInput(format!(
                    "process {} has a zero outlet concentration limit",
                    record.key()
                )));
            }
            by_process.insert(
                record.key(),
                ProcessParams {
                    load: record.load,
                    concentration_in_max: record.concentration_in_max,
                    concentration_out_max: record.concentration_out_max,
                },
            );
        }

        for key in index.processes() {
            if !by_process.contains_key(key) {
                return Err(ModelError::DanglingProcess(*key));
            }
        }

        Ok(Self {
            coefficients,
            by_process,
        })
    }

    pub fn get(&self, key: &ProcessKey) -> Result<&ProcessParams, ModelError> {
        self.by_process
            .get(key)
            .ok_or(ModelError::DanglingProcess(*key))
    }

    pub fn load(&self, key: &ProcessKey) -> Result<f64, ModelError> {
        Ok(self.get(key)?.load)
    }

    pub fn concentration_in_max(&self, key: &ProcessKey) -> Result<f64, ModelError> {
        Ok(self.get(key)?.concentration_in_max)
    }

    pub fn concentration_out_max(&self, key: &ProcessKey) -> Result<f64, ModelError> {
        Ok(self.get(key)?.concentration_out_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompanyId, ProcessId};

    fn record(cout: f64) -> ProcessRecord {
        ProcessRecord {
            company: CompanyId(1),
            process: ProcessId(1),
            load: 10.0,
            concentration_in_max: 0.0,
            concentration_out_max: cout,
        }
    }

    #[test]
    fn lookup_by_key() {
        let records = [record(5.0)];
        let index = IndexSets::build(&records).unwrap();
        let params = Parameters::new(Coefficients::default(), &records, &index).unwrap();
        let key = ProcessKey::new(1, 1);
        assert_eq!(params.load(&key).unwrap(), 10.0);
        assert_eq!(params.concentration_out_max(&key).unwrap(), 5.0);
        assert!(matches!(
            params.load(&ProcessKey::new(2, 1)),
            Err(ModelError::DanglingProcess(_))
        ));
    }

    #[test]
    fn zero_outlet_limit_is_malformed() {
        let records = [record(0.0)];
        let index = IndexSets::build(&records).unwrap();
        assert!(matches!(
            Parameters::new(Coefficients::default(), &records, &index),
            Err(ModelError::MalformedInput(_))
        ));
    }

    #[test]
    fn non_finite_cost_is_malformed() {
        let records = [record(5.0)];
        let index = IndexSets::build(&records).unwrap();
        let coefficients = Coefficients {
            alpha: f64::NAN,
            ..Coefficients::default()
        };
        assert!(Parameters::new(coefficients, &records, &index).is_err());
    }
}
