//! Equilibrium pairs between follower inequalities and their multipliers

use serde::{Deserialize, Serialize};

use crate::constraints::{self, Constraint, ConstraintFamily, ConstraintIndex};
use crate::error::ModelError;
use crate::index::IndexSets;
use crate::models::Family;
use crate::params::Parameters;
use crate::variables::{Assignment, Var};

/// `multiplier >= 0  ⊥  constraint`, i.e. `multiplier · body == 0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplementarityPair {
    pub multiplier: Var,
    pub constraint: Constraint,
}

impl ComplementarityPair {
    pub fn label(&self) -> &'static str {
        match self.multiplier {
            Var::Mu(_, Family::ConcentrationLimit) => "comp_1",
            Var::Mu(_, Family::NetReceipt) => "comp_4",
            _ => "comp_2",
        }
    }

    pub fn index(&self) -> ConstraintIndex {
        self.constraint.index
    }

    /// `multiplier · body` at `point`
    pub fn product(&self, point: &Assignment) -> Result<f64, ModelError> {
        Ok(point.get(&self.multiplier)? * self.constraint.body.eval(point)?)
    }

    /// Both sign conditions hold and at most one side is strictly active
    pub fn is_satisfied(&self, point: &Assignment, tolerance: f64) -> Result<bool, ModelError> {
        let multiplier = point.get(&self.multiplier)?;
        let body = self.constraint.body.eval(point)?;
        Ok(multiplier >= -tolerance
            && self.constraint.relation().holds(body, tolerance)
            && (multiplier * body).abs() <= tolerance)
    }
}

/// Pairs `mu[q, c]` with constraint `c` of process q, for c in {1, 4}.
pub fn inequality_pairs(
    index: &IndexSets,
    params: &Parameters,
) -> Result<Vec<ComplementarityPair>, ModelError> {
    let mut pairs = Vec::with_capacity(index.processes().len() * Family::ALL.len());
    for key in index.processes() {
        for family in Family::ALL {
            pairs.push(ComplementarityPair {
                multiplier: Var::Mu(*key, family),
                constraint: Constraint::new(
                    ConstraintFamily::from(family),
                    ConstraintIndex::Process(*key),
                    constraints::selected_body(index, params, *key, family)?,
                ),
            });
        }
    }
    Ok(pairs)
}

/// Pairs `mu2[f]` with `Fp[f] >= 0` for every flow candidate.
pub fn flow_pairs(index: &IndexSets) -> Result<Vec<ComplementarityPair>, ModelError> {
    index
        .flows()
        .iter()
        .map(|flow| {
            Ok(ComplementarityPair {
                multiplier: Var::Mu2(*flow),
                constraint: constraints::flow_nonnegativity(index, *flow)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coefficients, CompanyId, FlowKey, ProcessId, ProcessKey, ProcessRecord};

    fn setup() -> (IndexSets, Parameters) {
        let records = [
            ProcessRecord {
                company: CompanyId(1),
                process: ProcessId(1),
                load: 10.0,
                concentration_in_max: 1.0,
                concentration_out_max: 5.0,
            },
            ProcessRecord {
                company: CompanyId(2),
                process: ProcessId(1),
                load: 4.0,
                concentration_in_max: 0.0,
                concentration_out_max: 2.0,
            },
        ];
        let index = IndexSets::build(&records).unwrap();
        let params = Parameters::new(Coefficients::default(), &records, &index).unwrap();
        (index, params)
    }

    #[test]
    fn one_pair_per_process_and_family() {
        let (index, params) = setup();
        let pairs = inequality_pairs(&index, &params).unwrap();
        assert_eq!(pairs.len(), 4);
        let first = &pairs[0];
        assert_eq!(
            first.multiplier,
            Var::Mu(ProcessKey::new(1, 1), Family::ConcentrationLimit)
        );
        assert_eq!(first.constraint.family, ConstraintFamily::ConcentrationLimit);
        assert_eq!(first.label(), "comp_1");
        assert_eq!(pairs[1].label(), "comp_4");
    }

    #[test]
    fn paired_constraints_match_the_family_builders() {
        let (index, params) = setup();
        let pairs = inequality_pairs(&index, &params).unwrap();
        let key = ProcessKey::new(2, 1);
        let limit = constraints::concentration_limit(&index, &params, key).unwrap();
        let receipt = constraints::net_receipt(&index, key).unwrap();
        assert_eq!(pairs[2].constraint, limit);
        assert_eq!(pairs[3].constraint, receipt);
    }

    #[test]
    fn flow_pairs_cover_every_candidate() {
        let (index, _) = setup();
        let pairs = flow_pairs(&index).unwrap();
        assert_eq!(pairs.len(), index.flows().len());
        assert!(pairs.iter().all(|p| p.label() == "comp_2"));
    }

    #[test]
    fn product_and_exclusivity() {
        let (index, _) = setup();
        let flow = FlowKey::new(ProcessKey::new(1, 1), ProcessKey::new(2, 1));
        let pair = flow_pairs(&index)
            .unwrap()
            .into_iter()
            .find(|p| p.multiplier == Var::Mu2(flow))
            .unwrap();

        let mut point = Assignment::new();
        point.set(Var::Mu2(flow), 0.0);
        point.set(Var::Fp(flow), 3.0);
        assert_eq!(pair.product(&point).unwrap(), 0.0);
        assert!(pair.is_satisfied(&point, 1e-6).unwrap());

        point.set(Var::Mu2(flow), 2.0);
        assert_eq!(pair.product(&point).unwrap(), 6.0);
        assert!(!pair.is_satisfied(&point, 1e-6).unwrap());

        point.set(Var::Fp(flow), -1.0);
        point.set(Var::Mu2(flow), 0.0);
        assert!(!pair.is_satisfied(&point, 1e-6).unwrap());
    }
}
