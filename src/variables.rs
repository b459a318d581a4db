//! Decision variable registry: primal flows and KKT multipliers

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::index::IndexSets;
use crate::models::{Family, FlowKey, ProcessKey};
use crate::params::Parameters;

/// A decision variable of the single-level system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Var {
    /// Freshwater supplied to a process (leader decision)
    Fw(ProcessKey),
    /// Water sent from one process to another (follower decision)
    Fp(FlowKey),
    /// Multiplier of inequality constraint 1 or 4
    Mu(ProcessKey, Family),
    /// Multiplier of the flow nonnegativity constraint
    Mu2(FlowKey),
    /// Multiplier of the mass balance equality
    Lambda(ProcessKey),
}

impl Var {
    /// Primal flow variables are the only ones a follower Lagrangian is
    /// differentiated against.
    pub fn is_primal(&self) -> bool {
        matches!(self, Var::Fw(_) | Var::Fp(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Var::Fw(_) => "Fw",
            Var::Fp(_) => "Fp",
            Var::Mu(..) => "mu",
            Var::Mu2(_) => "mu2",
            Var::Lambda(_) => "lambda",
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Fw(k) => write!(f, "Fw[{}, {}]", k.company, k.process),
            Var::Fp(fl) => write!(
                f,
                "Fp[{}, {}, {}, {}]",
                fl.from.company, fl.from.process, fl.to.company, fl.to.process
            ),
            Var::Mu(k, c) => write!(f, "mu[{}, {}, {}]", k.company, k.process, c),
            Var::Mu2(fl) => write!(
                f,
                "mu2[{}, {}, {}, {}]",
                fl.from.company, fl.from.process, fl.to.company, fl.to.process
            ),
            Var::Lambda(k) => write!(f, "lambda[{}, {}]", k.company, k.process),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Domain {
    NonNegative,
    Free,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub domain: Domain,
    pub initial: f64,
}

/// All declared variables with their domains and initial values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(Var, Declaration)>", into = "Vec<(Var, Declaration)>")]
pub struct VariableRegistry {
    declarations: BTreeMap<Var, Declaration>,
}

impl From<Vec<(Var, Declaration)>> for VariableRegistry {
    fn from(declarations: Vec<(Var, Declaration)>) -> Self {
        Self {
            declarations: declarations.into_iter().collect(),
        }
    }
}

impl From<VariableRegistry> for Vec<(Var, Declaration)> {
    fn from(registry: VariableRegistry) -> Self {
        registry.declarations.into_iter().collect()
    }
}

impl VariableRegistry {
    /// Declare every variable of the model over the index sets.
    ///
    /// Freshwater starts at `load / concentration_out_max`; flows and
    /// multipliers start at zero.
    pub fn declare_all(index: &IndexSets, params: &Parameters) -> Result<Self, ModelError> {
        let mut registry = Self::default();

        for key in index.processes() {
            let p = params.get(key)?;
            registry.declare(
                Var::Fw(*key),
                Domain::NonNegative,
                p.load / p.concentration_out_max,
            );
            for family in Family::ALL {
                registry.declare(Var::Mu(*key, family), Domain::NonNegative, 0.0);
            }
            registry.declare(Var::Lambda(*key), Domain::Free, 0.0);
        }

        for flow in index.flows() {
            registry.declare(Var::Fp(*flow), Domain::NonNegative, 0.0);
            registry.declare(Var::Mu2(*flow), Domain::NonNegative, 0.0);
        }

        Ok(registry)
    }

    pub fn declare(&mut self, var: Var, domain: Domain, initial: f64) {
        self.declarations.insert(var, Declaration { domain, initial });
    }

    pub fn contains(&self, var: &Var) -> bool {
        self.declarations.contains_key(var)
    }

    pub fn get(&self, var: &Var) -> Option<&Declaration> {
        self.declarations.get(var)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Declaration)> {
        self.declarations.iter()
    }

    /// Variables of one kind ("Fw", "Fp", "mu", "mu2", "lambda")
    pub fn count_kind(&self, kind: &str) -> usize {
        self.declarations.keys().filter(|v| v.kind() == kind).count()
    }

    /// The initialisation point handed to a solver
    pub fn initial_assignment(&self) -> Assignment {
        Assignment {
            values: self
                .declarations
                .iter()
                .map(|(var, decl)| (*var, decl.initial))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarValue {
    pub var: Var,
    pub value: f64,
}

/// Values of the decision variables at one point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<VarValue>", into = "Vec<VarValue>")]
pub struct Assignment {
    values: BTreeMap<Var, f64>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: &Var) -> Result<f64, ModelError> {
        self.values
            .get(var)
            .copied()
            .ok_or(ModelError::MissingValue(*var))
    }

    pub fn set(&mut self, var: Var, value: f64) {
        self.values.insert(var, value);
    }

    /// Overwrite this assignment with every value present in `other`
    pub fn merge(&mut self, other: &Assignment) {
        for (var, value) in &other.values {
            self.values.insert(*var, *value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &f64)> {
        self.values.iter()
    }

    /// Freshwater values in key order
    pub fn freshwater(&self) -> impl Iterator<Item = (ProcessKey, f64)> + '_ {
        self.values.iter().filter_map(|(var, value)| match var {
            Var::Fw(key) => Some((*key, *value)),
            _ => None,
        })
    }

    /// Transfer values in key order
    pub fn transfers(&self) -> impl Iterator<Item = (FlowKey, f64)> + '_ {
        self.values.iter().filter_map(|(var, value)| match var {
            Var::Fp(flow) => Some((*flow, *value)),
            _ => None,
        })
    }
}

impl From<Vec<VarValue>> for Assignment {
    fn from(values: Vec<VarValue>) -> Self {
        Self {
            values: values.into_iter().map(|v| (v.var, v.value)).collect(),
        }
    }
}

impl From<Assignment> for Vec<VarValue> {
    fn from(assignment: Assignment) -> Self {
        assignment
            .values
            .into_iter()
            .map(|(var, value)| VarValue { var, value })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompanyId, Coefficients, ProcessId, ProcessRecord};

    fn registry(records: &[ProcessRecord]) -> VariableRegistry {
        let index = IndexSets::build(records).unwrap();
        let params = Parameters::new(Coefficients::default(), records, &index).unwrap();
        VariableRegistry::declare_all(&index, &params).unwrap()
    }

    fn record(company: i64, load: f64, cout: f64) -> ProcessRecord {
        ProcessRecord {
            company: CompanyId(company),
            process: ProcessId(1),
            load,
            concentration_in_max: 0.0,
            concentration_out_max: cout,
        }
    }

    #[test]
    fn freshwater_initialised_from_load_and_outlet_limit() {
        let reg = registry(&[record(1, 10.0, 5.0), record(2, 3.0, 4.0)]);
        let init = reg.initial_assignment();
        assert_eq!(init.get(&Var::Fw(ProcessKey::new(1, 1))).unwrap(), 2.0);
        assert_eq!(init.get(&Var::Fw(ProcessKey::new(2, 1))).unwrap(), 0.75);
        let flow = FlowKey::new(ProcessKey::new(1, 1), ProcessKey::new(2, 1));
        assert_eq!(init.get(&Var::Fp(flow)).unwrap(), 0.0);
        assert_eq!(init.get(&Var::Mu2(flow)).unwrap(), 0.0);
    }

    #[test]
    fn declares_every_variable_family() {
        let reg = registry(&[record(1, 10.0, 5.0), record(2, 3.0, 4.0)]);
        assert_eq!(reg.count_kind("Fw"), 2);
        assert_eq!(reg.count_kind("Fp"), 2);
        assert_eq!(reg.count_kind("mu"), 4);
        assert_eq!(reg.count_kind("mu2"), 2);
        assert_eq!(reg.count_kind("lambda"), 2);
        assert_eq!(reg.len(), 12);
        let lambda = reg.get(&Var::Lambda(ProcessKey::new(1, 1))).unwrap();
        assert_eq!(lambda.domain, Domain::Free);
    }

    #[test]
    fn missing_value_is_an_error() {
        let assignment = Assignment::new();
        let var = Var::Fw(ProcessKey::new(1, 1));
        assert!(matches!(assignment.get(&var), Err(ModelError::MissingValue(v)) if v == var));
    }

    #[test]
    fn assignment_serialises_as_a_list() {
        let mut assignment = Assignment::new();
        assignment.set(Var::Lambda(ProcessKey::new(1, 2)), -1.5);
        let json = serde_json::to_string(&assignment).unwrap();
        let back: Assignment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, assignment);
        assert!(json.starts_with('['));
    }

    #[test]
    fn display_uses_bracket_indices() {
        let flow = FlowKey::new(ProcessKey::new(1, 2), ProcessKey::new(3, 4));
        assert_eq!(Var::Fp(flow).to_string(), "Fp[1, 2, 3, 4]");
        assert_eq!(
            Var::Mu(ProcessKey::new(1, 2), Family::NetReceipt).to_string(),
            "mu[1, 2, 4]"
        );
    }
}
