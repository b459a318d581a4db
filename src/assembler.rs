//! Assembly of the single-level MPEC system
//!
//! The leader problem plus, for every company, the KKT conditions of its
//! follower problem: primal feasibility (R1..R4), dual feasibility
//! (multiplier signs), complementarity and stationarity.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::complementarity::{self, ComplementarityPair};
use crate::constraints::{self, Constraint, ConstraintIndex};
use crate::error::ModelError;
use crate::expr::Expr;
use crate::index::IndexSets;
use crate::models::{Family, ModelInput};
use crate::params::Parameters;
use crate::stationarity::StationarityGenerator;
use crate::variables::{Assignment, Var, VariableRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpecSystem {
    pub model_id: i64,
    pub name: String,
    /// Minimised: total freshwater intake
    pub objective: Expr,
    pub variables: VariableRegistry,
    pub leader_constraints: Vec<Constraint>,
    pub concentration_limits: Vec<Constraint>,
    pub flow_nonnegativity: Vec<Constraint>,
    pub mass_balances: Vec<Constraint>,
    pub net_receipts: Vec<Constraint>,
    pub multiplier_signs: Vec<Constraint>,
    /// `mu[q, c] ⊥ R_c(q)` for c in {1, 4}
    pub complementarity: Vec<ComplementarityPair>,
    /// `mu2[f] ⊥ Fp[f]`
    pub flow_complementarity: Vec<ComplementarityPair>,
    pub stationarity: Vec<Constraint>,
}

/// Counts logged after assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub variables: usize,
    pub constraints: usize,
    pub complementarity_pairs: usize,
    pub stationarity_equations: usize,
}

impl fmt::Display for SizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} variables, {} constraints ({} stationarity), {} complementarity pairs",
            self.variables, self.constraints, self.stationarity_equations, self.complementarity_pairs
        )
    }
}

/// Build the complete system for one model instance.
pub fn assemble(input: &ModelInput) -> Result<MpecSystem, ModelError> {
    let index = IndexSets::build(&input.processes)?;
    let params = Parameters::new(input.coefficients, &input.processes, &index)?;
    let variables = VariableRegistry::declare_all(&index, &params)?;

    let mut leader_constraints = Vec::new();
    let mut concentration_limits = Vec::new();
    let mut mass_balances = Vec::new();
    let mut net_receipts = Vec::new();
    let mut multiplier_signs = Vec::new();
    for key in index.processes() {
        leader_constraints.push(constraints::leader_constraint(&index, *key)?);
        concentration_limits.push(constraints::concentration_limit(&index, &params, *key)?);
        mass_balances.push(constraints::mass_balance(&index, &params, *key)?);
        net_receipts.push(constraints::net_receipt(&index, *key)?);
        for family in Family::ALL {
            multiplier_signs.push(constraints::multiplier_sign(Var::Mu(*key, family)));
        }
    }

    let mut flow_nonnegativity = Vec::with_capacity(index.flows().len());
    for flow in index.flows() {
        flow_nonnegativity.push(constraints::flow_nonnegativity(&index, *flow)?);
        multiplier_signs.push(constraints::multiplier_sign(Var::Mu2(*flow)));
    }

    let complementarity = complementarity::inequality_pairs(&index, &params)?;
    let flow_complementarity = complementarity::flow_pairs(&index)?;
    let stationarity = StationarityGenerator::new(&index, &params)?.generate_all()?;

    let system = MpecSystem {
        model_id: input.model_id,
        name: input.name(),
        objective: constraints::leader_objective(&index),
        variables,
        leader_constraints,
        concentration_limits,
        flow_nonnegativity,
        mass_balances,
        net_receipts,
        multiplier_signs,
        complementarity,
        flow_complementarity,
        stationarity,
    };
    system.validate(&index)?;

    info!(model = %system.name, size = %system.size(), "assembled MPEC system");
    Ok(system)
}

impl MpecSystem {
    /// Every constraint instance, including the ones inside complementarity pairs
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.leader_constraints
            .iter()
            .chain(&self.concentration_limits)
            .chain(&self.flow_nonnegativity)
            .chain(&self.mass_balances)
            .chain(&self.net_receipts)
            .chain(&self.multiplier_signs)
            .chain(&self.stationarity)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &ComplementarityPair> {
        self.complementarity.iter().chain(&self.flow_complementarity)
    }

    pub fn size(&self) -> SizeReport {
        SizeReport {
            variables: self.variables.len(),
            constraints: self.constraints().count(),
            complementarity_pairs: self.pairs().count(),
            stationarity_equations: self.stationarity.len(),
        }
    }

    pub fn initial_assignment(&self) -> Assignment {
        self.variables.initial_assignment()
    }

    /// Leader objective at `point`
    pub fn objective_value(&self, point: &Assignment) -> Result<f64, ModelError> {
        self.objective.eval(point)
    }

    /// Check that every index tuple and every variable refers to something
    /// the index sets and the registry contain.
    pub fn validate(&self, index: &IndexSets) -> Result<(), ModelError> {
        let pair_constraints = self.pairs().map(|p| &p.constraint);
        for constraint in self.constraints().chain(pair_constraints) {
            match constraint.index {
                ConstraintIndex::Process(key) if !index.contains_process(&key) => {
                    return Err(ModelError::DanglingProcess(key));
                }
                ConstraintIndex::Flow(flow) if !index.contains_flow(&flow) => {
                    return Err(ModelError::DanglingFlow(flow));
                }
                ConstraintIndex::Multiplier(var) if !self.variables.contains(&var) => {
                    return Err(ModelError::UndeclaredVariable(var));
                }
                _ => {}
            }
            self.check_declared(&constraint.body)?;
        }
        for pair in self.pairs() {
            if !self.variables.contains(&pair.multiplier) {
                return Err(ModelError::UndeclaredVariable(pair.multiplier));
            }
        }
        self.check_declared(&self.objective)
    }

    fn check_declared(&self, expr: &Expr) -> Result<(), ModelError> {
        match expr.variables().find(|v| !self.variables.contains(v)) {
            Some(var) => Err(ModelError::UndeclaredVariable(*var)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for MpecSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.name)?;
        writeln!(f, "{}", self.size())?;
        writeln!(f)?;
        writeln!(f, "minimize {}", self.objective)?;
        writeln!(f)?;

        writeln!(f, "Variables:")?;
        for (var, decl) in self.variables.iter() {
            writeln!(f, "  {var} {:?} init={}", decl.domain, decl.initial)?;
        }
        writeln!(f)?;

        writeln!(f, "Constraints:")?;
        for constraint in self.constraints() {
            writeln!(f, "  {constraint}")?;
        }
        writeln!(f)?;

        writeln!(f, "Complementarity:")?;
        for pair in self.pairs() {
            writeln!(f, "  {} >= 0  _|_  {}", pair.multiplier, pair.constraint)?;
        }
        Ok(())
    }
}
