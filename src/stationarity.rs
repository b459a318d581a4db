//! Stationarity conditions of the follower KKT systems
//!
//! For a flow `Fp[s, r]` sent by company `e = s.company`, the condition is
//!
//! ```text
//! ∂f_e/∂Fp − mu2[s,r]·∂R2/∂Fp
//!   + Σ_{q ∈ e} ( mu[q,1]·∂R1(q)/∂Fp + lambda[q]·∂R3(q)/∂Fp + mu[q,4]·∂R4(q)/∂Fp ) = 0
//! ```
//!
//! The sum runs over every process of the sending company, since a flow
//! enters the constraints of both its sender and (when intra-company) its
//! receiver. Constraint bodies are built once and differentiated exactly.

use std::collections::BTreeMap;

use tracing::debug;

use crate::constraints::{self, Constraint, ConstraintFamily, ConstraintIndex};
use crate::error::ModelError;
use crate::expr::Expr;
use crate::index::IndexSets;
use crate::models::{CompanyId, Family, FlowKey, ProcessKey};
use crate::params::Parameters;
use crate::variables::Var;

/// Per-process constraint bodies a company's Lagrangian is built from
struct ProcessBodies {
    concentration_limit: Expr,
    mass_balance: Expr,
    net_receipt: Expr,
}

pub struct StationarityGenerator<'a> {
    index: &'a IndexSets,
    objectives: BTreeMap<CompanyId, Expr>,
    bodies: BTreeMap<ProcessKey, ProcessBodies>,
}

impl<'a> StationarityGenerator<'a> {
    pub fn new(index: &'a IndexSets, params: &Parameters) -> Result<Self, ModelError> {
        let mut objectives = BTreeMap::new();
        for company in index.companies() {
            objectives.insert(
                *company,
                constraints::follower_objective(index, params, *company)?,
            );
        }

        let mut bodies = BTreeMap::new();
        for key in index.processes() {
            bodies.insert(
                *key,
                ProcessBodies {
                    concentration_limit: constraints::concentration_limit_body(index, params, *key)?,
                    mass_balance: constraints::mass_balance_body(index, params, *key)?,
                    net_receipt: constraints::net_receipt_body(index, *key)?,
                },
            );
        }

        Ok(Self {
            index,
            objectives,
            bodies,
        })
    }

    /// Gradient of the sender's Lagrangian with respect to `Fp[flow]`.
    ///
    /// Returns `None` when `flow` is not a flow candidate.
    pub fn gradient(&self, flow: FlowKey) -> Result<Option<Expr>, ModelError> {
        if !self.index.contains_flow(&flow) {
            return Ok(None);
        }
        let wrt = Var::Fp(flow);
        let owner = flow.owner();

        let objective = self
            .objectives
            .get(&owner)
            .ok_or(ModelError::DanglingProcess(flow.from))?;
        let mut gradient = Expr::constant(objective.derivative(&wrt)?);

        let sign_body = constraints::flow_nonnegativity_body(self.index, flow)?;
        gradient.add_term(Var::Mu2(flow), -sign_body.derivative(&wrt)?);

        for key in self.index.processes_of(owner) {
            let bodies = self
                .bodies
                .get(key)
                .ok_or(ModelError::DanglingProcess(*key))?;
            gradient.add_term(
                Var::Mu(*key, Family::ConcentrationLimit),
                bodies.concentration_limit.derivative(&wrt)?,
            );
            gradient.add_term(Var::Lambda(*key), bodies.mass_balance.derivative(&wrt)?);
            gradient.add_term(
                Var::Mu(*key, Family::NetReceipt),
                bodies.net_receipt.derivative(&wrt)?,
            );
        }

        Ok(Some(gradient))
    }

    /// Stationarity equation for one flow, or `None` for a non-candidate
    pub fn condition(&self, flow: FlowKey) -> Result<Option<Constraint>, ModelError> {
        Ok(self.gradient(flow)?.map(|body| {
            Constraint::new(ConstraintFamily::Stationarity, ConstraintIndex::Flow(flow), body)
        }))
    }

    /// One equation per flow candidate, in candidate order
    pub fn generate_all(&self) -> Result<Vec<Constraint>, ModelError> {
        let mut conditions = Vec::with_capacity(self.index.flows().len());
        for flow in self.index.flows() {
            if let Some(condition) = self.condition(*flow)? {
                conditions.push(condition);
            }
        }
        debug!(count = conditions.len(), "generated stationarity conditions");
        Ok(conditions)
    }
}
