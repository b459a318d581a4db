//! Constraint library
//!
//! Pure builders for the leader constraint, the four follower constraint
//! families and both objectives. Each builder returns the constraint body
//! only; the relational operator comes from the family so that the body can
//! be re-evaluated and differentiated on its own.
//!
//! For a process q with inbound flows `Fp_in` and outbound flows `Fp_out`:
//!
//! ```text
//! R1  Σ Cout[x]·Fp[x,q] − Cin[q]·(Fw[q] + Σ Fp[x,q])           <= 0
//! R2  Fp[q,x]                                                  >= 0
//! R3  M[q] + Σ Cout[x]·Fp[x,q] − Cout[q]·(Fw[q] + Σ Fp[x,q])   == 0
//! R4  −Fw[q] − Σ Fp_in + Σ Fp_out                              <= 0
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::expr::{Expr, Relation};
use crate::index::IndexSets;
use crate::models::{CompanyId, Family, FlowKey, ProcessKey};
use crate::params::Parameters;
use crate::variables::Var;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintFamily {
    /// Leader: freshwater is nonnegative
    Leader,
    ConcentrationLimit,
    FlowNonNegativity,
    MassBalance,
    NetReceipt,
    /// Multiplier sign constraints (`mu >= 0`, `mu2 >= 0`)
    MultiplierSign,
    /// Gradient of a follower Lagrangian with respect to one flow
    Stationarity,
}

impl ConstraintFamily {
    pub fn relation(self) -> Relation {
        match self {
            ConstraintFamily::Leader
            | ConstraintFamily::FlowNonNegativity
            | ConstraintFamily::MultiplierSign => Relation::Ge,
            ConstraintFamily::ConcentrationLimit | ConstraintFamily::NetReceipt => Relation::Le,
            ConstraintFamily::MassBalance | ConstraintFamily::Stationarity => Relation::Eq,
        }
    }

    /// Short label used in reports
    pub fn label(self) -> &'static str {
        match self {
            ConstraintFamily::Leader => "leader",
            ConstraintFamily::ConcentrationLimit => "R1",
            ConstraintFamily::FlowNonNegativity => "R2",
            ConstraintFamily::MassBalance => "R3",
            ConstraintFamily::NetReceipt => "R4",
            ConstraintFamily::MultiplierSign => "mu",
            ConstraintFamily::Stationarity => "Lg",
        }
    }
}

impl From<Family> for ConstraintFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::ConcentrationLimit => ConstraintFamily::ConcentrationLimit,
            Family::NetReceipt => ConstraintFamily::NetReceipt,
        }
    }
}

/// Index tuple of a constraint instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintIndex {
    Process(ProcessKey),
    Flow(FlowKey),
    Multiplier(Var),
}

impl fmt::Display for ConstraintIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintIndex::Process(k) => write!(f, "{k}"),
            ConstraintIndex::Flow(fl) => write!(f, "{fl}"),
            ConstraintIndex::Multiplier(v) => write!(f, "{v}"),
        }
    }
}

/// One constraint instance: `body <relation> 0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub family: ConstraintFamily,
    pub index: ConstraintIndex,
    pub body: Expr,
}

impl Constraint {
    pub fn new(family: ConstraintFamily, index: ConstraintIndex, body: Expr) -> Self {
        Self {
            family,
            index,
            body,
        }
    }

    pub fn relation(&self) -> Relation {
        self.family.relation()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}: {} {} 0",
            self.family.label(),
            self.index,
            self.body,
            self.relation().symbol()
        )
    }
}

fn check_process(index: &IndexSets, key: ProcessKey) -> Result<(), ModelError> {
    if index.contains_process(&key) {
        Ok(())
    } else {
        Err(ModelError::DanglingProcess(key))
    }
}

/// `Fw[q] + Σ Fp[x,q]`, the total water entering q
fn total_inflow(index: &IndexSets, key: ProcessKey) -> Expr {
    let mut expr = Expr::term(Var::Fw(key), 1.0);
    for flow in index.inbound(key) {
        expr.add_term(Var::Fp(flow), 1.0);
    }
    expr
}

/// `Σ Cout[x]·Fp[x,q]`, contaminant carried in by reused water
fn inbound_contaminant(
    index: &IndexSets,
    params: &Parameters,
    key: ProcessKey,
) -> Result<Expr, ModelError> {
    let mut expr = Expr::zero();
    for flow in index.inbound(key) {
        expr.add_term(Var::Fp(flow), params.concentration_out_max(&flow.from)?);
    }
    Ok(expr)
}

/// Body of the leader constraint `Fw[q] >= 0`
pub fn leader_body(index: &IndexSets, key: ProcessKey) -> Result<Expr, ModelError> {
    check_process(index, key)?;
    Ok(Expr::term(Var::Fw(key), 1.0))
}

/// Body of constraint 1 (inlet concentration limit)
pub fn concentration_limit_body(
    index: &IndexSets,
    params: &Parameters,
    key: ProcessKey,
) -> Result<Expr, ModelError> {
    check_process(index, key)?;
    let mut body = inbound_contaminant(index, params, key)?;
    body.add_scaled(&total_inflow(index, key), -params.concentration_in_max(&key)?);
    Ok(body)
}

/// Body of constraint 2 (flow nonnegativity)
pub fn flow_nonnegativity_body(index: &IndexSets, flow: FlowKey) -> Result<Expr, ModelError> {
    if !index.contains_flow(&flow) {
        return Err(ModelError::DanglingFlow(flow));
    }
    Ok(Expr::term(Var::Fp(flow), 1.0))
}

/// Body of constraint 3 (contaminant mass balance)
pub fn mass_balance_body(
    index: &IndexSets,
    params: &Parameters,
    key: ProcessKey,
) -> Result<Expr, ModelError> {
    check_process(index, key)?;
    let mut body = Expr::constant(params.load(&key)?);
    body.add_scaled(&inbound_contaminant(index, params, key)?, 1.0);
    body.add_scaled(&total_inflow(index, key), -params.concentration_out_max(&key)?);
    Ok(body)
}

/// Body of constraint 4 (a process cannot send more than it receives)
pub fn net_receipt_body(index: &IndexSets, key: ProcessKey) -> Result<Expr, ModelError> {
    check_process(index, key)?;
    let mut body = total_inflow(index, key).scaled(-1.0);
    for flow in index.outbound(key) {
        body.add_term(Var::Fp(flow), 1.0);
    }
    Ok(body)
}

/// Body of a `mu`-carrying inequality (constraint 1 or 4)
pub fn selected_body(
    index: &IndexSets,
    params: &Parameters,
    key: ProcessKey,
    family: Family,
) -> Result<Expr, ModelError> {
    match family {
        Family::ConcentrationLimit => concentration_limit_body(index, params, key),
        Family::NetReceipt => net_receipt_body(index, key),
    }
}

pub fn leader_constraint(index: &IndexSets, key: ProcessKey) -> Result<Constraint, ModelError> {
    Ok(Constraint::new(
        ConstraintFamily::Leader,
        ConstraintIndex::Process(key),
        leader_body(index, key)?,
    ))
}

pub fn concentration_limit(
    index: &IndexSets,
    params: &Parameters,
    key: ProcessKey,
) -> Result<Constraint, ModelError> {
    Ok(Constraint::new(
        ConstraintFamily::ConcentrationLimit,
        ConstraintIndex::Process(key),
        concentration_limit_body(index, params, key)?,
    ))
}

pub fn flow_nonnegativity(index: &IndexSets, flow: FlowKey) -> Result<Constraint, ModelError> {
    Ok(Constraint::new(
        ConstraintFamily::FlowNonNegativity,
        ConstraintIndex::Flow(flow),
        flow_nonnegativity_body(index, flow)?,
    ))
}

pub fn mass_balance(
    index: &IndexSets,
    params: &Parameters,
    key: ProcessKey,
) -> Result<Constraint, ModelError> {
    Ok(Constraint::new(
        ConstraintFamily::MassBalance,
        ConstraintIndex::Process(key),
        mass_balance_body(index, params, key)?,
    ))
}

pub fn net_receipt(index: &IndexSets, key: ProcessKey) -> Result<Constraint, ModelError> {
    Ok(Constraint::new(
        ConstraintFamily::NetReceipt,
        ConstraintIndex::Process(key),
        net_receipt_body(index, key)?,
    ))
}

/// `mu >= 0` or `mu2 >= 0`
pub fn multiplier_sign(multiplier: Var) -> Constraint {
    Constraint::new(
        ConstraintFamily::MultiplierSign,
        ConstraintIndex::Multiplier(multiplier),
        Expr::term(multiplier, 1.0),
    )
}

/// Leader objective: total freshwater intake
pub fn leader_objective(index: &IndexSets) -> Expr {
    let mut expr = Expr::zero();
    for key in index.processes() {
        expr.add_term(Var::Fw(*key), 1.0);
    }
    expr
}

/// Cost a company minimises given the freshwater it is allotted.
///
/// ```text
/// α·Σ Fw  +  β·Σ (Fw + Σ Fp_in − Σ Fp_out)
///         +  δ·Σ intra-company transfers
///         +  δ/2·Σ (sent to + received from other companies)
/// ```
pub fn follower_objective(
    index: &IndexSets,
    params: &Parameters,
    company: CompanyId,
) -> Result<Expr, ModelError> {
    if index.process_count(company) == 0 {
        return Err(ModelError::MalformedInput(format!(
            "company {company} owns no process"
        )));
    }
    let c = params.coefficients;
    let mut expr = Expr::zero();

    for key in index.processes_of(company) {
        expr.add_term(Var::Fw(*key), c.alpha);

        // Discharge: everything that enters and is not passed on
        expr.add_term(Var::Fw(*key), c.beta);
        for flow in index.inbound(*key) {
            expr.add_term(Var::Fp(flow), c.beta);
        }
        for flow in index.outbound(*key) {
            expr.add_term(Var::Fp(flow), -c.beta);
            if flow.is_intra_company() {
                expr.add_term(Var::Fp(flow), c.delta);
            } else {
                // Pumping across companies is split between sender and receiver.
                expr.add_term(Var::Fp(flow), c.delta / 2.0);
                expr.add_term(Var::Fp(FlowKey::new(flow.to, flow.from)), c.delta / 2.0);
            }
        }
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coefficients, ProcessId, ProcessRecord};
    use crate::variables::Assignment;

    fn record(company: i64, process: i64, load: f64, cin: f64, cout: f64) -> ProcessRecord {
        ProcessRecord {
            company: CompanyId(company),
            process: ProcessId(process),
            load,
            concentration_in_max: cin,
            concentration_out_max: cout,
        }
    }

    fn setup(records: &[ProcessRecord]) -> (IndexSets, Parameters) {
        let index = IndexSets::build(records).unwrap();
        let coefficients = Coefficients {
            alpha: 10.0,
            beta: 2.0,
            delta: 1.0,
        };
        let params = Parameters::new(coefficients, records, &index).unwrap();
        (index, params)
    }

    fn two_process() -> (IndexSets, Parameters) {
        setup(&[record(1, 1, 10.0, 1.0, 5.0), record(2, 1, 4.0, 2.0, 8.0)])
    }

    fn a() -> ProcessKey {
        ProcessKey::new(1, 1)
    }

    fn b() -> ProcessKey {
        ProcessKey::new(2, 1)
    }

    #[test]
    fn concentration_limit_coefficients() {
        let (index, params) = two_process();
        let body = concentration_limit_body(&index, &params, a()).unwrap();
        // Cout[b] − Cin[a] on the inbound flow, −Cin[a] on freshwater
        assert_eq!(body.coefficient(&Var::Fp(FlowKey::new(b(), a()))), 8.0 - 1.0);
        assert_eq!(body.coefficient(&Var::Fw(a())), -1.0);
        assert_eq!(body.coefficient(&Var::Fp(FlowKey::new(a(), b()))), 0.0);
        assert_eq!(body.constant_part(), 0.0);
    }

    #[test]
    fn mass_balance_coefficients() {
        let (index, params) = two_process();
        let body = mass_balance_body(&index, &params, a()).unwrap();
        assert_eq!(body.constant_part(), 10.0);
        assert_eq!(body.coefficient(&Var::Fw(a())), -5.0);
        assert_eq!(body.coefficient(&Var::Fp(FlowKey::new(b(), a()))), 8.0 - 5.0);
    }

    #[test]
    fn mass_balance_holds_at_initial_freshwater() {
        let (index, params) = two_process();
        let mut point = Assignment::new();
        point.set(Var::Fw(a()), 2.0);
        point.set(Var::Fp(FlowKey::new(b(), a())), 0.0);
        let body = mass_balance_body(&index, &params, a()).unwrap();
        assert_eq!(body.eval(&point).unwrap(), 0.0);
    }

    #[test]
    fn net_receipt_coefficients() {
        let (index, _) = two_process();
        let body = net_receipt_body(&index, a()).unwrap();
        assert_eq!(body.coefficient(&Var::Fw(a())), -1.0);
        assert_eq!(body.coefficient(&Var::Fp(FlowKey::new(b(), a()))), -1.0);
        assert_eq!(body.coefficient(&Var::Fp(FlowKey::new(a(), b()))), 1.0);
    }

    #[test]
    fn leader_body_is_freshwater() {
        let (index, _) = two_process();
        let body = leader_body(&index, a()).unwrap();
        let mut point = Assignment::new();
        point.set(Var::Fw(a()), 3.25);
        assert_eq!(body.eval(&point).unwrap(), 3.25);
        assert_eq!(leader_constraint(&index, a()).unwrap().relation(), Relation::Ge);
    }

    #[test]
    fn unknown_keys_are_dangling() {
        let (index, params) = two_process();
        let ghost = ProcessKey::new(7, 7);
        assert!(matches!(
            concentration_limit_body(&index, &params, ghost),
            Err(ModelError::DanglingProcess(k)) if k == ghost
        ));
        assert!(matches!(
            flow_nonnegativity_body(&index, FlowKey::new(a(), a())),
            Err(ModelError::DanglingFlow(_))
        ));
    }

    #[test]
    fn follower_objective_cross_company_terms() {
        let (index, params) = two_process();
        let obj = follower_objective(&index, &params, CompanyId(1)).unwrap();
        // alpha + beta on own freshwater
        assert_eq!(obj.coefficient(&Var::Fw(a())), 12.0);
        assert_eq!(obj.coefficient(&Var::Fw(b())), 0.0);
        // outbound: −beta + delta/2; inbound: +beta + delta/2
        assert_eq!(obj.coefficient(&Var::Fp(FlowKey::new(a(), b()))), -2.0 + 0.5);
        assert_eq!(obj.coefficient(&Var::Fp(FlowKey::new(b(), a()))), 2.0 + 0.5);
    }

    #[test]
    fn follower_objective_intra_company_terms() {
        let (index, params) = setup(&[record(1, 1, 1.0, 0.0, 1.0), record(1, 2, 1.0, 0.0, 1.0)]);
        let obj = follower_objective(&index, &params, CompanyId(1)).unwrap();
        let p1 = ProcessKey::new(1, 1);
        let p2 = ProcessKey::new(1, 2);
        // discharge cancels between sender and receiver, pumping remains
        assert_eq!(obj.coefficient(&Var::Fp(FlowKey::new(p1, p2))), 1.0);
        assert_eq!(obj.coefficient(&Var::Fp(FlowKey::new(p2, p1))), 1.0);
    }

    #[test]
    fn leader_objective_sums_freshwater() {
        let (index, _) = two_process();
        let obj = leader_objective(&index);
        assert_eq!(obj.coefficient(&Var::Fw(a())), 1.0);
        assert_eq!(obj.coefficient(&Var::Fw(b())), 1.0);
        assert_eq!(obj.variables().count(), 2);
    }

    #[test]
    fn family_relations() {
        assert_eq!(ConstraintFamily::ConcentrationLimit.relation(), Relation::Le);
        assert_eq!(ConstraintFamily::FlowNonNegativity.relation(), Relation::Ge);
        assert_eq!(ConstraintFamily::MassBalance.relation(), Relation::Eq);
        assert_eq!(ConstraintFamily::NetReceipt.relation(), Relation::Le);
        assert_eq!(ConstraintFamily::Stationarity.relation(), Relation::Eq);
    }
}
