use eip_mpec::complementarity::ComplementarityPair;
use eip_mpec::constraints::{ConstraintFamily, ConstraintIndex};
use eip_mpec::evaluate::{DEFAULT_TOLERANCE, evaluate};
use eip_mpec::index::IndexSets;
use eip_mpec::models::Family;
use eip_mpec::params::Parameters;
use eip_mpec::solver::{InitialPointSolver, SolverConfig, TerminationCondition, solve};
use eip_mpec::stationarity::StationarityGenerator;
use eip_mpec::{
    Assignment, Coefficients, CompanyId, FlowKey, ModelInput, ProcessId, ProcessKey, ProcessRecord,
    Var, assemble,
};

fn process(company: i64, process: i64, load: f64, cin: f64, cout: f64) -> ProcessRecord {
    ProcessRecord {
        company: CompanyId(company),
        process: ProcessId(process),
        load,
        concentration_in_max: cin,
        concentration_out_max: cout,
    }
}

/// Two companies with one process each; delta = 2 beta makes the follower
/// cost of a cross-company flow independent of its size.
fn two_companies() -> ModelInput {
    ModelInput {
        model_id: 2,
        coefficients: Coefficients {
            alpha: 1.0,
            beta: 0.5,
            delta: 1.0,
        },
        processes: vec![process(1, 1, 10.0, 0.0, 5.0), process(2, 1, 4.0, 1.0, 2.0)],
    }
}

#[test]
fn single_process_reduces_to_freshwater_only() {
    let input = ModelInput {
        model_id: 1,
        coefficients: Coefficients {
            alpha: 2.0,
            beta: 1.0,
            delta: 0.5,
        },
        processes: vec![process(1, 1, 12.0, 0.0, 4.0)],
    };
    let system = assemble(&input).unwrap();

    assert!(system.flow_nonnegativity.is_empty());
    assert!(system.stationarity.is_empty());
    assert!(system.flow_complementarity.is_empty());
    assert_eq!(system.variables.count_kind("Fp"), 0);

    let key = ProcessKey::new(1, 1);
    let point = system.initial_assignment();
    assert_eq!(point.get(&Var::Fw(key)).unwrap(), 3.0);

    for constraint in system
        .concentration_limits
        .iter()
        .chain(&system.mass_balances)
        .chain(&system.net_receipts)
    {
        assert!(
            constraint
                .body
                .variables()
                .all(|v| matches!(v, Var::Fw(_))),
            "{constraint}"
        );
    }

    let report = evaluate(&system, &point, DEFAULT_TOLERANCE).unwrap();
    assert!(report.is_satisfied(), "{report}");
}

#[test]
fn freshwater_initialisation_is_load_over_outlet_limit() {
    let system = assemble(&two_companies()).unwrap();
    let point = system.initial_assignment();
    assert_eq!(point.get(&Var::Fw(ProcessKey::new(1, 1))).unwrap(), 2.0);
    assert_eq!(point.get(&Var::Fw(ProcessKey::new(2, 1))).unwrap(), 2.0);

    let flow = FlowKey::new(ProcessKey::new(1, 1), ProcessKey::new(2, 1));
    assert_eq!(point.get(&Var::Fp(flow)).unwrap(), 0.0);
    assert_eq!(point.get(&Var::Mu2(flow)).unwrap(), 0.0);
    assert_eq!(point.get(&Var::Lambda(ProcessKey::new(2, 1))).unwrap(), 0.0);
}

#[test]
fn leader_residual_equals_freshwater() {
    let system = assemble(&two_companies()).unwrap();
    let mut point = system.initial_assignment();
    point.set(Var::Fw(ProcessKey::new(1, 1)), 7.25);
    point.set(Var::Fw(ProcessKey::new(2, 1)), -1.5);

    for constraint in &system.leader_constraints {
        let ConstraintIndex::Process(key) = constraint.index else {
            panic!("leader constraint indexed by {:?}", constraint.index);
        };
        assert_eq!(
            constraint.body.eval(&point).unwrap(),
            point.get(&Var::Fw(key)).unwrap()
        );
    }
}

#[test]
fn non_candidate_flows_get_no_stationarity() {
    let input = two_companies();
    let index = IndexSets::build(&input.processes).unwrap();
    let params = Parameters::new(input.coefficients, &input.processes, &index).unwrap();
    let generator = StationarityGenerator::new(&index, &params).unwrap();

    let self_loop = FlowKey::new(ProcessKey::new(1, 1), ProcessKey::new(1, 1));
    let unknown = FlowKey::new(ProcessKey::new(1, 1), ProcessKey::new(3, 1));
    assert!(generator.condition(self_loop).unwrap().is_none());
    assert!(generator.condition(unknown).unwrap().is_none());

    let system = assemble(&input).unwrap();
    assert_eq!(system.stationarity.len(), index.flows().len());
    for constraint in &system.stationarity {
        assert_eq!(constraint.family, ConstraintFamily::Stationarity);
        let ConstraintIndex::Flow(flow) = constraint.index else {
            panic!("stationarity indexed by {:?}", constraint.index);
        };
        assert!(index.contains_flow(&flow));
    }
}

/// Company 1 sends 0.5 to company 2, every multiplier at zero.
fn feasible_kkt_point() -> Assignment {
    let system = assemble(&two_companies()).unwrap();
    let mut point = system.initial_assignment();
    let flow = FlowKey::new(ProcessKey::new(1, 1), ProcessKey::new(2, 1));
    point.set(Var::Fp(flow), 0.5);
    point.set(Var::Fw(ProcessKey::new(2, 1)), 2.75);
    point
}

#[test]
fn complementarity_holds_at_feasible_kkt_point() {
    let system = assemble(&two_companies()).unwrap();
    let point = feasible_kkt_point();

    let pairs: Vec<&ComplementarityPair> = system.pairs().collect();
    assert_eq!(pairs.len(), 2 * 2 + 2);
    for pair in pairs {
        assert!(pair.is_satisfied(&point, DEFAULT_TOLERANCE).unwrap());
        assert!(point.get(&pair.multiplier).unwrap() >= 0.0);
    }

    for key in [ProcessKey::new(1, 1), ProcessKey::new(2, 1)] {
        for family in Family::ALL {
            assert_eq!(point.get(&Var::Mu(key, family)).unwrap(), 0.0);
        }
    }

    let report = evaluate(&system, &point, DEFAULT_TOLERANCE).unwrap();
    assert!(report.is_satisfied(), "{report}");
}

#[test]
fn mass_balance_is_exactly_zero_at_feasible_point() {
    let system = assemble(&two_companies()).unwrap();
    let point = feasible_kkt_point();
    for constraint in &system.mass_balances {
        assert_eq!(constraint.body.eval(&point).unwrap(), 0.0, "{constraint}");
    }
}

#[test]
fn violated_complementarity_is_reported() {
    let system = assemble(&two_companies()).unwrap();
    let mut point = feasible_kkt_point();
    // R4 at (1, 1) is 0.5 - 2 = -1.5, slack
    point.set(Var::Mu(ProcessKey::new(1, 1), Family::NetReceipt), 1.0);

    let report = evaluate(&system, &point, DEFAULT_TOLERANCE).unwrap();
    assert!(!report.is_satisfied());
    let row = report.rows_for("comp_4").find(|r| !r.satisfied).unwrap();
    assert_eq!(row.value, -1.5);
}

#[test]
fn objective_is_reproducible_from_assignment() {
    let system = assemble(&two_companies()).unwrap();
    let outcome = solve(
        &system,
        &SolverConfig::new("initial", "", ""),
        &InitialPointSolver,
    )
    .unwrap();
    assert_eq!(outcome.termination_condition, TerminationCondition::NotSolved);
    assert_eq!(outcome.objective_value, 4.0);

    let total: f64 = outcome.assignment.freshwater().map(|(_, v)| v).sum();
    assert_eq!(system.objective_value(&outcome.assignment).unwrap(), total);

    let report = evaluate(&system, &outcome.assignment, DEFAULT_TOLERANCE).unwrap();
    assert_eq!(report.objective_value, outcome.objective_value);
}

#[test]
fn intra_company_flows_couple_sibling_multipliers() {
    let input = ModelInput {
        model_id: 5,
        coefficients: Coefficients {
            alpha: 1.0,
            beta: 1.0,
            delta: 1.0,
        },
        processes: vec![process(1, 1, 10.0, 0.0, 5.0), process(1, 2, 6.0, 1.0, 3.0)],
    };
    let system = assemble(&input).unwrap();
    let flow = FlowKey::new(ProcessKey::new(1, 1), ProcessKey::new(1, 2));
    let condition = system
        .stationarity
        .iter()
        .find(|c| c.index == ConstraintIndex::Flow(flow))
        .unwrap();

    let receiver = ProcessKey::new(1, 2);
    assert_eq!(condition.body.constant_part(), 1.0);
    assert_eq!(condition.body.coefficient(&Var::Mu2(flow)), -1.0);
    assert_eq!(
        condition.body.coefficient(&Var::Mu(flow.from, Family::NetReceipt)),
        1.0
    );
    assert_eq!(
        condition.body.coefficient(&Var::Mu(receiver, Family::NetReceipt)),
        -1.0
    );
    assert_eq!(
        condition
            .body
            .coefficient(&Var::Mu(receiver, Family::ConcentrationLimit)),
        5.0 - 1.0
    );
    assert_eq!(condition.body.coefficient(&Var::Lambda(receiver)), 5.0 - 3.0);
}
