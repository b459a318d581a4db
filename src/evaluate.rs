//! Post-solve evaluation of constraint residuals and complementarity products

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::assembler::MpecSystem;
use crate::constraints::Constraint;
use crate::error::ModelError;
use crate::variables::Assignment;

/// Band within which a relation or a complementarity product counts as met
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Decimal places kept in reports and stored results
pub const REPORT_DECIMALS: i32 = 3;

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub constraint: String,
    pub index: String,
    pub value: f64,
    pub satisfied: bool,
}

#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub model_id: i64,
    pub objective_value: f64,
    pub tolerance: f64,
    pub rows: Vec<ReportRow>,
}

impl EvaluationReport {
    pub fn violations(&self) -> impl Iterator<Item = &ReportRow> {
        self.rows.iter().filter(|r| !r.satisfied)
    }

    pub fn is_satisfied(&self) -> bool {
        self.rows.iter().all(|r| r.satisfied)
    }

    /// Rows of one family label ("R1", "comp_2", ...)
    pub fn rows_for<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a ReportRow> + 'a {
        self.rows.iter().filter(move |r| r.constraint == label)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating report directory {}", parent.display()))?;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("opening report {}", path.display()))?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let violations = self.violations().count();
        writeln!(
            f,
            "Objective {:.3}, {} rows, {} violated (tolerance {:e})",
            self.objective_value,
            self.rows.len(),
            violations,
            self.tolerance
        )?;
        for row in self.violations() {
            writeln!(f, "  {}{} = {}", row.constraint, row.index, row.value)?;
        }
        Ok(())
    }
}

/// Report file name for one (model, solver configuration) run
pub fn report_file_name(model_name: &str, run_tag: &str) -> String {
    format!("data_{model_name}_solver_{run_tag}.csv")
}

fn residual_row(
    constraint: &Constraint,
    point: &Assignment,
    tolerance: f64,
) -> Result<ReportRow, ModelError> {
    let value = constraint.body.eval(point)?;
    Ok(ReportRow {
        constraint: constraint.family.label().to_string(),
        index: constraint.index.to_string(),
        value: round_to(value, REPORT_DECIMALS),
        satisfied: constraint.relation().holds(value, tolerance),
    })
}

/// Recompute every residual and complementarity product at `point`.
///
/// Runs on any point, feasible or not; violated rows are flagged, not
/// reported as errors.
pub fn evaluate(
    system: &MpecSystem,
    point: &Assignment,
    tolerance: f64,
) -> Result<EvaluationReport, ModelError> {
    let mut rows = Vec::new();

    let families = [
        &system.leader_constraints,
        &system.concentration_limits,
        &system.flow_nonnegativity,
        &system.mass_balances,
        &system.net_receipts,
        &system.stationarity,
    ];
    for family in families {
        for constraint in family {
            rows.push(residual_row(constraint, point, tolerance)?);
        }
    }

    for pair in system.pairs() {
        let product = pair.product(point)?;
        rows.push(ReportRow {
            constraint: pair.label().to_string(),
            index: pair.index().to_string(),
            value: round_to(product, REPORT_DECIMALS),
            satisfied: product.abs() <= tolerance,
        });
    }

    for constraint in &system.multiplier_signs {
        rows.push(residual_row(constraint, point, tolerance)?);
    }

    Ok(EvaluationReport {
        model_id: system.model_id,
        objective_value: system.objective_value(point)?,
        tolerance,
        rows,
    })
}
