//! Batch driver over (model instance × solver configuration)
//!
//! Every combination is an independent unit of work: it opens its own
//! database handle, assembles the model, solves, evaluates whatever the
//! solver returned, writes the CSV report and stores the results in one
//! transaction. A failing combination is logged and recorded; it never
//! aborts the others.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};

use crate::assembler;
use crate::db;
use crate::evaluate::{self, REPORT_DECIMALS, round_to};
use crate::solver::{self, BackendOptions, SolverConfig};

/// Name of the batch-wide summary table
pub const SUMMARY_FILE: &str = "results_data.csv";

pub struct BatchConfig {
    pub database: PathBuf,
    /// Models to run; empty means every stored model
    pub model_ids: Vec<i64>,
    pub solvers: Vec<SolverConfig>,
    pub backend: BackendOptions,
    /// Worker threads, 0 for one per CPU
    pub threads: usize,
    pub report_dir: PathBuf,
    pub tolerance: f64,
}

/// Outcome of one (model, solver configuration) run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub model_id: i64,
    pub solver: String,
    pub transformation: String,
    pub options: String,
    pub status: String,
    pub objective_value: Option<f64>,
    pub termination_condition: Option<String>,
    pub elapsed_time: Option<f64>,
    pub violations: Option<usize>,
    pub report: Option<String>,
    pub error: Option<String>,
}

impl RunRecord {
    fn new(model_id: i64, config: &SolverConfig) -> Self {
        Self {
            model_id,
            solver: config.solver.clone(),
            transformation: config.transformation.clone(),
            options: config.options.clone(),
            status: "error".to_string(),
            objective_value: None,
            termination_condition: None,
            elapsed_time: None,
            violations: None,
            report: None,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

pub struct BatchSummary {
    pub success: usize,
    pub failure: usize,
    pub summary_path: PathBuf,
    pub runs: Vec<RunRecord>,
}

/// Read solver configurations from a JSON array
pub fn load_solver_configs(path: &Path) -> Result<Vec<SolverConfig>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading solver configurations '{}'", path.display()))?;
    let configs: Vec<SolverConfig> = serde_json::from_str(&text)
        .with_context(|| format!("parsing solver configurations '{}'", path.display()))?;
    if configs.is_empty() {
        return Err(anyhow!("'{}' lists no solver configurations", path.display()));
    }
    Ok(configs)
}

pub fn run_batch(config: &BatchConfig) -> Result<BatchSummary> {
    fs::create_dir_all(&config.report_dir).with_context(|| {
        format!("creating report directory '{}'", config.report_dir.display())
    })?;

    let model_ids = if config.model_ids.is_empty() {
        let conn = db::open(&config.database)
            .with_context(|| format!("opening database '{}'", config.database.display()))?;
        db::list_model_ids(&conn)?
    } else {
        config.model_ids.clone()
    };

    let units: Vec<(i64, &SolverConfig)> = model_ids
        .iter()
        .flat_map(|id| config.solvers.iter().map(move |s| (*id, s)))
        .collect();
    info!(
        models = model_ids.len(),
        configurations = config.solvers.len(),
        runs = units.len(),
        "starting batch"
    );

    let thread_count = if config.threads == 0 {
        num_cpus::get()
    } else {
        config.threads
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .context("building Rayon thread pool for batch runs")?;

    let runs: Vec<RunRecord> = pool.install(|| {
        units
            .par_iter()
            .map(|(model_id, solver)| run_one(config, *model_id, solver))
            .collect()
    });

    let success = runs.iter().filter(|r| r.is_ok()).count();
    let failure = runs.len() - success;

    let summary_path = config.report_dir.join(SUMMARY_FILE);
    write_summary(&summary_path, &runs)?;
    info!(success, failure, summary = %summary_path.display(), "batch finished");

    Ok(BatchSummary {
        success,
        failure,
        summary_path,
        runs,
    })
}

fn run_one(config: &BatchConfig, model_id: i64, solver_config: &SolverConfig) -> RunRecord {
    let mut record = RunRecord::new(model_id, solver_config);

    let runner = |record: &mut RunRecord| -> Result<()> {
        let mut conn = db::open(&config.database)?;
        let input = db::load_model(&conn, model_id)?;
        let system = assembler::assemble(&input)
            .with_context(|| format!("assembling model {model_id}"))?;
        info!(model = %system.name, solver = %solver_config, "solving");

        let backend = solver::backend_for(solver_config, &config.backend)?;
        let outcome = solver::solve(&system, solver_config, backend.as_ref())?;
        record.objective_value = Some(round_to(outcome.objective_value, REPORT_DECIMALS));
        record.termination_condition = Some(outcome.termination_condition.to_string());
        record.elapsed_time = Some(round_to(outcome.elapsed.as_secs_f64(), REPORT_DECIMALS));

        let report = evaluate::evaluate(&system, &outcome.assignment, config.tolerance)?;
        let report_path = config.report_dir.join(evaluate::report_file_name(
            &system.name,
            &solver_config.tag(),
        ));
        report.write_csv(&report_path)?;
        record.violations = Some(report.violations().count());
        record.report = Some(report_path.display().to_string());

        db::save_outcome(&mut conn, model_id, solver_config, &outcome)?;
        info!(
            model = %system.name,
            solver = %solver_config,
            objective = outcome.objective_value,
            termination = %outcome.termination_condition,
            violations = report.violations().count(),
            "run stored"
        );
        Ok(())
    };

    match runner(&mut record) {
        Ok(()) => record.status = "ok".to_string(),
        Err(err) => {
            let message = format!("{err:#}");
            error!(model = model_id, solver = %solver_config, "run failed: {message}");
            if let Err(e) = record_failure(config, model_id, solver_config, &message) {
                error!(model = model_id, solver = %solver_config, "could not record failure: {e:#}");
            }
            record.error = Some(message);
        }
    }
    record
}

fn record_failure(
    config: &BatchConfig,
    model_id: i64,
    solver_config: &SolverConfig,
    message: &str,
) -> Result<()> {
    let conn = db::open(&config.database)?;
    db::save_failure(&conn, model_id, solver_config, message)?;
    Ok(())
}

fn write_summary(path: &Path, runs: &[RunRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("opening summary '{}'", path.display()))?;
    for run in runs {
        writer.serialize(run)?;
    }
    writer.flush()?;
    Ok(())
}
