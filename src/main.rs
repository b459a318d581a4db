//! EIP MPEC
//!
//! Formulates, solves and stores bilevel water-reuse models of
//! eco-industrial parks.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing_subscriber::EnvFilter;

use eip_mpec::batch::{self, BatchConfig};
use eip_mpec::evaluate::{self, DEFAULT_TOLERANCE};
use eip_mpec::models::{Coefficients, CompanyId, ModelInput, ProcessId, ProcessRecord};
use eip_mpec::solver::{BackendOptions, SolverConfig};
use eip_mpec::{assembler, db, import};

#[derive(Parser)]
#[command(name = "eip-mpec")]
#[command(about = "Bilevel water-reuse allocation for eco-industrial parks")]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, default_value = "eip_data.db", global = true)]
    database: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize empty database with schema
    Init,

    /// Import model instances from *.eip files
    Import {
        /// Directory searched recursively for model files
        dir: PathBuf,

        /// Clear existing models and results before importing
        #[arg(long)]
        clear: bool,
    },

    /// Load a small sample park for testing
    LoadSample,

    /// List stored model ids
    ListModels,

    /// Build the MPEC system of a model and print it
    Formulate {
        model_id: i64,

        /// Write the system as JSON instead of printing it
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Solve models with every solver configuration and store the results
    Run {
        /// Model ids to run (default: all stored models)
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<i64>,

        /// JSON file with solver configurations
        #[arg(long)]
        solvers: Option<PathBuf>,

        /// Worker threads (0 = one per CPU)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Per-run solver timeout in seconds
        #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,

        /// Solver executable used instead of the PATH lookup
        #[arg(long)]
        solver_command: Option<PathBuf>,

        /// Directory for evaluation reports
        #[arg(long, default_value = "data_csv")]
        report_dir: PathBuf,

        /// Tolerance for residuals and complementarity products
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
    },

    /// Show stored run summaries and freshwater results of a model
    Results { model_id: i64 },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut conn = db::open(&cli.database)
        .with_context(|| format!("opening database {}", cli.database.display()))?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized at: {}", cli.database.display());
        }

        Commands::Import { dir, clear } => {
            if clear {
                println!("Clearing existing data...");
                db::clear_all(&conn)?;
            }

            let stats = import::import_to_database(&mut conn, &dir)?;
            println!("{}", stats);
        }

        Commands::LoadSample => {
            load_sample_data(&mut conn)?;
            println!("Sample data loaded successfully!");
        }

        Commands::ListModels => {
            let ids = db::list_model_ids(&conn)?;
            if ids.is_empty() {
                println!("No models in database. Run 'import' or 'load-sample' first.");
            } else {
                println!("{:<10} {:>10} {:>10}", "Model", "Companies", "Processes");
                println!("{}", "-".repeat(32));
                for id in ids {
                    let input = db::load_model(&conn, id)?;
                    let mut companies: Vec<_> = input.processes.iter().map(|p| p.company).collect();
                    companies.sort();
                    companies.dedup();
                    println!(
                        "{:<10} {:>10} {:>10}",
                        input.name(),
                        companies.len(),
                        input.processes.len()
                    );
                }
            }
        }

        Commands::Formulate { model_id, json } => {
            let input = db::load_model(&conn, model_id)?;
            let system = assembler::assemble(&input)
                .with_context(|| format!("assembling model {model_id}"))?;
            match json {
                Some(path) => {
                    let text = serde_json::to_string_pretty(&system)?;
                    fs::write(&path, text)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("{} written to {}", system.name, path.display());
                }
                None => {
                    println!("Coefficients: {:?}", input.coefficients);
                    println!("{:<10} {:>10} {:>10} {:>10}", "Process", "Load", "Cin max", "Cout max");
                    for p in &input.processes {
                        println!(
                            "{:<10} {:>10} {:>10} {:>10}",
                            p.key().to_string(),
                            p.load,
                            p.concentration_in_max,
                            p.concentration_out_max
                        );
                    }
                    println!();
                    println!("{}", system);
                    let report = evaluate::evaluate(
                        &system,
                        &system.initial_assignment(),
                        DEFAULT_TOLERANCE,
                    )?;
                    println!("At the initial point: {}", report);
                }
            }
        }

        Commands::Run {
            models,
            solvers,
            threads,
            timeout,
            solver_command,
            report_dir,
            tolerance,
        } => {
            let solvers = match solvers {
                Some(path) => batch::load_solver_configs(&path)?,
                None => SolverConfig::defaults(),
            };
            drop(conn);

            let summary = batch::run_batch(&BatchConfig {
                database: cli.database.clone(),
                model_ids: models,
                solvers,
                backend: BackendOptions {
                    solver_command,
                    timeout: Duration::from_secs(timeout),
                },
                threads,
                report_dir,
                tolerance,
            })?;

            println!(
                "{:<8} {:<12} {:<22} {:>10} {:<16} {:>8}",
                "Model", "Solver", "Transformation", "Objective", "Termination", "Time (s)"
            );
            println!("{}", "-".repeat(81));
            for run in &summary.runs {
                let objective = run
                    .objective_value
                    .map(|v| format!("{v:.3}"))
                    .unwrap_or_else(|| "-".to_string());
                let elapsed = run
                    .elapsed_time
                    .map(|v| format!("{v:.3}"))
                    .unwrap_or_else(|| "-".to_string());
                let termination = run.termination_condition.as_deref().unwrap_or("error");
                println!(
                    "{:<8} {:<12} {:<22} {:>10} {:<16} {:>8}",
                    run.model_id, run.solver, run.transformation, objective, termination, elapsed
                );
            }
            println!(
                "\n{} succeeded, {} failed. Summary: {}",
                summary.success,
                summary.failure,
                summary.summary_path.display()
            );
        }

        Commands::Results { model_id } => {
            let runs = db::load_run_info(&conn, model_id)?;
            if runs.is_empty() {
                println!("No results for model {model_id}. Run 'run' first.");
            }
            for run in runs {
                let objective = run
                    .objective_value
                    .map(|v| format!("{v:.3}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}: objective {}, {} / {}",
                    run.config, objective, run.termination_condition, run.solver_status
                );
                if let Some(message) = &run.message {
                    println!("  {}", message);
                }
                for (key, value) in db::load_freshwater(&conn, model_id, &run.config.solver)? {
                    println!("  Fw{} = {}", key, value);
                }
                for (flow, value) in db::load_transfers(&conn, model_id, &run.config)? {
                    if value != 0.0 {
                        println!("  Fp{} = {}", flow, value);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Load a sample park: two companies, three processes
fn load_sample_data(conn: &mut Connection) -> Result<()> {
    let process = |company, process, load, cin, cout| ProcessRecord {
        company: CompanyId(company),
        process: ProcessId(process),
        load,
        concentration_in_max: cin,
        concentration_out_max: cout,
    };

    let sample = ModelInput {
        model_id: 1,
        coefficients: Coefficients {
            alpha: 1.0,
            beta: 0.5,
            delta: 0.2,
        },
        processes: vec![
            process(1, 1, 2.0, 0.0, 100.0),
            process(1, 2, 5.0, 50.0, 100.0),
            process(2, 1, 30.0, 50.0, 800.0),
        ],
    };
    assembler::assemble(&sample).context("sample model does not assemble")?;
    db::upsert_model(conn, &sample)?;

    println!("Loaded sample model {}", sample.name());
    Ok(())
}
