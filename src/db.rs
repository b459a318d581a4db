//! Database schema and operations

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::error::{ModelError, PersistenceError};
use crate::evaluate::{REPORT_DECIMALS, round_to};
use crate::models::{
    Coefficients, CompanyId, FlowKey, ModelInput, ProcessId, ProcessKey, ProcessRecord,
};
use crate::solver::{SolveOutcome, SolverConfig};

type Result<T> = std::result::Result<T, PersistenceError>;

/// Open (or create) a database and make sure the schema exists
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(30))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Model instances and their global cost coefficients
        CREATE TABLE IF NOT EXISTS model (
            model_id INTEGER PRIMARY KEY NOT NULL,
            alpha REAL NOT NULL,
            beta REAL NOT NULL,
            delta REAL NOT NULL
        );

        -- Processes of each company in a model
        CREATE TABLE IF NOT EXISTS company_process (
            model_id INTEGER NOT NULL,
            company_id INTEGER NOT NULL,
            process_id INTEGER NOT NULL,
            load REAL,
            concentration_in_max REAL,
            concentration_out_max REAL,
            PRIMARY KEY (model_id, company_id, process_id),
            FOREIGN KEY (model_id) REFERENCES model(model_id)
        );

        -- Freshwater supplied to each process by a solver run
        CREATE TABLE IF NOT EXISTS freshwater_result (
            model_id INTEGER NOT NULL,
            company_id INTEGER NOT NULL,
            process_id INTEGER NOT NULL,
            solver TEXT NOT NULL,
            transformation TEXT,
            options TEXT,
            value REAL,
            PRIMARY KEY (model_id, company_id, process_id, solver),
            FOREIGN KEY (model_id) REFERENCES model(model_id)
        );

        -- Water sent between processes by a solver run
        CREATE TABLE IF NOT EXISTS transfer_result (
            model_id INTEGER NOT NULL,
            company_id INTEGER NOT NULL,
            process_id INTEGER NOT NULL,
            model_id2 INTEGER NOT NULL,
            company_id2 INTEGER NOT NULL,
            process_id2 INTEGER NOT NULL,
            solver TEXT NOT NULL,
            transformation TEXT NOT NULL,
            options TEXT NOT NULL,
            value REAL,
            PRIMARY KEY (model_id, company_id, process_id, company_id2, process_id2,
                         solver, transformation, options),
            FOREIGN KEY (model_id, company_id, process_id)
                REFERENCES company_process(model_id, company_id, process_id),
            FOREIGN KEY (model_id2, company_id2, process_id2)
                REFERENCES company_process(model_id, company_id, process_id),
            CHECK (model_id = model_id2)
        );

        -- One row per (model, solver configuration) run
        CREATE TABLE IF NOT EXISTS run_info (
            model_id INTEGER NOT NULL,
            solver TEXT NOT NULL,
            transformation TEXT NOT NULL,
            options TEXT NOT NULL,
            objective_value REAL,
            termination_condition TEXT,
            solver_status TEXT,
            elapsed_time REAL,
            message TEXT,
            PRIMARY KEY (model_id, solver, transformation, options),
            FOREIGN KEY (model_id) REFERENCES model(model_id)
        );

        CREATE INDEX IF NOT EXISTS idx_company_process_model ON company_process(model_id);
        "#,
    )?;
    Ok(())
}

/// Insert or replace a model and all of its processes.
///
/// Results stored for an earlier version of the model are removed.
pub fn upsert_model(conn: &mut Connection, input: &ModelInput) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for table in ["run_info", "transfer_result", "freshwater_result", "company_process"] {
        tx.execute(
            &format!("DELETE FROM {table} WHERE model_id = ?1"),
            [input.model_id],
        )?;
    }
    tx.execute(
        "INSERT INTO model (model_id, alpha, beta, delta) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(model_id) DO UPDATE SET
            alpha = excluded.alpha, beta = excluded.beta, delta = excluded.delta",
        params![
            input.model_id,
            input.coefficients.alpha,
            input.coefficients.beta,
            input.coefficients.delta
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO company_process
             (model_id, company_id, process_id, load, concentration_in_max, concentration_out_max)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for p in &input.processes {
            stmt.execute(params![
                input.model_id,
                p.company.0,
                p.process.0,
                p.load,
                p.concentration_in_max,
                p.concentration_out_max
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Remove every model and result (for re-import)
pub fn clear_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM run_info;
        DELETE FROM transfer_result;
        DELETE FROM freshwater_result;
        DELETE FROM company_process;
        DELETE FROM model;
        "#,
    )?;
    Ok(())
}

/// All model ids in ascending order
pub fn list_model_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT model_id FROM model ORDER BY model_id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Load the input data of one model instance
pub fn load_model(conn: &Connection, model_id: i64) -> Result<ModelInput> {
    let coefficients = conn
        .query_row(
            "SELECT alpha, beta, delta FROM model WHERE model_id = ?1",
            [model_id],
            |row| {
                Ok(Coefficients {
                    alpha: row.get(0)?,
                    beta: row.get(1)?,
                    delta: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(PersistenceError::MissingModel(model_id))?;

    let mut stmt = conn.prepare(
        "SELECT company_id, process_id, load, concentration_in_max, concentration_out_max
         FROM company_process
         WHERE model_id = ?1
         ORDER BY company_id, process_id",
    )?;
    let rows = stmt.query_map([model_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, Option<f64>>(4)?,
        ))
    })?;

    let mut processes = Vec::new();
    for row in rows {
        let (company, process, load, cin, cout) = row?;
        let (Some(load), Some(cin), Some(cout)) = (load, cin, cout) else {
            return Err(PersistenceError::Model {
                model_id,
                source: ModelError::MalformedInput(format!(
                    "process ({company}, {process}) has a missing coefficient"
                )),
            });
        };
        processes.push(ProcessRecord {
            company: CompanyId(company),
            process: ProcessId(process),
            load,
            concentration_in_max: cin,
            concentration_out_max: cout,
        });
    }

    Ok(ModelInput {
        model_id,
        coefficients,
        processes,
    })
}

/// Stored summary of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub model_id: i64,
    pub config: SolverConfig,
    pub objective_value: Option<f64>,
    pub termination_condition: String,
    pub solver_status: String,
    pub elapsed_time: Option<f64>,
    pub message: Option<String>,
}

fn insert_run_info(conn: &Connection, info: &RunInfo) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO run_info
         (model_id, solver, transformation, options, objective_value,
          termination_condition, solver_status, elapsed_time, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            info.model_id,
            info.config.solver,
            info.config.transformation,
            info.config.options,
            info.objective_value,
            info.termination_condition,
            info.solver_status,
            info.elapsed_time,
            info.message
        ],
    )?;
    Ok(())
}

/// Store every flow value and the run summary of a solve, atomically
pub fn save_outcome(
    conn: &mut Connection,
    model_id: i64,
    config: &SolverConfig,
    outcome: &SolveOutcome,
) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    {
        let mut fw = tx.prepare(
            "INSERT OR REPLACE INTO freshwater_result
             (model_id, company_id, process_id, solver, transformation, options, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (key, value) in outcome.assignment.freshwater() {
            fw.execute(params![
                model_id,
                key.company.0,
                key.process.0,
                config.solver,
                config.transformation,
                config.options,
                round_to(value, REPORT_DECIMALS)
            ])?;
        }

        let mut fp = tx.prepare(
            "INSERT OR REPLACE INTO transfer_result
             (model_id, company_id, process_id, model_id2, company_id2, process_id2,
              solver, transformation, options, value)
             VALUES (?1, ?2, ?3, ?1, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for (flow, value) in outcome.assignment.transfers() {
            fp.execute(params![
                model_id,
                flow.from.company.0,
                flow.from.process.0,
                flow.to.company.0,
                flow.to.process.0,
                config.solver,
                config.transformation,
                config.options,
                round_to(value, REPORT_DECIMALS)
            ])?;
        }
    }
    insert_run_info(
        &tx,
        &RunInfo {
            model_id,
            config: config.clone(),
            objective_value: Some(round_to(outcome.objective_value, REPORT_DECIMALS)),
            termination_condition: outcome.termination_condition.to_string(),
            solver_status: outcome.solver_status.to_string(),
            elapsed_time: Some(round_to(outcome.elapsed.as_secs_f64(), REPORT_DECIMALS)),
            message: None,
        },
    )?;
    tx.commit()?;
    Ok(())
}

/// Record a run that produced no solution
pub fn save_failure(
    conn: &Connection,
    model_id: i64,
    config: &SolverConfig,
    message: &str,
) -> Result<()> {
    insert_run_info(
        conn,
        &RunInfo {
            model_id,
            config: config.clone(),
            objective_value: None,
            termination_condition: "error".to_string(),
            solver_status: "error".to_string(),
            elapsed_time: None,
            message: Some(message.to_string()),
        },
    )
}

/// Freshwater values stored for a model and solver
pub fn load_freshwater(
    conn: &Connection,
    model_id: i64,
    solver: &str,
) -> Result<Vec<(ProcessKey, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT company_id, process_id, value FROM freshwater_result
         WHERE model_id = ?1 AND solver = ?2
         ORDER BY company_id, process_id",
    )?;
    let rows = stmt.query_map(params![model_id, solver], |row| {
        Ok((
            ProcessKey::new(row.get(0)?, row.get(1)?),
            row.get::<_, f64>(2)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Transfer values stored for a model and solver configuration
pub fn load_transfers(
    conn: &Connection,
    model_id: i64,
    config: &SolverConfig,
) -> Result<Vec<(FlowKey, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT company_id, process_id, company_id2, process_id2, value FROM transfer_result
         WHERE model_id = ?1 AND solver = ?2 AND transformation = ?3 AND options = ?4
         ORDER BY company_id, process_id, company_id2, process_id2",
    )?;
    let rows = stmt.query_map(
        params![model_id, config.solver, config.transformation, config.options],
        |row| {
            Ok((
                FlowKey::new(
                    ProcessKey::new(row.get(0)?, row.get(1)?),
                    ProcessKey::new(row.get(2)?, row.get(3)?),
                ),
                row.get::<_, f64>(4)?,
            ))
        },
    )?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// All run summaries of a model
pub fn load_run_info(conn: &Connection, model_id: i64) -> Result<Vec<RunInfo>> {
    let mut stmt = conn.prepare(
        "SELECT solver, transformation, options, objective_value, termination_condition,
                solver_status, elapsed_time, message
         FROM run_info WHERE model_id = ?1
         ORDER BY solver, transformation, options",
    )?;
    let rows = stmt.query_map([model_id], |row| {
        Ok(RunInfo {
            model_id,
            config: SolverConfig {
                solver: row.get(0)?,
                transformation: row.get(1)?,
                options: row.get(2)?,
            },
            objective_value: row.get(3)?,
            termination_condition: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            solver_status: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            elapsed_time: row.get(6)?,
            message: row.get(7)?,
        })
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}
