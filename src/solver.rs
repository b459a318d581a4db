//! Solve interface
//!
//! The core only hands a solver the assembled system plus an initial point
//! and reads back a variable assignment. Backends:
//!
//! - [`ExternalSolver`] runs a solver executable, writes a JSON request to
//!   its stdin and reads a JSON response from its stdout, with a timeout.
//! - [`InitialPointSolver`] returns the initialisation point unchanged, for
//!   diagnosing a formulation without a numerical solver installed.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assembler::MpecSystem;
use crate::error::SolverFailure;
use crate::variables::Assignment;

/// Name of the built-in initial-point backend
pub const INITIAL_POINT: &str = "initial";

/// Prefix of external solver executables looked up on `PATH`
pub const SOLVER_BINARY_PREFIX: &str = "eip-solver-";

/// Per-run limit for external solvers; a zero timeout means this
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// One solver configuration of a batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SolverConfig {
    pub solver: String,
    #[serde(default)]
    pub transformation: String,
    #[serde(default)]
    pub options: String,
}

impl SolverConfig {
    pub fn new(solver: &str, transformation: &str, options: &str) -> Self {
        Self {
            solver: solver.to_string(),
            transformation: transformation.to_string(),
            options: options.to_string(),
        }
    }

    /// The configurations run when none are given
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("mpec_nlp", "", ""),
            Self::new("ipopt", "mpec.standard_form", ""),
            Self::new("mpec_minlp", "", ""),
        ]
    }

    /// `<solver>_<transformation>[_<options>]`, used in report names.
    ///
    /// Characters of the options that are unsafe in a file name become `_`.
    pub fn tag(&self) -> String {
        let mut tag = format!("{}_{}", self.solver, self.transformation);
        if !self.options.is_empty() {
            tag.push('_');
            tag.extend(self.options.chars().map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '=') {
                    c
                } else {
                    '_'
                }
            }));
        }
        tag
    }
}

impl fmt::Display for SolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.solver)?;
        if !self.transformation.is_empty() {
            write!(f, " [{}]", self.transformation)?;
        }
        if !self.options.is_empty() {
            write!(f, " ({})", self.options)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminationCondition {
    Optimal,
    LocallyOptimal,
    Feasible,
    Infeasible,
    Unbounded,
    MaxIterations,
    MaxTimeLimit,
    NotSolved,
    Error,
    #[serde(other)]
    Unknown,
}

impl TerminationCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationCondition::Optimal => "optimal",
            TerminationCondition::LocallyOptimal => "locallyOptimal",
            TerminationCondition::Feasible => "feasible",
            TerminationCondition::Infeasible => "infeasible",
            TerminationCondition::Unbounded => "unbounded",
            TerminationCondition::MaxIterations => "maxIterations",
            TerminationCondition::MaxTimeLimit => "maxTimeLimit",
            TerminationCondition::NotSolved => "notSolved",
            TerminationCondition::Error => "error",
            TerminationCondition::Unknown => "unknown",
        }
    }

    pub fn is_optimal(self) -> bool {
        matches!(
            self,
            TerminationCondition::Optimal | TerminationCondition::LocallyOptimal
        )
    }
}

impl fmt::Display for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverStatus {
    Ok,
    Warning,
    Error,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl SolverStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SolverStatus::Ok => "ok",
            SolverStatus::Warning => "warning",
            SolverStatus::Error => "error",
            SolverStatus::Aborted => "aborted",
            SolverStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a backend receives
#[derive(Debug, Serialize)]
pub struct SolveRequest<'a> {
    pub solver: &'a str,
    pub transformation: &'a str,
    pub options: &'a str,
    pub system: &'a MpecSystem,
    pub initial: &'a Assignment,
}

/// What a backend returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverResponse {
    pub termination_condition: TerminationCondition,
    pub solver_status: SolverStatus,
    /// Seconds reported by the solver, if any
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    pub values: Assignment,
}

pub trait Solver: Send + Sync {
    fn name(&self) -> &str;

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverResponse, SolverFailure>;
}

/// Result of one solve, with the solver's values merged over the initial point
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub objective_value: f64,
    pub termination_condition: TerminationCondition,
    pub solver_status: SolverStatus,
    pub elapsed: Duration,
    pub assignment: Assignment,
}

/// Run `backend` on `system`.
///
/// The objective is recomputed from the returned assignment, so it is
/// reproducible without invoking the solver again.
pub fn solve(
    system: &MpecSystem,
    config: &SolverConfig,
    backend: &dyn Solver,
) -> Result<SolveOutcome, SolverFailure> {
    let initial = system.initial_assignment();
    let request = SolveRequest {
        solver: &config.solver,
        transformation: &config.transformation,
        options: &config.options,
        system,
        initial: &initial,
    };

    let started = Instant::now();
    let response = backend.solve(&request)?;
    let measured = started.elapsed();

    if let Some((var, _)) = response
        .values
        .iter()
        .find(|(var, _)| !system.variables.contains(var))
    {
        return Err(SolverFailure::Protocol(format!(
            "solver returned a value for undeclared variable {var}"
        )));
    }

    let mut assignment = initial;
    assignment.merge(&response.values);
    let objective_value = system
        .objective_value(&assignment)
        .map_err(|e| SolverFailure::Protocol(e.to_string()))?;

    let elapsed = response
        .elapsed_time
        .and_then(|t| Duration::try_from_secs_f64(t).ok())
        .unwrap_or(measured);

    if !response.termination_condition.is_optimal() {
        warn!(
            model = %system.name,
            solver = %config,
            termination = %response.termination_condition,
            "solver did not report an optimal point"
        );
    }

    Ok(SolveOutcome {
        objective_value,
        termination_condition: response.termination_condition,
        solver_status: response.solver_status,
        elapsed,
        assignment,
    })
}

/// Returns the initialisation point as the solution
#[derive(Debug, Default)]
pub struct InitialPointSolver;

impl Solver for InitialPointSolver {
    fn name(&self) -> &str {
        INITIAL_POINT
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverResponse, SolverFailure> {
        Ok(SolverResponse {
            termination_condition: TerminationCondition::NotSolved,
            solver_status: SolverStatus::Ok,
            elapsed_time: Some(0.0),
            values: request.initial.clone(),
        })
    }
}

/// A solver executable speaking JSON over stdin/stdout
#[derive(Debug, Clone)]
pub struct ExternalSolver {
    name: String,
    command: PathBuf,
    timeout: Duration,
}

impl ExternalSolver {
    pub fn new(name: &str, command: PathBuf, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            command,
            timeout: if timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                timeout
            },
        }
    }

    /// Look up `eip-solver-<name>` on `PATH`
    pub fn find(name: &str, timeout: Duration) -> Result<Self, SolverFailure> {
        let binary = format!("{SOLVER_BINARY_PREFIX}{name}");
        let command =
            which::which(&binary).map_err(|_| SolverFailure::UnknownSolver(name.to_string()))?;
        Ok(Self::new(name, command, timeout))
    }
}

impl Solver for ExternalSolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn solve(&self, request: &SolveRequest<'_>) -> Result<SolverResponse, SolverFailure> {
        let payload = serde_json::to_vec(request)?;

        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SolverFailure::Spawn {
                command: self.command.display().to_string(),
                source,
            })?;
        debug!(command = %self.command.display(), bytes = payload.len(), "spawned solver");

        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SolverFailure::Protocol("solver pipes unavailable".to_string()));
        };

        // Pipes are drained on their own threads so a large request or
        // response cannot block the child.
        let writer = thread::spawn(move || stdin.write_all(&payload));
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });
        let err_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).map(|_| buf)
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                // Killing closes the pipes, which ends the reader threads.
                let _ = child.kill();
                let _ = child.wait();
                return Err(SolverFailure::Timeout(self.timeout));
            }
            thread::sleep(Duration::from_millis(20));
        };

        let join_failed = |_| SolverFailure::Protocol("solver pipe thread panicked".to_string());
        // A solver may exit without reading its whole input; that surfaces
        // through the exit status instead.
        let _ = writer.join().map_err(join_failed)?;
        let output = reader.join().map_err(join_failed)??;
        let errors = err_reader.join().map_err(join_failed)??;

        if !status.success() {
            return Err(SolverFailure::Failed {
                code: status.code(),
                message: String::from_utf8_lossy(&errors).trim().to_string(),
            });
        }
        if output.is_empty() {
            return Err(SolverFailure::Protocol("empty response from solver".to_string()));
        }
        Ok(serde_json::from_slice(&output)?)
    }
}

/// Backend selection for a batch run
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Overrides the `PATH` lookup for every external solver
    pub solver_command: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            solver_command: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Pick the backend that runs `config`
pub fn backend_for(
    config: &SolverConfig,
    options: &BackendOptions,
) -> Result<Box<dyn Solver>, SolverFailure> {
    if config.solver == INITIAL_POINT {
        return Ok(Box::new(InitialPointSolver));
    }
    let backend = match &options.solver_command {
        Some(command) => ExternalSolver::new(&config.solver, command.clone(), options.timeout),
        None => ExternalSolver::find(&config.solver, options.timeout)?,
    };
    Ok(Box::new(backend))
}
