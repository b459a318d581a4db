//! Error types for formulation, solving and storage

use std::time::Duration;

use thiserror::Error;

use crate::models::{FlowKey, ProcessKey};
use crate::variables::Var;

/// Errors raised while building or evaluating a model instance.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Input data is missing, duplicated or unusable.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A component referenced a process pair the index sets do not contain.
    #[error("dangling reference to process {0}")]
    DanglingProcess(ProcessKey),

    /// A component referenced a flow candidate the index sets do not contain.
    #[error("dangling reference to flow {0}")]
    DanglingFlow(FlowKey),

    /// A variable appears in the system but was never declared.
    #[error("undeclared variable {0}")]
    UndeclaredVariable(Var),

    /// A gradient could not be formed.
    #[error("cannot differentiate with respect to {wrt}: {reason}")]
    Differentiation { wrt: Var, reason: String },

    /// The assignment lacks a value for a variable the system uses.
    #[error("no value assigned to {0}")]
    MissingValue(Var),
}

impl ModelError {
    /// True for the assembly (dangling reference) class of errors.
    pub fn is_assembly(&self) -> bool {
        matches!(
            self,
            ModelError::DanglingProcess(_)
                | ModelError::DanglingFlow(_)
                | ModelError::UndeclaredVariable(_)
        )
    }
}

/// Failures of the external solving step. Infeasible or unbounded terminations
/// are not errors; they come back as a termination condition on the outcome.
#[derive(Debug, Error)]
pub enum SolverFailure {
    #[error("unknown solver: {0}")]
    UnknownSolver(String),

    #[error("failed to start solver process {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("solver protocol error: {0}")]
    Protocol(String),

    #[error("solver did not terminate within {0:?}")]
    Timeout(Duration),

    #[error("solver exited with status {code:?}: {message}")]
    Failed { code: Option<i32>, message: String },
}

impl From<serde_json::Error> for SolverFailure {
    fn from(err: serde_json::Error) -> Self {
        SolverFailure::Protocol(err.to_string())
    }
}

/// Storage failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("model {0} not found")]
    MissingModel(i64),

    #[error("model {model_id}: {source}")]
    Model {
        model_id: i64,
        #[source]
        source: ModelError,
    },
}
