//! Bilevel water-reuse allocation for eco-industrial parks.
//!
//! A park authority (leader) minimises total freshwater intake while every
//! company (follower) minimises its own cost. Each follower problem is
//! replaced by its KKT conditions, which turns the bilevel program into a
//! single-level MPEC that [`assembler::assemble`] builds from a
//! [`models::ModelInput`].

pub mod assembler;
pub mod batch;
pub mod complementarity;
pub mod constraints;
pub mod db;
pub mod error;
pub mod evaluate;
pub mod expr;
pub mod import;
pub mod index;
pub mod models;
pub mod params;
pub mod solver;
pub mod stationarity;
pub mod variables;

pub use assembler::{MpecSystem, assemble};
pub use error::{ModelError, PersistenceError, SolverFailure};
pub use evaluate::{EvaluationReport, evaluate};
pub use models::{Coefficients, CompanyId, FlowKey, ModelInput, ProcessId, ProcessKey, ProcessRecord};
pub use solver::{SolveOutcome, SolverConfig, solve};
pub use variables::{Assignment, Var};
