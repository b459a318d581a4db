//! Affine expressions over decision variables
//!
//! Every residual, objective and stationarity condition in the model is
//! affine in the variables, so an expression is a sparse coefficient map
//! plus a constant. Differentiation is a coefficient lookup and is exact.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::variables::{Assignment, Var};

/// Relational operator of a constraint `body <op> 0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    /// body <= 0
    Le,
    /// body >= 0
    Ge,
    /// body == 0
    Eq,
}

impl Relation {
    /// Whether `value <op> 0` holds within `tolerance`
    pub fn holds(self, value: f64, tolerance: f64) -> bool {
        match self {
            Relation::Le => value <= tolerance,
            Relation::Ge => value >= -tolerance,
            Relation::Eq => value.abs() <= tolerance,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Le => "<=",
            Relation::Ge => ">=",
            Relation::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExprRepr", into = "ExprRepr")]
pub struct Expr {
    terms: BTreeMap<Var, f64>,
    constant: f64,
}

#[derive(Serialize, Deserialize)]
struct ExprRepr {
    terms: Vec<(Var, f64)>,
    constant: f64,
}

impl From<ExprRepr> for Expr {
    fn from(repr: ExprRepr) -> Self {
        let mut expr = Expr::constant(repr.constant);
        for (var, coeff) in repr.terms {
            expr.add_term(var, coeff);
        }
        expr
    }
}

impl From<Expr> for ExprRepr {
    fn from(expr: Expr) -> Self {
        ExprRepr {
            terms: expr.terms.into_iter().collect(),
            constant: expr.constant,
        }
    }
}

impl Expr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    /// `coeff * var`
    pub fn term(var: Var, coeff: f64) -> Self {
        let mut expr = Self::zero();
        expr.add_term(var, coeff);
        expr
    }

    /// Accumulate `coeff * var`. Terms that cancel to zero are dropped.
    pub fn add_term(&mut self, var: Var, coeff: f64) {
        let entry = self.terms.entry(var).or_insert(0.0);
        *entry += coeff;
        if *entry == 0.0 {
            self.terms.remove(&var);
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// `self += factor * other`
    pub fn add_scaled(&mut self, other: &Expr, factor: f64) {
        for (var, coeff) in &other.terms {
            self.add_term(*var, factor * coeff);
        }
        self.constant += factor * other.constant;
    }

    pub fn scaled(&self, factor: f64) -> Expr {
        let mut out = Expr::zero();
        out.add_scaled(self, factor);
        out
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    /// Coefficient of `var`, zero when it does not appear
    pub fn coefficient(&self, var: &Var) -> f64 {
        self.terms.get(var).copied().unwrap_or(0.0)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Var> {
        self.terms.keys()
    }

    /// Exact partial derivative with respect to a primal variable.
    pub fn derivative(&self, wrt: &Var) -> Result<f64, ModelError> {
        if !wrt.is_primal() {
            return Err(ModelError::Differentiation {
                wrt: *wrt,
                reason: "only flow variables are differentiated against".to_string(),
            });
        }
        let coeff = self.coefficient(wrt);
        if !coeff.is_finite() {
            return Err(ModelError::Differentiation {
                wrt: *wrt,
                reason: format!("coefficient {coeff} is not finite"),
            });
        }
        Ok(coeff)
    }

    pub fn eval(&self, assignment: &Assignment) -> Result<f64, ModelError> {
        let mut total = self.constant;
        for (var, coeff) in &self.terms {
            total += coeff * assignment.get(var)?;
        }
        Ok(total)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (var, coeff) in &self.terms {
            let sign = if *coeff < 0.0 { "-" } else { "+" };
            let magnitude = coeff.abs();
            if first {
                if *coeff < 0.0 {
                    write!(f, "-")?;
                }
            } else {
                write!(f, " {sign} ")?;
            }
            if magnitude == 1.0 {
                write!(f, "{var}")?;
            } else {
                write!(f, "{magnitude}*{var}")?;
            }
            first = false;
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant > 0.0 {
            write!(f, " + {}", self.constant)
        } else if self.constant < 0.0 {
            write!(f, " - {}", -self.constant)
        } else {
            Ok(())
        }
    }
}
