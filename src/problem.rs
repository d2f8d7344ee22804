//! Binary quadratic program for cardinality-constrained mean-variance selection.

use ndarray::{Array1, Array2};
use std::fmt;
use tracing::info;

use crate::error::{PortfolioError, Result};
use crate::statistics::ReturnStatistics;

const FEASIBILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSense {
    Eq,
    Le,
    Ge,
}

impl fmt::Display for ConstraintSense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConstraintSense::Eq => "==",
            ConstraintSense::Le => "<=",
            ConstraintSense::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// `coefficients · x  (sense)  rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub coefficients: Array1<f64>,
    pub sense: ConstraintSense,
    pub rhs: f64,
}

impl LinearConstraint {
    /// Left-hand side at `x`.
    pub fn lhs(&self, x: &[u8]) -> f64 {
        self.coefficients
            .iter()
            .zip(x)
            .map(|(c, &bit)| c * f64::from(bit))
            .sum()
    }

    pub fn is_satisfied(&self, x: &[u8]) -> bool {
        let lhs = self.lhs(x);
        match self.sense {
            ConstraintSense::Eq => (lhs - self.rhs).abs() <= FEASIBILITY_TOLERANCE,
            ConstraintSense::Le => lhs <= self.rhs + FEASIBILITY_TOLERANCE,
            ConstraintSense::Ge => lhs >= self.rhs - FEASIBILITY_TOLERANCE,
        }
    }
}

/// Minimize `constant + linear·x + xᵀ·quadratic·x` over binary `x`.
///
/// The quadratic matrix is used as given (every `Q[i][j]` contributes
/// `Q[i][j]·x_i·x_j`), so a symmetric covariance counts each off-diagonal
/// pair twice, exactly like `xᵀΣx`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticProgram {
    name: String,
    variables: Vec<String>,
    constant: f64,
    linear: Array1<f64>,
    quadratic: Array2<f64>,
    constraints: Vec<LinearConstraint>,
}

impl QuadraticProgram {
    /// `n` binary variables `x_0..x_{n-1}` with a zero objective.
    pub fn new(name: &str, n: usize) -> Self {
        Self {
            name: name.to_string(),
            variables: (0..n).map(|i| format!("x_{}", i)).collect(),
            constant: 0.0,
            linear: Array1::zeros(n),
            quadratic: Array2::zeros((n, n)),
            constraints: Vec::new(),
        }
    }

    pub fn minimize(&mut self, constant: f64, linear: Array1<f64>, quadratic: Array2<f64>) -> Result<()> {
        let n = self.num_variables();
        if linear.len() != n || quadratic.dim() != (n, n) {
            return Err(PortfolioError::InvalidProblem(format!(
                "objective shapes {} / {:?} do not match {} variables",
                linear.len(),
                quadratic.dim(),
                n
            )));
        }
        if !constant.is_finite()
            || linear.iter().any(|v| !v.is_finite())
            || quadratic.iter().any(|v| !v.is_finite())
        {
            return Err(PortfolioError::InvalidProblem(
                "objective coefficients must be finite".to_string(),
            ));
        }
        self.constant = constant;
        self.linear = linear;
        self.quadratic = quadratic;
        Ok(())
    }

    pub fn linear_constraint(
        &mut self,
        name: &str,
        coefficients: Array1<f64>,
        sense: ConstraintSense,
        rhs: f64,
    ) -> Result<()> {
        if coefficients.len() != self.num_variables() {
            return Err(PortfolioError::InvalidProblem(format!(
                "constraint '{}' has {} coefficients for {} variables",
                name,
                coefficients.len(),
                self.num_variables()
            )));
        }
        if !rhs.is_finite() || coefficients.iter().any(|v| !v.is_finite()) {
            return Err(PortfolioError::InvalidProblem(format!(
                "constraint '{}' has non-finite coefficients",
                name
            )));
        }
        self.constraints.push(LinearConstraint {
            name: name.to_string(),
            coefficients,
            sense,
            rhs,
        });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn constant(&self) -> f64 {
        self.constant
    }

    pub fn linear(&self) -> &Array1<f64> {
        &self.linear
    }

    pub fn quadratic(&self) -> &Array2<f64> {
        &self.quadratic
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    fn check_assignment(&self, x: &[u8]) -> Result<()> {
        if x.len() != self.num_variables() {
            return Err(PortfolioError::InvalidInput(format!(
                "assignment has {} values for {} variables",
                x.len(),
                self.num_variables()
            )));
        }
        if x.iter().any(|&bit| bit > 1) {
            return Err(PortfolioError::InvalidInput("assignment must be 0/1".to_string()));
        }
        Ok(())
    }

    /// Objective value at the binary assignment `x` (constraints ignored).
    pub fn evaluate(&self, x: &[u8]) -> Result<f64> {
        self.check_assignment(x)?;
        let n = self.num_variables();
        let mut value = self.constant;
        for i in 0..n {
            if x[i] == 0 {
                continue;
            }
            value += self.linear[i];
            for j in 0..n {
                if x[j] == 1 {
                    value += self.quadratic[[i, j]];
                }
            }
        }
        Ok(value)
    }

    pub fn is_feasible(&self, x: &[u8]) -> Result<bool> {
        self.check_assignment(x)?;
        Ok(self.constraints.iter().all(|c| c.is_satisfied(x)))
    }
}

fn write_term(f: &mut fmt::Formatter<'_>, first: &mut bool, coeff: f64, term: &str) -> fmt::Result {
    if coeff == 0.0 {
        return Ok(());
    }
    let sign = if coeff < 0.0 { "-" } else { "+" };
    let magnitude = coeff.abs();
    if *first {
        if coeff < 0.0 {
            f.write_str("-")?;
        }
    } else {
        write!(f, " {} ", sign)?;
    }
    *first = false;
    if term.is_empty() {
        write!(f, "{}", magnitude)
    } else if magnitude == 1.0 {
        f.write_str(term)
    } else {
        write!(f, "{}*{}", magnitude, term)
    }
}

impl fmt::Display for QuadraticProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.num_variables();
        writeln!(f, "Problem name: {}", self.name)?;
        writeln!(f)?;
        writeln!(f, "Minimize")?;
        f.write_str("  ")?;

        let mut first = true;
        for i in 0..n {
            for j in i..n {
                let coeff = if i == j {
                    self.quadratic[[i, i]]
                } else {
                    self.quadratic[[i, j]] + self.quadratic[[j, i]]
                };
                let term = if i == j {
                    format!("{}^2", self.variables[i])
                } else {
                    format!("{}*{}", self.variables[i], self.variables[j])
                };
                write_term(f, &mut first, coeff, &term)?;
            }
        }
        for i in 0..n {
            write_term(f, &mut first, self.linear[i], &self.variables[i])?;
        }
        write_term(f, &mut first, self.constant, "")?;
        if first {
            f.write_str("0")?;
        }
        writeln!(f)?;
        writeln!(f)?;

        writeln!(f, "Subject to")?;
        writeln!(f, "  Linear constraints ({})", self.constraints.len())?;
        for c in &self.constraints {
            f.write_str("    ")?;
            let mut first = true;
            for (i, coeff) in c.coefficients.iter().enumerate() {
                write_term(f, &mut first, *coeff, &self.variables[i])?;
            }
            if first {
                f.write_str("0")?;
            }
            writeln!(f, " {} {}  '{}'", c.sense, c.rhs, c.name)?;
        }
        writeln!(f)?;
        writeln!(f, "  Binary variables ({})", n)?;
        writeln!(f, "    {}", self.variables.join(" "))
    }
}

/// Minimize `q·xᵀΣx − μ·x` subject to choosing exactly `k` assets.
pub fn create_quadratic_program(
    mu: &Array1<f64>,
    sigma: &Array2<f64>,
    k: usize,
    q: f64,
) -> Result<QuadraticProgram> {
    let n = mu.len();
    info!(n, k, q, "creating quadratic program");

    if sigma.dim() != (n, n) {
        return Err(PortfolioError::InvalidProblem(format!(
            "sigma is {:?} but mu has {} entries",
            sigma.dim(),
            n
        )));
    }
    if k > n {
        return Err(PortfolioError::InvalidProblem(format!(
            "cannot select {} assets out of {}",
            k, n
        )));
    }
    if !q.is_finite() || q < 0.0 {
        return Err(PortfolioError::InvalidProblem(format!(
            "risk weight q must be finite and non-negative, got {}",
            q
        )));
    }

    let mut qp = QuadraticProgram::new("portfolio_optimization", n);
    qp.minimize(0.0, mu.mapv(|m| -m), sigma * q)?;
    qp.linear_constraint("budget_constraint", Array1::ones(n), ConstraintSense::Eq, k as f64)?;

    info!("quadratic program created");
    Ok(qp)
}

/// [`create_quadratic_program`] fed from estimated statistics.
pub fn from_statistics(stats: &ReturnStatistics, k: usize, q: f64) -> Result<QuadraticProgram> {
    create_quadratic_program(&stats.mu, &stats.sigma, k, q)
}
