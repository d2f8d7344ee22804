//! Derivative-free minimization (Nelder-Mead simplex).

use std::cell::Cell;
use tracing::debug;

use crate::error::{PortfolioError, Result};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct NelderMead {
    /// Budget of objective evaluations, checked once per iteration; a
    /// single iteration may use up to `dim + 2` more.
    pub max_evaluations: usize,
    /// Stop when the spread of simplex values drops to this.
    pub tolerance: f64,
    /// Edge length of the initial simplex.
    pub initial_step: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_evaluations: 1000,
            tolerance: 1e-8,
            initial_step: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerResult {
    pub x: Vec<f64>,
    pub fun: f64,
    pub evaluations: usize,
    pub converged: bool,
}

impl NelderMead {
    pub fn new(max_evaluations: usize) -> Self {
        Self {
            max_evaluations,
            ..Self::default()
        }
    }

    /// Minimize `f` starting from `x0`. Non-finite values count as `+inf`.
    pub fn minimize<F>(&self, mut f: F, x0: &[f64]) -> Result<OptimizerResult>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let dim = x0.len();
        if dim == 0 {
            return Err(PortfolioError::Solver("cannot optimize zero parameters".to_string()));
        }
        if self.max_evaluations == 0 || !(self.initial_step > 0.0) {
            return Err(PortfolioError::Solver(
                "optimizer needs a positive evaluation budget and step".to_string(),
            ));
        }

        let evaluations = Cell::new(0usize);
        let mut eval = |x: &[f64]| {
            evaluations.set(evaluations.get() + 1);
            let v = f(x);
            if v.is_finite() {
                v
            } else {
                f64::INFINITY
            }
        };

        let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
        simplex.push((x0.to_vec(), eval(x0)));
        for i in 0..dim {
            let mut x = x0.to_vec();
            x[i] += self.initial_step;
            let v = eval(&x);
            simplex.push((x, v));
        }

        let mut converged = false;
        loop {
            simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
            let best = simplex[0].1;
            let worst = simplex[dim].1;
            if (worst - best).abs() <= self.tolerance {
                converged = true;
                break;
            }
            if evaluations.get() >= self.max_evaluations {
                break;
            }

            let centroid: Vec<f64> = (0..dim)
                .map(|k| simplex[..dim].iter().map(|(x, _)| x[k]).sum::<f64>() / dim as f64)
                .collect();
            let towards = |from: &[f64], coeff: f64| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(from)
                    .map(|(c, p)| c + coeff * (p - c))
                    .collect()
            };

            let reflected = towards(&simplex[dim].0, -REFLECTION);
            let f_reflected = eval(&reflected);

            if f_reflected < best {
                let expanded = towards(&reflected, EXPANSION);
                let f_expanded = eval(&expanded);
                simplex[dim] = if f_expanded < f_reflected {
                    (expanded, f_expanded)
                } else {
                    (reflected, f_reflected)
                };
                continue;
            }

            if f_reflected < simplex[dim - 1].1 {
                simplex[dim] = (reflected, f_reflected);
                continue;
            }

            let (contracted, f_contracted) = if f_reflected < worst {
                let x = towards(&reflected, CONTRACTION);
                let v = eval(&x);
                (x, v)
            } else {
                let x = towards(&simplex[dim].0, CONTRACTION);
                let v = eval(&x);
                (x, v)
            };

            if f_contracted < f_reflected.min(worst) {
                simplex[dim] = (contracted, f_contracted);
                continue;
            }

            let anchor = simplex[0].0.clone();
            for vertex in simplex.iter_mut().skip(1) {
                let x: Vec<f64> = anchor
                    .iter()
                    .zip(&vertex.0)
                    .map(|(a, p)| a + SHRINK * (p - a))
                    .collect();
                let v = eval(&x);
                *vertex = (x, v);
            }
        }

        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (x, fun) = simplex.swap_remove(0);
        let evaluations = evaluations.get();
        debug!(evaluations, fun, converged, "nelder-mead finished");
        Ok(OptimizerResult {
            x,
            fun,
            evaluations,
            converged,
        })
    }
}
