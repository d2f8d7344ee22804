//! Minimum-eigenvalue solvers for diagonal (Z-only) Hamiltonians.
//!
//! [`Qaoa`] simulates the QAOA ansatz on an exact statevector and drives its
//! angles with [`NelderMead`]; [`ExactEigensolver`] scans the diagonal and is
//! used as the classical reference.

use num_complex::Complex64;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::{debug, info};

use crate::error::{PortfolioError, Result};
use crate::ising::{IsingHamiltonian, MAX_QUBITS};
use crate::optimizer::NelderMead;

/// Outcomes below this probability are left out of an exact distribution.
const MIN_PROBABILITY: f64 = 1e-12;

/// Basis state `index` as a bitstring, qubit `n-1` first and qubit 0 last.
pub fn bitstring(index: usize, num_qubits: usize) -> String {
    format!("{:0width$b}", index, width = num_qubits)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub bitstring: String,
    pub probability: f64,
    /// Hamiltonian energy of the bitstring, offset excluded.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EigensolverResult {
    pub eigenvalue: f64,
    pub optimal_parameters: Vec<f64>,
    pub cost_function_evals: usize,
    /// Measured bitstring -> observed probability.
    pub eigenstate: BTreeMap<String, f64>,
    /// Lowest-energy bitstring that was observed.
    pub best_measurement: Option<Measurement>,
}

pub trait MinimumEigensolver {
    fn name(&self) -> &'static str;

    fn compute_minimum_eigenvalue(&self, hamiltonian: &IsingHamiltonian) -> Result<EigensolverResult>;
}

fn check_size(hamiltonian: &IsingHamiltonian) -> Result<()> {
    let n = hamiltonian.num_qubits();
    if n == 0 || n > MAX_QUBITS {
        return Err(PortfolioError::Solver(format!(
            "cannot simulate {} qubits (limit {})",
            n, MAX_QUBITS
        )));
    }
    Ok(())
}

fn best_measurement(eigenstate: &BTreeMap<String, f64>, diagonal: &[f64]) -> Option<Measurement> {
    let mut best: Option<Measurement> = None;
    for (bits, &probability) in eigenstate {
        let index = usize::from_str_radix(bits, 2).ok()?;
        let value = diagonal[index];
        if best.as_ref().map_or(true, |b| value < b.value) {
            best = Some(Measurement {
                bitstring: bits.clone(),
                probability,
                value,
            });
        }
    }
    best
}

/// Dense state over `2^n` basis states; qubit `i` is bit `i` of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Statevector {
    num_qubits: usize,
    amplitudes: Vec<Complex64>,
}

impl Statevector {
    /// `|+>^n`
    pub fn uniform(num_qubits: usize) -> Self {
        let dim = 1usize << num_qubits;
        let amp = Complex64::new(1.0 / (dim as f64).sqrt(), 0.0);
        Self {
            num_qubits,
            amplitudes: vec![amp; dim],
        }
    }

    pub fn basis(num_qubits: usize, index: usize) -> Self {
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); 1usize << num_qubits];
        amplitudes[index] = Complex64::new(1.0, 0.0);
        Self { num_qubits, amplitudes }
    }

    /// `exp(-i·gamma·H)` for diagonal `H`.
    pub fn apply_phase(&mut self, diagonal: &[f64], gamma: f64) {
        for (amp, energy) in self.amplitudes.iter_mut().zip(diagonal) {
            *amp *= Complex64::from_polar(1.0, -gamma * energy);
        }
    }

    /// `exp(-i·beta·X)` on every qubit.
    pub fn apply_mixer(&mut self, beta: f64) {
        let cos = Complex64::new(beta.cos(), 0.0);
        let minus_i_sin = Complex64::new(0.0, -beta.sin());
        for qubit in 0..self.num_qubits {
            let stride = 1usize << qubit;
            for s in 0..self.amplitudes.len() {
                if s & stride != 0 {
                    continue;
                }
                let t = s | stride;
                let a = self.amplitudes[s];
                let b = self.amplitudes[t];
                self.amplitudes[s] = cos * a + minus_i_sin * b;
                self.amplitudes[t] = minus_i_sin * a + cos * b;
            }
        }
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.amplitudes.iter().map(|a| a.norm_sqr()).collect()
    }

    pub fn expectation(&self, diagonal: &[f64]) -> f64 {
        self.amplitudes
            .iter()
            .zip(diagonal)
            .map(|(a, e)| a.norm_sqr() * e)
            .sum()
    }
}

/// QAOA with a statevector sampler.
#[derive(Debug, Clone)]
pub struct Qaoa {
    /// Number of alternating cost/mixer layers.
    pub reps: usize,
    pub optimizer: NelderMead,
    /// Shots drawn from the final state; `None` reads the exact probabilities.
    pub shots: Option<usize>,
    pub seed: u64,
    /// `[beta_0..beta_{p-1}, gamma_0..gamma_{p-1}]`; random when unset.
    pub initial_point: Option<Vec<f64>>,
}

impl Default for Qaoa {
    fn default() -> Self {
        Self {
            reps: 1,
            optimizer: NelderMead::default(),
            shots: Some(1024),
            seed: 42,
            initial_point: None,
        }
    }
}

impl Qaoa {
    pub fn new(reps: usize, optimizer: NelderMead) -> Self {
        Self {
            reps,
            optimizer,
            ..Self::default()
        }
    }

    /// Ansatz state for `params = [betas.., gammas..]`.
    pub fn prepare(&self, num_qubits: usize, diagonal: &[f64], params: &[f64]) -> Result<Statevector> {
        if num_qubits > MAX_QUBITS || diagonal.len() != 1usize << num_qubits {
            return Err(PortfolioError::Solver(format!(
                "diagonal of length {} does not describe {} qubits",
                diagonal.len(),
                num_qubits
            )));
        }
        if params.len() != 2 * self.reps {
            return Err(PortfolioError::Solver(format!(
                "expected {} angles, got {}",
                2 * self.reps,
                params.len()
            )));
        }
        let (betas, gammas) = params.split_at(self.reps);
        let mut state = Statevector::uniform(num_qubits);
        for (beta, gamma) in betas.iter().zip(gammas) {
            state.apply_phase(diagonal, *gamma);
            state.apply_mixer(*beta);
        }
        Ok(state)
    }

    fn sample(&self, probabilities: &[f64], num_qubits: usize, rng: &mut StdRng) -> Result<BTreeMap<String, f64>> {
        match self.shots {
            None => Ok(probabilities
                .iter()
                .enumerate()
                .filter(|(_, p)| **p > MIN_PROBABILITY)
                .map(|(s, p)| (bitstring(s, num_qubits), *p))
                .collect()),
            Some(shots) => {
                let dist = WeightedIndex::new(probabilities)
                    .map_err(|e| PortfolioError::Solver(format!("cannot sample final state: {}", e)))?;
                let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
                for _ in 0..shots {
                    *counts.entry(dist.sample(rng)).or_insert(0) += 1;
                }
                Ok(counts
                    .into_iter()
                    .map(|(s, c)| (bitstring(s, num_qubits), c as f64 / shots as f64))
                    .collect())
            }
        }
    }
}

impl MinimumEigensolver for Qaoa {
    fn name(&self) -> &'static str {
        "qaoa"
    }

    fn compute_minimum_eigenvalue(&self, hamiltonian: &IsingHamiltonian) -> Result<EigensolverResult> {
        check_size(hamiltonian)?;
        if self.reps == 0 {
            return Err(PortfolioError::Solver("QAOA needs at least one layer".to_string()));
        }
        if self.shots == Some(0) {
            return Err(PortfolioError::Solver("shots must be positive".to_string()));
        }

        let n = hamiltonian.num_qubits();
        let diagonal = hamiltonian.diagonal();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let x0 = match &self.initial_point {
            Some(point) if point.len() == 2 * self.reps => point.clone(),
            Some(point) => {
                return Err(PortfolioError::Solver(format!(
                    "initial point has {} values, expected {}",
                    point.len(),
                    2 * self.reps
                )))
            }
            None => (0..2 * self.reps).map(|_| rng.gen_range(-PI..PI)).collect(),
        };

        info!(qubits = n, reps = self.reps, "running QAOA");
        let optimum = self
            .optimizer
            .minimize(
                |params| match self.prepare(n, &diagonal, params) {
                    Ok(state) => state.expectation(&diagonal),
                    Err(_) => f64::INFINITY,
                },
                &x0,
            )?;
        debug!(parameters = ?optimum.x, evaluations = optimum.evaluations, "optimizer finished");

        let state = self.prepare(n, &diagonal, &optimum.x)?;
        let eigenstate = self.sample(&state.probabilities(), n, &mut rng)?;
        let best_measurement = best_measurement(&eigenstate, &diagonal);

        info!(eigenvalue = optimum.fun, outcomes = eigenstate.len(), "QAOA solution obtained");
        Ok(EigensolverResult {
            eigenvalue: optimum.fun,
            optimal_parameters: optimum.x,
            cost_function_evals: optimum.evaluations,
            eigenstate,
            best_measurement,
        })
    }
}

/// Brute-force ground state; the lowest basis index wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactEigensolver;

impl MinimumEigensolver for ExactEigensolver {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn compute_minimum_eigenvalue(&self, hamiltonian: &IsingHamiltonian) -> Result<EigensolverResult> {
        check_size(hamiltonian)?;
        let n = hamiltonian.num_qubits();
        let diagonal = hamiltonian.diagonal();

        let (index, eigenvalue) = diagonal
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (s, e)| if e < best.1 { (s, e) } else { best });

        let bits = bitstring(index, n);
        info!(eigenvalue, state = %bits, "exact ground state found");
        Ok(EigensolverResult {
            eigenvalue,
            optimal_parameters: Vec::new(),
            cost_function_evals: diagonal.len(),
            eigenstate: BTreeMap::from([(bits.clone(), 1.0)]),
            best_measurement: Some(Measurement {
                bitstring: bits,
                probability: 1.0,
                value: eigenvalue,
            }),
        })
    }
}
