//! Constrained program -> penalized QUBO -> Ising Hamiltonian.
//!
//! The equality constraints are folded into the objective as
//! `P·(a·x − b)²`, then every binary variable is substituted with
//! `x_i = (1 − z_i)/2`, `z_i ∈ {+1, −1}`. The resulting Hamiltonian holds
//! only single-Z and ZZ terms; all constant parts go into the offset.

use ndarray::{Array1, Array2};
use std::fmt;
use tracing::{error, info, warn};

use crate::error::{PortfolioError, Result};
use crate::problem::{ConstraintSense, QuadraticProgram};

/// Statevector simulation holds 2^n amplitudes.
pub const MAX_QUBITS: usize = 20;

/// Used when a constraint has non-integral data and the objective range is no
/// longer a safe bound on the penalty.
pub const DEFAULT_PENALTY: f64 = 1e5;

/// Weighted sum of `Z_i` and `Z_i Z_j` terms over `num_qubits` qubits.
#[derive(Debug, Clone, PartialEq)]
pub struct IsingHamiltonian {
    num_qubits: usize,
    fields: Array1<f64>,
    couplings: Vec<(usize, usize, f64)>,
}

impl IsingHamiltonian {
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Coefficient of `Z_i`, indexed by qubit.
    pub fn fields(&self) -> &Array1<f64> {
        &self.fields
    }

    /// `(i, j, J_ij)` with `i < j`.
    pub fn couplings(&self) -> &[(usize, usize, f64)] {
        &self.couplings
    }

    /// Energy of the basis state whose qubit `i` holds `bits[i]`.
    pub fn energy(&self, bits: &[u8]) -> Result<f64> {
        if bits.len() != self.num_qubits {
            return Err(PortfolioError::InvalidInput(format!(
                "expected {} bits, got {}",
                self.num_qubits,
                bits.len()
            )));
        }
        let spin = |i: usize| if bits[i] == 0 { 1.0 } else { -1.0 };
        let field: f64 = self.fields.iter().enumerate().map(|(i, h)| h * spin(i)).sum();
        let coupling: f64 = self.couplings.iter().map(|&(i, j, w)| w * spin(i) * spin(j)).sum();
        Ok(field + coupling)
    }

    /// Energy of basis state `index`; qubit `i` is bit `i` of the index.
    pub fn energy_of_index(&self, index: usize) -> f64 {
        let spin = |i: usize| if (index >> i) & 1 == 0 { 1.0 } else { -1.0 };
        let field: f64 = self.fields.iter().enumerate().map(|(i, h)| h * spin(i)).sum();
        let coupling: f64 = self.couplings.iter().map(|&(i, j, w)| w * spin(i) * spin(j)).sum();
        field + coupling
    }

    /// Energy of every computational basis state, indexed like a statevector.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..1usize << self.num_qubits).map(|s| self.energy_of_index(s)).collect()
    }

    /// Pauli labels with coefficients. Qubit 0 is the rightmost character.
    pub fn terms(&self) -> Vec<(String, f64)> {
        let n = self.num_qubits;
        let label = |qubits: &[usize]| -> String {
            (0..n)
                .rev()
                .map(|q| if qubits.contains(&q) { 'Z' } else { 'I' })
                .collect()
        };

        let mut terms: Vec<(String, f64)> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, h)| **h != 0.0)
            .map(|(i, h)| (label(&[i]), *h))
            .collect();
        terms.extend(self.couplings.iter().map(|&(i, j, w)| (label(&[i, j]), w)));
        terms
    }
}

impl fmt::Display for IsingHamiltonian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms = self.terms();
        writeln!(f, "Ising Hamiltonian ({} qubits, {} terms)", self.num_qubits, terms.len())?;
        for (label, coeff) in terms {
            writeln!(f, "  {:+.8} * {}", coeff, label)?;
        }
        Ok(())
    }
}

/// `1 + (max − min)` of the objective over binary assignments, bounded by the
/// sum of absolute coefficients.
pub fn auto_penalty(qp: &QuadraticProgram) -> f64 {
    let integral = |v: f64| v.fract() == 0.0;
    let integral_constraints = qp
        .constraints()
        .iter()
        .all(|c| integral(c.rhs) && c.coefficients.iter().all(|v| integral(*v)));
    if !integral_constraints {
        warn!(
            penalty = DEFAULT_PENALTY,
            "constraint has non-integral coefficients, using default penalty"
        );
        return DEFAULT_PENALTY;
    }

    let linear_range: f64 = qp.linear().iter().map(|v| v.abs()).sum();
    let quadratic_range: f64 = qp.quadratic().iter().map(|v| v.abs()).sum();
    1.0 + linear_range + quadratic_range
}

/// Fold every equality constraint into the objective as `P·(a·x − b)²`.
pub fn to_penalized(qp: &QuadraticProgram, penalty: Option<f64>) -> Result<QuadraticProgram> {
    if let Some(c) = qp.constraints().iter().find(|c| c.sense != ConstraintSense::Eq) {
        return Err(PortfolioError::Conversion(format!(
            "constraint '{}' uses '{}', only equality constraints can be penalized",
            c.name, c.sense
        )));
    }

    let penalty = match penalty {
        Some(p) if p.is_finite() && p > 0.0 => p,
        Some(p) => {
            return Err(PortfolioError::Conversion(format!(
                "penalty must be finite and positive, got {}",
                p
            )))
        }
        None => auto_penalty(qp),
    };

    let n = qp.num_variables();
    let mut constant = qp.constant();
    let mut linear = qp.linear().clone();
    let mut quadratic = qp.quadratic().clone();

    for c in qp.constraints() {
        let a = &c.coefficients;
        let b = c.rhs;
        quadratic += &(Array2::from_shape_fn((n, n), |(i, j)| a[i] * a[j]) * penalty);
        linear -= &(a * (2.0 * penalty * b));
        constant += penalty * b * b;
    }

    let mut penalized = QuadraticProgram::new(qp.name(), n);
    penalized
        .minimize(constant, linear, quadratic)
        .map_err(|e| PortfolioError::Conversion(e.to_string()))?;
    info!(penalty, constraints = qp.constraints().len(), "folded constraints into penalty");
    Ok(penalized)
}

/// Map an unconstrained binary program onto an Ising Hamiltonian plus offset.
pub fn to_ising(qp: &QuadraticProgram) -> Result<(IsingHamiltonian, f64)> {
    if !qp.constraints().is_empty() {
        return Err(PortfolioError::Conversion(format!(
            "program has {} constraints, penalize them first",
            qp.constraints().len()
        )));
    }
    let n = qp.num_variables();
    if n == 0 {
        return Err(PortfolioError::Conversion("program has no variables".to_string()));
    }
    if n > MAX_QUBITS {
        return Err(PortfolioError::Conversion(format!(
            "{} variables exceed the {}-qubit limit",
            n, MAX_QUBITS
        )));
    }

    let mut offset = qp.constant();
    let mut fields = Array1::<f64>::zeros(n);
    let mut coupling = Array2::<f64>::zeros((n, n));

    for (i, &l) in qp.linear().iter().enumerate() {
        offset += l / 2.0;
        fields[i] -= l / 2.0;
    }

    for ((i, j), &w) in qp.quadratic().indexed_iter() {
        if w == 0.0 {
            continue;
        }
        if i == j {
            // x_i^2 = x_i
            offset += w / 2.0;
            fields[i] -= w / 2.0;
        } else {
            offset += w / 4.0;
            fields[i] -= w / 4.0;
            fields[j] -= w / 4.0;
            coupling[[i.min(j), i.max(j)]] += w / 4.0;
        }
    }

    let couplings: Vec<(usize, usize, f64)> = coupling
        .indexed_iter()
        .filter(|((i, j), w)| i < j && **w != 0.0)
        .map(|((i, j), w)| (i, j, *w))
        .collect();

    if !offset.is_finite()
        || fields.iter().any(|v| !v.is_finite())
        || couplings.iter().any(|(_, _, w)| !w.is_finite())
    {
        return Err(PortfolioError::Conversion("Hamiltonian has non-finite coefficients".to_string()));
    }

    Ok((
        IsingHamiltonian {
            num_qubits: n,
            fields,
            couplings,
        },
        offset,
    ))
}

/// Penalize the constraints of `qp` and map the result onto an Ising Hamiltonian.
pub fn convert_to_ising(qp: &QuadraticProgram, penalty: Option<f64>) -> Result<(IsingHamiltonian, f64)> {
    info!("converting constraints into QUBO penalties");
    let unconstrained = to_penalized(qp, penalty).map_err(|e| {
        error!(error = %e, "penalty conversion failed");
        e
    })?;

    info!("converting the QUBO to an Ising Hamiltonian");
    let (hamiltonian, offset) = to_ising(&unconstrained).map_err(|e| {
        error!(error = %e, "Ising conversion failed");
        e
    })?;

    info!(
        qubits = hamiltonian.num_qubits(),
        terms = hamiltonian.terms().len(),
        offset,
        "conversion complete"
    );
    Ok((hamiltonian, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::create_quadratic_program;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn bits_of(index: usize, n: usize) -> Vec<u8> {
        (0..n).map(|i| ((index >> i) & 1) as u8).collect()
    }

    fn portfolio() -> QuadraticProgram {
        let mu = array![0.10, 0.05, 0.20, 0.01];
        let sigma = array![
            [0.04, 0.006, 0.0, 0.001],
            [0.006, 0.01, 0.002, 0.0],
            [0.0, 0.002, 0.09, 0.004],
            [0.001, 0.0, 0.004, 0.02]
        ];
        create_quadratic_program(&mu, &sigma, 2, 1.0).unwrap()
    }

    #[test]
    fn test_penalized_objective_adds_squared_violation() {
        let qp = portfolio();
        let penalized = to_penalized(&qp, Some(3.0)).unwrap();
        assert!(penalized.constraints().is_empty());

        for s in 0..16 {
            let x = bits_of(s, 4);
            let violation = x.iter().map(|&b| f64::from(b)).sum::<f64>() - 2.0;
            let expected = qp.evaluate(&x).unwrap() + 3.0 * violation * violation;
            assert_relative_eq!(penalized.evaluate(&x).unwrap(), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_energy_plus_offset_matches_penalized_objective() {
        let qp = portfolio();
        let penalized = to_penalized(&qp, None).unwrap();
        let (hamiltonian, offset) = convert_to_ising(&qp, None).unwrap();

        for s in 0..16 {
            let x = bits_of(s, 4);
            assert_relative_eq!(
                hamiltonian.energy(&x).unwrap() + offset,
                penalized.evaluate(&x).unwrap(),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn test_feasible_states_recover_original_objective() {
        let qp = portfolio();
        let (hamiltonian, offset) = convert_to_ising(&qp, None).unwrap();
        for s in 0..16usize {
            let x = bits_of(s, 4);
            if qp.is_feasible(&x).unwrap() {
                assert_relative_eq!(
                    hamiltonian.energy(&x).unwrap() + offset,
                    qp.evaluate(&x).unwrap(),
                    epsilon = 1e-10
                );
            }
        }
    }

    #[test]
    fn test_diagonal_uses_little_endian_qubits() {
        let (hamiltonian, _) = convert_to_ising(&portfolio(), None).unwrap();
        let diagonal = hamiltonian.diagonal();
        assert_eq!(diagonal.len(), 16);
        for (s, energy) in diagonal.iter().enumerate() {
            assert_eq!(*energy, hamiltonian.energy(&bits_of(s, 4)).unwrap());
        }
    }

    #[test]
    fn test_auto_penalty_is_objective_range_plus_one() {
        let mu = array![1.0, -2.0];
        let sigma = array![[0.5, 0.25], [0.25, 1.0]];
        let qp = create_quadratic_program(&mu, &sigma, 1, 2.0).unwrap();
        // 1 + (1 + 2) + 2 * (0.5 + 0.25 + 0.25 + 1.0)
        assert_relative_eq!(auto_penalty(&qp), 8.0);
    }

    #[test]
    fn test_non_integral_constraint_uses_default_penalty() {
        let mut qp = QuadraticProgram::new("p", 2);
        qp.linear_constraint("half", array![0.5, 1.0], ConstraintSense::Eq, 1.0)
            .unwrap();
        assert_eq!(auto_penalty(&qp), DEFAULT_PENALTY);
    }

    #[test]
    fn test_inequality_constraints_are_rejected() {
        let mut qp = QuadraticProgram::new("p", 2);
        qp.linear_constraint("cap", array![1.0, 1.0], ConstraintSense::Le, 1.0)
            .unwrap();
        assert!(matches!(convert_to_ising(&qp, None), Err(PortfolioError::Conversion(_))));
        assert!(matches!(to_penalized(&qp, Some(-1.0)), Err(PortfolioError::Conversion(_))));
    }

    #[test]
    fn test_to_ising_requires_unconstrained_program() {
        assert!(matches!(to_ising(&portfolio()), Err(PortfolioError::Conversion(_))));
        let big = QuadraticProgram::new("big", MAX_QUBITS + 1);
        assert!(matches!(to_ising(&big), Err(PortfolioError::Conversion(_))));
    }

    #[test]
    fn test_pauli_labels_put_qubit_zero_last() {
        let mut qp = QuadraticProgram::new("p", 3);
        qp.minimize(0.0, array![2.0, 0.0, 0.0], Array2::zeros((3, 3))).unwrap();
        let (hamiltonian, offset) = to_ising(&qp).unwrap();
        assert_eq!(hamiltonian.terms(), vec![("IIZ".to_string(), -1.0)]);
        assert_eq!(offset, 1.0);

        let mut qp = QuadraticProgram::new("p", 3);
        let mut quadratic = Array2::zeros((3, 3));
        quadratic[[0, 2]] = 4.0;
        qp.minimize(0.0, Array1::zeros(3), quadratic).unwrap();
        let (hamiltonian, _) = to_ising(&qp).unwrap();
        assert!(hamiltonian.terms().contains(&("ZIZ".to_string(), 1.0)));
        assert!(hamiltonian.to_string().contains("ZIZ"));
    }

    #[test]
    fn test_energy_rejects_wrong_bit_count() {
        let mut qp = QuadraticProgram::new("p", 3);
        qp.minimize(0.0, array![1.0, -1.0, 0.5], Array2::zeros((3, 3))).unwrap();
        let (hamiltonian, _) = to_ising(&qp).unwrap();
        assert!(hamiltonian.energy(&[1, 0]).is_err());
        assert!(hamiltonian.energy(&[1, 0, 1, 1]).is_err());
        assert!(hamiltonian.energy(&[1, 0, 1]).is_ok());
    }
}
