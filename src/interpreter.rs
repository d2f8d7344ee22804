//! Turns a solver distribution back into a ticker selection.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{PortfolioError, Result};
use crate::problem::QuadraticProgram;
use crate::solver::EigensolverResult;

/// Probabilities closer than this count as tied.
const TIE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    /// Chosen bitstring as the solver reports it (qubit 0 last).
    pub bitstring: String,
    /// One 0/1 entry per ticker, in ticker order.
    pub assignment: Vec<u8>,
    pub selected: Vec<String>,
    /// Original (unpenalized) objective at `assignment`; lower is better.
    pub score: f64,
    pub probability: f64,
    /// Whether the cardinality constraint holds.
    pub feasible: bool,
    /// Every bitstring sharing the top probability, smallest first.
    pub ties: Vec<String>,
}

/// Reverse character order. Applying it twice gives back the input.
pub fn reverse_bits(bits: &str) -> String {
    bits.chars().rev().collect()
}

/// Most probable outcomes: the top probability and every bitstring within
/// [`TIE_TOLERANCE`] of it, in lexicographic order.
pub fn most_probable(eigenstate: &BTreeMap<String, f64>) -> Option<(f64, Vec<String>)> {
    let top = eigenstate.values().copied().fold(f64::NEG_INFINITY, f64::max);
    if !top.is_finite() {
        return None;
    }
    let ties = eigenstate
        .iter()
        .filter(|(_, p)| (top - **p).abs() <= TIE_TOLERANCE)
        .map(|(bits, _)| bits.clone())
        .collect();
    Some((top, ties))
}

/// Pick the most probable bitstring, map it onto `tickers` and score it
/// against the original program.
pub fn interpret_result(
    result: &EigensolverResult,
    tickers: &[String],
    qp: &QuadraticProgram,
) -> Result<Selection> {
    let (probability, ties) = most_probable(&result.eigenstate)
        .ok_or_else(|| PortfolioError::Solver("solver returned an empty distribution".to_string()))?;
    let bitstring = ties[0].clone();
    if ties.len() > 1 {
        warn!(?ties, chosen = %bitstring, "several bitstrings share the top probability");
    }
    info!(%bitstring, probability, "best binary string");

    if bitstring.len() != tickers.len() || tickers.len() != qp.num_variables() {
        return Err(PortfolioError::Solver(format!(
            "bitstring '{}' does not match {} tickers / {} variables",
            bitstring,
            tickers.len(),
            qp.num_variables()
        )));
    }

    // Solver strings put qubit 0 last; tickers are indexed from the front.
    let assignment = reverse_bits(&bitstring)
        .chars()
        .map(|c| match c {
            '0' => Ok(0u8),
            '1' => Ok(1u8),
            other => Err(PortfolioError::Solver(format!(
                "unexpected character '{}' in bitstring",
                other
            ))),
        })
        .collect::<Result<Vec<u8>>>()?;

    let selected: Vec<String> = tickers
        .iter()
        .zip(&assignment)
        .filter(|(_, &bit)| bit == 1)
        .map(|(t, _)| t.clone())
        .collect();

    let score = qp.evaluate(&assignment)?;
    let feasible = qp.is_feasible(&assignment)?;
    if !feasible {
        warn!(?selected, "selected assets violate the cardinality constraint");
    }

    Ok(Selection {
        bitstring,
        assignment,
        selected,
        score,
        probability,
        feasible,
        ties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::create_quadratic_program;
    use ndarray::array;

    fn tickers() -> Vec<String> {
        ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect()
    }

    fn program() -> QuadraticProgram {
        let mu = array![0.10, 0.05, 0.20, 0.01];
        let sigma = ndarray::Array2::from_diag(&array![0.04, 0.01, 0.09, 0.02]);
        create_quadratic_program(&mu, &sigma, 2, 1.0).unwrap()
    }

    fn result_with(entries: &[(&str, f64)]) -> EigensolverResult {
        EigensolverResult {
            eigenvalue: 0.0,
            optimal_parameters: Vec::new(),
            cost_function_evals: 0,
            eigenstate: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            best_measurement: None,
        }
    }

    #[test]
    fn test_reverse_bits_is_self_inverse() {
        for bits in ["", "1", "0110", "100101", "1110001"] {
            assert_eq!(reverse_bits(&reverse_bits(bits)), bits);
        }
        assert_eq!(reverse_bits("0011"), "1100");
    }

    #[test]
    fn test_bit_order_maps_qubit_zero_to_first_ticker() {
        // "0101": qubits 0 and 2 set -> tickers A and C
        let result = result_with(&[("0101", 0.7), ("0011", 0.3)]);
        let selection = interpret_result(&result, &tickers(), &program()).unwrap();
        assert_eq!(selection.selected, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(selection.assignment, vec![1, 0, 1, 0]);
        assert!(selection.feasible);
        assert!((selection.score - (-0.17)).abs() < 1e-12);
        assert_eq!(selection.ties, vec!["0101".to_string()]);
    }

    #[test]
    fn test_ties_resolve_to_smallest_bitstring() {
        let result = result_with(&[("1100", 0.4), ("0011", 0.4), ("0101", 0.2)]);
        let selection = interpret_result(&result, &tickers(), &program()).unwrap();
        assert_eq!(selection.bitstring, "0011");
        assert_eq!(selection.ties, vec!["0011".to_string(), "1100".to_string()]);
        assert_eq!(selection.selected, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_score_ignores_penalty_for_infeasible_pick() {
        let result = result_with(&[("0100", 1.0)]);
        let selection = interpret_result(&result, &tickers(), &program()).unwrap();
        assert!(!selection.feasible);
        assert_eq!(selection.selected, vec!["C".to_string()]);
        assert!((selection.score - (0.09 - 0.20)).abs() < 1e-12);
    }

    #[test]
    fn test_malformed_results_are_errors() {
        let empty = result_with(&[]);
        assert!(interpret_result(&empty, &tickers(), &program()).is_err());

        let short = result_with(&[("01", 1.0)]);
        assert!(interpret_result(&short, &tickers(), &program()).is_err());

        let garbage = result_with(&[("01x1", 1.0)]);
        assert!(interpret_result(&garbage, &tickers(), &program()).is_err());
    }
}
