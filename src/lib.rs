//! # Quantum portfolio selection
//!
//! Picks exactly `k` assets out of a ticker list by encoding the
//! mean-variance trade-off as a binary quadratic program, folding the
//! cardinality constraint into a penalty, mapping the result onto an Ising
//! Hamiltonian and minimizing it with QAOA on a statevector simulator.
//!
//! Stages:
//!
//! 1. [`stocks`] - adjusted daily closes from Yahoo Finance (or a JSON cache)
//! 2. [`statistics`] - annualized log-return mean and covariance
//! 3. [`problem`] - the cardinality-constrained quadratic program
//! 4. [`ising`] - penalty folding and the Ising mapping
//! 5. [`solver`] / [`interpreter`] - QAOA and decoding of the best bitstring
//!
//! [`pipeline::run`] chains all of them and [`results`] persists the outcome.

pub mod config;
pub mod error;
pub mod interpreter;
pub mod ising;
pub mod optimizer;
pub mod pipeline;
pub mod problem;
pub mod results;
pub mod solver;
pub mod statistics;
pub mod stocks;

pub use config::RunConfig;
pub use error::{PortfolioError, Result};
pub use interpreter::{interpret_result, reverse_bits, Selection};
pub use ising::{convert_to_ising, IsingHamiltonian};
pub use optimizer::NelderMead;
pub use pipeline::RunOutcome;
pub use problem::{create_quadratic_program, QuadraticProgram};
pub use results::RunRecord;
pub use solver::{EigensolverResult, ExactEigensolver, MinimumEigensolver, Qaoa};
pub use statistics::{calculate_mu_and_sigma, ReturnStatistics};
pub use stocks::{fetch_stock_data, PriceSource, PriceTable, YahooClient};
