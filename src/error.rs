//! Error type shared by every pipeline stage.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortfolioError {
    /// The market-data provider returned nothing usable.
    #[error("no price data available: {0}")]
    DataUnavailable(String),

    #[error("insufficient data: {rows} price rows, need at least {required}")]
    InsufficientData { rows: usize, required: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    /// Constrained program could not be mapped onto an Ising Hamiltonian.
    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("solver error: {0}")]
    Solver(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
