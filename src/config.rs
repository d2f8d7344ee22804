//! Run configuration.
//!
//! This module handles:
//! - Defaults for a plain `qportfolio` invocation
//! - Loading overrides from a TOML file
//! - Validating the merged values before any network traffic happens

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PortfolioError, Result};
use crate::optimizer::NelderMead;
use crate::solver::Qaoa;
use crate::stocks::validate_tickers;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Number of assets to select.
    pub k: usize,
    /// Risk aversion; scales the covariance term.
    pub q: f64,
    pub output: PathBuf,
    /// Optional JSON price cache.
    pub cache: Option<PathBuf>,
    /// Fixed constraint penalty. Derived from the objective when absent.
    pub penalty: Option<f64>,
    pub reps: usize,
    pub max_evaluations: usize,
    pub shots: Option<usize>,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tickers: ["AAPL", "GOOG", "MSFT", "AMZN"].iter().map(|t| t.to_string()).collect(),
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap_or_default(),
            k: 2,
            q: 1.0,
            output: PathBuf::from("results.json"),
            cache: None,
            penalty: None,
            reps: 1,
            max_evaluations: 1000,
            shots: Some(1024),
            seed: 42,
        }
    }
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| PortfolioError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PortfolioError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        validate_tickers(&self.tickers).map_err(|e| PortfolioError::Config(e.to_string()))?;
        if self.start_date >= self.end_date {
            return Err(PortfolioError::Config(format!(
                "start date {} must be before end date {}",
                self.start_date, self.end_date
            )));
        }
        if self.k > self.tickers.len() {
            return Err(PortfolioError::Config(format!(
                "budget k = {} exceeds the {} tickers",
                self.k,
                self.tickers.len()
            )));
        }
        if !self.q.is_finite() || self.q < 0.0 {
            return Err(PortfolioError::Config(format!("risk factor q = {} must be finite and >= 0", self.q)));
        }
        if let Some(p) = self.penalty {
            if !p.is_finite() || p <= 0.0 {
                return Err(PortfolioError::Config(format!("penalty {} must be finite and > 0", p)));
            }
        }
        if self.reps == 0 {
            return Err(PortfolioError::Config("reps must be at least 1".to_string()));
        }
        if self.max_evaluations == 0 {
            return Err(PortfolioError::Config("max_evaluations must be at least 1".to_string()));
        }
        if self.shots == Some(0) {
            return Err(PortfolioError::Config("shots must be at least 1".to_string()));
        }
        Ok(())
    }

    /// QAOA solver configured from these settings.
    pub fn qaoa(&self) -> Qaoa {
        Qaoa {
            reps: self.reps,
            optimizer: NelderMead::new(self.max_evaluations),
            shots: self.shots,
            seed: self.seed,
            initial_point: None,
        }
    }
}
