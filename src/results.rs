//! Persisted run record.
//!
//! One JSON document per run, holding the chosen tickers, their score, the
//! parameters that produced them and the raw bitstring distribution.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub tickers: Vec<String>,
    pub k_budget: usize,
    pub q_risk: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reps: usize,
    pub solver: String,
    /// Penalty actually folded into the objective.
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub selected_stocks: Vec<String>,
    pub optimal_score: f64,
    pub feasible: bool,
    pub parameters: RunParameters,
    pub eigenvalue: f64,
    pub offset: f64,
    pub raw_eigenstate_dict: BTreeMap<String, f64>,
    pub generated_at: String,
}

impl RunRecord {
    pub fn new(
        selected_stocks: Vec<String>,
        optimal_score: f64,
        feasible: bool,
        parameters: RunParameters,
        eigenvalue: f64,
        offset: f64,
        raw_eigenstate_dict: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            selected_stocks,
            optimal_score,
            feasible,
            parameters,
            eigenvalue,
            offset,
            raw_eigenstate_dict,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Write pretty JSON next to `path` first, then move it into place.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp_path, path)?;
        info!(path = %path.display(), "results saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
