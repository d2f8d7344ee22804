//! Annualized return statistics from a price table.

use ndarray::{s, Array1, Array2, Axis};
use tracing::{debug, info};

use crate::error::{PortfolioError, Result};
use crate::stocks::PriceTable;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Two log-return observations are the minimum for a sample covariance.
pub const MIN_PRICE_ROWS: usize = 3;

/// Annualized mean log-return (`mu`) and covariance (`sigma`), in ticker order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStatistics {
    pub tickers: Vec<String>,
    pub mu: Array1<f64>,
    pub sigma: Array2<f64>,
}

impl ReturnStatistics {
    pub fn new(tickers: Vec<String>, mu: Array1<f64>, sigma: Array2<f64>) -> Result<Self> {
        let n = tickers.len();
        if mu.len() != n || sigma.dim() != (n, n) {
            return Err(PortfolioError::InvalidInput(format!(
                "{} tickers but mu has {} entries and sigma is {:?}",
                n,
                mu.len(),
                sigma.dim()
            )));
        }
        Ok(Self { tickers, mu, sigma })
    }

    pub fn num_assets(&self) -> usize {
        self.tickers.len()
    }
}

/// `ln(p[t] / p[t-1])` for every column; the result has one row fewer than `prices`.
pub fn log_returns(prices: &Array2<f64>) -> Array2<f64> {
    if prices.nrows() < 2 {
        return Array2::zeros((0, prices.ncols()));
    }
    let prev = prices.slice(s![..-1, ..]);
    let next = prices.slice(s![1.., ..]);
    (&next / &prev).mapv(f64::ln)
}

/// Mean and unbiased covariance of daily log returns, scaled by `factor`.
pub fn estimate_with_factor(table: &PriceTable, factor: f64) -> Result<ReturnStatistics> {
    if table.num_rows() < MIN_PRICE_ROWS {
        return Err(PortfolioError::InsufficientData {
            rows: table.num_rows(),
            required: MIN_PRICE_ROWS,
        });
    }
    if !factor.is_finite() || factor <= 0.0 {
        return Err(PortfolioError::InvalidInput(format!(
            "annualization factor must be positive, got {}",
            factor
        )));
    }

    let returns = log_returns(table.prices());
    let observations = returns.nrows() as f64;
    debug!(observations = returns.nrows(), assets = returns.ncols(), "computed log returns");

    let mean = returns
        .mean_axis(Axis(0))
        .ok_or(PortfolioError::InsufficientData { rows: table.num_rows(), required: MIN_PRICE_ROWS })?;

    let centered = &returns - &mean;
    let cov = centered.t().dot(&centered) / (observations - 1.0);
    // X'X can come back asymmetric in the last ulp from blocked matmul.
    let sigma = (&cov + &cov.t()) * (0.5 * factor);
    let mu = mean * factor;

    ReturnStatistics::new(table.tickers().to_vec(), mu, sigma)
}

/// Annualized `mu` and `sigma` using 252 trading days.
pub fn calculate_mu_and_sigma(table: &PriceTable) -> Result<ReturnStatistics> {
    info!(rows = table.num_rows(), tickers = table.tickers().len(), "calculating mu and sigma");
    let stats = estimate_with_factor(table, TRADING_DAYS_PER_YEAR)?;
    info!(mu = ?stats.mu.to_vec(), "calculation complete");
    Ok(stats)
}
