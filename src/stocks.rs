//! Historical price loading
//!
//! This module handles:
//! - Fetching adjusted daily closes from Yahoo Finance
//! - Aligning per-ticker series into a single price table
//! - Loading and persisting the JSON price cache

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ndarray::Array2;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{PortfolioError, Result};

const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) quantum-portfolio/0.1";

static TICKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9^][A-Z0-9.\-=^]{0,14}$").expect("ticker pattern is valid"));

/// Exchange-style symbol check: upper-case letters, digits and `. - = ^`.
pub fn is_valid_ticker(ticker: &str) -> bool {
    TICKER_PATTERN.is_match(ticker)
}

/// Reject empty, malformed or duplicated ticker lists.
pub fn validate_tickers(tickers: &[String]) -> Result<()> {
    if tickers.is_empty() {
        return Err(PortfolioError::InvalidInput("ticker list is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for ticker in tickers {
        if !is_valid_ticker(ticker) {
            return Err(PortfolioError::InvalidInput(format!("'{}' is not a valid ticker symbol", ticker)));
        }
        if !seen.insert(ticker.as_str()) {
            return Err(PortfolioError::InvalidInput(format!("duplicate ticker '{}'", ticker)));
        }
    }
    Ok(())
}

/// Adjusted closing prices: one row per trading day (ascending), one column per ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    tickers: Vec<String>,
    dates: Vec<NaiveDate>,
    prices: Array2<f64>,
}

impl PriceTable {
    /// Build a table from already aligned data.
    pub fn new(tickers: Vec<String>, dates: Vec<NaiveDate>, prices: Array2<f64>) -> Result<Self> {
        if prices.nrows() != dates.len() || prices.ncols() != tickers.len() {
            return Err(PortfolioError::InvalidInput(format!(
                "price matrix is {}x{} but there are {} dates and {} tickers",
                prices.nrows(),
                prices.ncols(),
                dates.len(),
                tickers.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PortfolioError::InvalidInput(
                "dates must be strictly ascending".to_string(),
            ));
        }
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(PortfolioError::InvalidInput(
                "prices must be finite and positive".to_string(),
            ));
        }
        Ok(Self { tickers, dates, prices })
    }

    /// Align per-ticker `(date, close)` series on trading day.
    ///
    /// Duplicate dates keep the last observation. Non-finite or non-positive
    /// prices count as missing, and any day missing a price for some ticker
    /// is dropped.
    pub fn from_series(series: Vec<(String, Vec<(NaiveDate, f64)>)>) -> Result<Self> {
        if series.is_empty() {
            return Err(PortfolioError::InvalidInput("no price series given".to_string()));
        }

        let mut tickers = Vec::with_capacity(series.len());
        let mut columns: Vec<BTreeMap<NaiveDate, f64>> = Vec::with_capacity(series.len());
        for (ticker, points) in series {
            if tickers.contains(&ticker) {
                return Err(PortfolioError::InvalidInput(format!("duplicate ticker '{}'", ticker)));
            }
            let mut column = BTreeMap::new();
            for (date, price) in points {
                if price.is_finite() && price > 0.0 {
                    column.insert(date, price);
                } else {
                    column.remove(&date);
                }
            }
            tickers.push(ticker);
            columns.push(column);
        }

        let dates: Vec<NaiveDate> = columns[0]
            .keys()
            .filter(|date| columns[1..].iter().all(|c| c.contains_key(date)))
            .copied()
            .collect();

        if dates.is_empty() {
            return Err(PortfolioError::DataUnavailable(
                "no trading day has a price for every ticker".to_string(),
            ));
        }

        let prices = Array2::from_shape_fn((dates.len(), tickers.len()), |(row, col)| {
            columns[col][&dates[row]]
        });

        Ok(Self { tickers, dates, prices })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn prices(&self) -> &Array2<f64> {
        &self.prices
    }

    pub fn num_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Load a table written by [`PriceTable::save_cache`].
    pub fn load_cache(path: impl AsRef<Path>) -> Result<(Self, CacheMetadata)> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let cache: PriceCache = serde_json::from_str(&contents)?;

        let rows = cache.prices.len();
        let cols = cache.metadata.tickers.len();
        if cache.prices.iter().any(|row| row.len() != cols) {
            return Err(PortfolioError::InvalidInput(format!(
                "cache '{}' has rows that do not match its {} tickers",
                path.display(),
                cols
            )));
        }
        let flat: Vec<f64> = cache.prices.into_iter().flatten().collect();
        let prices = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| PortfolioError::InvalidInput(e.to_string()))?;

        let table = Self::new(cache.metadata.tickers.clone(), cache.dates, prices)?;
        debug!(path = %path.display(), rows, "loaded price cache");
        Ok((table, cache.metadata))
    }

    /// Persist the table as JSON, writing to a temp file first and renaming it into place.
    pub fn save_cache(&self, path: impl AsRef<Path>, start: NaiveDate, end: NaiveDate) -> Result<()> {
        let path = path.as_ref();
        let cache = PriceCache {
            metadata: CacheMetadata {
                generated_at: Utc::now().to_rfc3339(),
                tickers: self.tickers.clone(),
                start_date: start,
                end_date: end,
                rows: self.num_rows(),
            },
            dates: self.dates.clone(),
            prices: self.prices.outer_iter().map(|row| row.to_vec()).collect(),
        };

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(&cache)?)?;
        fs::rename(&tmp_path, path)?;
        debug!(path = %path.display(), rows = self.num_rows(), "wrote price cache");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub generated_at: String,
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rows: usize,
}

impl CacheMetadata {
    /// True when the cache was produced for exactly this request.
    pub fn matches(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> bool {
        self.tickers == tickers && self.start_date == start && self.end_date == end
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PriceCache {
    metadata: CacheMetadata,
    dates: Vec<NaiveDate>,
    prices: Vec<Vec<f64>>,
}

/// Anything that can produce daily adjusted closes for one ticker.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Closes for `ticker` from `start` (inclusive) to `end` (exclusive).
    async fn fetch_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>>;
}

/// Yahoo Finance chart API client.
#[derive(Debug, Clone)]
pub struct YahooClient {
    base_url: String,
    client: reqwest::Client,
}

impl YahooClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(YAHOO_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl PriceSource for YahooClient {
    async fn fetch_closes(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        let period1 = start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let period2 = end.and_time(NaiveTime::MIN).and_utc().timestamp();
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "div,splits".to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(PortfolioError::DataUnavailable(format!(
                "{}: request failed [CODE: {}]",
                ticker, status
            )));
        }

        let json: Value = serde_json::from_str(&text)?;
        if let Some(description) = json["chart"]["error"]["description"].as_str() {
            return Err(PortfolioError::DataUnavailable(format!("{}: {}", ticker, description)));
        }

        extract_adjusted_closes(&json).ok_or_else(|| {
            PortfolioError::DataUnavailable(format!("{}: response has no price history", ticker))
        })
    }
}

/// Pull `(date, adjusted close)` pairs out of a chart response.
///
/// Falls back to the raw close when the response carries no `adjclose`
/// block. Null entries are skipped. Bars are dated in the exchange's local
/// time using `meta.gmtoffset`.
fn extract_adjusted_closes(json: &Value) -> Option<Vec<(NaiveDate, f64)>> {
    let result = json["chart"]["result"].as_array()?.first()?;
    let timestamps = result["timestamp"].as_array()?;
    let gmt_offset = result["meta"]["gmtoffset"].as_i64().unwrap_or(0);

    let closes = result["indicators"]["adjclose"]
        .as_array()
        .and_then(|a| a.first())
        .and_then(|a| a["adjclose"].as_array())
        .or_else(|| {
            result["indicators"]["quote"]
                .as_array()
                .and_then(|q| q.first())
                .and_then(|q| q["close"].as_array())
        })?;

    Some(
        timestamps
            .iter()
            .zip(closes.iter())
            .filter_map(|(ts, close)| {
                let date = DateTime::from_timestamp(ts.as_i64()? + gmt_offset, 0)?.date_naive();
                Some((date, close.as_f64()?))
            })
            .collect(),
    )
}

/// Fetch adjusted closes for every ticker and align them into one table.
///
/// Tickers are fetched one after another. Any provider failure, or an
/// aligned table with no rows, is reported as [`PortfolioError::DataUnavailable`].
pub async fn fetch_stock_data<S>(
    source: &S,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceTable>
where
    S: PriceSource + ?Sized,
{
    validate_tickers(tickers)?;
    if start >= end {
        return Err(PortfolioError::InvalidInput(format!(
            "start date {} must be before end date {}",
            start, end
        )));
    }

    info!(?tickers, %start, %end, "fetching price data");

    let mut series = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        match source.fetch_closes(ticker, start, end).await {
            Ok(points) if points.is_empty() => {
                error!(%ticker, "no data fetched, check ticker or date range");
                return Err(PortfolioError::DataUnavailable(format!(
                    "{}: no prices between {} and {}",
                    ticker, start, end
                )));
            }
            Ok(points) => {
                debug!(%ticker, points = points.len(), "fetched closes");
                series.push((ticker.clone(), points));
            }
            Err(e) => {
                error!(%ticker, error = %e, "error fetching data");
                return Err(match e {
                    PortfolioError::DataUnavailable(_) => e,
                    other => PortfolioError::DataUnavailable(format!("{}: {}", ticker, other)),
                });
            }
        }
    }

    let table = PriceTable::from_series(series)?;
    if table.num_rows() < 3 {
        warn!(rows = table.num_rows(), "very short price history after alignment");
    }
    info!(rows = table.num_rows(), "price data ready");
    Ok(table)
}
