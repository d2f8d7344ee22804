use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use quantum_portfolio::{
    pipeline, ExactEigensolver, NelderMead, PortfolioError, PriceSource, Qaoa, Result, RunConfig, RunRecord,
};

/// In-memory price source that counts how often it is queried.
struct StubSource {
    data: HashMap<String, Vec<(NaiveDate, f64)>>,
    calls: AtomicUsize,
}

impl StubSource {
    fn new(data: HashMap<String, Vec<(NaiveDate, f64)>>) -> Self {
        Self {
            data,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for StubSource {
    async fn fetch_closes(&self, ticker: &str, _start: NaiveDate, _end: NaiveDate) -> Result<Vec<(NaiveDate, f64)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.data
            .get(ticker)
            .cloned()
            .ok_or_else(|| PortfolioError::DataUnavailable(format!("unknown ticker {}", ticker)))
    }
}

/// Geometric paths driven by one alternating shock. A and C have the
/// strongest drift with tiny volatility, so {A, C} is the best pair.
fn synthetic_market() -> HashMap<String, Vec<(NaiveDate, f64)>> {
    let assets = [("A", 0.002, 0.001), ("B", 0.0005, 0.004), ("C", 0.003, 0.001), ("D", -0.001, 0.01)];
    let first = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    assets
        .iter()
        .map(|(ticker, drift, vol)| {
            let mut price = 100.0;
            let points = (0..61)
                .map(|day| {
                    if day > 0 {
                        let shock = if day % 2 == 0 { 1.0 } else { -1.0 };
                        price *= f64::exp(drift + vol * shock);
                    }
                    (first + Duration::days(day), price)
                })
                .collect();
            (ticker.to_string(), points)
        })
        .collect()
}

fn config(output: &Path) -> RunConfig {
    RunConfig {
        tickers: ["A", "B", "C", "D"].iter().map(|t| t.to_string()).collect(),
        start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        k: 2,
        q: 1.0,
        output: output.to_path_buf(),
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn test_exact_solver_selects_best_pair() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.json");
    let source = StubSource::new(synthetic_market());

    let outcome = pipeline::run(&config(&output), &source, &ExactEigensolver).await.unwrap();

    assert_eq!(outcome.selection.selected, vec!["A".to_string(), "C".to_string()]);
    assert_eq!(outcome.selection.bitstring, "0101");
    assert!(outcome.selection.feasible);
    assert!(outcome.saved);
    assert_eq!(outcome.statistics.num_assets(), 4);

    let record = RunRecord::load(&output).unwrap();
    assert_eq!(record.selected_stocks, outcome.selection.selected);
    assert_eq!(record.parameters.k_budget, 2);
    assert_eq!(record.parameters.solver, "exact");
    assert_eq!(record.raw_eigenstate_dict.len(), 1);
    assert!((record.optimal_score - outcome.selection.score).abs() < 1e-12);
}

#[tokio::test]
async fn test_qaoa_run_produces_well_formed_record() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("qaoa.json");
    let source = StubSource::new(synthetic_market());
    let cfg = config(&output);
    let solver = Qaoa {
        shots: Some(512),
        optimizer: NelderMead::new(200),
        ..Qaoa::default()
    };

    let outcome = pipeline::run(&cfg, &source, &solver).await.unwrap();
    let record = RunRecord::load(&output).unwrap();

    assert!(record.optimal_score.is_finite());
    assert!(record.selected_stocks.iter().all(|t| cfg.tickers.contains(t)));
    assert_eq!(record.parameters.tickers, cfg.tickers);
    assert_eq!(record.parameters.reps, 1);
    assert_eq!(record.parameters.solver, "qaoa");
    let total: f64 = record.raw_eigenstate_dict.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(record.raw_eigenstate_dict.keys().all(|bits| bits.len() == 4));
    assert_eq!(record.selected_stocks, outcome.selection.selected);
}

#[tokio::test]
async fn test_qaoa_record_holds_budgeted_selection() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("qaoa_exact.json");
    let source = StubSource::new(synthetic_market());
    let cfg = config(&output);
    // start inside the basin whose most likely outcome is feasible
    let solver = Qaoa {
        shots: None,
        initial_point: Some(vec![-1.25, -1.0]),
        ..Qaoa::default()
    };

    pipeline::run(&cfg, &source, &solver).await.unwrap();
    let record = RunRecord::load(&output).unwrap();

    assert_eq!(record.parameters.k_budget, 2);
    assert_eq!(record.parameters.q_risk, 1.0);
    assert_eq!(record.selected_stocks.len(), 2);
    assert!(record.feasible);
    assert_eq!(record.selected_stocks, vec!["A".to_string(), "C".to_string()]);
    let total: f64 = record.raw_eigenstate_dict.values().sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_missing_ticker_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.json");
    let mut market = synthetic_market();
    market.remove("D");
    let source = StubSource::new(market);

    let err = pipeline::run(&config(&output), &source, &ExactEigensolver).await.unwrap_err();
    assert!(matches!(err, PortfolioError::DataUnavailable(_)));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_cache_is_reused_for_matching_request() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("prices.json");
    let cfg = RunConfig {
        cache: Some(cache.clone()),
        ..config(&dir.path().join("results.json"))
    };

    let source = StubSource::new(synthetic_market());
    let first = pipeline::run(&cfg, &source, &ExactEigensolver).await.unwrap();
    assert_eq!(source.calls(), 4);
    assert!(cache.exists());

    let offline = StubSource::new(HashMap::new());
    let second = pipeline::run(&cfg, &offline, &ExactEigensolver).await.unwrap();
    assert_eq!(offline.calls(), 0);
    assert_eq!(second.selection.selected, first.selection.selected);

    // a different date range misses the cache and goes to the source
    let shifted = RunConfig {
        start_date: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        ..cfg.clone()
    };
    assert!(pipeline::run(&shifted, &offline, &ExactEigensolver).await.is_err());
    assert_eq!(offline.calls(), 1);
}

#[tokio::test]
async fn test_unwritable_output_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("missing").join("results.json");
    let source = StubSource::new(synthetic_market());

    let outcome = pipeline::run(&config(&output), &source, &ExactEigensolver).await.unwrap();
    assert!(!outcome.saved);
    assert_eq!(outcome.record.selected_stocks, vec!["A".to_string(), "C".to_string()]);
}
