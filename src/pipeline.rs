//! End-to-end run: prices -> statistics -> program -> Ising -> solver -> record.
//!
//! Stages run one after another; the first failing stage ends the run with
//! its error. Only the final write of the result file is allowed to fail
//! without aborting, in which case [`RunOutcome::saved`] is `false`.

use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::Result;
use crate::interpreter::{interpret_result, Selection};
use crate::ising::{auto_penalty, convert_to_ising};
use crate::problem::{from_statistics, QuadraticProgram};
use crate::results::{RunParameters, RunRecord};
use crate::solver::{EigensolverResult, MinimumEigensolver};
use crate::statistics::{calculate_mu_and_sigma, ReturnStatistics};
use crate::stocks::{fetch_stock_data, PriceSource, PriceTable};

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub statistics: ReturnStatistics,
    pub selection: Selection,
    pub record: RunRecord,
    /// Whether the record reached `config.output`.
    pub saved: bool,
}

/// Everything produced between the statistics and the selection.
#[derive(Debug, Clone)]
pub struct Optimization {
    pub program: QuadraticProgram,
    pub penalty: f64,
    pub offset: f64,
    pub result: EigensolverResult,
    pub selection: Selection,
}

/// Prices for the configured run, from the cache when it covers the request.
pub async fn load_prices<S>(config: &RunConfig, source: &S) -> Result<PriceTable>
where
    S: PriceSource + ?Sized,
{
    if let Some(cache) = &config.cache {
        if cache.exists() {
            match PriceTable::load_cache(cache) {
                Ok((table, meta)) if meta.matches(&config.tickers, config.start_date, config.end_date) => {
                    info!(path = %cache.display(), rows = table.num_rows(), "using cached prices");
                    return Ok(table);
                }
                Ok(_) => info!(path = %cache.display(), "cache covers a different request, refetching"),
                Err(e) => warn!(path = %cache.display(), error = %e, "ignoring unreadable price cache"),
            }
        }
    }

    let table = fetch_stock_data(source, &config.tickers, config.start_date, config.end_date).await?;

    if let Some(cache) = &config.cache {
        if let Err(e) = table.save_cache(cache, config.start_date, config.end_date) {
            warn!(path = %cache.display(), error = %e, "could not write price cache");
        }
    }
    Ok(table)
}

/// Build the program for `stats`, solve it and decode the best bitstring.
pub fn optimize<M>(
    stats: &ReturnStatistics,
    k: usize,
    q: f64,
    penalty: Option<f64>,
    solver: &M,
) -> Result<Optimization>
where
    M: MinimumEigensolver + ?Sized,
{
    debug!(tickers = ?stats.tickers, mu = %stats.mu, sigma = %stats.sigma, "return statistics");
    let program = from_statistics(stats, k, q)?;
    debug!(%program, "quadratic program");
    let penalty = match penalty {
        Some(p) => p,
        None => auto_penalty(&program),
    };
    info!(n = stats.num_assets(), k, q, penalty, "encoding portfolio problem");

    let (hamiltonian, offset) = convert_to_ising(&program, Some(penalty))?;
    debug!(%hamiltonian, offset, "ising hamiltonian");

    info!(solver = solver.name(), qubits = hamiltonian.num_qubits(), "solving");
    let result = solver.compute_minimum_eigenvalue(&hamiltonian)?;
    info!(
        eigenvalue = result.eigenvalue,
        evaluations = result.cost_function_evals,
        "solver finished"
    );

    let selection = interpret_result(&result, &stats.tickers, &program)?;
    Ok(Optimization {
        program,
        penalty,
        offset,
        result,
        selection,
    })
}

pub async fn run<S, M>(config: &RunConfig, source: &S, solver: &M) -> Result<RunOutcome>
where
    S: PriceSource + ?Sized,
    M: MinimumEigensolver + ?Sized,
{
    config.validate()?;
    info!(
        tickers = config.tickers.len(),
        start = %config.start_date,
        end = %config.end_date,
        "starting portfolio run"
    );

    let table = load_prices(config, source).await?;
    let statistics = calculate_mu_and_sigma(&table)?;
    let optimization = optimize(&statistics, config.k, config.q, config.penalty, solver)?;

    let record = RunRecord::new(
        optimization.selection.selected.clone(),
        optimization.selection.score,
        optimization.selection.feasible,
        RunParameters {
            tickers: config.tickers.clone(),
            k_budget: config.k,
            q_risk: config.q,
            start_date: config.start_date,
            end_date: config.end_date,
            reps: config.reps,
            solver: solver.name().to_string(),
            penalty: optimization.penalty,
        },
        optimization.result.eigenvalue,
        optimization.offset,
        optimization.result.eigenstate.clone(),
    );

    let saved = match record.save(&config.output) {
        Ok(()) => true,
        Err(e) => {
            error!(path = %config.output.display(), error = %e, "failed to save results");
            false
        }
    };

    Ok(RunOutcome {
        statistics,
        selection: optimization.selection,
        record,
        saved,
    })
}
