use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use quantum_portfolio::{pipeline, ExactEigensolver, MinimumEigensolver, RunConfig, YahooClient};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qportfolio")]
#[command(about = "Pick k assets with QAOA on a mean-variance objective", long_about = None)]
struct Cli {
    /// TOML file with run settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated ticker symbols
    #[arg(long, value_delimiter = ',')]
    tickers: Option<Vec<String>>,

    /// First trading day (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last trading day (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Number of assets to select
    #[arg(short)]
    k: Option<usize>,

    /// Risk aversion
    #[arg(short)]
    q: Option<f64>,

    /// Where to write the JSON result
    #[arg(long)]
    output: Option<PathBuf>,

    /// JSON price cache
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Use the exhaustive classical solver instead of QAOA
    #[arg(long)]
    exact: bool,

    /// Default log level; RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        if let Some(tickers) = self.tickers {
            config.tickers = tickers.into_iter().map(|t| t.trim().to_uppercase()).collect();
        }
        if let Some(start) = self.start {
            config.start_date = start;
        }
        if let Some(end) = self.end {
            config.end_date = end;
        }
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(q) = self.q {
            config.q = q;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if self.cache.is_some() {
            config.cache = self.cache;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let exact = cli.exact;
    let config = cli.into_config().context("invalid configuration")?;
    let client = YahooClient::new()?;

    let qaoa = config.qaoa();
    let solver: &dyn MinimumEigensolver = if exact { &ExactEigensolver } else { &qaoa };

    let outcome = pipeline::run(&config, &client, solver)
        .await
        .context("portfolio run failed")?;

    println!("Tickers:        {}", config.tickers.join(", "));
    println!("Budget k:       {}", config.k);
    println!("Solver:         {}", solver.name());
    println!("Best bitstring: {}", outcome.selection.bitstring);
    println!("Selected:       {}", outcome.selection.selected.join(", "));
    println!("Score:          {:.6}", outcome.selection.score);
    if !outcome.selection.feasible {
        println!("Warning: selection does not hold exactly {} assets", config.k);
    }
    if outcome.saved {
        println!("Results saved to {}", config.output.display());
    } else {
        println!("Results were not saved");
    }
    Ok(())
}
