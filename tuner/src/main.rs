use anyhow::Result;
use backtest_tuner::commands::{analyze, cancel, search, strategies};
use backtest_tuner::config::{END_DATE_KEY, FOLD_COUNT_KEY, START_DATE_KEY};
use backtest_tuner::context::AppContext;
use backtest_tuner::proposer::ProposerKind;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tuner")]
#[command(about = "Tune strategy parameters against a remote backtest service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct investments and summary statistics for a finished backtest
    Analyze {
        /// Backtest id (UUID)
        job_id: String,
        /// Number of investments to list, best profit ratio first
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search a strategy's parameter space, scoring each candidate over symbol folds
    Search {
        /// Strategy name, e.g. "Trend following strategy"
        strategy: String,
        /// JSON file declaring the search space
        #[arg(long = "space", value_name = "PATH")]
        space_file: PathBuf,
        /// Number of candidates to evaluate
        #[arg(short = 'n', long, default_value_t = 50)]
        iterations: usize,
        /// Proposal strategy: random, local or bayes
        #[arg(long, default_value = "bayes")]
        proposer: ProposerKind,
        /// Seed for reproducible proposals
        #[arg(long)]
        seed: Option<u64>,
        /// Number of disjoint symbol folds per candidate
        #[arg(long)]
        folds: Option<u32>,
        /// First simulated day (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last simulated day (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Write the outcome and full history as JSON
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Cancel running backtests
    Cancel {
        /// Backtest ids (UUID)
        #[arg(required = true, num_args = 1..)]
        job_ids: Vec<String>,
    },
    /// List known strategies and their parameter groups
    Strategies {
        /// Also print the parameter bundle currently stored by the service
        #[arg(long)]
        current: bool,
    },
}

fn setting_overrides(command: &Commands) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    if let Commands::Search {
        folds, start, end, ..
    } = command
    {
        if let Some(folds) = folds {
            overrides.insert(FOLD_COUNT_KEY.to_string(), folds.to_string());
        }
        if let Some(start) = start {
            overrides.insert(START_DATE_KEY.to_string(), start.format("%Y-%m-%d").to_string());
        }
        if let Some(end) = end {
            overrides.insert(END_DATE_KEY.to_string(), end.format("%Y-%m-%d").to_string());
        }
    }
    overrides
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_context = AppContext::initialize(setting_overrides(&command));
    info!("Starting tuner. Backtest results are not a guarantee of future returns.");

    match command {
        Commands::Analyze { job_id, top, json } => {
            analyze::run(&app_context, &job_id, top, json).await?;
        }
        Commands::Search {
            strategy,
            space_file,
            iterations,
            proposer,
            seed,
            output,
            ..
        } => {
            search::run(
                &app_context,
                search::SearchArgs {
                    strategy,
                    space_file,
                    iterations,
                    proposer,
                    seed,
                    output,
                },
            )
            .await?;
        }
        Commands::Cancel { job_ids } => {
            cancel::run(&app_context, &job_ids).await?;
        }
        Commands::Strategies { current } => {
            strategies::run(&app_context, current).await?;
        }
    }

    Ok(())
}
