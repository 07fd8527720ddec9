use crate::context::AppContext;
use crate::optimizer::SearchOutcome;
use crate::proposer::ProposerKind;
use crate::search_space::SearchSpace;
use crate::strategy::StrategyKind;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

pub struct SearchArgs {
    pub strategy: String,
    pub space_file: PathBuf,
    pub iterations: usize,
    pub proposer: ProposerKind,
    pub seed: Option<u64>,
    pub output: Option<PathBuf>,
}

pub async fn run(app: &AppContext, args: SearchArgs) -> Result<()> {
    let strategy = StrategyKind::parse(&args.strategy)?;
    let space = SearchSpace::load(&args.space_file)
        .with_context(|| format!("failed to load search space {}", args.space_file.display()))?;
    info!(
        "Received search command for '{}' ({} dimensions, {} proposer, seed {:?})",
        strategy,
        space.len(),
        args.proposer,
        args.seed
    );

    let mut search = app.optimization_loop(args.proposer.build(args.seed), true)?;
    let outcome = search
        .search(strategy, &space, args.iterations)
        .await
        .with_context(|| format!("search for '{}' stopped", strategy))?;

    print_outcome(&outcome);
    if let Some(path) = args.output.as_deref() {
        write_outcome(path, &outcome)?;
        info!("Wrote search outcome to {}", path.display());
    }
    Ok(())
}

fn write_outcome(path: &Path, outcome: &SearchOutcome) -> Result<()> {
    let payload = serde_json::to_string_pretty(outcome)?;
    fs::write(path, payload).with_context(|| format!("failed to write {}", path.display()))
}

fn print_outcome(outcome: &SearchOutcome) {
    println!("\n=== SEARCH RESULT: {} ===", outcome.strategy);
    println!("Evaluations: {}", outcome.history.len());
    println!("Failed folds: {}", outcome.failed_folds);
    println!("Best objective: {:.4}", outcome.best_objective);
    println!("Best parameters:");
    for (name, value) in &outcome.best_parameters {
        println!("  {}: {}", name, value);
    }
    println!();
}
