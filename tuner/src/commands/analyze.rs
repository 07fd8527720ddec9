use crate::backtest_api_client::BacktestJobClient;
use crate::context::AppContext;
use crate::error::{Result as TunerResult, TunerError};
use crate::models::{BacktestAnalysis, JobId, JobOutcome};
use crate::performance::BacktestAnalyzer;
use anyhow::{Context, Result};
use log::info;
use rust_decimal::Decimal;

/// Fetches a finished job's snapshot series and analyzes it.
pub async fn analyze_job<C: BacktestJobClient + ?Sized>(
    client: &C,
    job_id: JobId,
) -> TunerResult<BacktestAnalysis> {
    let state = client.poll(job_id).await?;
    if state.outcome() != Some(JobOutcome::Finished) {
        return Err(TunerError::Config(format!(
            "backtest {} is {}; only finished backtests can be analyzed",
            job_id,
            state.as_str()
        )));
    }
    let snapshots = client.fetch_snapshots(job_id).await?;
    info!(
        "Analyzing {} snapshots of backtest {}",
        snapshots.len(),
        job_id
    );
    BacktestAnalyzer::analyze(snapshots)
}

fn percent(value: Decimal) -> String {
    format!("{:.2}%", value * Decimal::ONE_HUNDRED)
}

pub async fn run(app: &AppContext, job_id: &str, top: usize, json: bool) -> Result<()> {
    let job_id: JobId = job_id
        .parse()
        .with_context(|| format!("'{}' is not a backtest id", job_id))?;
    let client = app.api_client()?;
    let analysis = analyze_job(&client, job_id)
        .await
        .with_context(|| format!("failed to analyze backtest {}", job_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    println!("\n=== BACKTEST {} ===", job_id);
    match analysis.total_return {
        Some(total_return) => println!("Total return: {}", percent(total_return)),
        None => println!("Total return: no data"),
    }
    println!("Investments: {}", analysis.investment_count);
    println!(
        "Average investment length: {:.1} days",
        analysis.avg_investment_length_days
    );
    println!(
        "Positive investments: {}",
        percent(analysis.positive_investment_ratio)
    );

    if !analysis.investments.is_empty() {
        println!("\nTop {} investments by profit ratio:", top.min(analysis.investments.len()));
        for (i, investment) in analysis.investments.iter().take(top).enumerate() {
            let ratio = investment
                .profit_ratio()
                .map(|ratio| format!("{:.4}", ratio))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "  {:>3}. {:<8} {} -> {}  entry {:.2}  exit {:.2}  ratio {}",
                i + 1,
                investment.symbol,
                investment.open_date.format("%Y-%m-%d"),
                investment.close_date.format("%Y-%m-%d"),
                investment.entry_value,
                investment.exit_value,
                ratio
            );
        }
    }
    println!();

    Ok(())
}
