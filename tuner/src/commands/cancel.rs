use crate::backtest_api_client::BacktestJobClient;
use crate::context::AppContext;
use crate::models::JobId;
use anyhow::{Context, Result};

pub async fn run(app: &AppContext, job_ids: &[String]) -> Result<()> {
    let client = app.api_client()?;
    for raw in job_ids {
        let job_id: JobId = raw
            .parse()
            .with_context(|| format!("'{}' is not a backtest id", raw))?;
        client
            .cancel(job_id)
            .await
            .with_context(|| format!("failed to cancel backtest {}", job_id))?;
        println!("Cancelled {}", job_id);
    }
    Ok(())
}
