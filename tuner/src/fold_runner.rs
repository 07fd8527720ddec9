use crate::backtest_api_client::BacktestJobClient;
use crate::error::{Result, TunerError};
use crate::models::{
    BacktestSubmission, DateRange, FoldResult, JobId, JobOutcome, ParameterSet, SymbolSlice,
};
use crate::performance::BacktestAnalyzer;
use crate::strategy::StrategyKind;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::time::Duration;

/// Everything a fold needs besides the candidate parameters.
#[derive(Debug, Clone)]
pub struct FoldSettings {
    pub date_range: DateRange,
    pub initial_cash: Decimal,
    pub symbols_per_fold: u32,
    pub symbol_skip: u32,
    pub fold_count: usize,
    pub use_predictor: bool,
    pub avg_prediction_error: f64,
    pub failed_fold_penalty: Decimal,
    pub poll_interval: Duration,
}

/// Scored candidate: mean fold score plus the per-fold breakdown, ordered by fold index.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub objective: Decimal,
    pub folds: Vec<FoldResult>,
}

pub struct FoldRunner<C> {
    client: C,
    settings: FoldSettings,
}

impl<C: BacktestJobClient> FoldRunner<C> {
    pub fn new(client: C, settings: FoldSettings) -> Self {
        Self { client, settings }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn settings(&self) -> &FoldSettings {
        &self.settings
    }

    /// Symbol slice for `fold_index`; folds never overlap.
    pub fn symbol_slice(&self, fold_index: usize) -> Result<SymbolSlice> {
        SymbolSlice::for_fold(
            self.settings.symbol_skip,
            self.settings.symbols_per_fold,
            fold_index,
        )
        .ok_or_else(|| {
            TunerError::Config(format!(
                "fold {} of {} symbols after skipping {} is outside the symbol range",
                fold_index, self.settings.symbols_per_fold, self.settings.symbol_skip
            ))
        })
    }

    async fn wait_for_outcome(&self, job_id: JobId) -> Result<JobOutcome> {
        loop {
            let state = self.client.poll(job_id).await?;
            if let Some(outcome) = state.outcome() {
                return Ok(outcome);
            }
            debug!("Backtest {} still {}", job_id, state.as_str());
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Runs one fold to completion. A failed simulation is scored, a cancelled one is an error.
    pub async fn run_fold(
        &self,
        strategy: StrategyKind,
        parameters: &ParameterSet,
        fold_index: usize,
        symbol_slice: SymbolSlice,
    ) -> Result<FoldResult> {
        let submission = BacktestSubmission {
            date_range: self.settings.date_range,
            initial_cash: self.settings.initial_cash,
            strategy_name: strategy.name().to_string(),
            parameters: parameters.clone(),
            symbol_slice,
            use_predictor: self.settings.use_predictor,
            avg_prediction_error: self.settings.avg_prediction_error,
            description: format!(
                "{} fold {}/{} (symbols {}..{})",
                strategy,
                fold_index + 1,
                self.settings.fold_count,
                symbol_slice.skip,
                symbol_slice.skip.saturating_add(symbol_slice.take)
            ),
        };

        let job_id = self.client.submit(&submission).await?;
        info!(
            "Submitted fold {} as backtest {} (skip {}, take {})",
            fold_index, job_id, symbol_slice.skip, symbol_slice.take
        );

        match self.wait_for_outcome(job_id).await? {
            JobOutcome::Finished => {
                let snapshots = self.client.fetch_snapshots(job_id).await?;
                let analysis = BacktestAnalyzer::analyze(snapshots)?;
                let fold_return = analysis.total_return.ok_or_else(|| {
                    TunerError::validation(
                        "finished backtest has no derivable total return",
                        &job_id.to_string(),
                    )
                })?;
                info!(
                    "Fold {} finished: return {:.4}, {} investments",
                    fold_index, fold_return, analysis.investment_count
                );
                Ok(FoldResult::finished(fold_index, fold_return))
            }
            JobOutcome::Failed => {
                warn!(
                    "Fold {} backtest {} failed; scoring {}",
                    fold_index, job_id, self.settings.failed_fold_penalty
                );
                Ok(FoldResult::failed(fold_index))
            }
            JobOutcome::Cancelled => {
                warn!("Fold {} backtest {} was cancelled", fold_index, job_id);
                Err(TunerError::JobCancelled {
                    job_id: job_id.to_string(),
                    fold_index,
                })
            }
        }
    }

    /// Configures the strategy, then runs every fold concurrently and averages their scores.
    ///
    /// The first error (a cancelled fold included) drops the remaining in-flight folds.
    pub async fn evaluate(
        &self,
        strategy: StrategyKind,
        parameters: &ParameterSet,
    ) -> Result<Evaluation> {
        if self.settings.fold_count == 0 {
            return Err(TunerError::Config("fold count must be at least 1".to_string()));
        }
        let slices = (0..self.settings.fold_count)
            .map(|fold_index| self.symbol_slice(fold_index))
            .collect::<Result<Vec<_>>>()?;

        self.client.configure_strategy(strategy, parameters).await?;

        let mut pending: FuturesUnordered<_> = slices
            .into_iter()
            .enumerate()
            .map(|(fold_index, slice)| self.run_fold(strategy, parameters, fold_index, slice))
            .collect();

        let mut folds = Vec::with_capacity(self.settings.fold_count);
        while let Some(result) = pending.next().await {
            folds.push(result?);
        }
        folds.sort_by_key(|fold| fold.fold_index);

        let objective = mean_score(&folds, self.settings.failed_fold_penalty).ok_or_else(|| {
            TunerError::validation(
                "fold scores cannot be averaged",
                &format!("{:?}", folds),
            )
        })?;
        Ok(Evaluation { objective, folds })
    }
}

/// Arithmetic mean of fold scores; `None` without folds or when the sum overflows.
pub fn mean_score(folds: &[FoldResult], penalty: Decimal) -> Option<Decimal> {
    if folds.is_empty() {
        return None;
    }
    let sum = folds
        .iter()
        .try_fold(Decimal::ZERO, |sum, fold| sum.checked_add(fold.score(penalty)))?;
    sum.checked_div(Decimal::from(folds.len() as u64))
}
