//! Sequential search driver: propose, evaluate across folds, feed the score back.

use crate::backtest_api_client::BacktestJobClient;
use crate::error::{Result, TunerError};
use crate::fold_runner::{Evaluation, FoldRunner};
use crate::models::{JobOutcome, ParameterSet};
use crate::optimizer_status::SearchStatus;
use crate::proposer::{Proposer, Trial};
use crate::search_space::SearchSpace;
use crate::strategy::StrategyKind;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum SearchState {
    Idle,
    Evaluating(ParameterSet),
    Scored {
        parameters: ParameterSet,
        objective: Decimal,
    },
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub strategy: String,
    pub best_parameters: ParameterSet,
    pub best_objective: Decimal,
    pub failed_folds: usize,
    pub history: Vec<Trial>,
}

pub struct OptimizationLoop<C> {
    runner: FoldRunner<C>,
    proposer: Box<dyn Proposer>,
    status: SearchStatus,
    state: SearchState,
    history: Vec<Trial>,
    show_progress: bool,
}

fn progress_bar(iteration_budget: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(iteration_budget as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

fn count_failed(evaluation: &Evaluation) -> usize {
    evaluation
        .folds
        .iter()
        .filter(|fold| fold.job_outcome == JobOutcome::Failed)
        .count()
}

impl<C: BacktestJobClient> OptimizationLoop<C> {
    pub fn new(runner: FoldRunner<C>, proposer: Box<dyn Proposer>) -> Self {
        Self {
            runner,
            proposer,
            status: SearchStatus::new(),
            state: SearchState::Idle,
            history: Vec::new(),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn status(&self) -> SearchStatus {
        self.status.clone()
    }

    /// `Scored` holds the most recent candidate until the next one is proposed.
    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn history(&self) -> &[Trial] {
        &self.history
    }

    fn abort(&mut self, pb: &ProgressBar, err: TunerError) -> TunerError {
        warn!("Search aborted after {} evaluations: {}", self.history.len(), err);
        self.state = SearchState::Aborted;
        self.status.set_phase("Aborted");
        self.status.set_error(err.to_string());
        pb.abandon_with_message("aborted");
        err
    }

    /// Evaluates `iteration_budget` candidates and returns the best one.
    ///
    /// Any error, a cancelled fold included, ends the search; trials already
    /// scored stay in [`OptimizationLoop::history`] but no outcome is returned.
    pub async fn search(
        &mut self,
        strategy: StrategyKind,
        space: &SearchSpace,
        iteration_budget: usize,
    ) -> Result<SearchOutcome> {
        if iteration_budget == 0 {
            return Err(TunerError::Config(
                "iteration budget must be at least 1".to_string(),
            ));
        }

        info!(
            "Starting {} search for '{}' over {} dimensions ({} iterations, {} folds)",
            self.proposer.name(),
            strategy,
            space.len(),
            iteration_budget,
            self.runner.settings().fold_count
        );

        self.history.clear();
        let pb = progress_bar(iteration_budget, self.show_progress);
        let mut best: Option<(ParameterSet, Decimal)> = None;
        let mut failed_folds = 0;
        self.status.set_phase("Searching");
        self.status.set_progress(iteration_budget, 0, 0, None);

        for iteration in 0..iteration_budget {
            let parameters = match self.proposer.propose(space, &self.history) {
                Ok(parameters) => parameters,
                Err(err) => return Err(self.abort(&pb, err)),
            };
            self.state = SearchState::Evaluating(parameters.clone());

            let evaluation = match self.runner.evaluate(strategy, &parameters).await {
                Ok(evaluation) => evaluation,
                Err(err) => return Err(self.abort(&pb, err)),
            };
            let objective = evaluation.objective;
            let Some(objective_f64) = objective.to_f64() else {
                let err =
                    TunerError::validation("objective is not representable", &objective.to_string());
                return Err(self.abort(&pb, err));
            };

            failed_folds += count_failed(&evaluation);
            self.proposer.update(&parameters, objective_f64);
            self.history.push(Trial {
                parameters: parameters.clone(),
                objective: objective_f64,
            });

            let improved = best
                .as_ref()
                .map_or(true, |(_, best_objective)| objective > *best_objective);
            if improved {
                info!(
                    "Iteration {}: new best objective {:.4}",
                    iteration + 1,
                    objective
                );
                best = Some((parameters.clone(), objective));
            } else {
                info!("Iteration {}: objective {:.4}", iteration + 1, objective);
            }
            self.state = SearchState::Scored {
                parameters,
                objective,
            };

            let best_f64 = best.as_ref().and_then(|(_, value)| value.to_f64());
            self.status
                .set_progress(iteration_budget, iteration + 1, failed_folds, best_f64);
            pb.set_position((iteration + 1) as u64);
            if let Some(value) = best_f64 {
                pb.set_message(format!("best {:.4}", value));
            }
        }

        pb.finish_and_clear();
        self.status.set_phase("Completed");

        let (best_parameters, best_objective) = best.ok_or_else(|| {
            TunerError::Config("search finished without any scored candidate".to_string())
        })?;
        info!(
            "Search for '{}' finished: best objective {:.4}",
            strategy, best_objective
        );
        Ok(SearchOutcome {
            strategy: strategy.name().to_string(),
            best_parameters,
            best_objective,
            failed_folds,
            history: self.history.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fold_runner::tests::{fold_settings, FakeClient, Script};
    use crate::proposer::RandomProposer;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProposer {
        inner: RandomProposer,
        updates: Arc<AtomicUsize>,
    }

    impl Proposer for CountingProposer {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn propose(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<ParameterSet> {
            self.inner.propose(space, history)
        }

        fn update(&mut self, parameters: &ParameterSet, objective: f64) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update(parameters, objective);
        }
    }

    fn space() -> SearchSpace {
        SearchSpace::from_json_str(
            r#"{"analysisLengthInDays": {"type": "integer", "low": 10, "high": 200}}"#,
        )
        .unwrap()
    }

    fn search_loop(
        scripts: Vec<(u32, Script)>,
        updates: Arc<AtomicUsize>,
    ) -> OptimizationLoop<FakeClient> {
        let runner = FoldRunner::new(FakeClient::new(scripts), fold_settings(1));
        let proposer = CountingProposer {
            inner: RandomProposer::new(Some(17)),
            updates,
        };
        OptimizationLoop::new(runner, Box::new(proposer))
    }

    #[tokio::test]
    async fn keeps_the_best_scored_candidate() {
        let updates = Arc::new(AtomicUsize::new(0));
        let mut search = search_loop(
            vec![
                (0, Script::Finish(dec!(0.1))),
                (0, Script::Finish(dec!(0.3))),
                (0, Script::Fail),
            ],
            updates.clone(),
        );

        let outcome = search
            .search(StrategyKind::Overreaction, &space(), 3)
            .await
            .unwrap();

        assert_eq!(outcome.best_objective, dec!(0.3));
        assert_eq!(outcome.best_parameters, outcome.history[1].parameters);
        assert_eq!(outcome.history.len(), 3);
        assert_eq!(outcome.history[2].objective, -1.0);
        assert_eq!(outcome.failed_folds, 1);
        assert_eq!(updates.load(Ordering::SeqCst), 3);
        assert_eq!(
            search.state(),
            &SearchState::Scored {
                parameters: outcome.history[2].parameters.clone(),
                objective: dec!(-1),
            }
        );

        let status = search.status().snapshot();
        assert_eq!(status.phase, "Completed");
        assert_eq!(status.completed_evaluations, 3);
        assert!((status.best_objective.unwrap() - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancelled_fold_aborts_without_updating_the_proposer() {
        let updates = Arc::new(AtomicUsize::new(0));
        let mut search = search_loop(
            vec![(0, Script::Finish(dec!(0.1))), (0, Script::Cancel)],
            updates.clone(),
        );

        let err = search
            .search(StrategyKind::Basic, &space(), 5)
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(search.history().len(), 1);
        assert_eq!(search.state(), &SearchState::Aborted);
        assert_eq!(search.status().snapshot().phase, "Aborted");
    }

    #[test]
    fn starts_idle() {
        let search = search_loop(vec![(0, Script::Fail)], Arc::new(AtomicUsize::new(0)));
        assert_eq!(search.state(), &SearchState::Idle);
    }

    #[tokio::test]
    async fn rejects_empty_budget() {
        let mut search = search_loop(vec![(0, Script::Fail)], Arc::new(AtomicUsize::new(0)));
        assert!(search.search(StrategyKind::Basic, &space(), 0).await.is_err());
    }
}
