use std::sync::{Arc, Mutex};

/// Shared progress of one search run, cheap to clone and poll from another task.
#[derive(Clone, Default)]
pub struct SearchStatus {
    inner: Arc<Mutex<SearchStatusData>>,
}

#[derive(Default)]
struct SearchStatusData {
    phase: String,
    iteration_budget: usize,
    completed_evaluations: usize,
    failed_folds: usize,
    best_objective: Option<f64>,
    last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchStatusSnapshot {
    pub phase: String,
    pub iteration_budget: usize,
    pub completed_evaluations: usize,
    pub failed_folds: usize,
    pub best_objective: Option<f64>,
    pub last_error: Option<String>,
}

impl SearchStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SearchStatusData {
                phase: "Idle".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        iteration_budget: usize,
        completed_evaluations: usize,
        failed_folds: usize,
        best_objective: Option<f64>,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.iteration_budget = iteration_budget;
            data.completed_evaluations = completed_evaluations;
            data.failed_folds = failed_folds;
            data.best_objective = best_objective;
        }
    }

    pub fn set_error<S: Into<String>>(&self, error: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.last_error = Some(error.into());
        }
    }

    pub fn snapshot(&self) -> SearchStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            SearchStatusSnapshot {
                phase: data.phase.clone(),
                iteration_budget: data.iteration_budget,
                completed_evaluations: data.completed_evaluations,
                failed_folds: data.failed_folds,
                best_objective: data.best_objective,
                last_error: data.last_error.clone(),
            }
        } else {
            SearchStatusSnapshot {
                phase: "Status unavailable".to_string(),
                iteration_budget: 0,
                completed_evaluations: 0,
                failed_folds: 0,
                best_objective: None,
                last_error: None,
            }
        }
    }
}
