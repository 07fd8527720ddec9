//! Candidate proposal strategies for the search loop.
//!
//! A proposer only ever sees the declared [`SearchSpace`] and the scored
//! history; it never talks to the backtest service.

use crate::error::{Result, TunerError};
use crate::models::ParameterSet;
use crate::param_utils::{add_single_parameter_neighbor_variations, parameter_signature};
use crate::search_space::SearchSpace;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use statrs::distribution::{Continuous, Normal};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

const LOCAL_STEP_MULTIPLIERS: [f64; 4] = [-2.0, -1.0, 1.0, 2.0];
const LOCAL_REAL_STEPS: u32 = 20;
const MAX_RANDOM_RETRIES: usize = 32;

const PARZEN_STARTUP_TRIALS: usize = 10;
const PARZEN_GAMMA: f64 = 0.25;
const PARZEN_CANDIDATES: usize = 24;
const MIN_KERNEL_WIDTH: f64 = 0.03;

/// One scored evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub parameters: ParameterSet,
    pub objective: f64,
}

/// Black-box optimizer driving the search. Higher objectives are better.
pub trait Proposer: Send {
    fn name(&self) -> &'static str;

    fn propose(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<ParameterSet>;

    /// Called once per successfully scored candidate, never for aborted ones.
    fn update(&mut self, parameters: &ParameterSet, objective: f64);
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProposerKind {
    Random,
    Local,
    #[default]
    Bayes,
}

impl ProposerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposerKind::Random => "random",
            ProposerKind::Local => "local",
            ProposerKind::Bayes => "bayes",
        }
    }

    pub fn build(self, seed: Option<u64>) -> Box<dyn Proposer> {
        match self {
            ProposerKind::Random => Box::new(RandomProposer::new(seed)),
            ProposerKind::Local => Box::new(LocalSearchProposer::new(seed)),
            ProposerKind::Bayes => Box::new(ParzenProposer::new(seed)),
        }
    }
}

impl fmt::Display for ProposerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposerKind {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(ProposerKind::Random),
            "local" => Ok(ProposerKind::Local),
            "bayes" | "tpe" => Ok(ProposerKind::Bayes),
            other => Err(TunerError::Config(format!(
                "unknown proposer '{}' (expected random, local or bayes)",
                other
            ))),
        }
    }
}

pub struct RandomProposer {
    rng: StdRng,
}

impl RandomProposer {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded_rng(seed),
        }
    }
}

impl Proposer for RandomProposer {
    fn name(&self) -> &'static str {
        "random"
    }

    fn propose(&mut self, space: &SearchSpace, _history: &[Trial]) -> Result<ParameterSet> {
        Ok(space.sample(&mut self.rng))
    }

    fn update(&mut self, _parameters: &ParameterSet, _objective: f64) {}
}

/// Hill climbing around the best candidate seen so far, one dimension at a time.
pub struct LocalSearchProposer {
    rng: StdRng,
    incumbent: Option<(ParameterSet, f64)>,
    expanded: Option<String>,
    queue: VecDeque<ParameterSet>,
    evaluated: HashSet<String>,
}

impl LocalSearchProposer {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded_rng(seed),
            incumbent: None,
            expanded: None,
            queue: VecDeque::new(),
            evaluated: HashSet::new(),
        }
    }

    fn expand_incumbent(&mut self, space: &SearchSpace) {
        let Some((incumbent, _)) = &self.incumbent else {
            return;
        };
        let signature = parameter_signature(incumbent);
        if self.expanded.as_deref() == Some(signature.as_str()) {
            return;
        }

        let mut seen = self.evaluated.clone();
        let mut neighbors = Vec::new();
        add_single_parameter_neighbor_variations(
            space,
            &LOCAL_STEP_MULTIPLIERS,
            LOCAL_REAL_STEPS,
            incumbent,
            &mut seen,
            &mut neighbors,
        );
        debug!(
            "Queued {} neighbor variations around {}",
            neighbors.len(),
            signature
        );
        self.queue.clear();
        self.queue.extend(neighbors);
        self.expanded = Some(signature);
    }

    fn random_unseen(&mut self, space: &SearchSpace) -> ParameterSet {
        let mut candidate = space.sample(&mut self.rng);
        for _ in 0..MAX_RANDOM_RETRIES {
            if !self.evaluated.contains(&parameter_signature(&candidate)) {
                break;
            }
            candidate = space.sample(&mut self.rng);
        }
        candidate
    }
}

impl Proposer for LocalSearchProposer {
    fn name(&self) -> &'static str {
        "local"
    }

    fn propose(&mut self, space: &SearchSpace, _history: &[Trial]) -> Result<ParameterSet> {
        self.expand_incumbent(space);
        while let Some(candidate) = self.queue.pop_front() {
            if !self.evaluated.contains(&parameter_signature(&candidate)) {
                return Ok(candidate);
            }
        }
        Ok(self.random_unseen(space))
    }

    fn update(&mut self, parameters: &ParameterSet, objective: f64) {
        self.evaluated.insert(parameter_signature(parameters));
        let improved = match &self.incumbent {
            Some((_, best)) => objective > *best,
            None => true,
        };
        if improved {
            self.incumbent = Some((parameters.clone(), objective));
        }
    }
}

/// Tree-structured Parzen estimator over the unit hypercube.
pub struct ParzenProposer {
    rng: StdRng,
    startup_trials: usize,
    gamma: f64,
    candidates: usize,
}

impl ParzenProposer {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded_rng(seed),
            startup_trials: PARZEN_STARTUP_TRIALS,
            gamma: PARZEN_GAMMA,
            candidates: PARZEN_CANDIDATES,
        }
    }

    pub fn with_startup_trials(mut self, startup_trials: usize) -> Self {
        self.startup_trials = startup_trials.max(2);
        self
    }

    fn kernel_width(count: usize) -> f64 {
        (0.5 / (count.max(1) as f64).sqrt()).max(MIN_KERNEL_WIDTH)
    }

    fn log_density(points: &[Vec<f64>], x: &[f64], width: f64) -> Result<f64> {
        let mut terms = Vec::with_capacity(points.len());
        for point in points {
            let mut log_pdf = 0.0;
            for (center, value) in point.iter().zip(x) {
                log_pdf += kernel(*center, width)?.ln_pdf(*value);
            }
            terms.push(log_pdf);
        }
        let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return Ok(f64::NEG_INFINITY);
        }
        let sum: f64 = terms.iter().map(|t| (t - max).exp()).sum();
        Ok(max + (sum / points.len() as f64).ln())
    }

    fn split(&self, observed: &mut [(Vec<f64>, f64)]) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        observed.sort_by(|a, b| b.1.total_cmp(&a.1));
        let good_count = ((self.gamma * observed.len() as f64).ceil() as usize)
            .clamp(1, observed.len().saturating_sub(1).max(1));
        let good = observed[..good_count].iter().map(|o| o.0.clone()).collect();
        let bad = observed[good_count..].iter().map(|o| o.0.clone()).collect();
        (good, bad)
    }
}

fn kernel(center: f64, width: f64) -> Result<Normal> {
    Normal::new(center, width)
        .map_err(|e| TunerError::Config(format!("invalid kernel ({}, {}): {}", center, width, e)))
}

impl Proposer for ParzenProposer {
    fn name(&self) -> &'static str {
        "bayes"
    }

    fn propose(&mut self, space: &SearchSpace, history: &[Trial]) -> Result<ParameterSet> {
        let mut observed: Vec<(Vec<f64>, f64)> = history
            .iter()
            .filter(|trial| trial.objective.is_finite())
            .filter_map(|trial| {
                space
                    .to_unit_point(&trial.parameters)
                    .map(|point| (point, trial.objective))
            })
            .collect();

        if observed.len() < self.startup_trials.max(2) {
            return Ok(space.sample(&mut self.rng));
        }

        let (good, bad) = self.split(&mut observed);
        let good_width = Self::kernel_width(good.len());
        let bad_width = Self::kernel_width(bad.len());

        let mut best: Option<(Vec<f64>, f64)> = None;
        for _ in 0..self.candidates {
            let center = &good[self.rng.gen_range(0..good.len())];
            let mut candidate = Vec::with_capacity(center.len());
            for value in center {
                let sampled: f64 = self.rng.sample(kernel(*value, good_width)?);
                candidate.push(sampled.clamp(0.0, 1.0));
            }

            let score = Self::log_density(&good, &candidate, good_width)?
                - Self::log_density(&bad, &candidate, bad_width)?;
            if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
                best = Some((candidate, score));
            }
        }

        match best {
            Some((point, score)) => {
                debug!("Parzen candidate score l(x)/g(x) = {:.4}", score.exp());
                Ok(space.from_unit_point(&point))
            }
            None => Ok(space.sample(&mut self.rng)),
        }
    }

    fn update(&mut self, _parameters: &ParameterSet, _objective: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterValue;

    fn space() -> SearchSpace {
        SearchSpace::from_json_str(
            r#"{
                "x": {"type": "real", "low": 0.0, "high": 10.0},
                "n": {"type": "integer", "low": 1, "high": 20}
            }"#,
        )
        .unwrap()
    }

    fn objective(parameters: &ParameterSet) -> f64 {
        let x = parameters["x"].as_f64().unwrap();
        let n = parameters["n"].as_f64().unwrap();
        -((x - 7.0).powi(2) + (n - 5.0).powi(2))
    }

    fn run(proposer: &mut dyn Proposer, iterations: usize) -> Vec<Trial> {
        let space = space();
        let mut history = Vec::new();
        for _ in 0..iterations {
            let parameters = proposer.propose(&space, &history).unwrap();
            assert!(space.contains(&parameters), "{:?}", parameters);
            let score = objective(&parameters);
            proposer.update(&parameters, score);
            history.push(Trial {
                parameters,
                objective: score,
            });
        }
        history
    }

    fn best(history: &[Trial]) -> f64 {
        history
            .iter()
            .map(|t| t.objective)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    #[test]
    fn parses_proposer_kinds() {
        assert_eq!("Bayes".parse::<ProposerKind>().unwrap(), ProposerKind::Bayes);
        assert_eq!("local".parse::<ProposerKind>().unwrap(), ProposerKind::Local);
        assert!("grid".parse::<ProposerKind>().is_err());
        assert_eq!(ProposerKind::default().build(Some(1)).name(), "bayes");
    }

    #[test]
    fn seeded_random_proposals_are_reproducible() {
        let first = run(&mut RandomProposer::new(Some(42)), 5);
        let second = run(&mut RandomProposer::new(Some(42)), 5);
        let first: Vec<_> = first.into_iter().map(|t| t.parameters).collect();
        let second: Vec<_> = second.into_iter().map(|t| t.parameters).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn local_search_walks_towards_the_optimum() {
        let history = run(&mut LocalSearchProposer::new(Some(3)), 150);
        let initial = history[0].objective;
        assert!(best(&history) > initial || initial == 0.0);
        assert!(best(&history) > -10.0, "best {}", best(&history));
    }

    #[test]
    fn local_search_proposes_neighbors_of_the_incumbent() {
        let space = space();
        let mut proposer = LocalSearchProposer::new(Some(5));
        let mut start = ParameterSet::new();
        start.insert("x".to_string(), ParameterValue::Real(5.0));
        start.insert("n".to_string(), ParameterValue::Integer(10));
        proposer.update(&start, objective(&start));

        let next = proposer.propose(&space, &[]).unwrap();
        let changed = next
            .iter()
            .filter(|(name, value)| start.get(*name) != Some(value))
            .count();
        assert_eq!(changed, 1);
    }

    #[test]
    fn parzen_improves_on_its_startup_trials() {
        let mut proposer = ParzenProposer::new(Some(9)).with_startup_trials(8);
        let history = run(&mut proposer, 40);
        let startup_best = best(&history[..8]);
        assert!(best(&history) >= startup_best);
        assert!(best(&history) > -20.0, "best {}", best(&history));
    }
}
