use crate::error::{Result, TunerError};
use crate::models::{ParameterSet, ParameterValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared damping factor living outside the per-strategy groups.
pub const LIMIT_PRICE_DAMPING: &str = "limitPriceDamping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Basic,
    GreedyOptimal,
    Overreaction,
    OverreactionWithPredictions,
    TrendFollowing,
    TrendFollowingWithPredictions,
    Pca,
    PcaWithPredictions,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 8] = [
        StrategyKind::Basic,
        StrategyKind::GreedyOptimal,
        StrategyKind::Overreaction,
        StrategyKind::OverreactionWithPredictions,
        StrategyKind::TrendFollowing,
        StrategyKind::TrendFollowingWithPredictions,
        StrategyKind::Pca,
        StrategyKind::PcaWithPredictions,
    ];

    /// Name understood by the backtest service.
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Basic => "Basic strategy",
            StrategyKind::GreedyOptimal => "Greedy optimal strategy",
            StrategyKind::Overreaction => "Overreaction strategy",
            StrategyKind::OverreactionWithPredictions => "Overreaction strategy with predictions",
            StrategyKind::TrendFollowing => "Trend following strategy",
            StrategyKind::TrendFollowingWithPredictions => {
                "Trend following strategy with predictions"
            }
            StrategyKind::Pca => "PCA strategy",
            StrategyKind::PcaWithPredictions => "PCA strategy with predictions",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| TunerError::Config(format!("'{}' is not a valid strategy name", raw)))
    }

    pub fn parameter_group(self) -> Option<ParameterGroup> {
        match self {
            StrategyKind::Basic => Some(ParameterGroup::Basic),
            StrategyKind::GreedyOptimal => None,
            StrategyKind::Overreaction | StrategyKind::OverreactionWithPredictions => {
                Some(ParameterGroup::BuyLosers)
            }
            StrategyKind::TrendFollowing | StrategyKind::TrendFollowingWithPredictions => {
                Some(ParameterGroup::BuyWinners)
            }
            StrategyKind::Pca | StrategyKind::PcaWithPredictions => Some(ParameterGroup::Pca),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterGroup {
    Basic,
    BuyLosers,
    BuyWinners,
    Pca,
}

impl ParameterGroup {
    pub fn field_name(self) -> &'static str {
        match self {
            ParameterGroup::Basic => "basic",
            ParameterGroup::BuyLosers => "buyLosers",
            ParameterGroup::BuyWinners => "buyWinners",
            ParameterGroup::Pca => "pca",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicStrategyOptions {
    pub max_stocks_buy_count: i32,
    pub min_days_decreasing: i32,
    pub min_days_increasing: i32,
    pub top_growing_symbols_buy_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyLosersOptions {
    pub evaluation_frequency_in_days: i32,
    pub analysis_length_in_days: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyWinnersOptions {
    pub evaluation_frequency_in_days: i32,
    pub analysis_length_in_days: i32,
    pub simultaneous_evaluations: i32,
    pub buy_wait_time_in_days: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcaOptions {
    pub variance_fraction: f64,
    pub analysis_length_in_days: i32,
    pub decomposition_expiration_in_days: i32,
    pub undervalued_threshold: f64,
    pub ignored_threshold: f64,
    pub diverse_threshold: f64,
}

/// Full parameter bundle stored by the backtest service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyParameters {
    pub limit_price_damping: f64,
    pub basic: BasicStrategyOptions,
    pub buy_losers: BuyLosersOptions,
    pub buy_winners: BuyWinnersOptions,
    pub pca: PcaOptions,
}

impl StrategyParameters {
    /// Returns a copy of the bundle with `parameters` written into the
    /// damping factor and the group owned by `strategy`.
    pub fn apply(&self, strategy: StrategyKind, parameters: &ParameterSet) -> Result<Self> {
        let mut bundle = serde_json::to_value(self)
            .map_err(|e| TunerError::validation("failed to encode strategy parameters", &e.to_string()))?;

        for (name, value) in parameters {
            if name == LIMIT_PRICE_DAMPING {
                if value.as_f64().is_none() {
                    return Err(TunerError::validation(
                        "limitPriceDamping must be numeric",
                        &value.to_string(),
                    ));
                }
                bundle[LIMIT_PRICE_DAMPING] = value.to_json();
                continue;
            }

            let Some(group) = strategy.parameter_group() else {
                return Err(TunerError::validation(
                    format!("strategy '{}' takes no parameters", strategy),
                    name,
                ));
            };
            let section = bundle
                .get_mut(group.field_name())
                .and_then(|section| section.as_object_mut())
                .ok_or_else(|| {
                    TunerError::validation("strategy parameter group missing", group.field_name())
                })?;
            if !section.contains_key(name) {
                return Err(TunerError::validation(
                    format!("unknown parameter for group '{}'", group.field_name()),
                    name,
                ));
            }
            section.insert(name.clone(), integral_json(value));
        }

        let payload = bundle.to_string();
        serde_json::from_value(bundle).map_err(|e| {
            TunerError::validation(format!("invalid strategy parameters: {}", e), &payload)
        })
    }
}

/// Whole reals are sent as integers so integer fields accept them.
fn integral_json(value: &ParameterValue) -> serde_json::Value {
    match value {
        ParameterValue::Real(real) if real.fract() == 0.0 && real.abs() < i64::MAX as f64 => {
            serde_json::Value::from(*real as i64)
        }
        other => other.to_json(),
    }
}
