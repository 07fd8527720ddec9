use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cash {
    pub currency: String,
    pub available: Decimal,
    pub buying_power: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub available_quantity: Decimal,
    pub market_value: Decimal,
    pub average_entry_price: Decimal,
}

impl Position {
    /// Amount paid to build the position, `None` when it overflows a decimal.
    pub fn entry_value(&self) -> Option<Decimal> {
        self.average_entry_price.checked_mul(self.quantity)
    }
}

/// One dated observation of a backtest run's portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity_value: Decimal,
    pub cash: Cash,
    pub positions: Vec<Position>,
}

impl PortfolioSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn holds(&self, symbol: &str) -> bool {
        self.position(symbol).is_some()
    }
}

/// A reconstructed buy/sell pair for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub symbol: String,
    pub open_date: DateTime<Utc>,
    pub close_date: DateTime<Utc>,
    pub entry_value: Decimal,
    pub exit_value: Decimal,
}

impl Investment {
    /// `exit / entry`, undefined for a zero entry value.
    pub fn profit_ratio(&self) -> Option<Decimal> {
        self.exit_value.checked_div(self.entry_value)
    }

    pub fn is_profitable(&self) -> bool {
        self.profit_ratio()
            .map(|ratio| ratio > Decimal::ONE)
            .unwrap_or(false)
    }

    pub fn length_days(&self) -> Decimal {
        let seconds = (self.close_date - self.open_date).num_seconds();
        Decimal::from(seconds) / Decimal::from(SECONDS_PER_DAY)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestAnalysis {
    /// `None` when the series is empty or starts from zero equity.
    pub total_return: Option<Decimal>,
    pub investment_count: usize,
    pub avg_investment_length_days: Decimal,
    pub positive_investment_ratio: Decimal,
    pub investments: Vec<Investment>,
    pub snapshots: Vec<PortfolioSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(JobId)
    }
}

/// State reported by the backtest service for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl JobState {
    /// `None` while the job is still running.
    pub fn outcome(self) -> Option<JobOutcome> {
        match self {
            JobState::Running => None,
            JobState::Finished => Some(JobOutcome::Finished),
            JobState::Failed => Some(JobOutcome::Failed),
            JobState::Cancelled => Some(JobOutcome::Cancelled),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    Finished,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoldResult {
    pub fold_index: usize,
    pub job_outcome: JobOutcome,
    /// Present exactly when the job finished.
    pub fold_return: Option<Decimal>,
}

impl FoldResult {
    pub fn finished(fold_index: usize, fold_return: Decimal) -> Self {
        Self {
            fold_index,
            job_outcome: JobOutcome::Finished,
            fold_return: Some(fold_return),
        }
    }

    pub fn failed(fold_index: usize) -> Self {
        Self {
            fold_index,
            job_outcome: JobOutcome::Failed,
            fold_return: None,
        }
    }

    /// Scalar fed into the objective; a failed simulation scores `penalty`.
    pub fn score(&self, penalty: Decimal) -> Decimal {
        self.fold_return.unwrap_or(penalty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Integer(i64),
    Real(f64),
    Categorical(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Integer(value) => Some(*value as f64),
            ParameterValue::Real(value) => Some(*value),
            ParameterValue::Categorical(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParameterValue::Integer(value) => serde_json::Value::from(*value),
            ParameterValue::Real(value) => serde_json::Value::from(*value),
            ParameterValue::Categorical(value) => serde_json::Value::from(value.as_str()),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Integer(value) => write!(f, "{}", value),
            ParameterValue::Real(value) => write!(f, "{:.4}", value),
            ParameterValue::Categorical(value) => write!(f, "{}", value),
        }
    }
}

/// Parameter name to value, ordered by name.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }
}

/// Contiguous slice of the service's symbol universe used by one fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SymbolSlice {
    pub skip: u32,
    pub take: u32,
}

impl SymbolSlice {
    /// Disjoint slice for `fold_index` starting at `base_skip`; `None` when the
    /// slice would run past the `u32` symbol range.
    pub fn for_fold(base_skip: u32, take: u32, fold_index: usize) -> Option<Self> {
        let index = u32::try_from(fold_index).ok()?;
        let skip = take.checked_mul(index)?.checked_add(base_skip)?;
        skip.checked_add(take)?;
        Some(Self { skip, take })
    }
}

#[derive(Debug, Clone)]
pub struct BacktestSubmission {
    pub date_range: DateRange,
    pub initial_cash: Decimal,
    pub strategy_name: String,
    pub parameters: ParameterSet,
    pub symbol_slice: SymbolSlice,
    pub use_predictor: bool,
    pub avg_prediction_error: f64,
    pub description: String,
}
