//! Declared search space for one strategy: parameter name to dimension.
//!
//! Every dimension maps to and from the unit interval so proposers can work on
//! a common scale regardless of the parameter's type or prior.

use crate::error::{Result, TunerError};
use crate::models::{ParameterSet, ParameterValue};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Prior {
    #[default]
    Uniform,
    LogUniform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Dimension {
    Integer {
        low: i64,
        high: i64,
    },
    Real {
        low: f64,
        high: f64,
        #[serde(default)]
        prior: Prior,
    },
    Categorical {
        categories: Vec<String>,
    },
}

impl Dimension {
    fn validate(&self, name: &str) -> Result<()> {
        match self {
            Dimension::Integer { low, high } if low > high => Err(TunerError::Config(format!(
                "dimension {} has low ({}) above high ({})",
                name, low, high
            ))),
            Dimension::Real { low, high, .. } if !low.is_finite() || !high.is_finite() => Err(
                TunerError::Config(format!("dimension {} must have finite bounds", name)),
            ),
            Dimension::Real { low, high, .. } if low >= high => Err(TunerError::Config(format!(
                "dimension {} needs low ({}) below high ({})",
                name, low, high
            ))),
            Dimension::Real {
                low,
                prior: Prior::LogUniform,
                ..
            } if *low <= 0.0 => Err(TunerError::Config(format!(
                "log-uniform dimension {} needs a positive lower bound",
                name
            ))),
            Dimension::Categorical { categories } if categories.is_empty() => Err(
                TunerError::Config(format!("categorical dimension {} has no categories", name)),
            ),
            _ => Ok(()),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        self.from_unit(rng.gen::<f64>())
    }

    /// Maps a unit-interval coordinate onto the dimension.
    pub fn from_unit(&self, unit: f64) -> ParameterValue {
        let unit = if unit.is_finite() { unit.clamp(0.0, 1.0) } else { 0.5 };
        match self {
            Dimension::Integer { low, high } => {
                let span = (high - low + 1) as f64;
                let offset = ((unit * span).floor() as i64).min(high - low);
                ParameterValue::Integer(low + offset)
            }
            Dimension::Real { low, high, prior } => {
                let value = match prior {
                    Prior::Uniform => low + unit * (high - low),
                    Prior::LogUniform => (low.ln() + unit * (high.ln() - low.ln())).exp(),
                };
                ParameterValue::Real(value.clamp(*low, *high))
            }
            Dimension::Categorical { categories } => {
                let index = ((unit * categories.len() as f64).floor() as usize)
                    .min(categories.len().saturating_sub(1));
                ParameterValue::Categorical(categories.get(index).cloned().unwrap_or_default())
            }
        }
    }

    /// Inverse of [`Dimension::from_unit`]; `None` for values outside the dimension.
    pub fn to_unit(&self, value: &ParameterValue) -> Option<f64> {
        match (self, value) {
            (Dimension::Integer { low, high }, _) => {
                let raw = value.as_f64()?;
                if raw < *low as f64 || raw > *high as f64 {
                    return None;
                }
                Some((raw - *low as f64 + 0.5) / (high - low + 1) as f64)
            }
            (Dimension::Real { low, high, prior }, _) => {
                let raw = value.as_f64()?;
                if raw < *low || raw > *high {
                    return None;
                }
                Some(match prior {
                    Prior::Uniform => (raw - low) / (high - low),
                    Prior::LogUniform => (raw.ln() - low.ln()) / (high.ln() - low.ln()),
                })
            }
            (Dimension::Categorical { categories }, ParameterValue::Categorical(name)) => {
                let index = categories.iter().position(|c| c == name)?;
                Some((index as f64 + 0.5) / categories.len() as f64)
            }
            (Dimension::Categorical { .. }, _) => None,
        }
    }

    /// Distance in unit space that moves a value by one natural step.
    pub fn unit_step(&self, real_steps: u32) -> f64 {
        match self {
            Dimension::Integer { low, high } => 1.0 / (high - low + 1) as f64,
            Dimension::Real { .. } => 1.0 / real_steps.max(1) as f64,
            Dimension::Categorical { categories } => 1.0 / categories.len() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchSpace {
    dimensions: BTreeMap<String, Dimension>,
}

impl SearchSpace {
    pub fn new(dimensions: BTreeMap<String, Dimension>) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(TunerError::Config(
                "search space must declare at least one dimension".to_string(),
            ));
        }
        for (name, dimension) in &dimensions {
            dimension.validate(name)?;
        }
        Ok(Self { dimensions })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let dimensions: BTreeMap<String, Dimension> = serde_json::from_str(raw)
            .map_err(|e| TunerError::Config(format!("invalid search space: {}", e)))?;
        Self::new(dimensions)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            TunerError::Config(format!(
                "failed to read search space from {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&String, &Dimension)> {
        self.dimensions.iter()
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterSet {
        self.dimensions
            .iter()
            .map(|(name, dimension)| (name.clone(), dimension.sample(rng)))
            .collect()
    }

    /// Builds a parameter set from one unit coordinate per dimension, in name order.
    pub fn from_unit_point(&self, point: &[f64]) -> ParameterSet {
        self.dimensions
            .iter()
            .zip(point.iter().copied())
            .map(|((name, dimension), unit)| (name.clone(), dimension.from_unit(unit)))
            .collect()
    }

    /// `None` when a dimension is missing or out of range.
    pub fn to_unit_point(&self, parameters: &ParameterSet) -> Option<Vec<f64>> {
        self.dimensions
            .iter()
            .map(|(name, dimension)| dimension.to_unit(parameters.get(name)?))
            .collect()
    }

    pub fn contains(&self, parameters: &ParameterSet) -> bool {
        parameters.len() == self.dimensions.len() && self.to_unit_point(parameters).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_space() -> SearchSpace {
        SearchSpace::from_json_str(
            r#"{
                "analysisLengthInDays": {"type": "integer", "low": 10, "high": 20},
                "limitPriceDamping": {"type": "real", "low": 0.01, "high": 1.0, "prior": "log-uniform"},
                "mode": {"type": "categorical", "categories": ["fast", "slow"]}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn samples_stay_inside_the_space() {
        let space = sample_space();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let parameters = space.sample(&mut rng);
            assert!(space.contains(&parameters), "{:?}", parameters);
        }
    }

    #[test]
    fn unit_round_trip_preserves_integer_and_categorical_values() {
        let space = sample_space();
        let mut rng = StdRng::seed_from_u64(11);
        let parameters = space.sample(&mut rng);
        let point = space.to_unit_point(&parameters).unwrap();
        let rebuilt = space.from_unit_point(&point);

        assert_eq!(rebuilt["analysisLengthInDays"], parameters["analysisLengthInDays"]);
        assert_eq!(rebuilt["mode"], parameters["mode"]);
    }

    #[test]
    fn unit_extremes_map_to_bounds() {
        let dimension = Dimension::Integer { low: 3, high: 5 };
        assert_eq!(dimension.from_unit(0.0), ParameterValue::Integer(3));
        assert_eq!(dimension.from_unit(1.0), ParameterValue::Integer(5));
        assert_eq!(dimension.to_unit(&ParameterValue::Integer(9)), None);
    }

    #[test]
    fn rejects_invalid_spaces() {
        assert!(SearchSpace::from_json_str("{}").is_err());
        assert!(SearchSpace::from_json_str(
            r#"{"x": {"type": "real", "low": 2.0, "high": 1.0}}"#
        )
        .is_err());
        assert!(SearchSpace::from_json_str(
            r#"{"x": {"type": "real", "low": 0.0, "high": 1.0, "prior": "log-uniform"}}"#
        )
        .is_err());
        assert!(SearchSpace::from_json_str(r#"{"x": {"type": "categorical", "categories": []}}"#)
            .is_err());
    }
}
