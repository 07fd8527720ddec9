use crate::app_url::{resolve_api_base_url, API_URL_KEY, DOMAIN_KEY};
use crate::backtest_api_client::ApiCredentials;
use crate::error::{Result, TunerError};
use crate::fold_runner::FoldSettings;
use crate::models::{DateRange, SymbolSlice};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const API_USER_KEY: &str = "BACKTEST_API_USER";
pub const API_PASSWORD_KEY: &str = "BACKTEST_API_PASSWORD";
pub const API_TIMEOUT_KEY: &str = "BACKTEST_API_TIMEOUT_SECS";
pub const POLL_INTERVAL_KEY: &str = "BACKTEST_POLL_INTERVAL_MS";
pub const START_DATE_KEY: &str = "SIMULATION_START_DATE";
pub const END_DATE_KEY: &str = "SIMULATION_END_DATE";
pub const INITIAL_CASH_KEY: &str = "BACKTEST_INITIAL_CASH";
pub const SYMBOLS_PER_FOLD_KEY: &str = "BACKTEST_SYMBOLS_PER_FOLD";
pub const SYMBOL_SKIP_KEY: &str = "BACKTEST_SYMBOL_SKIP";
pub const FOLD_COUNT_KEY: &str = "BACKTEST_FOLD_COUNT";
pub const USE_PREDICTOR_KEY: &str = "BACKTEST_USE_PREDICTOR";
pub const PREDICTION_ERROR_KEY: &str = "BACKTEST_PREDICTION_ERROR";
pub const FAILED_FOLD_PENALTY_KEY: &str = "FAILED_FOLD_PENALTY";

const SETTING_KEYS: [&str; 15] = [
    DOMAIN_KEY,
    API_URL_KEY,
    API_USER_KEY,
    API_PASSWORD_KEY,
    API_TIMEOUT_KEY,
    POLL_INTERVAL_KEY,
    START_DATE_KEY,
    END_DATE_KEY,
    INITIAL_CASH_KEY,
    SYMBOLS_PER_FOLD_KEY,
    SYMBOL_SKIP_KEY,
    FOLD_COUNT_KEY,
    USE_PREDICTOR_KEY,
    PREDICTION_ERROR_KEY,
    FAILED_FOLD_PENALTY_KEY,
];

const DEFAULT_SETTINGS: [(&str, &str); 9] = [
    (API_TIMEOUT_KEY, "30"),
    (POLL_INTERVAL_KEY, "1000"),
    (INITIAL_CASH_KEY, "100000"),
    (SYMBOLS_PER_FOLD_KEY, "1000"),
    (SYMBOL_SKIP_KEY, "0"),
    (FOLD_COUNT_KEY, "1"),
    (USE_PREDICTOR_KEY, "false"),
    (PREDICTION_ERROR_KEY, "0"),
    (FAILED_FOLD_PENALTY_KEY, "-1"),
];

/// Collects every recognised setting present in the process environment.
pub fn settings_from_env() -> HashMap<String, String> {
    SETTING_KEYS
        .iter()
        .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

/// Connection settings for the backtest service.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub credentials: Option<ApiCredentials>,
    pub request_timeout: Duration,
}

impl ApiSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let settings = with_defaults(settings);
        let base_url = resolve_api_base_url(&settings).ok_or_else(|| {
            TunerError::Config(format!(
                "Either {} (http[s]://host/api) or {} (bare host name) must be set",
                API_URL_KEY, DOMAIN_KEY
            ))
        })?;
        let credentials = optional_setting(&settings, API_USER_KEY).map(|username| {
            ApiCredentials {
                username: username.to_string(),
                password: optional_setting(&settings, API_PASSWORD_KEY).map(str::to_string),
            }
        });
        let timeout_secs = require_setting_u64(&settings, API_TIMEOUT_KEY, 1)?;

        Ok(Self {
            base_url,
            credentials,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Everything needed to run a search, built once and passed down explicitly.
#[derive(Debug, Clone)]
pub struct TunerSettings {
    pub api: ApiSettings,
    pub folds: FoldSettings,
}

impl TunerSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let api = ApiSettings::from_settings_map(settings)?;
        let settings = with_defaults(settings);

        let start = require_setting_date(&settings, START_DATE_KEY)?;
        let end = require_setting_date(&settings, END_DATE_KEY)?;
        let date_range = DateRange::new(start, end).ok_or_else(|| {
            TunerError::Config(format!(
                "{} ({}) must be before {} ({})",
                START_DATE_KEY, start, END_DATE_KEY, end
            ))
        })?;

        let initial_cash = require_setting_decimal(&settings, INITIAL_CASH_KEY)?;
        if initial_cash <= Decimal::ZERO {
            return Err(TunerError::Config(format!(
                "Setting {} must be > 0 (value: {})",
                INITIAL_CASH_KEY, initial_cash
            )));
        }

        let folds = FoldSettings {
            date_range,
            initial_cash,
            symbols_per_fold: require_setting_u32(&settings, SYMBOLS_PER_FOLD_KEY, 1)?,
            symbol_skip: require_setting_u32(&settings, SYMBOL_SKIP_KEY, 0)?,
            fold_count: require_setting_u32(&settings, FOLD_COUNT_KEY, 1)? as usize,
            use_predictor: require_setting_bool(&settings, USE_PREDICTOR_KEY)?,
            avg_prediction_error: require_setting_f64(
                &settings,
                PREDICTION_ERROR_KEY,
                Some(0.0),
                None,
            )?,
            failed_fold_penalty: require_setting_decimal(&settings, FAILED_FOLD_PENALTY_KEY)?,
            poll_interval: Duration::from_millis(require_setting_u64(
                &settings,
                POLL_INTERVAL_KEY,
                1,
            )?),
        };

        let last_fold = folds.fold_count - 1;
        if SymbolSlice::for_fold(folds.symbol_skip, folds.symbols_per_fold, last_fold).is_none() {
            return Err(TunerError::Config(format!(
                "{} folds of {} symbols after skipping {} exceed the symbol range",
                folds.fold_count, folds.symbols_per_fold, folds.symbol_skip
            )));
        }

        Ok(Self { api, folds })
    }
}

fn with_defaults(settings: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged = settings.clone();
    for (key, value) in DEFAULT_SETTINGS {
        let missing = merged
            .get(key)
            .map(|existing| existing.trim().is_empty())
            .unwrap_or(true);
        if missing {
            merged.insert(key.to_string(), value.to_string());
        }
    }
    merged
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key)
        .ok_or_else(|| TunerError::Config(format!("Missing required setting {}", key)))
}

pub fn require_setting_date(settings: &HashMap<String, String>, key: &str) -> Result<NaiveDate> {
    let raw = require_setting(settings, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        TunerError::Config(format!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key, raw
        ))
    })
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw.parse::<f64>().map_err(|_| {
        TunerError::Config(format!("Setting {} must be a number (value: {})", key, raw))
    })?;
    if !value.is_finite() {
        return Err(TunerError::Config(format!(
            "Setting {} must be finite (value: {})",
            key, raw
        )));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(TunerError::Config(format!(
                "Setting {} must be >= {} (value: {})",
                key, min_value, raw
            )));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(TunerError::Config(format!(
                "Setting {} must be <= {} (value: {})",
                key, max_value, raw
            )));
        }
    }
    Ok(value)
}

fn require_setting_u64(settings: &HashMap<String, String>, key: &str, min: u64) -> Result<u64> {
    let raw = require_setting(settings, key)?;
    let value = raw.parse::<u64>().map_err(|_| {
        TunerError::Config(format!(
            "Setting {} must be a non-negative integer (value: {})",
            key, raw
        ))
    })?;
    if value < min {
        return Err(TunerError::Config(format!(
            "Setting {} must be >= {} (value: {})",
            key, min, raw
        )));
    }
    Ok(value)
}

fn require_setting_u32(settings: &HashMap<String, String>, key: &str, min: u32) -> Result<u32> {
    let value = require_setting_u64(settings, key, u64::from(min))?;
    u32::try_from(value).map_err(|_| {
        TunerError::Config(format!("Setting {} is too large (value: {})", key, value))
    })
}

fn require_setting_decimal(settings: &HashMap<String, String>, key: &str) -> Result<Decimal> {
    let raw = require_setting(settings, key)?;
    Decimal::from_str(raw).map_err(|_| {
        TunerError::Config(format!("Setting {} must be a decimal (value: {})", key, raw))
    })
}

fn require_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<bool> {
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(TunerError::Config(format!(
            "Setting {} must be true or false (value: {})",
            key, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_settings() -> HashMap<String, String> {
        [
            (DOMAIN_KEY, "localhost:5000"),
            (START_DATE_KEY, "2020-01-01"),
            (END_DATE_KEY, "2021-01-01"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn applies_defaults() {
        let settings = TunerSettings::from_settings_map(&base_settings()).unwrap();

        assert_eq!(settings.api.base_url, "http://localhost:5000/api");
        assert!(settings.api.credentials.is_none());
        assert_eq!(settings.api.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.folds.initial_cash, dec!(100000));
        assert_eq!(settings.folds.symbols_per_fold, 1000);
        assert_eq!(settings.folds.fold_count, 1);
        assert_eq!(settings.folds.failed_fold_penalty, dec!(-1));
        assert_eq!(settings.folds.poll_interval, Duration::from_millis(1000));
        assert!(!settings.folds.use_predictor);
    }

    #[test]
    fn reads_overrides_and_credentials() {
        let mut raw = base_settings();
        raw.insert(FOLD_COUNT_KEY.to_string(), "3".to_string());
        raw.insert(USE_PREDICTOR_KEY.to_string(), "yes".to_string());
        raw.insert(API_USER_KEY.to_string(), "admin".to_string());
        raw.insert(INITIAL_CASH_KEY.to_string(), "2500.50".to_string());

        let settings = TunerSettings::from_settings_map(&raw).unwrap();

        assert_eq!(settings.folds.fold_count, 3);
        assert!(settings.folds.use_predictor);
        assert_eq!(settings.folds.initial_cash, dec!(2500.50));
        let credentials = settings.api.credentials.unwrap();
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password, None);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut raw = base_settings();
        raw.insert(END_DATE_KEY.to_string(), "2019-01-01".to_string());
        assert!(TunerSettings::from_settings_map(&raw).is_err());

        let mut raw = base_settings();
        raw.insert(FOLD_COUNT_KEY.to_string(), "0".to_string());
        assert!(TunerSettings::from_settings_map(&raw).is_err());

        let mut raw = base_settings();
        raw.insert(INITIAL_CASH_KEY.to_string(), "0".to_string());
        assert!(TunerSettings::from_settings_map(&raw).is_err());

        let mut raw = base_settings();
        raw.insert(PREDICTION_ERROR_KEY.to_string(), "-0.1".to_string());
        assert!(TunerSettings::from_settings_map(&raw).is_err());

        let mut raw = base_settings();
        raw.insert(SYMBOL_SKIP_KEY.to_string(), (u32::MAX - 1500).to_string());
        raw.insert(FOLD_COUNT_KEY.to_string(), "2".to_string());
        assert!(TunerSettings::from_settings_map(&raw).is_err());

        let mut raw = base_settings();
        raw.remove(DOMAIN_KEY);
        assert!(TunerSettings::from_settings_map(&raw).is_err());
    }
}
