//! Error taxonomy shared by the reconstruction, fold and search layers.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub(crate) const MAX_PAYLOAD_CONTEXT_CHARS: usize = 2048;

#[derive(Error, Debug)]
pub enum TunerError {
    /// The request never produced a response: connect, TLS or timeout failures.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// A payload did not match the expected snapshot/parameter schema.
    #[error("Validation error: {context} (payload: {payload})")]
    Validation { context: String, payload: String },

    #[error("Position {symbol} closed on {close_date} without a recorded open")]
    UnmatchedClose {
        symbol: String,
        close_date: DateTime<Utc>,
    },

    #[error("Backtest {job_id} for fold {fold_index} was cancelled")]
    JobCancelled { job_id: String, fold_index: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TunerError {
    pub fn validation(context: impl Into<String>, payload: &str) -> Self {
        TunerError::Validation {
            context: context.into(),
            payload: truncate_for_log(payload, MAX_PAYLOAD_CONTEXT_CHARS),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, TunerError::JobCancelled { .. })
    }

    /// Transport failures worth another attempt: connection problems and 5xx answers.
    pub fn is_transient(&self) -> bool {
        match self {
            TunerError::Transport(_) | TunerError::Http(_) => true,
            TunerError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TunerError>;

pub(crate) fn truncate_for_log(value: &str, max_chars: usize) -> String {
    let trimmed = value.trim();
    let mut iter = trimmed.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = iter.next() else {
            return trimmed.to_string();
        };
        out.push(ch);
    }
    if iter.next().is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_payloads() {
        let long = "x".repeat(10);
        assert_eq!(truncate_for_log(&long, 4), "xxxx…");
        assert_eq!(truncate_for_log("  abc ", 4), "abc");
    }

    #[test]
    fn validation_error_keeps_payload_context() {
        let err = TunerError::validation("bad snapshot", "{\"assets\": null}");
        let rendered = err.to_string();
        assert!(rendered.contains("bad snapshot"));
        assert!(rendered.contains("assets"));
        assert!(!err.is_cancellation());
        assert!(!err.is_transient());
    }

    #[test]
    fn only_server_side_statuses_are_transient() {
        let status = |status| TunerError::Status {
            method: "GET",
            url: "http://localhost/api/backtests".to_string(),
            status,
            body: String::new(),
        };
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
    }
}
