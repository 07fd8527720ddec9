pub mod app_url;
pub mod backtest_api_client;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod fold_runner;
pub mod investments;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod performance;
pub mod proposer;
pub(crate) mod retry;
pub mod search_space;
pub mod strategy;

pub use error::{Result, TunerError};
