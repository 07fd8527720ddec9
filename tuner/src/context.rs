use crate::backtest_api_client::{build_async_client, HttpBacktestClient};
use crate::config::{settings_from_env, ApiSettings, TunerSettings};
use crate::error::Result;
use crate::fold_runner::FoldRunner;
use crate::optimizer::OptimizationLoop;
use crate::proposer::Proposer;
use log::info;
use std::collections::HashMap;

/// Process-level settings shared by every command.
#[derive(Clone, Debug)]
pub struct AppContext {
    settings: HashMap<String, String>,
}

impl AppContext {
    /// Reads the environment and applies `overrides` on top (CLI flags).
    pub fn initialize(overrides: HashMap<String, String>) -> Self {
        let mut settings = settings_from_env();
        settings.extend(overrides);
        Self { settings }
    }

    pub fn from_settings(settings: HashMap<String, String>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn tuner_settings(&self) -> Result<TunerSettings> {
        TunerSettings::from_settings_map(&self.settings)
    }

    pub fn api_client(&self) -> Result<HttpBacktestClient> {
        let api = ApiSettings::from_settings_map(&self.settings)?;
        let http = build_async_client(Some(api.request_timeout))?;
        info!("Using backtest service at {}", api.base_url);
        Ok(HttpBacktestClient::new(http, api.base_url, api.credentials))
    }

    pub fn fold_runner(&self) -> Result<FoldRunner<HttpBacktestClient>> {
        let settings = self.tuner_settings()?;
        Ok(FoldRunner::new(self.api_client()?, settings.folds))
    }

    pub fn optimization_loop(
        &self,
        proposer: Box<dyn Proposer>,
        show_progress: bool,
    ) -> Result<OptimizationLoop<HttpBacktestClient>> {
        Ok(OptimizationLoop::new(self.fold_runner()?, proposer).with_progress(show_progress))
    }
}
