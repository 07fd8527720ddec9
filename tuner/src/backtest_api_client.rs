//! Boundary to the remote backtest service.

use crate::error::{truncate_for_log, Result, TunerError, MAX_PAYLOAD_CONTEXT_CHARS};
use crate::investments::InvestmentReconstructor;
use crate::models::{
    BacktestSubmission, Cash, JobId, JobState, ParameterSet, PortfolioSnapshot, Position,
};
use crate::retry::retry_request;
use crate::strategy::{StrategyKind, StrategyParameters};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, info};
use reqwest::header::LOCATION;
use reqwest::{Certificate, Identity, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

const BACKTEST_API_MTLS_CA_CERT_ENV: &str = "BACKTEST_API_MTLS_CA_CERT";
const BACKTEST_API_MTLS_CLIENT_CERT_ENV: &str = "BACKTEST_API_MTLS_CLIENT_CERT";
const BACKTEST_API_MTLS_CLIENT_KEY_ENV: &str = "BACKTEST_API_MTLS_CLIENT_KEY";

/// Remote operations the fold runner depends on.
#[async_trait]
pub trait BacktestJobClient: Send + Sync {
    /// Selects `strategy` and stores its parameter bundle with `parameters` applied.
    async fn configure_strategy(
        &self,
        strategy: StrategyKind,
        parameters: &ParameterSet,
    ) -> Result<()>;

    async fn submit(&self, submission: &BacktestSubmission) -> Result<JobId>;

    async fn poll(&self, job_id: JobId) -> Result<JobState>;

    /// Only valid once the job reached a terminal state.
    async fn fetch_snapshots(&self, job_id: JobId) -> Result<Vec<PortfolioSnapshot>>;

    async fn cancel(&self, job_id: JobId) -> Result<()>;
}

fn env_path(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_pem(path: &str, what: &str) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| TunerError::Config(format!("failed to read {} from {}: {}", what, path, e)))
}

fn load_mtls_ca_certificate() -> Result<Option<Certificate>> {
    let Some(path) = env_path(BACKTEST_API_MTLS_CA_CERT_ENV) else {
        return Ok(None);
    };
    let pem = read_pem(&path, "mTLS CA certificate")?;
    let certificate = Certificate::from_pem(&pem).map_err(|e| {
        TunerError::Config(format!(
            "failed to parse mTLS CA certificate from {}: {}",
            path, e
        ))
    })?;
    Ok(Some(certificate))
}

fn load_mtls_identity() -> Result<Option<Identity>> {
    let cert_path = env_path(BACKTEST_API_MTLS_CLIENT_CERT_ENV);
    let key_path = env_path(BACKTEST_API_MTLS_CLIENT_KEY_ENV);

    match (cert_path, key_path) {
        (None, None) => Ok(None),
        (Some(_), None) | (None, Some(_)) => Err(TunerError::Config(format!(
            "{} and {} must both be set when enabling API mTLS",
            BACKTEST_API_MTLS_CLIENT_CERT_ENV, BACKTEST_API_MTLS_CLIENT_KEY_ENV
        ))),
        (Some(cert_path), Some(key_path)) => {
            let mut identity_pem = read_pem(&cert_path, "mTLS client certificate")?;
            let key_pem = read_pem(&key_path, "mTLS client key")?;
            if !identity_pem.ends_with(b"\n") {
                identity_pem.push(b'\n');
            }
            identity_pem.extend_from_slice(&key_pem);

            let identity = Identity::from_pem(&identity_pem).map_err(|e| {
                TunerError::Config(format!(
                    "failed to parse mTLS client identity from {} and {}: {}",
                    cert_path, key_path, e
                ))
            })?;
            Ok(Some(identity))
        }
    }
}

pub fn build_async_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(certificate) = load_mtls_ca_certificate()? {
        builder = builder.add_root_certificate(certificate);
    }
    if let Some(identity) = load_mtls_identity()? {
        builder = builder.identity(identity);
    }
    builder
        .build()
        .map_err(|e| TunerError::Config(format!("failed to build HTTP client: {}", e)))
}

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub username: String,
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BacktestRequest<'a> {
    start: NaiveDate,
    end: NaiveDate,
    #[serde(with = "rust_decimal::serde::float")]
    initial_cash: Decimal,
    should_use_predictor: bool,
    avg_prediction_error: f64,
    strategy_name: &'a str,
    symbols_skip: u32,
    symbols_take: u32,
    description: &'a str,
}

#[derive(Deserialize)]
struct CreatedBacktest {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BacktestStatusResponse {
    state: String,
    #[serde(default)]
    state_details: Option<String>,
    #[serde(default)]
    total_return: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CashResponse {
    main_currency: String,
    available_amount: Decimal,
    buying_power: Decimal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetsResponse {
    equity_value: Decimal,
    cash: CashResponse,
    #[serde(default)]
    positions: Vec<Position>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetsStateResponse {
    assets: AssetsResponse,
    created_at: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AssetsStatesPayload {
    Bare(Vec<AssetsStateResponse>),
    Wrapped { results: Vec<AssetsStateResponse> },
}

#[derive(Serialize)]
struct StrategySelection<'a> {
    name: &'a str,
}

fn parse_job_state(raw: &str) -> Option<JobState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "running" | "pending" | "queued" => Some(JobState::Running),
        "finished" => Some(JobState::Finished),
        "error" | "failed" => Some(JobState::Failed),
        "cancelled" | "canceled" => Some(JobState::Cancelled),
        _ => None,
    }
}

/// Accepts RFC 3339 timestamps as well as offset-less times and plain dates (read as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc())
}

fn job_id_from_location(location: &str) -> Option<JobId> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
}

fn parse_json<T: DeserializeOwned>(context: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| TunerError::validation(format!("{}: {}", context, e), body))
}

fn convert_assets_state(state: AssetsStateResponse) -> Result<PortfolioSnapshot> {
    let timestamp = parse_timestamp(&state.created_at).ok_or_else(|| {
        TunerError::validation("assets state has an unreadable createdAt", &state.created_at)
    })?;
    Ok(PortfolioSnapshot {
        timestamp,
        equity_value: state.assets.equity_value,
        cash: Cash {
            currency: state.assets.cash.main_currency,
            available: state.assets.cash.available_amount,
            buying_power: state.assets.cash.buying_power,
        },
        positions: state.assets.positions,
    })
}

/// Parses and validates an assets-states payload into an ordered snapshot series.
pub fn parse_assets_states(body: &str) -> Result<Vec<PortfolioSnapshot>> {
    let payload: AssetsStatesPayload = parse_json("invalid assets-states payload", body)?;
    let states = match payload {
        AssetsStatesPayload::Bare(states) => states,
        AssetsStatesPayload::Wrapped { results } => results,
    };
    let snapshots = states
        .into_iter()
        .map(convert_assets_state)
        .collect::<Result<Vec<_>>>()?;
    InvestmentReconstructor::validate_series(&snapshots)?;
    Ok(snapshots)
}

/// reqwest-backed client for the backtest service's REST API.
#[derive(Clone)]
pub struct HttpBacktestClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
}

impl HttpBacktestClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Option<ApiCredentials>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, credentials.password.as_ref())
            }
            None => request,
        }
    }

    /// Sends the request and returns the response when its status is a success.
    async fn send(
        &self,
        method: &'static str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| TunerError::Transport(format!("{} {}: {}", method, url, e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TunerError::Status {
            method,
            url: url.to_string(),
            status: status.as_u16(),
            body: truncate_for_log(&body, MAX_PAYLOAD_CONTEXT_CHARS),
        })
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let url = self.url(path);
        retry_request!(format!("GET {}", url), async {
            let response = self.send("GET", &url, self.http.get(&url)).await?;
            Ok::<_, TunerError>(response.text().await?)
        })
    }

    async fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.url(path);
        self.send("PUT", &url, self.http.put(&url).json(body)).await?;
        Ok(())
    }

    /// Current parameter bundle stored by the service.
    pub async fn strategy_parameters(&self) -> Result<StrategyParameters> {
        let body = self.get_text("strategy").await?;
        parse_json("invalid strategy parameters payload", &body)
    }
}

#[async_trait]
impl BacktestJobClient for HttpBacktestClient {
    async fn configure_strategy(
        &self,
        strategy: StrategyKind,
        parameters: &ParameterSet,
    ) -> Result<()> {
        let bundle = self.strategy_parameters().await?.apply(strategy, parameters)?;
        self.put_json(
            "strategy/selection",
            &StrategySelection {
                name: strategy.name(),
            },
        )
        .await?;
        self.put_json("strategy", &bundle).await?;
        debug!("Configured '{}' with {} parameters", strategy, parameters.len());
        Ok(())
    }

    async fn submit(&self, submission: &BacktestSubmission) -> Result<JobId> {
        let url = self.url("backtests");
        let request = BacktestRequest {
            start: submission.date_range.start,
            end: submission.date_range.end,
            initial_cash: submission.initial_cash,
            should_use_predictor: submission.use_predictor,
            avg_prediction_error: submission.avg_prediction_error,
            strategy_name: &submission.strategy_name,
            symbols_skip: submission.symbol_slice.skip,
            symbols_take: submission.symbol_slice.take,
            description: &submission.description,
        };
        let response = self
            .send("POST", &url, self.http.post(&url).json(&request))
            .await?;

        let from_header = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(job_id_from_location);
        if let Some(job_id) = from_header {
            return Ok(job_id);
        }

        let body = response.text().await?;
        let created: CreatedBacktest = parse_json("backtest submission returned no id", &body)?;
        created.id.parse().map_err(|_| {
            TunerError::validation("backtest submission returned an invalid id", &body)
        })
    }

    async fn poll(&self, job_id: JobId) -> Result<JobState> {
        let body = self.get_text(&format!("backtests/{}", job_id)).await?;
        let status: BacktestStatusResponse = parse_json("invalid backtest status payload", &body)?;
        let state = parse_job_state(&status.state)
            .ok_or_else(|| TunerError::validation("unknown backtest state", &body))?;
        if state != JobState::Running {
            debug!(
                "Backtest {} is {} (service total return: {:?}, details: {})",
                job_id,
                state.as_str(),
                status.total_return,
                status.state_details.as_deref().unwrap_or("-")
            );
        }
        Ok(state)
    }

    async fn fetch_snapshots(&self, job_id: JobId) -> Result<Vec<PortfolioSnapshot>> {
        let body = self
            .get_text(&format!("backtests/{}/assets-states", job_id))
            .await?;
        parse_assets_states(&body)
    }

    async fn cancel(&self, job_id: JobId) -> Result<()> {
        let url = self.url(&format!("backtests/{}", job_id));
        self.send("DELETE", &url, self.http.delete(&url)).await?;
        info!("Cancelled backtest {}", job_id);
        Ok(())
    }
}
