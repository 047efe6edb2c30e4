use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::{
    CancelToken, DistributionType, MarketAssumptions, MonteCarloParams, MonteCarloSettings,
    RothConversion, SimulationParams, find_best_roth_strategy_with, no_progress,
    run_historical_simulation_with, run_monte_carlo_with, run_simulation_on_path,
    tax::TaxConstants,
};
use crate::error::EngineError;

const MAX_YEARS: usize = 120;
const MAX_AGE: u32 = 120;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("request timed out")]
    Timeout,
    #[error("worker failed: {0}")]
    Worker(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.status(), &self.to_string())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RunMode {
    Simulate,
    MonteCarlo,
    Historical,
    Roth,
}

/// Monte Carlo and optimizer request body. Unset settings fall back to the
/// server configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnsemblePayload {
    #[serde(alias = "simulationParams")]
    simulation: SimulationParams,
    iterations: Option<u32>,
    #[serde(alias = "marketAssumptions")]
    assumptions: Option<MarketAssumptions>,
    #[serde(alias = "distributionType")]
    distribution: Option<DistributionType>,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

fn validate_params(params: &SimulationParams) -> Result<(), String> {
    if params.end_year < params.start_year {
        return Err("endYear must be >= startYear".to_string());
    }
    if params.years() > MAX_YEARS {
        return Err(format!("simulation window must be at most {MAX_YEARS} years"));
    }
    if params.current_age > MAX_AGE {
        return Err(format!("currentAge must be <= {MAX_AGE}"));
    }
    if params
        .first_year_fraction
        .is_some_and(|f| !(0.0..=1.0).contains(&f))
    {
        return Err("firstYearFraction must be between 0 and 1".to_string());
    }

    let p = &params.initial_portfolio;
    for (name, value) in [
        ("taxable", p.taxable),
        ("taxableBasis", p.taxable_basis),
        ("preTax", p.pre_tax),
        ("roth", p.roth),
        ("cash", p.cash),
        ("property", p.property),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("initialPortfolio.{name} must be a finite value >= 0"));
        }
    }
    if p.taxable_basis > p.taxable {
        return Err("initialPortfolio.taxableBasis must be between 0 and taxable".to_string());
    }

    for year in &params.market_path {
        let values = [
            year.stock_return,
            year.bond_return,
            year.cash_return,
            year.inflation,
            year.property_return,
        ];
        if values.iter().any(|v| !v.is_finite() || *v <= -1.0) {
            return Err("marketPath returns must be finite and > -1".to_string());
        }
    }

    for income in &params.incomes {
        if !income.annual_amount.is_finite() || income.annual_amount < 0.0 {
            return Err(format!("income {} must have annualAmount >= 0", income.id));
        }
        if income.pre_tax_contribution < 0.0 || income.pre_tax_contribution > income.annual_amount
        {
            return Err(format!(
                "income {} preTaxContribution must be between 0 and annualAmount",
                income.id
            ));
        }
        if income.end_age.is_some_and(|end| end < income.start_age) {
            return Err(format!("income {} endAge must be >= startAge", income.id));
        }
    }
    for expense in &params.expenses {
        if !expense.annual_amount.is_finite() || expense.annual_amount < 0.0 {
            return Err(format!("expense {} must have annualAmount >= 0", expense.id));
        }
        if matches!(
            (expense.start_age, expense.end_age),
            (Some(start), Some(end)) if end < start
        ) {
            return Err(format!("expense {} endAge must be >= startAge", expense.id));
        }
    }
    for liability in &params.liabilities {
        if liability.balance < 0.0 || liability.annual_payment < 0.0 {
            return Err(format!(
                "liability {} balance and annualPayment must be >= 0",
                liability.id
            ));
        }
        if liability.interest_rate <= -1.0 {
            return Err(format!("liability {} interestRate must be > -1", liability.id));
        }
    }
    for claim in &params.social_security {
        if !(62..=70).contains(&claim.claiming_age) {
            return Err("socialSecurity claimingAge must be between 62 and 70".to_string());
        }
        if claim.monthly_pia < 0.0 {
            return Err("socialSecurity monthlyPia must be >= 0".to_string());
        }
    }

    if !(0.0..=1.0).contains(&params.tax.pre_tax_discount) {
        return Err("tax.preTaxDiscount must be between 0 and 1".to_string());
    }
    if params
        .tax
        .state_rate_override
        .is_some_and(|rate| !(0.0..=1.0).contains(&rate))
    {
        return Err("tax.stateRateOverride must be between 0 and 1".to_string());
    }

    let strategy = &params.strategy;
    if !(0.0..=1.0).contains(&strategy.stock_allocation) {
        return Err("strategy.stockAllocation must be between 0 and 1".to_string());
    }
    let w = &strategy.withdrawal;
    if w.initial_rate < 0.0 || w.dollar_floor < 0.0 || w.rate_floor < 0.0 {
        return Err("strategy.withdrawal rates and floors must be >= 0".to_string());
    }
    match strategy.roth.conversion {
        RothConversion::None => {}
        RothConversion::FixedAmount { amount } => {
            if !amount.is_finite() || amount < 0.0 {
                return Err("fixed_amount conversion must be >= 0".to_string());
            }
        }
        RothConversion::FillBracket { target_rate, .. } => {
            let known = TaxConstants::base()
                .ordinary_bracket_top(params.tax.filing_status, target_rate)
                .is_some_and(f64::is_finite);
            if target_rate != 0.0 && !known {
                return Err(format!(
                    "fill_bracket targetRate {target_rate} is not a bounded ordinary bracket"
                ));
            }
        }
    }
    if matches!(
        (strategy.roth.start_age, strategy.roth.end_age),
        (Some(start), Some(end)) if end < start
    ) {
        return Err("strategy.roth.endAge must be >= startAge".to_string());
    }

    if params.health.medicaid_asset_limit < 0.0 {
        return Err("health.medicaidAssetLimit must be >= 0".to_string());
    }
    Ok(())
}

fn resolve_settings(
    payload: &EnsemblePayload,
    config: &ServerConfig,
) -> Result<MonteCarloSettings, String> {
    let iterations = payload.iterations.unwrap_or(config.default_iterations);
    if iterations == 0 || iterations > config.max_iterations {
        return Err(format!(
            "iterations must be between 1 and {}",
            config.max_iterations
        ));
    }

    let assumptions = payload.assumptions.unwrap_or_default();
    let vols = [
        assumptions.stock_vol,
        assumptions.bond_vol,
        assumptions.cash_vol,
        assumptions.inflation_vol,
    ];
    if vols.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err("market assumption volatilities must be finite and >= 0".to_string());
    }
    let means = [
        assumptions.stock_mean,
        assumptions.bond_mean,
        assumptions.cash_mean,
        assumptions.inflation_mean,
    ];
    if means.iter().any(|m| !m.is_finite() || *m <= -1.0) {
        return Err("market assumption means must be finite and > -1".to_string());
    }

    Ok(MonteCarloSettings {
        iterations,
        assumptions,
        distribution: payload.distribution.unwrap_or_default(),
        seed: payload.seed.unwrap_or(config.default_seed),
    })
}

fn ensemble_request(
    payload: EnsemblePayload,
    config: &ServerConfig,
) -> Result<MonteCarloParams, ApiError> {
    validate_params(&payload.simulation).map_err(ApiError::BadRequest)?;
    let settings = resolve_settings(&payload, config).map_err(ApiError::BadRequest)?;
    Ok(MonteCarloParams {
        simulation: payload.simulation,
        settings,
        pre_generated_paths: None,
    })
}

/// Runs `job` on the blocking pool and cancels it once the configured
/// timeout elapses.
async fn run_blocking<T, F>(config: &ServerConfig, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> Result<T, EngineError> + Send + 'static,
{
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || job(&worker_cancel));

    match tokio::time::timeout(config.request_timeout(), handle).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(join_error)) => Err(ApiError::Worker(join_error.to_string())),
        Err(_) => {
            cancel.cancel();
            warn!(
                timeout_secs = config.request_timeout_secs,
                "request timed out, cancelling"
            );
            Err(ApiError::Timeout)
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/historical", post(historical_handler))
        .route("/api/roth-strategy", post(roth_strategy_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(config: ServerConfig) -> std::io::Result<()> {
    if let Err(msg) = config.validate() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg));
    }

    let addr = config.socket_addr();
    let app = router(AppState::new(config));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "nestegg HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(
    State(state): State<AppState>,
    Json(params): Json<SimulationParams>,
) -> Response {
    if let Err(msg) = validate_params(&params) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let result = run_blocking(&state.config, move |cancel| {
        run_simulation_on_path(&params, &params.market_path, cancel)
    })
    .await;
    respond(result)
}

async fn monte_carlo_handler(
    State(state): State<AppState>,
    Json(payload): Json<EnsemblePayload>,
) -> Response {
    let params = match ensemble_request(payload, &state.config) {
        Ok(params) => params,
        Err(err) => return err.into_response(),
    };
    let result = run_blocking(&state.config, move |cancel| {
        run_monte_carlo_with(&params, cancel, &no_progress)
    })
    .await;
    respond(result)
}

async fn historical_handler(
    State(state): State<AppState>,
    Json(params): Json<SimulationParams>,
) -> Response {
    if let Err(msg) = validate_params(&params) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let result = run_blocking(&state.config, move |cancel| {
        run_historical_simulation_with(&params, cancel, &no_progress)
    })
    .await;
    respond(result)
}

async fn roth_strategy_handler(
    State(state): State<AppState>,
    Json(payload): Json<EnsemblePayload>,
) -> Response {
    let params = match ensemble_request(payload, &state.config) {
        Ok(params) => params,
        Err(err) => return err.into_response(),
    };
    let result = run_blocking(&state.config, move |cancel| {
        find_best_roth_strategy_with(&params.simulation, &params.settings, cancel, &no_progress)
    })
    .await;
    respond(result)
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => {
            warn!(error = %err, "request failed");
            err.into_response()
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

/// Runs one request body synchronously and returns the JSON response text.
pub fn run_offline(mode: RunMode, body: &str, config: &ServerConfig) -> Result<String, ApiError> {
    let invalid = |e: serde_json::Error| ApiError::BadRequest(format!("Invalid JSON payload: {e}"));
    let cancel = CancelToken::new();

    let output = match mode {
        RunMode::Simulate | RunMode::Historical => {
            let params: SimulationParams = serde_json::from_str(body).map_err(invalid)?;
            validate_params(&params).map_err(ApiError::BadRequest)?;
            if mode == RunMode::Simulate {
                serde_json::to_string_pretty(&run_simulation_on_path(
                    &params,
                    &params.market_path,
                    &cancel,
                )?)
            } else {
                serde_json::to_string_pretty(&run_historical_simulation_with(
                    &params,
                    &cancel,
                    &no_progress,
                )?)
            }
        }
        RunMode::MonteCarlo | RunMode::Roth => {
            let payload: EnsemblePayload = serde_json::from_str(body).map_err(invalid)?;
            let params = ensemble_request(payload, config)?;
            if mode == RunMode::MonteCarlo {
                serde_json::to_string_pretty(&run_monte_carlo_with(
                    &params,
                    &cancel,
                    &no_progress,
                )?)
            } else {
                serde_json::to_string_pretty(&find_best_roth_strategy_with(
                    &params.simulation,
                    &params.settings,
                    &cancel,
                    &no_progress,
                )?)
            }
        }
    };
    output.map_err(|e| ApiError::Worker(format!("failed to serialize response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    const SAMPLE_PLAN: &str = r#"{
        "startYear": 2025,
        "endYear": 2049,
        "currentAge": 62,
        "firstYearFraction": 0.5,
        "initialPortfolio": {
            "taxable": 400000,
            "taxableBasis": 250000,
            "preTax": 600000,
            "roth": 50000,
            "cash": 30000
        },
        "expenses": [{ "id": "living", "annualAmount": 60000 }],
        "socialSecurity": [{ "monthlyPia": 2400, "claimingAge": 67, "birthYear": 1963 }],
        "tax": { "filingStatus": "married_filing_jointly", "stateCode": "VA", "preTaxDiscount": 0.2 },
        "strategy": {
            "withdrawal": { "strategy": "constant_dollar", "initialRate": 0.0 },
            "roth": { "conversion": { "type": "fill_bracket", "targetRate": 0.12 }, "endAge": 70 },
            "taxGainHarvesting": true
        },
        "health": { "medicareEnrollees": 2, "includeBasePremium": true },
        "milestones": [
            { "id": "debt-free", "condition": { "type": "debt_free" } },
            { "id": "seventy", "condition": { "type": "age_reached", "age": 70 } }
        ]
    }"#;

    fn sample_params() -> SimulationParams {
        serde_json::from_str(SAMPLE_PLAN).expect("sample plan parses")
    }

    fn small_config() -> ServerConfig {
        ServerConfig {
            default_iterations: 20,
            max_iterations: 100,
            ..ServerConfig::default()
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("body is JSON")
    }

    #[test]
    fn sample_plan_parses_tagged_unions() {
        let params = sample_params();
        assert_eq!(
            params.strategy.roth.conversion,
            RothConversion::FillBracket {
                target_rate: 0.12,
                protect_zero_ltcg: false
            }
        );
        assert_eq!(params.milestones.len(), 2);
        assert_eq!(params.strategy.stock_allocation, 1.0);
        assert!(params.expenses[0].inflation_adjusted);
        assert!(validate_params(&params).is_ok());
    }

    #[test]
    fn validate_rejects_basis_above_balance() {
        let mut params = sample_params();
        params.initial_portfolio.taxable_basis = 500_000.0;
        let err = validate_params(&params).expect_err("must reject");
        assert!(err.contains("taxableBasis"));
    }

    #[test]
    fn validate_rejects_reversed_window_and_bad_fraction() {
        let mut params = sample_params();
        params.end_year = 2020;
        assert!(validate_params(&params).expect_err("must reject").contains("endYear"));

        let mut params = sample_params();
        params.first_year_fraction = Some(1.5);
        assert!(
            validate_params(&params)
                .expect_err("must reject")
                .contains("firstYearFraction")
        );
    }

    #[test]
    fn validate_rejects_unknown_bracket_rate() {
        let mut params = sample_params();
        params.strategy.roth.conversion = RothConversion::FillBracket {
            target_rate: 0.15,
            protect_zero_ltcg: false,
        };
        assert!(validate_params(&params).expect_err("must reject").contains("targetRate"));

        params.strategy.roth.conversion = RothConversion::FillBracket {
            target_rate: 0.37,
            protect_zero_ltcg: false,
        };
        assert!(validate_params(&params).is_err());
    }

    #[test]
    fn settings_fall_back_to_server_defaults() {
        let payload = EnsemblePayload {
            simulation: sample_params(),
            iterations: None,
            assumptions: None,
            distribution: None,
            seed: None,
        };
        let settings = resolve_settings(&payload, &small_config()).expect("valid settings");
        assert_eq!(settings.iterations, 20);
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.distribution, DistributionType::Custom);

        let too_many = EnsemblePayload {
            iterations: Some(101),
            ..payload
        };
        let err = resolve_settings(&too_many, &small_config()).expect_err("must reject");
        assert!(err.contains("iterations"));
    }

    #[test]
    fn error_statuses_follow_category() {
        assert_eq!(
            ApiError::BadRequest("x".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Engine(EngineError::Cancelled).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::Worker("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn offline_simulate_serializes_run_result() {
        let json = run_offline(RunMode::Simulate, SAMPLE_PLAN, &small_config()).expect("runs");
        assert!(json.contains("\"results\""));
        assert!(json.contains("\"isExhausted\""));
        assert!(json.contains("\"resolvedMilestones\""));
        assert!(json.contains("\"taxDetails\""));
        assert!(json.contains("\"seventy\": 70"));
    }

    #[test]
    fn offline_monte_carlo_reports_summary_fields() {
        let body = format!(r#"{{ "simulation": {SAMPLE_PLAN}, "iterations": 12, "seed": 5 }}"#);
        let json = run_offline(RunMode::MonteCarlo, &body, &small_config()).expect("runs");
        assert!(json.contains("\"successRate\""));
        assert!(json.contains("\"ensembleFingerprint\""));
        assert!(json.contains("\"bands\""));
    }

    #[test]
    fn offline_rejects_malformed_json() {
        let err = run_offline(RunMode::Historical, "{", &small_config()).expect_err("must reject");
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let response = health_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn simulate_endpoint_rejects_invalid_plan() {
        let mut params = sample_params();
        params.tax.pre_tax_discount = 2.0;
        let response = simulate_handler(
            State(AppState::new(small_config())),
            Json(params),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap_or_default().contains("preTaxDiscount"));
    }

    #[tokio::test]
    async fn historical_endpoint_returns_runs() {
        let response = historical_handler(
            State(AppState::new(small_config())),
            Json(sample_params()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["runs"].as_array().is_some_and(|runs| !runs.is_empty()));
    }

    #[tokio::test]
    async fn roth_endpoint_scores_every_candidate() {
        let payload: EnsemblePayload = serde_json::from_str(&format!(
            r#"{{ "simulationParams": {SAMPLE_PLAN}, "iterations": 8 }}"#
        ))
        .expect("payload parses");
        let response = roth_strategy_handler(State(AppState::new(small_config())), Json(payload))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["all"].as_array().map(Vec::len), Some(7));
        assert!(body["recommendedParams"].is_object());
    }
}
