//! HTTP surface: the thin collaborator routes consumed by external callers
//! and the session-scoped claim pipeline routes.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use claim_flow::{
    ClaimError, ClaimOrchestrator, ClaimSession, DamageReport, ImagePayload, PartPrice,
    PartsStore, PayoutGateway, PayoutReceipt, PayoutRequest, Policy, PolicyStore, VisionClient,
    normalize_plate,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::audit::PostgresAuditLog;
use crate::config::Config;
use crate::gemini::GeminiVisionClient;
use crate::payout::SimulatedPayoutGateway;
use crate::store::{self, PostgresPartsStore, PostgresPolicyStore};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ClaimOrchestrator>,
    pub vision: Arc<dyn VisionClient>,
    pub parts: Arc<dyn PartsStore>,
    pub policies: Arc<dyn PolicyStore>,
    pub payouts: Arc<dyn PayoutGateway>,
}

/// Initialize structured tracing based on environment variables.
pub fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "autoclaim_service=debug,claim_flow=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware that tags every request with a correlation ID, both as a
/// header for downstream use and as a tracing span field.
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }
    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

/// Maps the pipeline error taxonomy onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(ClaimError);

impl From<ClaimError> for ApiError {
    fn from(err: ClaimError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ClaimError::Validation(_) => StatusCode::BAD_REQUEST,
            ClaimError::NotFound(_) | ClaimError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ClaimError::Upstream(_) | ClaimError::Parse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ClaimError::InvalidTransition { .. }
            | ClaimError::SessionBusy
            | ClaimError::SessionReset => StatusCode::CONFLICT,
        };
        // Parse failures surface like upstream failures but get their own
        // log line for diagnosis.
        if matches!(self.0, ClaimError::Parse(_)) {
            error!(error = %self.0, "vision model response failed schema parse");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub async fn create_app(config: &Config) -> anyhow::Result<Router> {
    let pool = store::connect(&config.database_url).await?;

    let vision: Arc<dyn VisionClient> = Arc::new(GeminiVisionClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    ));
    let parts: Arc<dyn PartsStore> = Arc::new(PostgresPartsStore::new(pool.clone()));
    let policies: Arc<dyn PolicyStore> = Arc::new(PostgresPolicyStore::new(pool.clone()));
    let payouts: Arc<dyn PayoutGateway> = Arc::new(SimulatedPayoutGateway::new());
    let audit = Arc::new(PostgresAuditLog::new(pool));

    let orchestrator = Arc::new(ClaimOrchestrator::new(
        vision.clone(),
        parts.clone(),
        policies.clone(),
        payouts.clone(),
        audit,
    ));

    Ok(build_router(AppState {
        orchestrator,
        vision,
        parts,
        policies,
        payouts,
    }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/analyze-damage", post(analyze_damage))
        .route("/api/parts-pricing", get(parts_pricing))
        .route("/api/verify-policy", get(verify_policy))
        .route("/api/disburse-payout", post(disburse_payout))
        .route("/api/claims", post(create_claim))
        .route("/api/claims/{id}", get(get_claim))
        .route("/api/claims/{id}/analyze", post(analyze_claim))
        .route("/api/claims/{id}/verify", post(verify_claim))
        .route("/api/claims/{id}/disburse", post(disburse_claim))
        .route("/api/claims/{id}/reset", post(reset_claim))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "autoclaim-service" }))
}

#[derive(Debug, Deserialize)]
struct AnalyzeDamageRequest {
    image: String,
}

/// Thin pass-through: image in, structured damage report out.
async fn analyze_damage(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeDamageRequest>,
) -> ApiResult<DamageReport> {
    let image = ImagePayload::from_request(&request.image)?;
    let report = state.vision.analyze(&image).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct PartsQuery {
    make: Option<String>,
    model: Option<String>,
    year: Option<String>,
}

async fn parts_pricing(
    State(state): State<AppState>,
    Query(query): Query<PartsQuery>,
) -> ApiResult<Vec<PartPrice>> {
    let make = required_param(query.make, "make")?;
    let model = required_param(query.model, "model")?;
    let year = query
        .year
        .as_deref()
        .map(str::trim)
        .filter(|y| !y.is_empty())
        .map(|y| {
            y.parse::<i32>()
                .map_err(|_| ClaimError::Validation(format!("year is not a number: {y}")))
        })
        .transpose()?;

    let parts = state.parts.find_parts(&make, &model, year).await?;
    Ok(Json(parts))
}

#[derive(Debug, Deserialize)]
struct PolicyQuery {
    plate: Option<String>,
}

async fn verify_policy(
    State(state): State<AppState>,
    Query(query): Query<PolicyQuery>,
) -> ApiResult<Policy> {
    let plate = normalize_plate(&required_param(query.plate, "plate")?);
    match state.policies.find_by_plate(&plate).await? {
        Some(policy) => Ok(Json(policy)),
        None => Err(ClaimError::NotFound(format!("no policy found for plate {plate}")).into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisbursePayoutRequest {
    amount: Option<i64>,
    plate: Option<String>,
    #[serde(default)]
    owner_name: Option<String>,
}

async fn disburse_payout(
    State(state): State<AppState>,
    Json(request): Json<DisbursePayoutRequest>,
) -> ApiResult<PayoutReceipt> {
    let amount = request
        .amount
        .filter(|a| *a > 0)
        .ok_or_else(|| ClaimError::Validation("amount is required".to_string()))?;
    let plate = required_param(request.plate, "plate")?;
    let receipt = state
        .payouts
        .disburse(&PayoutRequest {
            amount,
            plate,
            owner_name: request.owner_name.unwrap_or_default(),
        })
        .await?;
    Ok(Json(receipt))
}

async fn create_claim(State(state): State<AppState>) -> ApiResult<ClaimSession> {
    let session = state.orchestrator.create_session();
    Ok(Json(session))
}

async fn get_claim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ClaimSession> {
    Ok(Json(state.orchestrator.session(&id)?))
}

#[derive(Debug, Deserialize)]
struct ClaimAnalyzeRequest {
    image: String,
}

async fn analyze_claim(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ClaimAnalyzeRequest>,
) -> ApiResult<ClaimSession> {
    let image = ImagePayload::from_request(&request.image)?;
    let session = state.orchestrator.analyze(&id, image).await?;
    info!(session_id = %id, stage = ?session.stage, "claim analyzed");
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ClaimVerifyRequest {
    plate: String,
}

async fn verify_claim(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ClaimVerifyRequest>,
) -> ApiResult<ClaimSession> {
    let session = state.orchestrator.verify(&id, &request.plate).await?;
    Ok(Json(session))
}

async fn disburse_claim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ClaimSession> {
    let session = state.orchestrator.disburse(&id).await?;
    Ok(Json(session))
}

async fn reset_claim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ClaimSession> {
    Ok(Json(state.orchestrator.reset(&id)?))
}

fn required_param(value: Option<String>, name: &str) -> Result<String, ApiError> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) => Ok(v),
        None => Err(ClaimError::Validation(format!("{name} is required")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_param_trims_and_rejects_empty() {
        assert_eq!(
            required_param(Some(" Toyota ".to_string()), "make").unwrap(),
            "Toyota"
        );
        assert!(required_param(Some("  ".to_string()), "make").is_err());
        assert!(required_param(None, "make").is_err());
    }

    #[test]
    fn disburse_request_accepts_camel_case_owner_name() {
        let request: DisbursePayoutRequest = serde_json::from_str(
            r#"{"amount": 50000, "plate": "LAG-123-ABC", "ownerName": "Adaeze Okafor"}"#,
        )
        .unwrap();
        assert_eq!(request.amount, Some(50_000));
        assert_eq!(request.owner_name.as_deref(), Some("Adaeze Okafor"));
    }
}
