//! # REST API
//!
//! Builds the axum router that exposes the ledger to the app and to machine
//! controllers. All endpoints share application state through axum's
//! `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Caller  | Description                    |
//! |--------|-----------------------------------|---------|--------------------------------|
//! | GET    | `/api/health`                     | ops     | Liveness probe                 |
//! | GET    | `/api/wallet/:user_id`            | app     | Balance (creates the wallet)   |
//! | POST   | `/api/debug/give-tokens`          | dev     | Free tokens, when enabled      |
//! | POST   | `/api/pay`                        | app     | Reserve a spend                |
//! | POST   | `/api/purchase`                   | app     | Buy tokens with a payment proof|
//! | POST   | `/api/machine/verify`             | machine | Signed claim on a reservation  |
//! | GET    | `/api/history/:user_id`           | app     | Last 50 transactions           |
//! | DELETE | `/api/history/:user_id`           | app     | Clear history                  |
//! | POST   | `/api/machine/register`           | ops     | Register or update a machine   |
//! | GET    | `/api/machine/pending/:machine_id`| machine | Poll and claim reservations    |
//!
//! Failures are `{"success": false, "error": "..."}` with the status from
//! [`ApiError`].

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use arcadepay_ledger::config::DEFAULT_GRANT_AMOUNT;
use arcadepay_ledger::{
    ClaimRequest, LedgerError, MachineRegistration, ReservationService, Transaction,
};

use crate::metrics::SharedMetrics;

/// Header carrying the machine's claim signature.
pub const SIGNATURE_HEADER: &str = "x-machine-signature";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: the service and metrics are reference counted.
#[derive(Clone)]
pub struct AppState {
    /// The ledger service every handler delegates to.
    pub service: ReservationService,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Whether `POST /api/debug/give-tokens` is served.
    pub debug_grants: bool,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/wallet/:user_id", get(wallet_handler))
        .route("/api/debug/give-tokens", post(give_tokens_handler))
        .route("/api/pay", post(pay_handler))
        .route("/api/purchase", post(purchase_handler))
        .route("/api/machine/verify", post(verify_handler))
        .route(
            "/api/history/:user_id",
            get(history_handler).delete(clear_history_handler),
        )
        .route("/api/machine/register", post(register_handler))
        .route("/api/machine/pending/:machine_id", get(pending_handler))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_latency,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Observes every request into the latency histogram.
async fn track_latency(State(metrics): State<SharedMetrics>, req: Request, next: Next) -> Response {
    let timer = metrics.request_latency_seconds.start_timer();
    let response = next.run(req).await;
    timer.observe_duration();
    response
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A ledger error on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError(LedgerError);

impl ApiError {
    /// HTTP status for each ledger outcome.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::InsufficientTokens { .. } | LedgerError::PaymentRejected(_) => {
                StatusCode::PAYMENT_REQUIRED
            }
            LedgerError::Unauthorized => StatusCode::FORBIDDEN,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::AlreadyProcessed { .. } | LedgerError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            LedgerError::Expired { .. } => StatusCode::GONE,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(LedgerError::Validation(rejection.body_text()))
    }
}

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = if self.0.is_fatal() {
            tracing::error!(error = %self.0, "storage failure");
            "internal storage error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /api/debug/give-tokens`.
#[derive(Debug, Deserialize)]
pub struct GiveTokensRequest {
    #[serde(default)]
    pub user_id: String,
    /// Defaults to [`DEFAULT_GRANT_AMOUNT`].
    pub amount: Option<u64>,
}

/// Body of `POST /api/pay`.
#[derive(Debug, Deserialize)]
pub struct PayRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub machine_id: String,
    /// Defaults to 1.
    pub tokens: Option<u64>,
}

/// Body of `POST /api/purchase`.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub tokens: u64,
    /// Proof handed to the payment verifier.
    #[serde(default)]
    pub payment_token: String,
}

/// Body of `POST /api/machine/verify`. The signature travels in the
/// `X-Machine-Signature` header.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub user_id: String,
    /// Defaults to 1.
    pub tokens: Option<u64>,
    #[serde(default)]
    pub transaction_id: String,
}

/// Body of `POST /api/machine/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub machine_id: String,
    pub name: Option<String>,
    pub tokens_per_credit: Option<u64>,
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub user_id: String,
    pub token_balance: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub success: bool,
    pub new_balance: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayResponse {
    pub success: bool,
    pub transaction_id: String,
    pub new_balance: u64,
    /// Seconds until the reservation self-refunds.
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub success: bool,
    pub new_balance: u64,
    pub transaction_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub credits: u64,
    pub transaction_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub machine_id: String,
    pub name: String,
}

/// One row of the app's history screen.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Signed delta: negative for spends.
    pub tokens: i64,
    /// Machine id, or "Top Up" for purchases.
    pub machine: String,
    pub machine_name: String,
    pub status: String,
    pub time: String,
}

impl From<Transaction> for HistoryItem {
    fn from(tx: Transaction) -> Self {
        let machine_name = tx
            .machine_name
            .clone()
            .or_else(|| tx.machine_id.clone())
            .unwrap_or_else(|| "Token Purchase".to_string());
        Self {
            kind: tx.kind.to_string(),
            tokens: tx.delta,
            machine: tx.machine_id.unwrap_or_else(|| "Top Up".to_string()),
            machine_name,
            status: tx.status.to_string(),
            time: tx.created_at.to_rfc3339(),
            id: tx.id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub transactions: Vec<HistoryItem>,
}

/// One reservation handed to a polling machine.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: String,
    pub tokens: u64,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub transactions: Vec<PendingItem>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /api/health`: returns 200 if the node is alive.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /api/wallet/:user_id`: balance lookup; first reference creates
/// the wallet.
async fn wallet_handler(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<WalletResponse> {
    let wallet = state.service.wallet(&user_id)?;
    Ok(Json(WalletResponse {
        user_id: wallet.user_id,
        token_balance: wallet.balance,
    }))
}

/// `POST /api/debug/give-tokens`: free tokens for development. 404 unless
/// the node was started with debug grants enabled.
async fn give_tokens_handler(
    State(state): State<AppState>,
    payload: Result<Json<GiveTokensRequest>, JsonRejection>,
) -> ApiResult<BalanceResponse> {
    if !state.debug_grants {
        return Err(LedgerError::NotFound("debug grants are disabled".into()).into());
    }
    let Json(req) = payload?;
    let amount = req.amount.unwrap_or(DEFAULT_GRANT_AMOUNT);
    let new_balance = state.service.grant_tokens(&req.user_id, amount)?;
    Ok(Json(BalanceResponse {
        success: true,
        new_balance,
    }))
}

/// `POST /api/pay`: reserve tokens for a machine.
async fn pay_handler(
    State(state): State<AppState>,
    payload: Result<Json<PayRequest>, JsonRejection>,
) -> ApiResult<PayResponse> {
    let Json(req) = payload?;
    let reservation =
        state
            .service
            .reserve_spend(&req.user_id, &req.machine_id, req.tokens.unwrap_or(1))?;
    state.metrics.reservations_total.inc();
    Ok(Json(PayResponse {
        success: true,
        transaction_id: reservation.transaction_id,
        new_balance: reservation.balance,
        expires_in: reservation.expires_in,
    }))
}

/// `POST /api/purchase`: credit tokens once the payment is verified.
async fn purchase_handler(
    State(state): State<AppState>,
    payload: Result<Json<PurchaseRequest>, JsonRejection>,
) -> ApiResult<PurchaseResponse> {
    let Json(req) = payload?;
    let purchase = state
        .service
        .record_purchase(&req.user_id, req.tokens, &req.payment_token)
        .await?;
    state.metrics.purchases_total.inc();
    Ok(Json(PurchaseResponse {
        success: true,
        new_balance: purchase.balance,
        transaction_id: purchase.transaction_id,
    }))
}

/// `POST /api/machine/verify`: a machine's signed claim.
///
/// 403 on a bad signature, 404 for an unknown transaction, 409 for a
/// replay, 410 when the reservation expired (and was refunded).
async fn verify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> ApiResult<VerifyResponse> {
    let Json(req) = payload?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let claim = ClaimRequest {
        machine_id: req.machine_id,
        user_id: req.user_id,
        tokens: req.tokens.unwrap_or(1),
        transaction_id: req.transaction_id,
    };

    match state.service.verify_claim(&claim, signature) {
        Ok(outcome) => {
            state.metrics.claims_verified_total.inc();
            Ok(Json(VerifyResponse {
                success: true,
                credits: outcome.credits,
                transaction_id: outcome.transaction_id,
            }))
        }
        Err(err) => {
            match &err {
                LedgerError::Expired { refunded, .. } => state.metrics.record_expiry(*refunded),
                LedgerError::Storage(_) => {}
                _ => state.metrics.claims_rejected_total.inc(),
            }
            Err(err.into())
        }
    }
}

/// `GET /api/history/:user_id`: newest first, at most 50.
async fn history_handler(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<HistoryResponse> {
    let transactions = state
        .service
        .history(&user_id)?
        .into_iter()
        .map(HistoryItem::from)
        .collect();
    Ok(Json(HistoryResponse { transactions }))
}

/// `DELETE /api/history/:user_id`: forget the user's history.
async fn clear_history_handler(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<SuccessResponse> {
    state.service.clear_history(&user_id)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `POST /api/machine/register`: insert or update a machine.
async fn register_handler(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<RegisterResponse> {
    let Json(req) = payload?;
    let machine = state.service.register_machine(MachineRegistration {
        machine_id: req.machine_id,
        name: req.name,
        tokens_per_credit: req.tokens_per_credit,
        location: req.location,
    })?;
    Ok(Json(RegisterResponse {
        success: true,
        machine_id: machine.id,
        name: machine.name,
    }))
}

/// `GET /api/machine/pending/:machine_id`: the polling claim path.
///
/// Live reservations are returned and marked verified; expired ones are
/// refunded and omitted.
async fn pending_handler(
    Path(machine_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<PendingResponse> {
    let sweep = state.service.sweep_expired_pending(&machine_id)?;
    state
        .metrics
        .sweep_deliveries_total
        .inc_by(sweep.delivered.len() as u64);
    state
        .metrics
        .reservations_expired_total
        .inc_by(sweep.expired as u64);
    state
        .metrics
        .tokens_refunded_total
        .inc_by(sweep.refunded_tokens);

    let transactions = sweep
        .delivered
        .into_iter()
        .map(|p| PendingItem {
            id: p.transaction_id,
            tokens: p.tokens,
            user_id: p.user_id,
        })
        .collect();
    Ok(Json(PendingResponse { transactions }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use arcadepay_ledger::{
        DemoPaymentVerifier, LedgerDb, MachineSecret, ManualClock, SignatureVerifier,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::metrics::NodeMetrics;

    const SECRET: &str = "test-machine-secret";

    /// Creates a test AppState backed by a temporary database, with the
    /// default machine seeded and demo payments accepted.
    fn test_app_state(debug_grants: bool) -> (AppState, Arc<ManualClock>) {
        let db = LedgerDb::open_temporary().expect("temp db");
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let signatures = SignatureVerifier::new(MachineSecret::new(SECRET).unwrap());
        let service = ReservationService::new(&db, signatures)
            .with_clock(clock.clone())
            .with_payment_verifier(Arc::new(DemoPaymentVerifier));
        service.machines().seed_default().expect("seed");

        let state = AppState {
            service,
            metrics: Arc::new(NodeMetrics::new().expect("metrics")),
            debug_grants,
        };
        (state, clock)
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    /// Sends a GET request and returns (status, json body).
    async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    async fn delete(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        send(router, req).await
    }

    /// Sends a POST request with JSON body and returns (status, json body).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        post_json_with_headers(router, path, body, &[]).await
    }

    async fn post_json_with_headers(
        router: &Router,
        path: &str,
        body: serde_json::Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let req = builder
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        send(router, req).await
    }

    async fn verify(
        router: &Router,
        state: &AppState,
        machine_id: &str,
        user_id: &str,
        tokens: u64,
        transaction_id: &str,
    ) -> (StatusCode, serde_json::Value) {
        let sig = state
            .service
            .signatures()
            .sign(machine_id, user_id, tokens, transaction_id);
        post_json_with_headers(
            router,
            "/api/machine/verify",
            serde_json::json!({
                "machine_id": machine_id,
                "user_id": user_id,
                "tokens": tokens,
                "transaction_id": transaction_id,
            }),
            &[("X-Machine-Signature", sig.as_str())],
        )
        .await
    }

    // -- 1. Health & wallet --------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state(false);
        let router = create_router(state);
        let (status, json) = get(&router, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn wallet_created_on_first_lookup() {
        let (state, _) = test_app_state(false);
        let router = create_router(state.clone());
        let (status, json) = get(&router, "/api/wallet/alice").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["token_balance"], 0);
        assert!(state.service.ledger().get("alice").unwrap().is_some());
    }

    // -- 2. Debug grants -----------------------------------------------------

    #[tokio::test]
    async fn give_tokens_disabled_by_default() {
        let (state, _) = test_app_state(false);
        let router = create_router(state);
        let (status, json) = post_json(
            &router,
            "/api/debug/give-tokens",
            serde_json::json!({ "user_id": "alice" }),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn give_tokens_defaults_to_ten() {
        let (state, _) = test_app_state(true);
        let router = create_router(state);
        let (status, json) = post_json(
            &router,
            "/api/debug/give-tokens",
            serde_json::json!({ "user_id": "alice" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["new_balance"], 10);

        let (status, _) = post_json(
            &router,
            "/api/debug/give-tokens",
            serde_json::json!({ "amount": 5 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- 3. Pay, verify, history ---------------------------------------------

    #[tokio::test]
    async fn pay_verify_history_flow() {
        let (state, _) = test_app_state(true);
        let router = create_router(state.clone());
        post_json(
            &router,
            "/api/debug/give-tokens",
            serde_json::json!({ "user_id": "alice", "amount": 10 }),
        )
        .await;

        let (status, pay) = post_json(
            &router,
            "/api/pay",
            serde_json::json!({ "user_id": "alice", "machine_id": "M001", "tokens": 3 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pay["success"], true);
        assert_eq!(pay["new_balance"], 7);
        assert_eq!(pay["expires_in"], 60);
        let tx_id = pay["transaction_id"].as_str().unwrap().to_string();

        let (status, verified) = verify(&router, &state, "M001", "alice", 3, &tx_id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verified["credits"], 3);
        assert_eq!(verified["transaction_id"], tx_id.as_str());

        let (status, history) = get(&router, "/api/history/alice").await;
        assert_eq!(status, StatusCode::OK);
        let rows = history["transactions"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["type"], "spend");
        assert_eq!(rows[0]["tokens"], -3);
        assert_eq!(rows[0]["machine"], "M001");
        assert_eq!(rows[0]["machine_name"], "Double Dragon");
        assert_eq!(rows[0]["status"], "verified");

        let (_, wallet) = get(&router, "/api/wallet/alice").await;
        assert_eq!(wallet["token_balance"], 7);
        assert_eq!(state.metrics.claims_verified_total.get(), 1);
    }

    #[tokio::test]
    async fn pay_defaults_to_one_token() {
        let (state, _) = test_app_state(false);
        state.service.grant_tokens("alice", 2).unwrap();
        let router = create_router(state);

        let (status, pay) = post_json(
            &router,
            "/api/pay",
            serde_json::json!({ "user_id": "alice", "machine_id": "M001" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pay["new_balance"], 1);
    }

    #[tokio::test]
    async fn pay_errors_map_to_status_codes() {
        let (state, _) = test_app_state(false);
        let router = create_router(state);

        let (status, json) = post_json(
            &router,
            "/api/pay",
            serde_json::json!({ "user_id": "alice", "machine_id": "M001", "tokens": 5 }),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("insufficient"));

        let (status, _) = post_json(
            &router,
            "/api/pay",
            serde_json::json!({ "user_id": "alice" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_json(
            &router,
            "/api/pay",
            serde_json::json!({ "user_id": "alice", "machine_id": "M001", "tokens": -1 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- 4. Claim failures ---------------------------------------------------

    #[tokio::test]
    async fn verify_rejects_bad_signature_and_replays() {
        let (state, _) = test_app_state(false);
        state.service.grant_tokens("alice", 10).unwrap();
        let router = create_router(state.clone());
        let tx_id = state
            .service
            .reserve_spend("alice", "M001", 3)
            .unwrap()
            .transaction_id;

        let (status, json) = post_json_with_headers(
            &router,
            "/api/machine/verify",
            serde_json::json!({
                "machine_id": "M001",
                "user_id": "alice",
                "tokens": 3,
                "transaction_id": tx_id,
            }),
            &[("X-Machine-Signature", "deadbeef")],
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "invalid signature");

        let (status, _) = verify(&router, &state, "M001", "alice", 3, &tx_id).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = verify(&router, &state, "M001", "alice", 3, &tx_id).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = verify(&router, &state, "M001", "alice", 3, "missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(state.metrics.claims_rejected_total.get(), 3);
    }

    #[tokio::test]
    async fn verify_without_signature_header_is_forbidden() {
        let (state, _) = test_app_state(false);
        let router = create_router(state);
        let (status, _) = post_json(
            &router,
            "/api/machine/verify",
            serde_json::json!({ "machine_id": "M001", "user_id": "alice", "transaction_id": "x" }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn late_verify_is_gone_and_refunds() {
        let (state, clock) = test_app_state(false);
        state.service.grant_tokens("alice", 10).unwrap();
        let router = create_router(state.clone());
        let tx_id = state
            .service
            .reserve_spend("alice", "M001", 4)
            .unwrap()
            .transaction_id;

        clock.advance(chrono::Duration::seconds(61));
        let (status, json) = verify(&router, &state, "M001", "alice", 4, &tx_id).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(json["success"], false);

        let (_, wallet) = get(&router, "/api/wallet/alice").await;
        assert_eq!(wallet["token_balance"], 10);
        assert_eq!(state.metrics.tokens_refunded_total.get(), 4);
    }

    // -- 5. Polling ----------------------------------------------------------

    #[tokio::test]
    async fn pending_poll_delivers_once_and_refunds_expired() {
        let (state, clock) = test_app_state(false);
        state.service.grant_tokens("alice", 10).unwrap();
        let router = create_router(state.clone());

        let stale = state.service.reserve_spend("alice", "M001", 5).unwrap();
        clock.advance(chrono::Duration::seconds(61));
        let live = state.service.reserve_spend("alice", "M001", 2).unwrap();

        let (status, json) = get(&router, "/api/machine/pending/M001").await;
        assert_eq!(status, StatusCode::OK);
        let rows = json["transactions"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], live.transaction_id.as_str());
        assert_eq!(rows[0]["tokens"], 2);
        assert_eq!(rows[0]["user_id"], "alice");

        let (_, again) = get(&router, "/api/machine/pending/M001").await;
        assert!(again["transactions"].as_array().unwrap().is_empty());

        let (_, wallet) = get(&router, "/api/wallet/alice").await;
        assert_eq!(wallet["token_balance"], 8);
        let stale = state.service.store().get(&stale.transaction_id).unwrap();
        assert_eq!(stale.status.to_string(), "failed");
    }

    // -- 6. Purchases --------------------------------------------------------

    #[tokio::test]
    async fn purchase_requires_verified_payment() {
        let (state, _) = test_app_state(false);
        let router = create_router(state);

        let (status, json) = post_json(
            &router,
            "/api/purchase",
            serde_json::json!({ "user_id": "alice", "tokens": 20, "payment_token": "fake" }),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(json["success"], false);

        let (status, _) = post_json(
            &router,
            "/api/purchase",
            serde_json::json!({ "user_id": "alice", "payment_token": "demo" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = post_json(
            &router,
            "/api/purchase",
            serde_json::json!({ "user_id": "alice", "tokens": 20, "payment_token": "demo" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["new_balance"], 20);
        assert!(json["transaction_id"].is_string());

        let (_, history) = get(&router, "/api/history/alice").await;
        let row = &history["transactions"][0];
        assert_eq!(row["type"], "purchase");
        assert_eq!(row["machine"], "Top Up");
        assert_eq!(row["machine_name"], "Token Purchase");
        assert_eq!(row["tokens"], 20);
    }

    // -- 7. History clearing & machines --------------------------------------

    #[tokio::test]
    async fn clear_history_keeps_balance() {
        let (state, _) = test_app_state(false);
        state.service.grant_tokens("alice", 10).unwrap();
        state.service.reserve_spend("alice", "M001", 1).unwrap();
        let router = create_router(state);

        let (status, json) = delete(&router, "/api/history/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);

        let (_, history) = get(&router, "/api/history/alice").await;
        assert!(history["transactions"].as_array().unwrap().is_empty());
        let (_, wallet) = get(&router, "/api/wallet/alice").await;
        assert_eq!(wallet["token_balance"], 9);
    }

    #[tokio::test]
    async fn register_machine_and_use_its_rate() {
        let (state, _) = test_app_state(false);
        state.service.grant_tokens("alice", 10).unwrap();
        let router = create_router(state.clone());

        let (status, json) = post_json(
            &router,
            "/api/machine/register",
            serde_json::json!({ "machine_id": "M010", "name": "Galaga", "tokens_per_credit": 2 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["machine_id"], "M010");
        assert_eq!(json["name"], "Galaga");

        let tx_id = state
            .service
            .reserve_spend("alice", "M010", 5)
            .unwrap()
            .transaction_id;
        let (_, verified) = verify(&router, &state, "M010", "alice", 5, &tx_id).await;
        assert_eq!(verified["credits"], 2);

        let (status, _) = post_json(
            &router,
            "/api/machine/register",
            serde_json::json!({ "name": "No Id" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- 8. Concurrency over HTTP --------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pays_cannot_overdraw() {
        let (state, _) = test_app_state(false);
        state.service.grant_tokens("alice", 5).unwrap();
        let router = create_router(state.clone());

        let requests = (0..6).map(|_| {
            let router = router.clone();
            async move {
                post_json(
                    &router,
                    "/api/pay",
                    serde_json::json!({ "user_id": "alice", "machine_id": "M001", "tokens": 5 }),
                )
                .await
                .0
            }
        });
        let statuses = futures::future::join_all(requests).await;

        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
        assert_eq!(
            statuses
                .iter()
                .filter(|s| **s == StatusCode::PAYMENT_REQUIRED)
                .count(),
            5
        );
        assert_eq!(state.service.wallet("alice").unwrap().balance, 0);
    }

    // -- 9. Error mapping ----------------------------------------------------

    #[test]
    fn every_ledger_error_has_a_status() {
        use arcadepay_ledger::TransactionStatus;

        let cases = [
            (LedgerError::Validation("x".into()), 400),
            (
                LedgerError::InsufficientTokens {
                    balance: 0,
                    required: 1,
                },
                402,
            ),
            (LedgerError::PaymentRejected("x".into()), 402),
            (LedgerError::Unauthorized, 403),
            (LedgerError::NotFound("x".into()), 404),
            (
                LedgerError::AlreadyProcessed {
                    id: "t".into(),
                    status: TransactionStatus::Verified,
                },
                409,
            ),
            (
                LedgerError::Expired {
                    id: "t".into(),
                    refunded: 1,
                },
                410,
            ),
            (LedgerError::Storage("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), code);
        }
    }
}
