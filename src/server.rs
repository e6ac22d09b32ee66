//! HTTP surface
//!
//! Hosts one checkout session per browser tab and the gateway return route.
//! Sessions live in memory only and end at confirmation, hand-off, or after
//! sitting idle past the configured TTL.

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::api::{CheckoutApi, CustomerContext};
use crate::checkout::{CheckoutOrchestrator, PaymentVerifier, ReturnParams, SessionView, SubmitOutcome};
use crate::config::CheckoutConfig;
use crate::domain::aggregates::order::{CardDetails, PaymentMethod, ShippingUpdate};
use crate::domain::aggregates::CartLineItem;
use crate::domain::events::CheckoutEvent;
use crate::domain::summary::ChargeQuote;
use crate::domain::value_objects::{Money, OrderId, Quantity};
use crate::pages::{self, PageError};
use crate::{CheckoutError, FieldError};

struct SessionEntry {
    orchestrator: Arc<CheckoutOrchestrator>,
    touched: Instant,
}

#[derive(Clone)]
pub struct AppState {
    api: Arc<dyn CheckoutApi>,
    verifier: Arc<PaymentVerifier>,
    events: broadcast::Sender<CheckoutEvent>,
    sessions: Arc<Mutex<HashMap<Uuid, SessionEntry>>>,
    session_ttl: Duration,
    currency: String,
}

impl AppState {
    pub fn new(api: Arc<dyn CheckoutApi>, config: &CheckoutConfig, events: broadcast::Sender<CheckoutEvent>) -> Self {
        let verifier = PaymentVerifier::new(api.clone(), config.confirmation_delay).with_events(events.clone());
        Self {
            api,
            verifier: Arc::new(verifier),
            events,
            sessions: Arc::default(),
            session_ttl: config.session_ttl,
            currency: config.currency.clone(),
        }
    }

    pub fn session_count(&self) -> usize { self.sessions.lock().len() }

    /// Looks up a session and marks it as used.
    fn session(&self, id: Uuid) -> Result<Arc<CheckoutOrchestrator>, AppError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(&id).ok_or(AppError::Checkout(CheckoutError::NoSession))?;
        entry.touched = Instant::now();
        Ok(entry.orchestrator.clone())
    }

    fn insert_session(&self, id: Uuid, orchestrator: CheckoutOrchestrator) {
        self.sessions.lock().insert(id, SessionEntry { orchestrator: Arc::new(orchestrator), touched: Instant::now() });
    }

    fn end_session(&self, id: Uuid) {
        self.sessions.lock().remove(&id);
    }

    /// Drops sessions idle for longer than the TTL as of `now`. A session with a
    /// submission in flight is kept until the submission settles.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let expired: Vec<(Uuid, Arc<CheckoutOrchestrator>)> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, e)| now.saturating_duration_since(e.touched) > self.session_ttl && !e.orchestrator.is_submitting())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| sessions.remove(&id).map(|e| (id, e.orchestrator))).collect()
        };
        for (id, orchestrator) in &expired {
            // NoSession just means the session already ended on its own.
            if orchestrator.cancel().is_ok() { debug!(session_id = %id, "idle checkout session expired"); }
        }
        expired.len()
    }
}

/// Periodically drops idle sessions. Runs until the returned task is aborted.
pub fn spawn_session_sweeper(state: AppState) -> JoinHandle<()> {
    let period = (state.session_ttl / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        info!(ttl_secs = state.session_ttl.as_secs(), "starting idle session sweeper");
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let expired = state.sweep_idle(Instant::now());
            if expired > 0 { info!(expired, remaining = state.session_count(), "swept idle checkout sessions"); }
        }
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-checkout"})) }))
        .route("/api/v1/checkout/sessions", post(start_session))
        .route("/api/v1/checkout/sessions/:id", get(get_session).delete(cancel_session))
        .route("/api/v1/checkout/sessions/:id/shipping", put(update_shipping))
        .route("/api/v1/checkout/sessions/:id/payment", put(select_payment))
        .route("/api/v1/checkout/sessions/:id/card", put(enter_card))
        .route("/api/v1/checkout/sessions/:id/coupon", post(apply_coupon))
        .route("/api/v1/checkout/sessions/:id/advance", post(advance))
        .route("/api/v1/checkout/sessions/:id/retreat", post(retreat))
        .route("/api/v1/checkout/sessions/:id/submit", post(submit))
        .route("/api/v1/checkout/sessions/:id/retry-payment", post(retry_payment))
        .route("/payments/return/:method", get(payment_return))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
struct Success<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success { success: true, data })
}

#[derive(Debug, Serialize)]
struct Failure {
    success: bool,
    message: String,
    errors: Vec<FieldError>,
}

#[derive(Debug)]
pub enum AppError {
    Checkout(CheckoutError),
    NotFound(String),
    Render(PageError),
}

impl From<CheckoutError> for AppError {
    fn from(error: CheckoutError) -> Self { Self::Checkout(error) }
}

impl From<PageError> for AppError {
    fn from(error: PageError) -> Self { Self::Render(error) }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, errors) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message, Vec::new()),
            Self::Render(e) => {
                error!(error = %e, "page rendering failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong. Please try again.".to_string(), Vec::new())
            }
            Self::Checkout(error) => {
                let status = match &error {
                    CheckoutError::Validation { .. } | CheckoutError::EmptyCart => StatusCode::UNPROCESSABLE_ENTITY,
                    CheckoutError::NoSession => StatusCode::NOT_FOUND,
                    CheckoutError::SubmissionInFlight
                    | CheckoutError::InvalidTransition { .. }
                    | CheckoutError::SessionClosed
                    | CheckoutError::Superseded => StatusCode::CONFLICT,
                    CheckoutError::Payment { .. } | CheckoutError::VerificationFailure { .. } => StatusCode::PAYMENT_REQUIRED,
                    CheckoutError::OrderCreation { .. } | CheckoutError::Transport(_) => StatusCode::BAD_GATEWAY,
                };
                (status, error.user_message(), error.fields().to_vec())
            }
        };
        (status, Json(Failure { success: false, message, errors })).into_response()
    }
}

// =============================================================================
// Session handlers
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub items: Vec<StartItem>,
    #[serde(default)]
    pub charges: Charges,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartItem {
    pub product_id: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub image: Option<String>,
}

/// Shipping and tax as quoted by the backend for this cart.
#[derive(Debug, Default, Deserialize)]
pub struct Charges {
    #[serde(default, with = "rust_decimal::serde::float")]
    pub shipping: Decimal,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub tax: Decimal,
}

fn line_item(item: StartItem, currency: &str) -> Result<CartLineItem, CheckoutError> {
    let quantity = Quantity::new(item.quantity).map_err(|e| CheckoutError::validation("quantity", e.to_string()))?;
    let line = CartLineItem::new(item.product_id, item.name, Money::new(item.price, currency), quantity)
        .map_err(|e| CheckoutError::validation("price", e.to_string()))?;
    Ok(match item.image {
        Some(image) => line.with_image(image),
        None => line,
    })
}

fn customer(headers: &HeaderMap) -> CustomerContext {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    CustomerContext::from_bearer(token)
}

fn view(orchestrator: &CheckoutOrchestrator) -> Result<SessionView, AppError> {
    orchestrator.view().ok_or(AppError::Checkout(CheckoutError::NoSession))
}

async fn start_session(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<StartSessionRequest>) -> Result<(StatusCode, Json<Success<SessionView>>), AppError> {
    let items = r.items.into_iter().map(|item| line_item(item, &s.currency)).collect::<Result<Vec<_>, _>>()?;
    let quote = ChargeQuote::flat(Money::new(r.charges.shipping, &s.currency), Money::new(r.charges.tax, &s.currency));

    let orchestrator = CheckoutOrchestrator::new(s.api.clone(), customer(&headers), s.events.clone());
    let id = orchestrator.initialize(items, quote)?;
    let session = view(&orchestrator)?;
    s.insert_session(id, orchestrator);
    Ok((StatusCode::CREATED, ok(session)))
}

async fn get_session(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Success<SessionView>>, AppError> {
    Ok(ok(view(&*s.session(id)?)?))
}

async fn cancel_session(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    let orchestrator = s.session(id)?;
    s.end_session(id);
    orchestrator.cancel()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_shipping(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ShippingUpdate>) -> Result<Json<Success<SessionView>>, AppError> {
    let orchestrator = s.session(id)?;
    orchestrator.update_shipping(r)?;
    Ok(ok(view(&orchestrator)?))
}

#[derive(Debug, Deserialize)]
pub struct SelectPaymentRequest {
    pub method: PaymentMethod,
}

async fn select_payment(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<SelectPaymentRequest>) -> Result<Json<Success<SessionView>>, AppError> {
    let orchestrator = s.session(id)?;
    orchestrator.select_method(r.method)?;
    Ok(ok(view(&orchestrator)?))
}

/// Card fields are accepted but never echoed back.
async fn enter_card(State(s): State<AppState>, Path(id): Path<Uuid>, Json(card): Json<CardDetails>) -> Result<StatusCode, AppError> {
    s.session(id)?.enter_card_details(card)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CouponRequest {
    pub code: String,
}

async fn apply_coupon(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<CouponRequest>) -> Result<Json<Success<SessionView>>, AppError> {
    let orchestrator = s.session(id)?;
    orchestrator.apply_coupon(&r.code).await?;
    Ok(ok(view(&orchestrator)?))
}

async fn advance(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Success<SessionView>>, AppError> {
    let orchestrator = s.session(id)?;
    orchestrator.advance()?;
    Ok(ok(view(&orchestrator)?))
}

async fn retreat(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Success<SessionView>>, AppError> {
    let orchestrator = s.session(id)?;
    orchestrator.retreat()?;
    Ok(ok(view(&orchestrator)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Confirmed {
    order_id: OrderId,
    redirect_to: String,
    session: Option<SessionView>,
}

async fn submit(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, AppError> {
    let orchestrator = s.session(id)?;
    let outcome = orchestrator.submit_order().await?;
    finish(&s, id, &orchestrator, outcome)
}

async fn retry_payment(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Response, AppError> {
    let orchestrator = s.session(id)?;
    let outcome = orchestrator.retry_payment().await?;
    finish(&s, id, &orchestrator, outcome)
}

fn finish(s: &AppState, id: Uuid, orchestrator: &CheckoutOrchestrator, outcome: SubmitOutcome) -> Result<Response, AppError> {
    s.end_session(id);
    Ok(match outcome {
        SubmitOutcome::Confirmed { order_id } => {
            info!(session_id = %id, %order_id, "checkout confirmed");
            let redirect_to = format!("/orders/{order_id}");
            ok(Confirmed { order_id, redirect_to, session: orchestrator.view() }).into_response()
        }
        SubmitOutcome::Redirect(handoff) => {
            info!(session_id = %id, order_id = %handoff.order_id, method = %handoff.method, "handing off to payment gateway");
            Html(handoff.auto_submit_form()?).into_response()
        }
    })
}

// =============================================================================
// Gateway return
// =============================================================================

async fn payment_return(State(s): State<AppState>, Path(method): Path<String>, Query(query): Query<Vec<(String, String)>>) -> Result<Response, AppError> {
    let method: PaymentMethod = method.parse().map_err(|e: crate::domain::aggregates::order::UnknownPaymentMethod| AppError::NotFound(e.to_string()))?;
    let params = ReturnParams::from_pairs(method, query);
    let result = s.verifier.verify(&params).await;

    let page = match s.verifier.confirmation_redirect(&result) {
        Some(redirect) => redirect.refresh_page()?,
        None => pages::payment_failed(result.message.as_deref().unwrap_or("We couldn't confirm your payment."))?,
    };
    Ok(Html(page).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::wire::{CreatedOrder, PaymentInitiation, VerifiedPayment};
    use crate::api::{ApiError, MockCheckoutApi};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    fn state(api: MockCheckoutApi) -> AppState {
        let (tx, _) = broadcast::channel(64);
        AppState::new(Arc::new(api), &CheckoutConfig::default(), tx)
    }

    fn app(api: MockCheckoutApi) -> Router {
        router(state(api))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn session_at_payment(app: &Router, method: &str) -> String {
        let (status, body) = call(app, "POST", "/api/v1/checkout/sessions", Some(json!({
            "items": [{ "productId": "P1", "name": "Oud Royale", "price": 2500.0, "quantity": 2 }],
            "charges": { "shipping": 100.0, "tax": 650.0 }
        }))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = serde_json::from_str::<Value>(&body).unwrap()["data"]["id"].as_str().unwrap().to_string();
        let base = format!("/api/v1/checkout/sessions/{id}");

        call(app, "POST", &format!("{base}/advance"), None).await;
        call(app, "PUT", &format!("{base}/shipping"), Some(json!({
            "firstName": "Sita", "lastName": "Sharma", "email": "sita@example.com", "phone": "9800000000",
            "street": "Durbar Marg", "city": "Kathmandu", "country": "Nepal", "postalCode": "44600"
        }))).await;
        let (status, body) = call(app, "POST", &format!("{base}/advance"), None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let (status, _) = call(app, "PUT", &format!("{base}/payment"), Some(json!({ "method": method }))).await;
        assert_eq!(status, StatusCode::OK);
        base
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(MockCheckoutApi::new()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("healthy"));
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let (status, body) = call(&app(MockCheckoutApi::new()), "POST", "/api/v1/checkout/sessions", Some(json!({ "items": [] }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Your cart is empty");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (status, _) = call(&app(MockCheckoutApi::new()), "GET", &format!("/api/v1/checkout/sessions/{}", Uuid::now_v7()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_shipping_errors_are_field_level() {
        let app = app(MockCheckoutApi::new());
        let (_, body) = call(&app, "POST", "/api/v1/checkout/sessions", Some(json!({
            "items": [{ "productId": "P1", "name": "Oud Royale", "price": 2500.0, "quantity": 1 }]
        }))).await;
        let id = serde_json::from_str::<Value>(&body).unwrap()["data"]["id"].as_str().unwrap().to_string();
        call(&app, "POST", &format!("/api/v1/checkout/sessions/{id}/advance"), None).await;

        let (status, body) = call(&app, "POST", &format!("/api/v1/checkout/sessions/{id}/advance"), None).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["errors"][0]["field"], "firstName");
    }

    #[tokio::test]
    async fn test_cash_on_delivery_submit_confirms_and_ends_session() {
        let mut api = MockCheckoutApi::new();
        api.expect_create_order().once().return_once(|_, _, _| Ok(CreatedOrder { order_id: OrderId::new("ord_77"), payment_status: None, transaction_id: None, message: None }));
        let app = app(api);
        let base = session_at_payment(&app, "cash_on_delivery").await;

        let (status, body) = call(&app, "POST", &format!("{base}/submit"), None).await;

        assert_eq!(status, StatusCode::OK, "{body}");
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["data"]["orderId"], "ord_77");
        assert_eq!(body["data"]["redirectTo"], "/orders/ord_77");
        assert_eq!(body["data"]["session"]["step"], "confirmation");
        assert_eq!(call(&app, "GET", &base, None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_order_failure_keeps_session() {
        let mut api = MockCheckoutApi::new();
        api.expect_create_order().once().return_once(|_, _, _| Err(ApiError::Transport("refused".into())));
        let app = app(api);
        let base = session_at_payment(&app, "cash_on_delivery").await;

        let (status, _) = call(&app, "POST", &format!("{base}/submit"), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, body) = call(&app, "GET", &base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["data"]["step"], "payment_method");
    }

    #[tokio::test]
    async fn test_khalti_submit_renders_auto_submit_form() {
        let mut api = MockCheckoutApi::new();
        api.expect_create_order().return_once(|_, _, _| Ok(CreatedOrder { order_id: OrderId::new("ord_k"), payment_status: None, transaction_id: None, message: None }));
        api.expect_initiate_payment().return_once(|_, _| {
            Ok(PaymentInitiation { payment_url: "https://test-pay.khalti.com/?pidx=HT6o6PEZRWFJ5ygavzHWd5".into(), form_data: BTreeMap::new() })
        });
        let app = app(api);
        let base = session_at_payment(&app, "khalti").await;

        let (status, body) = call(&app, "POST", &format!("{base}/submit"), None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"action="https:&#x2f;&#x2f;test-pay.khalti.com&#x2f;?pidx=HT6o6PEZRWFJ5ygavzHWd5""#));
        assert_eq!(call(&app, "GET", &base, None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_gateway_return_success_page() {
        let mut api = MockCheckoutApi::new();
        api.expect_verify_payment()
            .once()
            .withf(|r| r.pidx.as_deref() == Some("px_9") && r.order_id == Some(OrderId::new("ord_k")))
            .return_once(|_| Ok(VerifiedPayment { order_id: OrderId::new("ord_k"), status: Some("Completed".into()), transaction_id: None }));
        let app = app(api);

        let (status, body) = call(&app, "GET", "/payments/return/khalti?pidx=px_9&purchase_order_id=ord_k&status=Completed", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("url=&#x2f;orders&#x2f;ord_k"));
    }

    #[tokio::test]
    async fn test_gateway_return_failure_page_links_to_cart() {
        let mut api = MockCheckoutApi::new();
        api.expect_verify_payment().never();
        let app = app(api);

        let (status, body) = call(&app, "GET", "/payments/return/esewa?orderId=ord_1", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"href="/cart""#));
        assert_eq!(call(&app, "GET", "/payments/return/paypal", None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_idle_session_is_swept() {
        let state = state(MockCheckoutApi::new());
        let app = router(state.clone());
        let base = session_at_payment(&app, "cash_on_delivery").await;
        let ttl = CheckoutConfig::default().session_ttl;

        assert_eq!(state.sweep_idle(Instant::now() + ttl / 2), 0);
        assert_eq!(call(&app, "GET", &base, None).await.0, StatusCode::OK);

        assert_eq!(state.sweep_idle(Instant::now() + ttl + Duration::from_secs(1)), 1);
        assert_eq!(state.session_count(), 0);
        assert_eq!(call(&app, "GET", &base, None).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sweep_keeps_recently_used_sessions() {
        let state = state(MockCheckoutApi::new());
        let app = router(state.clone());
        let stale = session_at_payment(&app, "cash_on_delivery").await;
        let ttl = CheckoutConfig::default().session_ttl;
        let later = Instant::now() + ttl + Duration::from_secs(1);

        let fresh = session_at_payment(&app, "khalti").await;
        {
            let mut sessions = state.sessions.lock();
            let stale_id: Uuid = stale.rsplit('/').next().unwrap().parse().unwrap();
            sessions.get_mut(&stale_id).unwrap().touched = Instant::now() - Duration::from_secs(5);
            let fresh_id: Uuid = fresh.rsplit('/').next().unwrap().parse().unwrap();
            sessions.get_mut(&fresh_id).unwrap().touched = later;
        }

        assert_eq!(state.sweep_idle(later), 1);
        assert_eq!(call(&app, "GET", &stale, None).await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&app, "GET", &fresh, None).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_failure_page_escapes_backend_message() {
        let mut api = MockCheckoutApi::new();
        api.expect_verify_payment().once().return_once(|_| Err(ApiError::rejected(400, "<b>declined</b>")));
        let app = app(api);

        let (status, body) = call(&app, "GET", "/payments/return/khalti?pidx=px_1&purchase_order_id=ord_1", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("<b>"));
        assert!(body.contains(r#"href="/cart""#));
    }
}
