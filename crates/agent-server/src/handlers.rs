//! HTTP/WebSocket Handlers

use std::sync::Arc;

use axum::{
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use agent_core::SessionId;
use agent_payments::model::CheckoutSession;
use agent_payments::WebhookEvent;
use commerce_agent::model::CancelOutcome;
use commerce_agent::{
    AddToCartOutcome, AddToCartParams, CartView, ChatReply, CommerceError, CompleteCheckoutOutcome,
    CreateCheckoutOutcome, CreateCheckoutParams, DiscoveryOutcome, OrderStatusOutcome, SearchOutcome,
    ShoppingAssistant, UpdateCheckoutParams,
};

use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-session-id";

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gemini_configured: bool,
    pub stripe_configured: bool,
    pub browser_fallback: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct CompleteCheckoutRequest {
    pub checkout_id: String,
    #[serde(default)]
    pub confirm_purchase: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutIdRequest {
    pub checkout_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderStatusRequest {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub merchant_url: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Helpers
// ============================================================================

/// Cart owner for this request: `X-Session-Id`, or the anonymous cart
pub fn shopper_id(headers: &HeaderMap) -> SessionId {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(SessionId::anonymous, SessionId::from_string)
}

/// A chat `user_id` names the cart instead of the header
fn with_user_override(shopper: SessionId, user_id: Option<&str>) -> SessionId {
    user_id
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map_or(shopper, SessionId::from_string)
}

fn require_assistant(state: &AppState) -> Result<Arc<ShoppingAssistant>, ApiError> {
    state
        .assistant
        .clone()
        .ok_or_else(|| CommerceError::NotConfigured("Chat".into()).into())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gemini_configured: state.assistant.is_some(),
        stripe_configured: state.stripe_configured,
        browser_fallback: state.agent.browser_fallback_enabled(),
    })
}

pub async fn capabilities(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "features": [
            "product_search",
            "cart_management",
            "ucp_checkout",
            "stripe_checkout",
            "browser_fallback",
            "order_tracking"
        ],
        "supported_protocols": ["UCP", "Stripe Checkout", "Browser Automation"],
        "payment_provider": state.agent.provider_name(),
        "browser_fallback_enabled": state.agent.browser_fallback_enabled(),
    }))
}

/// Chat with the shopping assistant
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<ChatReply> {
    let assistant = require_assistant(&state)?;
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".into()));
    }

    let shopper = with_user_override(shopper_id(&headers), payload.user_id.as_deref());
    let reply = assistant
        .chat(&shopper, &payload.message, payload.context.as_ref())
        .await?;
    Ok(Json(reply))
}

/// WebSocket streaming chat
pub async fn chat_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let assistant = require_assistant(&state)?;
    let shopper = shopper_id(&headers);
    Ok(ws.on_upgrade(move |socket| handle_stream(socket, assistant, shopper)))
}

fn frame(kind: &str, content: &str, done: bool) -> Message {
    let body = json!({"type": kind, "content": content, "done": done});
    Message::Text(body.to_string().into())
}

async fn handle_stream(socket: WebSocket, assistant: Arc<ShoppingAssistant>, shopper: SessionId) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!(shopper = %shopper, error = %e, "WebSocket error");
                break;
            }
            _ => continue,
        };

        let request: ChatRequest = match serde_json::from_str(msg.as_str()) {
            Ok(r) => r,
            Err(e) => {
                let _ = sender.send(frame("error", &e.to_string(), true)).await;
                continue;
            }
        };
        let shopper = with_user_override(shopper.clone(), request.user_id.as_deref());

        let mut stream = match assistant.stream(&shopper, &request.message).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = sender.send(frame("error", &e.user_message(), true)).await;
                continue;
            }
        };

        let mut reply = String::new();
        let mut complete = true;
        while let Some(result) = stream.next().await {
            match result {
                Ok(chunk) => {
                    reply.push_str(&chunk.delta);
                    if sender.send(frame("chunk", &chunk.delta, chunk.done)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    complete = false;
                    let _ = sender.send(frame("error", &e.user_message(), true)).await;
                    break;
                }
            }
        }

        if complete {
            if let Err(e) = assistant.record_exchange(&shopper, &request.message, &reply) {
                tracing::warn!(shopper = %shopper, error = %e, "Could not record streamed exchange");
            }
        }
    }
}

pub async fn search_products(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> ApiResult<SearchOutcome> {
    Ok(Json(state.agent.search_products(&payload.query, payload.limit).await?))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AddToCartParams>,
) -> ApiResult<AddToCartOutcome> {
    Ok(Json(state.agent.add_to_cart(&shopper_id(&headers), payload).await?))
}

pub async fn view_cart(State(state): State<AppState>, headers: HeaderMap) -> Json<CartView> {
    Json(state.agent.view_cart(&shopper_id(&headers)).await)
}

pub async fn clear_cart(State(state): State<AppState>, headers: HeaderMap) -> Json<MessageResponse> {
    state.agent.clear_cart(&shopper_id(&headers)).await;
    Json(MessageResponse {
        message: "Cart cleared successfully".into(),
    })
}

pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCheckoutParams>,
) -> ApiResult<CreateCheckoutOutcome> {
    let outcome = state.agent.create_checkout(&shopper_id(&headers), payload).await?;
    if !outcome.success {
        return Err(ApiError::BadRequest(
            outcome.error.unwrap_or_else(|| "Checkout failed".into()),
        ));
    }
    Ok(Json(outcome))
}

pub async fn update_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UpdateCheckoutParams>,
) -> ApiResult<CheckoutSession> {
    Ok(Json(state.agent.update_checkout(&shopper_id(&headers), payload).await?))
}

pub async fn complete_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CompleteCheckoutRequest>,
) -> ApiResult<CompleteCheckoutOutcome> {
    let outcome = state
        .agent
        .complete_checkout(&shopper_id(&headers), &payload.checkout_id, payload.confirm_purchase)
        .await?;
    if !outcome.success {
        return Err(ApiError::BadRequest(outcome.message));
    }
    Ok(Json(outcome))
}

pub async fn cancel_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutIdRequest>,
) -> ApiResult<CancelOutcome> {
    Ok(Json(
        state
            .agent
            .cancel_checkout(&shopper_id(&headers), &payload.checkout_id)
            .await?,
    ))
}

pub async fn order_status(
    State(state): State<AppState>,
    Json(payload): Json<OrderStatusRequest>,
) -> ApiResult<OrderStatusOutcome> {
    Ok(Json(state.agent.check_order_status(&payload.order_id).await?))
}

pub async fn discover_merchant(
    State(state): State<AppState>,
    Json(payload): Json<DiscoverRequest>,
) -> ApiResult<DiscoveryOutcome> {
    Ok(Json(state.agent.discover(&payload.merchant_url).await?))
}

/// Stripe webhook handler
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let webhooks = state
        .webhooks
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Webhooks not configured".into()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    let event = webhooks.handle(&body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Webhook rejected");
        ApiError::BadRequest("Invalid webhook".into())
    })?;

    if let WebhookEvent::CheckoutCompleted {
        session_id,
        cart_session: Some(cart_session),
        ..
    } = &event
    {
        let removed = state.agent.clear_cart(&SessionId::from_string(cart_session)).await;
        tracing::info!(session_id = %session_id, cart_session = %cart_session, removed, "Cart cleared after payment");
    }

    Ok(StatusCode::OK)
}
