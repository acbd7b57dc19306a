//! Checkout agent HTTP server
//!
//! Axum routes for the payment agent under `/payment-agent`, plus health
//! and the Stripe webhook at the root.

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    add_to_cart, cancel_checkout, capabilities, chat_handler, chat_stream_handler, clear_cart,
    complete_checkout, create_checkout, discover_merchant, health_check, order_status,
    search_products, stripe_webhook, update_checkout, view_cart,
};
pub use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let payment_agent = Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", get(chat_stream_handler))
        .route("/search-products", post(search_products))
        .route("/cart", get(view_cart))
        .route("/cart/add", post(add_to_cart))
        .route("/cart/clear", delete(clear_cart))
        .route("/checkout/create", post(create_checkout))
        .route("/checkout/update", post(update_checkout))
        .route("/checkout/complete", post(complete_checkout))
        .route("/checkout/cancel", post(cancel_checkout))
        .route("/order/status", post(order_status))
        .route("/ucp/discover", post(discover_merchant))
        .route("/capabilities", get(capabilities));

    Router::new()
        .route("/health", get(health_check))
        .route("/webhook/stripe", post(stripe_webhook))
        .nest("/payment-agent", payment_agent)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_payments::{MockPaymentProvider, WebhookHandler};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use commerce_agent::PaymentAgent;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let agent = PaymentAgent::new(Arc::new(MockPaymentProvider::with_demo_catalog()));
        build_router(AppState::new(Arc::new(agent)))
    }

    fn post_json(uri: &str, session: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(session) = session {
            builder = builder.header("x-session-id", session);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(session) = session {
            builder = builder.header("x-session-id", session);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health_reports_configuration() {
        let (status, body) = send(&app(), get("/health", None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["gemini_configured"], false);
        assert_eq!(body["stripe_configured"], false);
        assert_eq!(body["browser_fallback"], false);
    }

    #[tokio::test]
    async fn test_carts_follow_session_header() {
        let app = app();

        let (status, body) = send(
            &app,
            post_json("/payment-agent/cart/add", Some("alice"), json!({"product_id": "prod_tee", "quantity": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Added 2 item(s) to cart");

        let (_, alice) = send(&app, get("/payment-agent/cart", Some("alice"))).await;
        assert_eq!(alice["item_count"], 1);
        let (_, anonymous) = send(&app, get("/payment-agent/cart", None)).await;
        assert_eq!(anonymous["item_count"], 0);

        let clear = Request::builder()
            .method("DELETE")
            .uri("/payment-agent/cart/clear")
            .header("x-session-id", "alice")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, clear).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Cart cleared successfully");
        let (_, alice) = send(&app, get("/payment-agent/cart", Some("alice"))).await;
        assert_eq!(alice["item_count"], 0);
    }

    #[tokio::test]
    async fn test_validation_errors_are_bad_requests() {
        let app = app();

        let (status, body) = send(
            &app,
            post_json("/payment-agent/cart/add", None, json!({"product_id": "prod_tee", "quantity": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");

        let (status, body) = send(
            &app,
            post_json(
                "/payment-agent/checkout/create",
                None,
                json!({"merchant_url": "https://shop.example.com", "buyer_email": "ada@example.com"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("cart is empty"));
    }

    #[tokio::test]
    async fn test_unconfirmed_completion_is_rejected() {
        let (status, body) = send(
            &app(),
            post_json(
                "/payment-agent/checkout/complete",
                None,
                json!({"checkout_id": "chk_1", "confirm_purchase": false}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Purchase not confirmed by user");
    }

    #[tokio::test]
    async fn test_search_returns_products() {
        let (status, body) = send(
            &app(),
            post_json("/payment-agent/search-products", None, json!({"query": "boots"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["products"][0]["id"], "prod_boots");
    }

    #[tokio::test]
    async fn test_unconfigured_dependencies_are_unavailable() {
        let app = app();

        let (status, body) = send(&app, post_json("/payment-agent/chat", None, json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

        let webhook = Request::builder()
            .method("POST")
            .uri("/webhook/stripe")
            .header("stripe-signature", "t=1,v1=abc")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&app, webhook).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_payment_routes_unavailable_without_stripe() {
        let app = build_router(AppState::new(Arc::new(PaymentAgent::without_payments())));

        let (status, body) = send(
            &app,
            post_json("/payment-agent/search-products", None, json!({"query": "boots"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

        let (status, _) = send(
            &app,
            post_json("/payment-agent/order/status", None, json!({"order_id": "cs_test_1"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = send(
            &app,
            post_json("/payment-agent/cart/add", None, json!({"product_id": "prod_tee"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    fn completed_checkout_event(cart_session: &str) -> String {
        json!({
            "id": "evt_test_1",
            "object": "event",
            "created": 1_700_000_000,
            "livemode": false,
            "pending_webhooks": 1,
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "object": "checkout.session",
                    "amount_total": 2900,
                    "currency": "usd",
                    "automatic_tax": {"enabled": false},
                    "created": 1_700_000_000,
                    "custom_fields": [],
                    "custom_text": {},
                    "expires_at": 1_700_086_400,
                    "livemode": false,
                    "metadata": {"cart_session": cart_session},
                    "mode": "payment",
                    "payment_method_types": ["card"],
                    "payment_status": "paid",
                    "shipping_options": [],
                    "status": "complete"
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_paid_webhook_clears_cart() {
        let webhooks = Arc::new(WebhookHandler::new("whsec_test"));
        let agent = PaymentAgent::new(Arc::new(MockPaymentProvider::with_demo_catalog()));
        let app = build_router(AppState::new(Arc::new(agent)).with_webhooks(webhooks.clone()));

        send(
            &app,
            post_json("/payment-agent/cart/add", Some("alice"), json!({"product_id": "prod_tee"})),
        )
        .await;

        let payload = completed_checkout_event("alice");
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let signed = |signature: String| {
            Request::builder()
                .method("POST")
                .uri("/webhook/stripe")
                .header("stripe-signature", signature)
                .body(Body::from(payload.clone()))
                .unwrap()
        };

        let (status, _) = send(&app, signed("t=1,v1=00".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, alice) = send(&app, get("/payment-agent/cart", Some("alice"))).await;
        assert_eq!(alice["item_count"], 1);

        let (status, _) = send(&app, signed(webhooks.sign(&payload, now).unwrap())).await;
        assert_eq!(status, StatusCode::OK);
        let (_, alice) = send(&app, get("/payment-agent/cart", Some("alice"))).await;
        assert_eq!(alice["item_count"], 0);
    }

    #[tokio::test]
    async fn test_merchant_rejection_reaches_caller() {
        use httpmock::prelude::{MockServer, GET as HTTP_GET, POST as HTTP_POST};

        let merchant = MockServer::start_async().await;
        merchant
            .mock_async(|when, then| {
                when.method(HTTP_GET).path("/.well-known/ucp");
                then.status(200).json_body(json!({"supported": true, "features": ["checkout"]}));
            })
            .await;
        merchant
            .mock_async(|when, then| {
                when.method(HTTP_POST).path("/ucp/checkout");
                then.status(422).body("out_of_stock");
            })
            .await;
        let app = app();
        send(
            &app,
            post_json("/payment-agent/cart/add", Some("alice"), json!({"product_id": "prod_tee"})),
        )
        .await;

        let (status, body) = send(
            &app,
            post_json(
                "/payment-agent/checkout/create",
                Some("alice"),
                json!({"merchant_url": merchant.base_url(), "buyer_email": "ada@example.com"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "UCP request failed with status 422: out_of_stock");
    }

    #[tokio::test]
    async fn test_capabilities_lists_protocols() {
        let (status, body) = send(&app(), get("/payment-agent/capabilities", None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["supported_protocols"],
            json!(["UCP", "Stripe Checkout", "Browser Automation"])
        );
        assert_eq!(body["payment_provider"], "mock");
    }
}
