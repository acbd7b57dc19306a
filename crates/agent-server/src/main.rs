//! Checkout agent HTTP server
//!
//! Wires Gemini, Stripe and the commerce orchestrator from the environment.
//! Missing vendor keys downgrade features instead of stopping the server.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{GenerationOptions, LlmProvider};
use agent_payments::{MockPaymentProvider, PaymentProvider, StripeClient, WebhookHandler};
use agent_runtime::GeminiProvider;
use agent_server::{build_router, AppState};
use commerce_agent::{CommerceConfig, PaymentAgent, ShoppingAssistant};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Payments
    let stripe = match StripeClient::from_env() {
        Ok(client) => {
            tracing::info!("✓ Stripe configured");
            Some(client)
        }
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Stripe not configured - payment features unavailable");
            tracing::warn!("  Set STRIPE_SECRET_KEY in .env");
            None
        }
    };
    let webhooks = stripe
        .as_ref()
        .and_then(StripeClient::webhook_secret)
        .map(|secret| Arc::new(WebhookHandler::new(secret)));
    if stripe.is_some() && webhooks.is_none() {
        tracing::warn!("⚠ STRIPE_WEBHOOK_SECRET not set - webhooks disabled");
    }

    let config = CommerceConfig::from_env();
    let stripe_configured = stripe.is_some();
    let provider: Option<Arc<dyn PaymentProvider>> = match stripe {
        Some(client) => Some(Arc::new(client)),
        None if config.demo_catalog => {
            tracing::warn!("⚠ DEMO_CATALOG set - serving the in-memory demo catalog");
            Some(Arc::new(MockPaymentProvider::with_demo_catalog()))
        }
        None => None,
    };

    // Orchestrator
    let agent = Arc::new(PaymentAgent::from_config(provider, &config)?);
    if agent.browser_fallback_enabled() {
        tracing::info!(webdriver = %config.browser.webdriver_url, "✓ Browser fallback enabled");
    }

    let mut state = AppState::new(agent.clone()).with_stripe(stripe_configured);
    if let Some(webhooks) = webhooks {
        state = state.with_webhooks(webhooks);
    }

    // LLM
    match GeminiProvider::from_env() {
        Ok(gemini) => {
            let generation = GenerationOptions {
                model: gemini.config().model.clone(),
                ..Default::default()
            };
            match gemini.health_check().await {
                Ok(true) => tracing::info!(model = %generation.model, "✓ Gemini configured"),
                Ok(false) | Err(_) => tracing::warn!("⚠ Gemini not reachable - chat may fail"),
            }
            let assistant = ShoppingAssistant::new(Arc::new(gemini), agent).with_generation(generation);
            state = state.with_assistant(Arc::new(assistant));
        }
        Err(e) => {
            tracing::warn!(error = %e, "⚠ Gemini not configured - chat disabled");
            tracing::warn!("  Set GEMINI_API_KEY in .env");
        }
    }

    let app = build_router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 checkout agent running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                          - Health check");
    tracing::info!("  POST /payment-agent/chat              - Chat with the assistant");
    tracing::info!("  GET  /payment-agent/chat/stream       - WebSocket streaming");
    tracing::info!("  POST /payment-agent/checkout/create   - Start checkout");
    tracing::info!("  POST /payment-agent/checkout/complete - Complete checkout");
    tracing::info!("  POST /webhook/stripe                  - Stripe webhooks");

    axum::serve(listener, app).await?;

    Ok(())
}
