//! Application State

use std::sync::Arc;

use agent_payments::WebhookHandler;
use commerce_agent::{PaymentAgent, ShoppingAssistant};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Checkout orchestrator holding every shopper's cart
    pub agent: Arc<PaymentAgent>,

    /// Chat front-end (None when no LLM key is configured)
    pub assistant: Option<Arc<ShoppingAssistant>>,

    /// Stripe webhook verifier (None without a signing secret)
    pub webhooks: Option<Arc<WebhookHandler>>,

    /// Real Stripe account behind `agent`, rather than the demo catalog
    pub stripe_configured: bool,
}

impl AppState {
    pub fn new(agent: Arc<PaymentAgent>) -> Self {
        Self {
            agent,
            assistant: None,
            webhooks: None,
            stripe_configured: false,
        }
    }

    pub fn with_assistant(mut self, assistant: Arc<ShoppingAssistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Arc<WebhookHandler>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    pub fn with_stripe(mut self, configured: bool) -> Self {
        self.stripe_configured = configured;
        self
    }
}
