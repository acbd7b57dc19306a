//! # commerce-agent
//!
//! Checkout orchestration for a conversational shopping assistant.
//!
//! A shopper's cart lives under their session id. When they check out, the
//! merchant decides the route:
//!
//! ```text
//!                        ┌──────────────────────────┐
//!   create_checkout ────▶│  GET /.well-known/ucp    │
//!                        └────────────┬─────────────┘
//!                  supported          │          not supported
//!          ┌──────────────────────────┼──────────────────────────┐
//!          ▼                          ▼                          ▼
//!   UCP checkout session     browser automation         Stripe hosted page
//!   (SPT on completion)      (when enabled)             (shopper pays there)
//! ```
//!
//! UCP completions mint a shared payment token for exactly the merchant's
//! current total and refuse to complete when the two disagree.

pub mod assistant;
pub mod browser;
pub mod cart;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod operations;
pub mod orchestrator;

pub use assistant::{ChatReply, ShoppingAssistant};
pub use browser::{
    AutomationJob, AutomationOutcome, AutomationStep, BrowserAutomation, BrowserConfig,
    BrowserError, BrowserLauncher, BrowserPage, CheckoutAutomationStrategy, ProfileStrategy,
    Selector, StorefrontProfile, WebDriverLauncher,
};
pub use cart::SessionCarts;
pub use config::CommerceConfig;
pub use dispatch::CommerceDispatcher;
pub use error::{CommerceError, Result};
pub use model::{
    ActiveCheckout, AddToCartOutcome, Cart, CartItem, CartView, CheckoutDetails, CheckoutProtocol,
    CompleteCheckoutOutcome, CreateCheckoutOutcome, DiscoveryOutcome, OrderStatusOutcome,
    SearchOutcome,
};
pub use operations::CommerceOperation;
pub use orchestrator::{AddToCartParams, CreateCheckoutParams, PaymentAgent, UpdateCheckoutParams};

/// System prompt for the shopping assistant
pub const COMMERCE_AGENT_PROMPT: &str = r#"You are a helpful shopping assistant. You help users discover products, manage their shopping cart, and complete purchases.

## Tools Available

- `search_products` - Search the product catalog
- `add_to_cart` - Add an item to the user's cart
- `view_cart` - Show the current cart
- `create_checkout` - Start checkout with a merchant
- `complete_checkout` - Finalize a purchase
- `check_order_status` - Look up an order

## Purchasing Rules

1. Before calling `complete_checkout`, always tell the user the total amount and currency.
2. Only set `confirm_purchase` to true after the user has explicitly agreed to pay that amount.
3. If checkout needs manual steps, give the user the checkout link and explain what is left to do.
4. Never ask for or repeat card numbers. Payment uses saved or tokenised methods only.

Always be helpful and conversational, and guide users through the shopping experience."#;

/// System prompt with optional user context appended
pub fn system_prompt(user_context: Option<&serde_json::Value>) -> String {
    match user_context {
        Some(context) if !context.is_null() => {
            format!("{}\n\nUser Context: {}", COMMERCE_AGENT_PROMPT, context)
        }
        _ => COMMERCE_AGENT_PROMPT.to_string(),
    }
}
