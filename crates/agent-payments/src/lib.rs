//! # agent-payments
//!
//! Vendor clients for agentic checkout.
//!
//! ## Checkout paths
//!
//! ### 1. Universal Checkout Protocol (merchant-native)
//!
//! The merchant advertises UCP at `/.well-known/ucp`. The agent negotiates a
//! checkout session directly and completes it with a shared payment token
//! minted through Stripe for exactly the session total.
//!
//! ```text
//! ┌─────────────┐  create/update  ┌─────────────┐
//! │    Agent    │────────────────▶│  Merchant   │
//! │             │  complete(SPT)  │  UCP API    │
//! └──────┬──────┘────────────────▶└─────────────┘
//!        │ PaymentIntent (transfer to merchant account)
//!        ▼
//! ┌─────────────┐
//! │   Stripe    │
//! └─────────────┘
//! ```
//!
//! ### 2. Stripe Checkout (hosted)
//!
//! For merchants without UCP the cart becomes a hosted Checkout session and
//! the shopper pays on Stripe's page. Completion is reported back through
//! the `checkout.session.completed` webhook.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_payments::{PaymentProvider, StripeClient, UcpClient};
//!
//! let stripe = StripeClient::from_env()?;
//! let products = stripe.search_products("denim jacket", 5).await?;
//!
//! let merchant = UcpClient::new("https://shop.example.com")?;
//! if merchant.supports_ucp().await? {
//!     let checkout = merchant.create_checkout(&request).await?;
//! }
//! ```

mod catalog;
mod checkout;
mod error;
mod mock;
pub mod model;
mod provider;
mod ucp;
mod webhook;

pub use catalog::{search_query, StripeCatalog};
pub use checkout::StripeClient;
pub use error::{PaymentError, Result};
pub use mock::{MockPaymentProvider, ProviderCall};
pub use model::*;
pub use provider::PaymentProvider;
pub use ucp::{parse_merchant_url, UcpClient, UcpConfig};
pub use webhook::{WebhookEvent, WebhookHandler, CART_SESSION_KEY};
