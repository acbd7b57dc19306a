//! Cart state and the outcome shapes returned to routes and the assistant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use agent_payments::model::{CheckoutSession, HostedCheckout, LineItem, OrderStatus, Product};

/// Currencies Stripe charges in whole units
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Human readable amount, e.g. `54.00 USD`
pub fn format_amount(minor_units: i64, currency: &str) -> String {
    let currency = currency.to_ascii_lowercase();
    let scale = if ZERO_DECIMAL_CURRENCIES.contains(&currency.as_str()) { 0 } else { 2 };
    format!("{} {}", Decimal::new(minor_units, scale), currency.to_uppercase())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_id: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(product_id: impl Into<String>, quantity: u32, price_id: Option<String>) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            price_id,
            added_at: Utc::now(),
        }
    }

    pub fn to_line_item(&self) -> LineItem {
        LineItem {
            product_id: self.product_id.clone(),
            quantity: self.quantity,
            price_id: self.price_id.clone(),
            variant_id: None,
        }
    }

    /// Stripe price for hosted checkout; falls back to the product id
    pub fn hosted_price(&self) -> &str {
        self.price_id.as_deref().unwrap_or(&self.product_id)
    }
}

/// How a checkout is carried out
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutProtocol {
    #[serde(rename = "UCP")]
    Ucp,
    #[serde(rename = "Stripe Checkout")]
    StripeCheckout,
    #[serde(rename = "Browser Automation")]
    BrowserAutomation,
}

impl std::fmt::Display for CheckoutProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckoutProtocol::Ucp => write!(f, "UCP"),
            CheckoutProtocol::StripeCheckout => write!(f, "Stripe Checkout"),
            CheckoutProtocol::BrowserAutomation => write!(f, "Browser Automation"),
        }
    }
}

/// Checkout in progress for a cart. Browser automation places the order in
/// one step and never leaves one behind.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "protocol")]
pub enum ActiveCheckout {
    #[serde(rename = "UCP")]
    Ucp {
        merchant_url: String,
        session: CheckoutSession,
    },
    #[serde(rename = "Stripe Checkout")]
    Hosted {
        merchant_url: String,
        checkout: HostedCheckout,
    },
}

impl ActiveCheckout {
    pub fn id(&self) -> &str {
        match self {
            ActiveCheckout::Ucp { session, .. } => &session.id,
            ActiveCheckout::Hosted { checkout, .. } => &checkout.id,
        }
    }

    pub fn protocol(&self) -> CheckoutProtocol {
        match self {
            ActiveCheckout::Ucp { .. } => CheckoutProtocol::Ucp,
            ActiveCheckout::Hosted { .. } => CheckoutProtocol::StripeCheckout,
        }
    }

    pub fn merchant_url(&self) -> &str {
        match self {
            ActiveCheckout::Ucp { merchant_url, .. } | ActiveCheckout::Hosted { merchant_url, .. } => {
                merchant_url
            }
        }
    }
}

/// One shopper's cart
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub checkout: Option<ActiveCheckout>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn line_items(&self) -> Vec<LineItem> {
        self.items.iter().map(CartItem::to_line_item).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.checkout = None;
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub products: Vec<Product>,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct AddToCartOutcome {
    pub success: bool,
    pub message: String,
    pub cart_size: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub items: Vec<CartItem>,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_id: Option<String>,
}

/// Session behind a created checkout, in the vendor's own shape
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CheckoutDetails {
    Ucp(CheckoutSession),
    Hosted(HostedCheckout),
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateCheckoutOutcome {
    pub success: bool,
    pub protocol: CheckoutProtocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_total: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// `amount_total` formatted for the shopper
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub requires_manual_checkout: bool,
}

impl CreateCheckoutOutcome {
    pub(crate) fn new(protocol: CheckoutProtocol) -> Self {
        Self {
            success: true,
            protocol,
            checkout_id: None,
            checkout_url: None,
            amount_total: None,
            currency: None,
            amount_display: None,
            checkout: None,
            order_number: None,
            error: None,
            requires_manual_checkout: false,
        }
    }

    pub(crate) fn with_amount(mut self, amount: Option<i64>, currency: Option<String>) -> Self {
        self.amount_display = match (amount, currency.as_deref()) {
            (Some(amount), Some(currency)) => Some(format_amount(amount, currency)),
            _ => None,
        };
        self.amount_total = amount;
        self.currency = currency;
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompleteCheckoutOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub message: String,
}

impl CompleteCheckoutOutcome {
    pub(crate) fn message(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            order_id: None,
            order_number: None,
            checkout_url: None,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct OrderStatusOutcome {
    pub success: bool,
    #[serde(flatten)]
    pub status: OrderStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct DiscoveryOutcome {
    pub merchant_url: String,
    pub supported: bool,
    pub version: String,
    pub endpoints: HashMap<String, String>,
    pub features: Vec<String>,
}
