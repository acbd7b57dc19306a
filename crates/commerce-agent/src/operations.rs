//! Operations the model may call
//!
//! The set is closed: a call is parsed into a [`CommerceOperation`] before
//! anything runs, so unknown names and malformed arguments never reach the
//! orchestrator.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use agent_core::tool::ParameterSchema;
use agent_core::{AgentError, ToolCall, ToolSchema};

use crate::orchestrator::{AddToCartParams, CreateCheckoutParams};

pub const SEARCH_PRODUCTS: &str = "search_products";
pub const ADD_TO_CART: &str = "add_to_cart";
pub const VIEW_CART: &str = "view_cart";
pub const CREATE_CHECKOUT: &str = "create_checkout";
pub const COMPLETE_CHECKOUT: &str = "complete_checkout";
pub const CHECK_ORDER_STATUS: &str = "check_order_status";

fn default_limit() -> usize {
    10
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchProductsArgs {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewCartArgs {}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteCheckoutArgs {
    pub checkout_id: String,
    pub confirm_purchase: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckOrderStatusArgs {
    pub order_id: String,
}

#[derive(Clone, Debug)]
pub enum CommerceOperation {
    SearchProducts(SearchProductsArgs),
    AddToCart(AddToCartParams),
    ViewCart,
    CreateCheckout(CreateCheckoutParams),
    CompleteCheckout(CompleteCheckoutArgs),
    CheckOrderStatus(CheckOrderStatusArgs),
}

impl CommerceOperation {
    /// Parse a model call into an operation
    pub fn from_call(call: &ToolCall) -> Result<Self, AgentError> {
        let op = match call.name.as_str() {
            SEARCH_PRODUCTS => Self::SearchProducts(args(call)?),
            ADD_TO_CART => Self::AddToCart(args(call)?),
            VIEW_CART => {
                args::<ViewCartArgs>(call)?;
                Self::ViewCart
            }
            CREATE_CHECKOUT => Self::CreateCheckout(args(call)?),
            COMPLETE_CHECKOUT => Self::CompleteCheckout(args(call)?),
            CHECK_ORDER_STATUS => Self::CheckOrderStatus(args(call)?),
            other => return Err(AgentError::ToolNotFound(other.to_string())),
        };
        Ok(op)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchProducts(_) => SEARCH_PRODUCTS,
            Self::AddToCart(_) => ADD_TO_CART,
            Self::ViewCart => VIEW_CART,
            Self::CreateCheckout(_) => CREATE_CHECKOUT,
            Self::CompleteCheckout(_) => COMPLETE_CHECKOUT,
            Self::CheckOrderStatus(_) => CHECK_ORDER_STATUS,
        }
    }

    /// Function declarations advertised to the model
    pub fn schemas() -> Vec<ToolSchema> {
        vec![
            ToolSchema {
                name: SEARCH_PRODUCTS.into(),
                description: "Search for products in the catalog".into(),
                parameters: vec![
                    ParameterSchema::required("query", "string", "Search query for products"),
                    ParameterSchema::optional("limit", "integer", "Maximum number of results")
                        .with_default(json!(10)),
                ],
                has_side_effects: false,
            },
            ToolSchema {
                name: ADD_TO_CART.into(),
                description: "Add a product to the shopping cart".into(),
                parameters: vec![
                    ParameterSchema::required("product_id", "string", "Product ID to add"),
                    ParameterSchema::optional("quantity", "integer", "Quantity to add")
                        .with_default(json!(1)),
                    ParameterSchema::optional("price_id", "string", "Specific price ID"),
                ],
                has_side_effects: true,
            },
            ToolSchema {
                name: VIEW_CART.into(),
                description: "View current shopping cart contents".into(),
                parameters: Vec::new(),
                has_side_effects: false,
            },
            ToolSchema {
                name: CREATE_CHECKOUT.into(),
                description: "Create a checkout session with a merchant. Uses UCP when the merchant supports it, otherwise browser automation or a hosted payment page.".into(),
                parameters: vec![
                    ParameterSchema::required("merchant_url", "string", "Merchant website URL"),
                    ParameterSchema::required("buyer_email", "string", "Buyer's email address"),
                    ParameterSchema::optional("buyer_name", "string", "Buyer's full name"),
                    ParameterSchema::optional(
                        "shipping_address",
                        "object",
                        "Shipping address with line1, line2, city, state, postal_code, country",
                    ),
                    ParameterSchema::optional(
                        "payment_method",
                        "string",
                        "Saved payment method to select during browser checkout",
                    ),
                ],
                has_side_effects: true,
            },
            ToolSchema {
                name: COMPLETE_CHECKOUT.into(),
                description: "Complete a checkout and process payment. Only call after the user has confirmed the total.".into(),
                parameters: vec![
                    ParameterSchema::required("checkout_id", "string", "Checkout session ID"),
                    ParameterSchema::required(
                        "confirm_purchase",
                        "boolean",
                        "User has explicitly confirmed the purchase",
                    ),
                ],
                has_side_effects: true,
            },
            ToolSchema {
                name: CHECK_ORDER_STATUS.into(),
                description: "Check the status of an order".into(),
                parameters: vec![ParameterSchema::required("order_id", "string", "Order or checkout session ID")],
                has_side_effects: false,
            },
        ]
    }
}

fn args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, AgentError> {
    serde_json::from_value(call.arguments_value())
        .map_err(|e| AgentError::ToolValidation(format!("Invalid arguments for {}: {}", call.name, e)))
}
