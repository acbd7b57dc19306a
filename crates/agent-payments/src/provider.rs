//! Payment provider strategy
//!
//! The orchestrator only sees this trait. [`crate::StripeClient`] is the
//! production implementation; [`crate::MockPaymentProvider`] backs tests and
//! local development without Stripe credentials.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    HostedCheckout, HostedCheckoutRequest, OrderStatus, Product, SharedPaymentToken,
    SharedPaymentTokenRequest,
};

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name for logs and health output
    fn name(&self) -> &str;

    /// Catalog search. Returns at most `limit` products.
    async fn search_products(&self, query: &str, limit: usize) -> Result<Vec<Product>>;

    /// Hosted checkout page for merchants without UCP
    async fn create_checkout_session(&self, request: HostedCheckoutRequest) -> Result<HostedCheckout>;

    /// Status of a hosted checkout session and its payment
    async fn order_status(&self, session_id: &str) -> Result<OrderStatus>;

    /// Token authorising exactly `request.amount` to the merchant account
    async fn create_shared_payment_token(
        &self,
        request: SharedPaymentTokenRequest,
    ) -> Result<SharedPaymentToken>;
}
