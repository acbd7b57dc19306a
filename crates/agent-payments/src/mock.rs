//! In-memory payment provider for tests and credential-free development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{PaymentError, Result};
use crate::model::{
    HostedCheckout, HostedCheckoutRequest, OrderStatus, Product, ProductPrice, SharedPaymentToken,
    SharedPaymentTokenRequest,
};
use crate::provider::PaymentProvider;

/// Calls observed by the mock, in order
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderCall {
    Search { query: String, limit: usize },
    HostedCheckout { line_items: usize, success_url: String },
    OrderStatus { session_id: String },
    SharedPaymentToken { amount: i64, merchant_account_id: String, idempotency_key: String },
}

#[derive(Default)]
struct MockState {
    calls: Vec<ProviderCall>,
    sessions: HashMap<String, HostedCheckout>,
    /// When set, the next token is minted for this amount instead of the
    /// requested one
    token_amount_override: Option<i64>,
}

/// Deterministic provider backed by a fixed catalog
#[derive(Default)]
pub struct MockPaymentProvider {
    catalog: Vec<Product>,
    state: Mutex<MockState>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Small demo catalog
    pub fn with_demo_catalog() -> Self {
        let product = |id: &str, name: &str, cents: i64| Product {
            id: id.into(),
            name: name.into(),
            description: None,
            images: Vec::new(),
            metadata: HashMap::new(),
            prices: vec![ProductPrice {
                id: format!("price_{}", id.trim_start_matches("prod_")),
                amount: Some(cents),
                currency: "usd".into(),
                price_type: Some("one_time".into()),
            }],
        };

        Self::with_catalog(vec![
            product("prod_denim", "Selvedge Denim Jacket", 12_800),
            product("prod_tee", "Organic Cotton Tee", 2_900),
            product("prod_boots", "Leather Chelsea Boots", 18_500),
        ])
    }

    pub fn with_catalog(catalog: Vec<Product>) -> Self {
        Self {
            catalog,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Make the next shared payment token carry a different amount
    pub fn override_next_token_amount(&self, amount: i64) {
        if let Ok(mut state) = self.state.lock() {
            state.token_amount_override = Some(amount);
        }
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PaymentError::Config("mock provider lock poisoned".into()))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search_products(&self, query: &str, limit: usize) -> Result<Vec<Product>> {
        self.with_state(|s| {
            s.calls.push(ProviderCall::Search {
                query: query.to_string(),
                limit,
            })
        })?;

        let needle = query.to_lowercase();
        Ok(self
            .catalog
            .iter()
            .filter(|p| needle.is_empty() || p.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_checkout_session(&self, request: HostedCheckoutRequest) -> Result<HostedCheckout> {
        let amount_total: i64 = request
            .line_items
            .iter()
            .map(|item| {
                let unit = self
                    .catalog
                    .iter()
                    .flat_map(|p| p.prices.iter())
                    .find(|price| price.id == item.price)
                    .and_then(|price| price.amount)
                    .unwrap_or(0);
                unit * i64::from(item.quantity)
            })
            .sum();

        self.with_state(|s| {
            let id = format!("cs_test_{}", s.sessions.len() + 1);
            let session = HostedCheckout {
                url: format!("https://checkout.stripe.com/c/pay/{}", id),
                id: id.clone(),
                status: Some("open".into()),
                amount_total: Some(amount_total),
                currency: Some("usd".into()),
                payment_status: Some("unpaid".into()),
            };
            s.calls.push(ProviderCall::HostedCheckout {
                line_items: request.line_items.len(),
                success_url: request.success_url.clone(),
            });
            s.sessions.insert(id, session.clone());
            session
        })
    }

    async fn order_status(&self, session_id: &str) -> Result<OrderStatus> {
        let session = self.with_state(|s| {
            s.calls.push(ProviderCall::OrderStatus {
                session_id: session_id.to_string(),
            });
            s.sessions.get(session_id).cloned()
        })?;

        let session =
            session.ok_or_else(|| PaymentError::NotFound(format!("No such checkout session: {}", session_id)))?;

        Ok(OrderStatus {
            id: session.id,
            status: session.status,
            payment_status: session.payment_status,
            amount_total: session.amount_total,
            currency: session.currency,
            payment_intent: None,
        })
    }

    async fn create_shared_payment_token(
        &self,
        request: SharedPaymentTokenRequest,
    ) -> Result<SharedPaymentToken> {
        self.with_state(|s| {
            s.calls.push(ProviderCall::SharedPaymentToken {
                amount: request.amount,
                merchant_account_id: request.merchant_account_id.clone(),
                idempotency_key: request.idempotency_key.clone(),
            });
            let amount = s.token_amount_override.take().unwrap_or(request.amount);
            let n = s.calls.len();
            SharedPaymentToken {
                token: format!("pi_mock_{}_secret_{}", n, request.idempotency_key),
                payment_intent_id: format!("pi_mock_{}", n),
                amount,
                currency: request.currency.clone(),
                status: "requires_payment_method".into(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HostedLineItem;

    #[tokio::test]
    async fn test_search_filters_and_limits() {
        let provider = MockPaymentProvider::with_demo_catalog();
        let found = provider.search_products("denim", 10).await.unwrap();
        assert_eq!(found.len(), 1);

        let limited = provider.search_products("", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_hosted_checkout_then_status() {
        let provider = MockPaymentProvider::with_demo_catalog();
        let session = provider
            .create_checkout_session(HostedCheckoutRequest {
                line_items: vec![HostedLineItem { price: "price_tee".into(), quantity: 2 }],
                success_url: "https://shop.test/success".into(),
                cancel_url: "https://shop.test/cancel".into(),
                customer_email: None,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(session.amount_total, Some(5_800));

        let status = provider.order_status(&session.id).await.unwrap();
        assert_eq!(status.payment_status.as_deref(), Some("unpaid"));
        assert!(matches!(
            provider.order_status("cs_missing").await,
            Err(PaymentError::NotFound(_))
        ));
    }
}
