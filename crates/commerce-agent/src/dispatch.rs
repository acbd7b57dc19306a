//! Function-call dispatch for one shopper

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use agent_core::{AgentError, Result as CoreResult, SessionId, ToolCall, ToolExecutor, ToolResult, ToolSchema};

use crate::error::CommerceError;
use crate::operations::CommerceOperation;
use crate::orchestrator::PaymentAgent;

/// Runs model calls against the orchestrator, scoped to one cart
pub struct CommerceDispatcher {
    agent: Arc<PaymentAgent>,
    session: SessionId,
}

impl CommerceDispatcher {
    pub fn new(agent: Arc<PaymentAgent>, session: SessionId) -> Self {
        Self { agent, session }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    async fn run(&self, op: CommerceOperation) -> Result<serde_json::Value, CommerceError> {
        let agent = &self.agent;
        let session = &self.session;

        match op {
            CommerceOperation::SearchProducts(args) => {
                to_json(agent.search_products(&args.query, args.limit).await?)
            }
            CommerceOperation::AddToCart(params) => to_json(agent.add_to_cart(session, params).await?),
            CommerceOperation::ViewCart => to_json(agent.view_cart(session).await),
            CommerceOperation::CreateCheckout(params) => {
                to_json(agent.create_checkout(session, params).await?)
            }
            CommerceOperation::CompleteCheckout(args) => to_json(
                agent
                    .complete_checkout(session, &args.checkout_id, args.confirm_purchase)
                    .await?,
            ),
            CommerceOperation::CheckOrderStatus(args) => {
                to_json(agent.check_order_status(&args.order_id).await?)
            }
        }
    }
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value, CommerceError> {
    serde_json::to_value(value).map_err(|e| CommerceError::Validation(e.to_string()))
}

#[async_trait]
impl ToolExecutor for CommerceDispatcher {
    fn schemas(&self) -> Vec<ToolSchema> {
        CommerceOperation::schemas()
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let op = CommerceOperation::from_call(call)?;
        let name = op.name();
        tracing::info!(session = %self.session, operation = name, "Dispatching commerce operation");

        match self.run(op).await {
            Ok(data) => {
                let output = serde_json::to_string(&data).map_err(AgentError::from)?;
                Ok(ToolResult::success(name, output).with_data(data))
            }
            Err(e) => {
                tracing::warn!(session = %self.session, operation = name, error = %e, "Commerce operation failed");
                let data = json!({"success": false, "error": e.user_message()});
                Ok(ToolResult::failure(name, data.to_string()).with_data(data))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_payments::{MockPaymentProvider, ProviderCall};

    fn dispatcher() -> (CommerceDispatcher, Arc<MockPaymentProvider>, Arc<PaymentAgent>) {
        let provider = Arc::new(MockPaymentProvider::with_demo_catalog());
        let agent = Arc::new(PaymentAgent::new(provider.clone()));
        let dispatcher = CommerceDispatcher::new(agent.clone(), SessionId::from_string("alice"));
        (dispatcher, provider, agent)
    }

    #[tokio::test]
    async fn test_add_then_view_in_own_cart() {
        let (dispatcher, _, agent) = dispatcher();

        let added = dispatcher
            .execute(
                &ToolCall::new("add_to_cart")
                    .with_arg("product_id", json!("prod_boots"))
                    .with_arg("quantity", json!(2)),
            )
            .await
            .unwrap();
        assert!(added.success);
        assert_eq!(added.data.unwrap()["cart_size"], 1);

        let view = dispatcher.execute(&ToolCall::new("view_cart")).await.unwrap();
        assert_eq!(view.data.unwrap()["items"][0]["quantity"], 2);
        assert_eq!(agent.view_cart(&SessionId::from_string("bob")).await.item_count, 0);
    }

    #[tokio::test]
    async fn test_orchestrator_errors_become_failed_results() {
        let (dispatcher, provider, _) = dispatcher();

        let result = dispatcher
            .execute(
                &ToolCall::new("create_checkout")
                    .with_arg("merchant_url", json!("https://shop.example.com"))
                    .with_arg("buyer_email", json!("ada@example.com")),
            )
            .await
            .unwrap();

        assert!(!result.success);
        let data = result.data.unwrap();
        assert_eq!(data["success"], false);
        assert!(data["error"].as_str().unwrap().contains("cart is empty"));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_merchant_rejection_reaches_model_verbatim() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/.well-known/ucp");
                then.status(200).json_body(json!({"supported": true, "features": ["checkout"]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ucp/checkout");
                then.status(422).body(r#"{"error":"out_of_stock"}"#);
            })
            .await;
        let (dispatcher, _, _) = dispatcher();
        dispatcher
            .execute(&ToolCall::new("add_to_cart").with_arg("product_id", json!("prod_boots")))
            .await
            .unwrap();

        let result = dispatcher
            .execute(
                &ToolCall::new("create_checkout")
                    .with_arg("merchant_url", json!(server.base_url()))
                    .with_arg("buyer_email", json!("ada@example.com")),
            )
            .await
            .unwrap();

        assert!(!result.success);
        let error = result.data.unwrap()["error"].as_str().unwrap().to_string();
        assert!(error.contains("422"), "{error}");
        assert!(error.contains("out_of_stock"), "{error}");
    }

    #[tokio::test]
    async fn test_invalid_calls_never_reach_provider() {
        let (dispatcher, provider, _) = dispatcher();

        assert!(matches!(
            dispatcher.execute(&ToolCall::new("issue_refund")).await,
            Err(AgentError::ToolNotFound(_))
        ));
        assert!(matches!(
            dispatcher
                .execute(&ToolCall::new("search_products").with_arg("limit", json!(5)))
                .await,
            Err(AgentError::ToolValidation(_))
        ));
        assert!(provider.calls().is_empty());

        dispatcher
            .execute(&ToolCall::new("search_products").with_arg("query", json!("boots")))
            .await
            .unwrap();
        assert_eq!(
            provider.calls(),
            vec![ProviderCall::Search {
                query: "boots".into(),
                limit: 10
            }]
        );
    }

    #[tokio::test]
    async fn test_unconfirmed_completion_is_reported_not_failed() {
        let (dispatcher, provider, _) = dispatcher();

        let result = dispatcher
            .execute(
                &ToolCall::new("complete_checkout")
                    .with_arg("checkout_id", json!("chk_1"))
                    .with_arg("confirm_purchase", json!(false)),
            )
            .await
            .unwrap();

        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["success"], false);
        assert_eq!(data["message"], "Purchase not confirmed by user");
        assert!(provider.calls().is_empty());
    }
}
