//! Conversational shopping assistant
//!
//! Wraps the reasoning loop around a [`CommerceDispatcher`] for the
//! shopper's cart and keeps each conversation in a [`SessionStore`].

use std::sync::Arc;

use serde::Serialize;

use agent_core::provider::CompletionStream;
use agent_core::{
    AgentBuilder, GenerationOptions, LlmProvider, MemorySessionStore, Message, Result, Role, Session,
    SessionId, SessionStore,
};

use crate::dispatch::CommerceDispatcher;
use crate::orchestrator::PaymentAgent;
use crate::system_prompt;

#[derive(Clone, Debug, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: String,
}

pub struct ShoppingAssistant {
    llm: Arc<dyn LlmProvider>,
    agent: Arc<PaymentAgent>,
    conversations: Arc<dyn SessionStore>,
    generation: GenerationOptions,
    max_iterations: usize,
}

impl ShoppingAssistant {
    pub fn new(llm: Arc<dyn LlmProvider>, agent: Arc<PaymentAgent>) -> Self {
        Self {
            llm,
            agent,
            conversations: Arc::new(MemorySessionStore::new()),
            generation: GenerationOptions::default(),
            max_iterations: 10,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.conversations = store;
        self
    }

    pub fn with_generation(mut self, generation: GenerationOptions) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// One chat turn. Model failures are answered in the reply and kept in
    /// the history; only storage failures surface as errors.
    pub async fn chat(
        &self,
        shopper: &SessionId,
        message: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<ChatReply> {
        let mut session = self.load(shopper)?;
        let conversation = &mut session.conversation;

        // Context may change between turns
        conversation.messages_mut().retain(|m| m.role != Role::System);
        conversation.push(Message::user(message));

        let agent = AgentBuilder::new()
            .provider(self.llm.clone())
            .executor(Arc::new(CommerceDispatcher::new(self.agent.clone(), shopper.clone())))
            .system_prompt(system_prompt(context))
            .generation(self.generation.clone())
            .max_iterations(self.max_iterations)
            .build()?;

        let response = match agent.run(conversation).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(shopper = %shopper, error = %e, "Chat turn failed");
                let reply = format!("I encountered an error: {}", e.user_message());
                conversation.push(Message::assistant(&reply));
                reply
            }
        };

        session.touch();
        self.conversations.save(&session)?;

        tracing::info!(shopper = %shopper, messages = session.message_count(), "Chat turn complete");
        Ok(ChatReply {
            response,
            conversation_id: shopper.to_string(),
        })
    }

    /// Stream a plain text answer over the stored history. Call
    /// [`Self::record_exchange`] with the assembled reply afterwards.
    pub async fn stream(&self, shopper: &SessionId, message: &str) -> Result<CompletionStream> {
        let mut conversation = self.load(shopper)?.conversation;
        conversation.messages_mut().retain(|m| m.role != Role::System);
        conversation.messages_mut().insert(0, Message::system(system_prompt(None)));
        conversation.push(Message::user(message));
        conversation.truncate_to_fit();

        self.llm
            .complete_stream(conversation.messages(), &self.generation)
            .await
    }

    pub fn record_exchange(&self, shopper: &SessionId, message: &str, reply: &str) -> Result<()> {
        let mut session = self.load(shopper)?;
        session.conversation.push(Message::user(message));
        session.conversation.push(Message::assistant(reply));
        session.touch();
        self.conversations.save(&session)
    }

    pub fn history(&self, shopper: &SessionId) -> Result<Vec<Message>> {
        Ok(self
            .conversations
            .load(shopper)?
            .map(|s| s.conversation.messages().to_vec())
            .unwrap_or_default())
    }

    fn load(&self, shopper: &SessionId) -> Result<Session> {
        Ok(self.conversations.load(shopper)?.unwrap_or_else(|| {
            let mut session = Session::with_id(shopper.clone());
            session.metadata.user_id = Some(shopper.to_string());
            session
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::provider::{Completion, ModelInfo, ProviderInfo, StreamChunk};
    use agent_core::{AgentError, ToolCall, ToolSchema};
    use agent_payments::MockPaymentProvider;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays scripted completions; records the system prompt it saw
    struct ScriptedLlm {
        script: Mutex<Vec<Result<Completion>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(mut script: Vec<Result<Completion>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn info(&self) -> Result<ProviderInfo> {
            Err(AgentError::Provider("unused".into()))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            messages: &[Message],
            _tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<Completion> {
            if let Some(first) = messages.first() {
                self.prompts.lock().unwrap().push(first.content.clone());
            }
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(AgentError::Provider("script exhausted".into())))
        }

        async fn complete_stream(
            &self,
            messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<CompletionStream> {
            assert_eq!(messages.first().map(|m| &m.role), Some(&Role::System));
            let chunks = vec![
                Ok(StreamChunk {
                    delta: "Hello ".into(),
                    done: false,
                    usage: None,
                }),
                Ok(StreamChunk {
                    delta: "there".into(),
                    done: true,
                    usage: None,
                }),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }

        fn supports_native_tools(&self) -> bool {
            true
        }
    }

    fn text(content: &str) -> Result<Completion> {
        Ok(Completion {
            content: content.into(),
            ..Default::default()
        })
    }

    fn assistant(script: Vec<Result<Completion>>) -> (ShoppingAssistant, Arc<PaymentAgent>, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::new(script));
        let agent = Arc::new(PaymentAgent::new(Arc::new(MockPaymentProvider::with_demo_catalog())));
        (ShoppingAssistant::new(llm.clone(), agent.clone()), agent, llm)
    }

    #[tokio::test]
    async fn test_chat_runs_operations_on_shoppers_cart() {
        let (assistant, agent, _) = assistant(vec![
            Ok(Completion {
                tool_calls: vec![ToolCall::new("add_to_cart").with_arg("product_id", json!("prod_tee"))],
                ..Default::default()
            }),
            text("Added the tee to your cart."),
        ]);
        let alice = SessionId::from_string("alice");

        let reply = assistant.chat(&alice, "Add the organic tee", None).await.unwrap();

        assert_eq!(reply.response, "Added the tee to your cart.");
        assert_eq!(reply.conversation_id, "alice");
        assert_eq!(agent.view_cart(&alice).await.item_count, 1);
        assert_eq!(agent.view_cart(&SessionId::from_string("bob")).await.item_count, 0);
    }

    #[tokio::test]
    async fn test_history_persists_and_context_is_refreshed() {
        let (assistant, _, llm) = assistant(vec![text("Hi!"), text("Size M it is.")]);
        let alice = SessionId::from_string("alice");

        assistant.chat(&alice, "Hello", None).await.unwrap();
        assistant
            .chat(&alice, "I wear medium", Some(&json!({"size": "M"})))
            .await
            .unwrap();

        let history = assistant.history(&alice).unwrap();
        let users: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(users, vec!["Hello", "I wear medium"]);
        assert_eq!(history.iter().filter(|m| m.role == Role::System).count(), 1);

        let prompts = llm.prompts.lock().unwrap();
        assert!(!prompts[0].contains("User Context"));
        assert!(prompts[1].contains(r#"User Context: {"size":"M"}"#));
    }

    #[tokio::test]
    async fn test_model_failure_is_answered_and_recorded() {
        let (assistant, _, _) = assistant(vec![Err(AgentError::ProviderUnavailable("timeout".into()))]);
        let alice = SessionId::from_string("alice");

        let reply = assistant.chat(&alice, "Hello", None).await.unwrap();

        assert!(reply.response.starts_with("I encountered an error:"));
        let history = assistant.history(&alice).unwrap();
        assert_eq!(history.last().unwrap().content, reply.response);
    }

    #[tokio::test]
    async fn test_stream_then_record() {
        let (assistant, _, _) = assistant(Vec::new());
        let alice = SessionId::from_string("alice");

        let mut stream = assistant.stream(&alice, "Hi").await.unwrap();
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            reply.push_str(&chunk.unwrap().delta);
        }
        assistant.record_exchange(&alice, "Hi", &reply).unwrap();

        let history = assistant.history(&alice).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hello there");
    }
}
