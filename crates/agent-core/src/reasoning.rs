//! Reasoning Loop
//!
//! Implements the ReAct (Reason + Act) pattern for agent behavior.
//! The agent observes, thinks, acts (via functions), and responds.
//!
//! Native function calls reported by the provider take precedence. When the
//! provider returns plain text, a fenced ```tool block is accepted instead.

use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message, Role};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::tool::{generate_prompt_section, ToolCall, ToolExecutor, ToolResult};

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt template
    pub system_prompt: String,

    /// Maximum reasoning iterations before giving up
    pub max_iterations: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// Append tool descriptions to the system prompt for providers
    /// without native function calling
    pub inject_tool_descriptions: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
            generation: GenerationOptions::default(),
            inject_tool_descriptions: true,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful AI assistant.

After receiving function results, synthesize them into a helpful response.
If you can answer directly without functions, do so.
Be concise and accurate."#;

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn ToolExecutor>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ToolExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            config,
        }
    }

    /// Build the full system prompt including tool descriptions
    pub fn build_system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();

        if self.config.inject_tool_descriptions && !self.provider.supports_native_tools() {
            let schemas = self.executor.schemas();
            if !schemas.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(&generate_prompt_section(&schemas));
            }
        }

        prompt
    }

    /// Run the agent until the model produces a final text answer
    pub async fn run(&self, conversation: &mut Conversation) -> Result<String> {
        if conversation.messages().first().map(|m| &m.role) != Some(&Role::System) {
            conversation
                .messages_mut()
                .insert(0, Message::system(self.build_system_prompt()));
        }

        let schemas = self.executor.schemas();
        let mut iterations = 0;

        loop {
            iterations += 1;

            if iterations > self.config.max_iterations {
                tracing::warn!(max = self.config.max_iterations, "Reasoning loop exhausted");
                return Err(AgentError::MaxIterations(self.config.max_iterations));
            }

            conversation.truncate_to_fit();

            let completion = self
                .provider
                .complete(conversation.messages(), &schemas, &self.config.generation)
                .await?;

            if !completion.tool_calls.is_empty() {
                let calls: Vec<ToolCall> = completion
                    .tool_calls
                    .into_iter()
                    .map(ensure_call_id)
                    .collect();

                conversation.push(Message::assistant_with_calls(
                    completion.content,
                    calls.clone(),
                ));

                for call in &calls {
                    let result = self.execute_tool(call).await;
                    conversation.push(Message::tool(format_tool_result(&result), &result));
                }
                continue;
            }

            let content = completion.content;
            conversation.push(Message::assistant(&content));

            if let Some(call) = parse_tool_call(&content) {
                let result = self.execute_tool(&call).await;
                conversation.push(Message::tool(format_tool_result(&result), &result));
                continue;
            }

            return Ok(content);
        }
    }

    /// Run with a simple string input (creates temporary conversation)
    pub async fn ask(&self, question: &str) -> Result<String> {
        let mut conversation = Conversation::with_system_prompt(self.build_system_prompt());
        conversation.push(Message::user(question));
        self.run(&mut conversation).await
    }

    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        tracing::debug!(tool = %call.name, "Executing function call");

        match self.executor.execute(call).await {
            Ok(mut result) => {
                result.id = call.id.clone();
                result
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Function call rejected");
                let mut result = ToolResult::failure(&call.name, format!("Error: {}", e));
                result.id = call.id.clone();
                result
            }
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

fn ensure_call_id(mut call: ToolCall) -> ToolCall {
    if call.id.is_none() {
        call.id = Some(uuid::Uuid::new_v4().to_string());
    }
    call
}

/// Parse a fenced tool call from plain model text
fn parse_tool_call(content: &str) -> Option<ToolCall> {
    let tool_start = "```tool";
    let tool_end = "```";

    let start_idx = content.find(tool_start)?;
    let after_marker = &content[start_idx + tool_start.len()..];
    let end_idx = after_marker.find(tool_end)?;
    let json_str = after_marker[..end_idx].trim();

    serde_json::from_str::<ToolCall>(json_str).ok().map(ensure_call_id)
}

fn format_tool_result(result: &ToolResult) -> String {
    if result.success {
        format!("[Function '{}' returned]\n{}", result.name, result.output)
    } else {
        format!("[Function '{}' failed]\n{}", result.name, result.output)
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    executor: Option<Arc<dyn ToolExecutor>>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            executor: None,
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn generation(mut self, options: GenerationOptions) -> Self {
        self.config.generation = options;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| AgentError::Config("Function executor is required".into()))?;

        Ok(Agent::new(provider, executor, self.config))
    }
}
