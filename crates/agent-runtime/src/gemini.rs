//! Gemini LLM Provider
//!
//! Implementation of `LlmProvider` over the Google Generative Language REST
//! API (`generateContent`, `streamGenerateContent`) with native function
//! calling.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        Completion, CompletionStream, FinishReason, GenerationOptions, LlmProvider, ModelInfo,
        ProviderInfo, StreamChunk, TokenUsage,
    },
    retry::RetryPolicy,
    tool::{ToolCall, ToolSchema},
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Gemini provider configuration
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`
    pub api_key: String,

    /// API base URL (overridable for tests and proxies)
    pub base_url: String,

    /// Default model when the caller does not pick one
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Backoff for transient failures
    pub retry: RetryPolicy,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }

    /// Load from `GEMINI_API_KEY` (or `GOOGLE_API_KEY`), `GEMINI_MODEL`,
    /// `GEMINI_API_BASE`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| AgentError::Config("GEMINI_API_KEY not set".into()))?;

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.model = model;
        }
        if let Ok(base) = std::env::var("GEMINI_API_BASE") {
            config.base_url = base;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    display_name: Option<String>,
    input_token_limit: Option<u32>,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(u: UsageMetadata) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

/// Gemini LLM provider
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let model = if model.is_empty() { &self.config.model } else { model };
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model.trim_start_matches("models/"),
            method
        )
    }

    /// Convert agent messages to Gemini contents plus system instruction.
    /// Consecutive turns with the same role are merged, which groups
    /// parallel function responses into one content block.
    fn convert_messages(messages: &[Message]) -> (Vec<Content>, Option<Content>) {
        let mut system_parts = Vec::new();
        let mut contents: Vec<Content> = Vec::new();

        for m in messages {
            let (role, parts) = match m.role {
                Role::System => {
                    system_parts.push(Part {
                        text: Some(m.content.clone()),
                        ..Default::default()
                    });
                    continue;
                }
                Role::User => ("user", vec![text_part(&m.content)]),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !m.content.is_empty() {
                        parts.push(text_part(&m.content));
                    }
                    for call in m.tool_calls() {
                        parts.push(Part {
                            function_call: Some(FunctionCall {
                                name: call.name.clone(),
                                args: call
                                    .arguments
                                    .iter()
                                    .map(|(k, v)| (k.clone(), v.clone()))
                                    .collect(),
                            }),
                            ..Default::default()
                        });
                    }
                    ("model", parts)
                }
                Role::Tool => {
                    let structured = m.metadata.as_ref().and_then(|meta| {
                        Some(FunctionResponse {
                            name: meta.tool_name.clone()?,
                            response: meta.tool_response.clone()?,
                        })
                    });
                    match structured {
                        Some(response) => (
                            "user",
                            vec![Part {
                                function_response: Some(response),
                                ..Default::default()
                            }],
                        ),
                        None => ("user", vec![text_part(&m.content)]),
                    }
                }
            };

            if parts.is_empty() {
                continue;
            }

            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(Content {
                    role: Some(role.into()),
                    parts,
                }),
            }
        }

        let system = (!system_parts.is_empty()).then(|| Content {
            role: None,
            parts: system_parts,
        });

        (contents, system)
    }

    fn build_request(
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> GenerateContentRequest {
        let (contents, system_instruction) = Self::convert_messages(messages);

        let tools = if tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolDeclarations {
                function_declarations: tools
                    .iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters_json_schema(),
                    })
                    .collect(),
            }]
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            generation_config: GenerationConfig {
                temperature: options.temperature,
                top_p: options.top_p,
                top_k: options.top_k,
                max_output_tokens: options.max_tokens,
                stop_sequences: options.stop_sequences.clone(),
            },
        }
    }

    /// Convert Gemini response to agent completion
    fn convert_completion(response: GenerateContentResponse, model: &str) -> Result<Completion> {
        let usage = response.usage_metadata.map(TokenUsage::from);

        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".into());
            return Err(AgentError::Provider(format!("Gemini returned no answer: {}", reason)));
        };

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.parts {
            if let Some(text) = part.text {
                content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    name: call.name,
                    arguments: call.args.into_iter().collect(),
                    id: None,
                });
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            candidate.finish_reason.as_deref().map(map_finish_reason)
        } else {
            Some(FinishReason::ToolUse)
        };

        Ok(Completion {
            content,
            tool_calls,
            model: model.to_string(),
            usage,
            truncated: finish_reason == Some(FinishReason::Length),
            finish_reason,
        })
    }

    /// One POST attempt with status mapping
    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &GenerateContentRequest,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AgentError::Parse(format!("Gemini response: {}", e)))
    }
}

fn text_part(text: &str) -> Part {
    Part {
        text: Some(text.to_string()),
        ..Default::default()
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Error,
    }
}

fn map_send_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() || e.is_connect() {
        AgentError::ProviderUnavailable(e.to_string())
    } else {
        AgentError::Provider(e.to_string())
    }
}

fn map_status(status: reqwest::StatusCode, body: String) -> AgentError {
    match status.as_u16() {
        429 => AgentError::RateLimited(body),
        401 | 403 => AgentError::Auth(body),
        s if s >= 500 => AgentError::ProviderUnavailable(format!("HTTP {}: {}", s, body)),
        s => AgentError::Provider(format!("HTTP {}: {}", s, body)),
    }
}

/// Decode one `data:` payload of the SSE stream
fn parse_stream_event(data: &str) -> Result<StreamChunk> {
    let event: GenerateContentResponse = serde_json::from_str(data)
        .map_err(|e| AgentError::Parse(format!("Gemini stream event: {}", e)))?;

    let mut delta = String::new();
    let mut done = false;
    if let Some(candidate) = event.candidates.into_iter().next() {
        for part in candidate.content.parts {
            if let Some(text) = part.text {
                delta.push_str(&text);
            }
        }
        done = candidate.finish_reason.is_some();
    }

    Ok(StreamChunk {
        delta,
        done,
        usage: event.usage_metadata.map(TokenUsage::from),
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: "Gemini".into(),
            version: Some("v1beta".into()),
            models,
            supports_streaming: true,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "Gemini health check failed");
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = Self::build_request(messages, tools, options);
        let url = self.model_url(&options.model, "generateContent");

        let (url, request) = (url.as_str(), &request);
        let response: GenerateContentResponse = self
            .config
            .retry
            .run("gemini.generate_content", move || async move {
                self.post_json(url, request).await
            })
            .await?;

        let completion = Self::convert_completion(response, &options.model)?;
        tracing::debug!(
            model = %options.model,
            tool_calls = completion.tool_calls.len(),
            finish = ?completion.finish_reason,
            "Gemini completion"
        );
        Ok(completion)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let request = Self::build_request(messages, &[], options);
        let url = format!("{}?alt=sse", self.model_url(&options.model, "streamGenerateContent"));

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, text));
        }

        let state = (Box::pin(response.bytes_stream()), Vec::<u8>::new(), false);
        let stream = futures::stream::unfold(state, |(mut inner, mut buffer, mut ended)| async move {
            loop {
                if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    if let Some(data) = line.trim().strip_prefix("data:") {
                        let item = parse_stream_event(data.trim());
                        return Some((item, (inner, buffer, ended)));
                    }
                    continue;
                }

                if ended {
                    return None;
                }

                match inner.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        ended = true;
                        buffer.clear();
                        return Some((Err(map_send_error(e)), (inner, buffer, ended)));
                    }
                    None => {
                        ended = true;
                        if buffer.iter().all(|b| b.is_ascii_whitespace()) {
                            return None;
                        }
                        buffer.push(b'\n');
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, text));
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;

        Ok(list
            .models
            .into_iter()
            .map(|m| {
                let id = m.name.trim_start_matches("models/").to_string();
                ModelInfo {
                    name: m.display_name.unwrap_or_else(|| id.clone()),
                    id,
                    context_length: m.input_token_limit,
                    supports_vision: true,
                }
            })
            .collect())
    }

    fn supports_native_tools(&self) -> bool {
        true
    }
}
