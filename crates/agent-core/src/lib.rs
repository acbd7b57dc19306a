//! # agent-core
//!
//! Core agent logic with provider-agnostic LLM abstraction and a
//! function-calling seam for domain operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Agent                                 │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌─────────────────┐  │
//! │  │  Reasoning  │  │  ToolExecutor   │  │   LlmProvider   │  │
//! │  │    Loop     │──│ (closed domain  │──│   (Strategy)    │  │
//! │  │             │  │   dispatcher)   │  │                 │  │
//! │  └─────────────┘  └─────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between Gemini or any other
//! provider without changing agent logic. `ToolExecutor` is implemented by
//! the domain crate and decides which function names exist at all.

pub mod provider;
pub mod tool;
pub mod reasoning;
pub mod message;
pub mod error;
pub mod session;
pub mod retry;

pub use error::{AgentError, Result};
pub use message::{Conversation, Message, Role};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder};
pub use retry::{RetryPolicy, Retryable};
pub use session::{MemorySessionStore, Session, SessionId, SessionStore};
pub use tool::{ToolCall, ToolExecutor, ToolResult, ToolSchema};
