//! # agent-runtime
//!
//! Runtime providers for the checkout agent.
//!
//! ## Providers
//!
//! - **Gemini** (default): Google Generative Language API with native
//!   function calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::gemini::GeminiProvider;
//!
//! let provider = GeminiProvider::from_env()?;
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .executor(dispatcher)
//!     .build()?;
//! ```

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiConfig, GeminiProvider};

// Re-export core types for convenience
pub use agent_core::{Agent, AgentError, LlmProvider, Message, Result, Role, Session};
