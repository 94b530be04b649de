//! LLM integration for nerforge.
//!
//! Provides an OpenAI-compatible chat client used by the categorization
//! driver. Anything implementing [`LlmProvider`] can stand in for it, which
//! is how the driver is tested without a network.
//!
//! ```ignore
//! use nerforge::llm::{ChatClient, GenerationRequest, LlmProvider, Message};
//!
//! let client = ChatClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

mod client;

pub use client::{
    ChatClient, Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
