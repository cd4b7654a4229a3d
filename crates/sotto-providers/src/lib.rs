//! LM provider abstraction for Sotto.
//!
//! - **traits**: the `LlmProvider` trait (chat + embed) every backend implements
//! - **http_provider**: client for any OpenAI-compatible HTTP API
//! - **embeddings**: retrying embedding service used by the memory subsystem

pub mod embeddings;
pub mod http_provider;
pub mod traits;

pub use embeddings::EmbeddingService;
pub use http_provider::HttpProvider;
pub use traits::{LlmProvider, LlmRequestConfig};
