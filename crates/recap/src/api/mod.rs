//! API interaction layer: the completion endpoint seam and tool schemas.
//!
//! - [`endpoint`]: [`ChatEndpoint`] trait, [`ChatResponse`] classification,
//!   and the [`OpenRouterClient`](crate::OpenRouterClient) adapter.
//! - [`tools`]: [`ModelInfo`] for the target model and per-family
//!   tool-schema normalization.

pub mod endpoint;
pub mod tools;

// Re-export commonly used items at the module level.
pub use endpoint::{ChatEndpoint, ChatResponse, EndpointFuture, RequestKind, ResponseKind};
pub use tools::{ModelFamily, ModelInfo, normalize_tools};
