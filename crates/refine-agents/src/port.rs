//! Boundary to the external reasoning service.

use async_trait::async_trait;

use crate::errors::ReasoningError;

/// One request/response exchange with the reasoning service.
///
/// `role` is the model selector for the call (the configured solver or
/// verifier role). Implementations make exactly one external call per
/// invocation, apply their own timeout, never retry, and never log or
/// persist the content.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningPort: Send + Sync {
    async fn invoke(&self, prompt: &str, role: &str) -> Result<String, ReasoningError>;
}
