//! The model-host seam
//!
//! The orchestration loop and the tools that make secondary model calls only
//! see this trait, so tests can script responses without a network.

use async_trait::async_trait;

use super::error::ModelHostError;
use super::types::{ModelRequest, ModelResponse};

/// A hosted language model that completes a transcript
#[async_trait]
pub trait ModelHost: Send + Sync {
    /// Send one request and wait for the complete (non-streaming) response
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelHostError>;
}
