//! Generative model seam
//!
//! Every model call in the pipeline goes through [`GenerativeModel`]. The
//! production implementation is [`GeminiClient`]; tests substitute scripted
//! in-memory models. Calls are serialized through one shared [`RequestGate`]
//! and retried by [`ModelInvoker`].

pub mod gemini_client;
pub mod invoker;
pub mod rate_limiter;

pub use gemini_client::GeminiClient;
pub use invoker::{Invocation, ModelInvoker, RetryPolicy};
pub use rate_limiter::RequestGate;

use async_trait::async_trait;
use scriba_common::config::{ModelProfile, Operation};
use std::path::PathBuf;
use thiserror::Error;

/// One piece of multimodal request content
#[derive(Debug, Clone, PartialEq)]
pub enum ModelPart {
    Text(String),
    /// Image file sent inline with the request
    Image(PathBuf),
}

/// Bounded request for one model call
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub operation: Operation,
    pub system_instruction: String,
    pub parts: Vec<ModelPart>,
    pub profile: ModelProfile,
}

impl ModelRequest {
    /// All text parts, joined (images omitted)
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ModelPart::Text(t) => Some(t.as_str()),
                ModelPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, ModelPart::Image(_)))
            .count()
    }
}

/// Model call failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// Rate limited, overloaded or unreachable; worth retrying
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    /// Rejected request (bad key, bad payload); retrying will not help
    #[error("Model request rejected: {0}")]
    Request(String),

    /// Response arrived but carried no usable text
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Request(_))
    }
}

/// Text generation backend
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Generate text for a request
    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError>;

    /// Backend name for logging
    fn name(&self) -> &str {
        "model"
    }
}
