//! Execution engine contract.
//!
//! The transport layer sees only [`Executor`]: hand it a request, get back a
//! response with either output or an error message. Everything that can go
//! wrong inside one execution is folded into that response.

mod dispatch;

pub use dispatch::{Engine, Plan};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Code to run and the language it is written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
        }
    }
}

/// Public result of one execution.
///
/// `error` is empty on success and omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ExecutionResponse {
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

impl From<Result<Vec<u8>, ExecError>> for ExecutionResponse {
    fn from(result: Result<Vec<u8>, ExecError>) -> Self {
        match result {
            Ok(output) => Self {
                output: String::from_utf8_lossy(&output).into_owned(),
                error: String::new(),
            },
            // The error message already embeds any captured output
            Err(e) => Self {
                output: String::new(),
                error: e.to_string(),
            },
        }
    }
}

/// Anything that can execute requests on behalf of a transport.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Build and run `request`, always producing a response.
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResponse;

    /// Supported language identifiers, sorted.
    fn languages(&self) -> Vec<String>;
}
