//! MCP server implementation using rmcp.
//!
//! Exposes the execution engine as two MCP tools: `execute` and
//! `list_languages`.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use crate::engine::{ExecutionRequest, Executor};

/// MCP server in front of an [`Executor`].
#[derive(Clone)]
pub struct CodeRunnerServer<E: Clone> {
    executor: Arc<E>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the execute tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// Language identifier (e.g., "python", "cpp").
    #[schemars(description = "Language of the code (see list_languages)")]
    pub language: String,

    /// Source code to build and run.
    #[schemars(description = "The source code to build and run")]
    pub code: String,
}

#[tool_router]
impl<E: Executor + Clone + Send + Sync + 'static> CodeRunnerServer<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
            tool_router: Self::tool_router(),
        }
    }

    /// Build and run code in a fresh workspace.
    #[tool(description = "Build and run source code, returning its combined stdout/stderr")]
    async fn execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(language = %params.language, code_len = params.code.len(), "Executing code");

        let request = ExecutionRequest::new(params.language, params.code);
        let response = self.executor.execute(&request).await;

        if response.is_error() {
            warn!(language = %request.language, "Execution returned an error");
            Ok(CallToolResult::error(vec![Content::text(response.error)]))
        } else {
            Ok(CallToolResult::success(vec![Content::text(response.output)]))
        }
    }

    /// List supported language identifiers.
    #[tool(description = "List the language identifiers accepted by execute")]
    async fn list_languages(&self) -> Result<CallToolResult, McpError> {
        let payload = languages_payload(&self.executor.languages());
        Ok(CallToolResult::success(vec![Content::text(payload)]))
    }
}

/// JSON body for the language listing: `{"languages": [...]}`.
fn languages_payload(languages: &[String]) -> String {
    serde_json::json!({ "languages": languages }).to_string()
}

#[tool_handler]
impl<E: Executor + Clone + Send + Sync + 'static> ServerHandler for CodeRunnerServer<E> {
    fn get_info(&self) -> ServerInfo {
        let languages = self.executor.languages();

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "code-runner".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Build and run source code in a throwaway workspace.\n\
                 Supported languages: {languages:?}\n\
                 \n\
                 Use the 'execute' tool with:\n\
                 - language: one of {languages:?}\n\
                 - code: the program source"
            )),
        }
    }
}

/// Serve the engine over stdio.
pub async fn serve_stdio<E: Executor + Clone + Send + Sync + 'static>(
    executor: E,
) -> anyhow::Result<()> {
    let server = CodeRunnerServer::new(executor);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionResponse;
    use async_trait::async_trait;

    #[derive(Clone)]
    struct MockExecutor;

    #[async_trait]
    impl Executor for MockExecutor {
        async fn execute(&self, request: &ExecutionRequest) -> ExecutionResponse {
            if request.language == "mock" {
                ExecutionResponse {
                    output: format!("executed: {}", request.code),
                    error: String::new(),
                }
            } else {
                ExecutionResponse {
                    output: String::new(),
                    error: "Unsupported language".to_string(),
                }
            }
        }

        fn languages(&self) -> Vec<String> {
            vec!["mock".to_string()]
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let server = CodeRunnerServer::new(MockExecutor);
        let params = Parameters(ExecuteParams {
            language: "mock".to_string(),
            code: "hello".to_string(),
        });

        let result = server.execute(params).await.unwrap();
        assert!(!result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_execute_unsupported_language() {
        let server = CodeRunnerServer::new(MockExecutor);
        let params = Parameters(ExecuteParams {
            language: "unknown".to_string(),
            code: "hello".to_string(),
        });

        let result = server.execute(params).await.unwrap();
        assert!(result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_list_languages() {
        let server = CodeRunnerServer::new(MockExecutor);
        let result = server.list_languages().await.unwrap();
        assert!(!result.is_error.unwrap_or(false));
    }

    #[test]
    fn test_languages_payload() {
        let payload = languages_payload(&["cpp".to_string(), "python".to_string()]);
        assert_eq!(payload, r#"{"languages":["cpp","python"]}"#);
    }

    #[test]
    fn test_server_info_lists_languages() {
        let server = CodeRunnerServer::new(MockExecutor);
        let info = server.get_info();
        assert!(info.instructions.unwrap().contains("\"mock\""));
    }
}
