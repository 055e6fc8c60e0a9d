//! The broker: dispatches boundary requests onto the sandbox engine.
//!
//! Requests are handled strictly one at a time; execution bodies run under
//! `spawn_blocking` because the interpreter and its primitives are
//! synchronous. Every execution outcome is offered to the audit recorder
//! before the response is sent.

use std::sync::Arc;

use mcp_types::CallToolRequestParams;
use mcp_types::CallToolResult;
use mcp_types::CallToolResultContent;
use mcp_types::INTERNAL_ERROR;
use mcp_types::INVALID_PARAMS;
use mcp_types::INVALID_REQUEST;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCError;
use mcp_types::JSONRPCErrorError;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::JSONRPCResponse;
use mcp_types::ListToolsResult;
use mcp_types::MCP_SCHEMA_VERSION;
use mcp_types::METHOD_NOT_FOUND;
use mcp_types::RequestId;
use mcp_types::TextContent;
use safeexec_core::AuditRecorder;
use safeexec_core::Config;
use safeexec_core::ExecutionResult;
use safeexec_core::INTERFACE_REFERENCE;
use safeexec_core::STATELESS_SESSION_ID;
use safeexec_core::SessionManager;
use serde_json::json;
use tokio::sync::mpsc;

use crate::tool_catalog::DeleteSessionParam;
use crate::tool_catalog::ExecuteInSessionParam;
use crate::tool_catalog::ExecuteStatelessParam;
use crate::tool_catalog::tool_catalog;

pub(crate) struct MessageProcessor {
    outgoing: mpsc::Sender<JSONRPCMessage>,
    initialized: bool,
    config: Config,
    sessions: Arc<SessionManager>,
    audit: Option<AuditRecorder>,
}

impl MessageProcessor {
    /// Create a processor bound to the frozen configuration. The audit
    /// recorder is created if and only if a record directory is configured.
    pub(crate) fn new(outgoing: mpsc::Sender<JSONRPCMessage>, config: Config) -> Self {
        let audit = config.record_dir.clone().and_then(|dir| {
            match AuditRecorder::new(dir) {
                Ok(recorder) => Some(recorder),
                Err(e) => {
                    tracing::warn!("audit recorder disabled: {e}");
                    None
                }
            }
        });
        let sessions = Arc::new(SessionManager::new(config.clone()));
        Self {
            outgoing,
            initialized: false,
            config,
            sessions,
            audit,
        }
    }

    pub(crate) async fn process_request(&mut self, request: JSONRPCRequest) {
        let JSONRPCRequest {
            id, method, params, ..
        } = request;
        match method.as_str() {
            "initialize" => self.handle_initialize(id).await,
            "ping" => self.send_response(id, json!({})).await,
            "tools/list" => self.handle_list_tools(id).await,
            "tools/call" => self.handle_call_tool(id, params).await,
            other => {
                tracing::warn!("unknown method: {other}");
                self.send_error(id, METHOD_NOT_FOUND, format!("method not found: {other}"))
                    .await;
            }
        }
    }

    pub(crate) fn process_notification(&mut self, notification: JSONRPCNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                tracing::info!("client reported initialized");
            }
            "notifications/cancelled" => {
                // In-flight executions are not cancellable; acknowledge by
                // doing nothing.
                tracing::info!("client cancelled a request");
            }
            other => tracing::debug!("ignoring notification: {other}"),
        }
    }

    async fn handle_initialize(&mut self, id: RequestId) {
        if self.initialized {
            self.send_error(
                id,
                INVALID_REQUEST,
                "initialize called more than once".to_string(),
            )
            .await;
            return;
        }
        self.initialized = true;

        let result = mcp_types::InitializeResult {
            capabilities: mcp_types::ServerCapabilities {
                tools: Some(mcp_types::ServerCapabilitiesTools {
                    list_changed: Some(false),
                }),
            },
            instructions: None,
            protocol_version: MCP_SCHEMA_VERSION.to_string(),
            server_info: mcp_types::Implementation {
                name: "SafeExecMCP".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        self.send_response(id, result).await;
    }

    async fn handle_list_tools(&self, id: RequestId) {
        let result = ListToolsResult {
            tools: tool_catalog(self.config.sessions_enabled),
            next_cursor: None,
        };
        self.send_response(id, result).await;
    }

    async fn handle_call_tool(&self, id: RequestId, params: Option<serde_json::Value>) {
        let params = match params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| {
                serde_json::from_value::<CallToolRequestParams>(p).map_err(|e| e.to_string())
            }) {
            Ok(params) => params,
            Err(e) => {
                self.send_error(id, INVALID_PARAMS, format!("invalid tools/call params: {e}"))
                    .await;
                return;
            }
        };

        let CallToolRequestParams { name, arguments } = params;
        let session_tools_hidden = !self.config.sessions_enabled;
        match name.as_str() {
            "execute_stateless" => self.handle_execute_stateless(id, arguments).await,
            "create_session" if !session_tools_hidden => self.handle_create_session(id).await,
            "execute_in_session" if !session_tools_hidden => {
                self.handle_execute_in_session(id, arguments).await;
            }
            "delete_session" if !session_tools_hidden => {
                self.handle_delete_session(id, arguments).await;
            }
            "list_sessions" if !session_tools_hidden => self.handle_list_sessions(id).await,
            "show_interface" => {
                self.send_tool_text(id, INTERFACE_REFERENCE.to_string(), false)
                    .await;
            }
            other => {
                self.send_tool_text(id, format!("Unknown tool '{other}'"), true)
                    .await;
            }
        }
    }

    async fn handle_execute_stateless(&self, id: RequestId, arguments: Option<serde_json::Value>) {
        let param: ExecuteStatelessParam = match parse_arguments(arguments) {
            Ok(param) => param,
            Err(e) => {
                self.send_tool_text(id, e, true).await;
                return;
            }
        };

        let sessions = self.sessions.clone();
        let code = param.code.clone();
        let outcome =
            tokio::task::spawn_blocking(move || sessions.execute_stateless(&code)).await;
        match flatten_join(outcome) {
            Ok(result) => {
                self.offer_audit(&param.code, STATELESS_SESSION_ID, &result).await;
                self.send_execution_result(id, &result).await;
            }
            Err(e) => self.send_tool_text(id, format!("Error: {e}"), true).await,
        }
    }

    async fn handle_create_session(&self, id: RequestId) {
        let sessions = self.sessions.clone();
        let outcome = tokio::task::spawn_blocking(move || sessions.create()).await;
        match flatten_join(outcome) {
            Ok(session_id) => self.send_tool_text(id, session_id, false).await,
            Err(e) => self.send_tool_text(id, format!("Error: {e}"), true).await,
        }
    }

    async fn handle_execute_in_session(&self, id: RequestId, arguments: Option<serde_json::Value>) {
        let param: ExecuteInSessionParam = match parse_arguments(arguments) {
            Ok(param) => param,
            Err(e) => {
                self.send_tool_text(id, e, true).await;
                return;
            }
        };

        // Unknown session ids are a protocol-level error: no session is
        // created implicitly.
        let Some(session) = self.sessions.get(&param.session_id) else {
            self.send_error(
                id,
                INVALID_PARAMS,
                format!("no session with id: {}", param.session_id),
            )
            .await;
            return;
        };

        let code = param.code.clone();
        let outcome = tokio::task::spawn_blocking(move || session.execute(&code)).await;
        match outcome {
            Ok(result) => {
                self.offer_audit(&param.code, &param.session_id, &result).await;
                self.send_execution_result(id, &result).await;
            }
            Err(e) => self.send_tool_text(id, format!("Error: {e}"), true).await,
        }
    }

    async fn handle_delete_session(&self, id: RequestId, arguments: Option<serde_json::Value>) {
        let param: DeleteSessionParam = match parse_arguments(arguments) {
            Ok(param) => param,
            Err(e) => {
                self.send_tool_text(id, e, true).await;
                return;
            }
        };
        if self.sessions.delete(&param.session_id) {
            self.send_tool_text(id, format!("Session deleted: {}", param.session_id), false)
                .await;
        } else {
            self.send_tool_text(id, format!("Session not found: {}", param.session_id), true)
                .await;
        }
    }

    async fn handle_list_sessions(&self, id: RequestId) {
        let ids = self.sessions.list();
        let text = if ids.is_empty() {
            "No active sessions".to_string()
        } else {
            ids.join("\n")
        };
        self.send_tool_text(id, text, false).await;
    }

    async fn offer_audit(&self, code: &str, session_id: &str, result: &ExecutionResult) {
        if let Some(audit) = &self.audit {
            audit.record(code, session_id, result).await;
        }
    }

    async fn send_execution_result(&self, id: RequestId, result: &ExecutionResult) {
        self.send_tool_text(id, format_execution_result(result), !result.success)
            .await;
    }

    async fn send_tool_text(&self, id: RequestId, text: String, is_error: bool) {
        let result = CallToolResult {
            content: vec![CallToolResultContent::TextContent(TextContent::new(text))],
            is_error: is_error.then_some(true),
        };
        self.send_response(id, result).await;
    }

    async fn send_response(&self, id: RequestId, result: impl serde::Serialize) {
        let result = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("failed to serialize response: {e}");
                self.send_error(id, INTERNAL_ERROR, "internal error".to_string())
                    .await;
                return;
            }
        };
        let response = JSONRPCMessage::Response(JSONRPCResponse {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result,
        });
        if let Err(e) = self.outgoing.send(response).await {
            tracing::error!("failed to send response: {e}");
        }
    }

    async fn send_error(&self, id: RequestId, code: i64, message: String) {
        let error = JSONRPCMessage::Error(JSONRPCError {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            error: JSONRPCErrorError {
                code,
                message,
                data: None,
            },
        });
        if let Err(e) = self.outgoing.send(error).await {
            tracing::error!("failed to send error: {e}");
        }
    }
}

fn parse_arguments<T: serde::de::DeserializeOwned>(
    arguments: Option<serde_json::Value>,
) -> Result<T, String> {
    let value = arguments.ok_or_else(|| "Missing arguments for tool call".to_string())?;
    serde_json::from_value(value).map_err(|e| format!("Failed to parse tool arguments: {e}"))
}

fn flatten_join<T>(
    outcome: Result<safeexec_core::Result<T>, tokio::task::JoinError>,
) -> Result<T, String> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("execution task failed: {e}")),
    }
}

/// Shared rendering for stateless and in-session results: output and error
/// combined when both are present, a sentinel when neither is.
pub(crate) fn format_execution_result(result: &ExecutionResult) -> String {
    let output = (!result.output.is_empty()).then_some(result.output.as_str());
    let error = result.error.as_deref().filter(|e| !e.is_empty());
    match (output, error) {
        (Some(output), Some(error)) => format!("{output}\n\nError: {error}"),
        (None, Some(error)) => format!("Error: {error}"),
        (Some(output), None) => output.to_string(),
        (None, None) => "(no output)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(output: &str, error: Option<&str>) -> ExecutionResult {
        ExecutionResult {
            success: error.is_none(),
            output: output.to_string(),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn formats_output_only() {
        assert_eq!(format_execution_result(&result("2\n", None)), "2\n");
    }

    #[test]
    fn formats_error_only() {
        assert_eq!(
            format_execution_result(&result("", Some("boom"))),
            "Error: boom"
        );
    }

    #[test]
    fn formats_output_and_error() {
        assert_eq!(
            format_execution_result(&result("partial", Some("boom"))),
            "partial\n\nError: boom"
        );
    }

    #[test]
    fn formats_no_output_sentinel() {
        assert_eq!(format_execution_result(&result("", None)), "(no output)");
    }
}
