//! MCP request handling and the stdio serve loop.

use std::future::Future;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use tabrelay_core::client::{ClientError, RelayClient};

use crate::jsonrpc::{Request, Response, RpcError, codes};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "tabrelay";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where tool listings and calls are answered.
pub trait ToolBackend: Send + Sync {
    fn list_tools(&self) -> impl Future<Output = Result<Vec<Value>, ClientError>> + Send;

    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send;
}

impl ToolBackend for RelayClient {
    async fn list_tools(&self) -> Result<Vec<Value>, ClientError> {
        Self::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ClientError> {
        Self::call_tool(self, name, arguments).await
    }
}

pub struct McpServer<B> {
    backend: B,
}

impl<B: ToolBackend> McpServer<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Handle one input line. Blank lines and notifications produce nothing.
    pub async fn handle_line(&self, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Unparsable JSON-RPC line");
                Some(Response::error(
                    Value::Null,
                    codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                ))
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Option<Response> {
        debug!(method = %request.method, "Received request");
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Notification; no reply");
            return None;
        };

        let result = match request.method.as_str() {
            "initialize" => Ok(initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list().await),
            "tools/call" => self.tools_call(&request).await,
            method => {
                warn!(method, "Unknown method");
                Err(RpcError::new(
                    codes::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ))
            }
        };
        Some(Response::from_result(id, result))
    }

    async fn tools_list(&self) -> Value {
        let tools = match self.backend.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, "Failed to fetch tools from relay");
                Vec::new()
            }
        };
        let tools: Vec<Value> = tools
            .into_iter()
            .filter_map(|tool| {
                let name = tool.get("name")?.as_str()?.to_string();
                Some(json!({
                    "name": name,
                    "description": tool.get("description").cloned().unwrap_or_else(|| json!("")),
                    "inputSchema": tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                }))
            })
            .collect();
        json!({"tools": tools})
    }

    async fn tools_call(&self, request: &Request) -> Result<Value, RpcError> {
        let name = request
            .param("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(codes::INVALID_PARAMS, "Missing tool name"))?;
        let arguments = request
            .param("arguments")
            .filter(|a| !a.is_null())
            .cloned()
            .unwrap_or_else(|| json!({}));

        info!(tool = name, "Calling tool");
        let result = match self.backend.call_tool(name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, error = %e, "Tool call failed");
                json!({"success": false, "error": e.to_string()})
            }
        };
        let text = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
        Ok(json!({"content": [{"type": "text", "text": text}]}))
    }

    /// Answer newline-delimited requests from `reader` until it closes.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let mut out = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
            out.push(b'\n');
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
        info!("Client closed the input stream");
        Ok(())
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {"tools": {}},
        "serverInfo": {"name": SERVER_NAME, "version": VERSION},
    })
}
