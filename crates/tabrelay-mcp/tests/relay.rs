#![allow(clippy::unwrap_used)]

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;

use tabrelay_core::client::RelayClient;
use tabrelay_core::{Endpoint, Message};
use tabrelay_mcp::McpServer;
use tabrelay_relay::{RelayConfig, RelayState, build_router};

async fn start_relay(dir: &std::path::Path) -> (Endpoint, RelayState) {
    let state = RelayState::new(&RelayConfig {
        request_timeout: Duration::from_secs(5),
        queue_capacity: 16,
        screenshots_dir: dir.to_path_buf(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (Endpoint::new("127.0.0.1", port), state)
}

fn tool_text(resp: &tabrelay_mcp::jsonrpc::Response) -> Value {
    let text = resp.result.as_ref().unwrap()["content"][0]["text"]
        .as_str()
        .unwrap();
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn tools_list_comes_from_relay() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, _relay) = start_relay(dir.path()).await;
    let server = McpServer::new(RelayClient::new(&endpoint).unwrap());

    let resp = server
        .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
        .await
        .unwrap();
    let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
    assert_eq!(tools.len(), 28);
    assert!(tools.iter().any(|t| t["name"] == "browser_navigate"));
}

#[tokio::test]
async fn tools_call_reaches_browser_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, relay) = start_relay(dir.path()).await;

    let (tx, mut rx) = mpsc::channel::<Message>(8);
    relay.registry.register(tx).await;
    let responder = relay.clone();
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            let reply = Message::from_value(json!({
                "requestId": cmd.request_id().unwrap(),
                "success": true,
                "data": {"action": cmd.action(), "tabId": cmd.get("tabId")},
            }))
            .unwrap();
            responder.accept_response(reply).await;
        }
    });

    let server = McpServer::new(RelayClient::new(&endpoint).unwrap());
    let resp = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"browser_navigate","arguments":{"url":"https://example.com","tab_id":4}}}"#,
        )
        .await
        .unwrap();
    let result = tool_text(&resp);
    assert_eq!(result["success"], true);
    assert_eq!(result["data"]["action"], "navigate");
    assert_eq!(result["data"]["tabId"], 4);
}

#[tokio::test]
async fn tools_call_without_browser_is_queued() {
    let dir = tempfile::tempdir().unwrap();
    let (endpoint, relay) = start_relay(dir.path()).await;
    let server = McpServer::new(RelayClient::new(&endpoint).unwrap());

    let resp = server
        .handle_line(r#"{"id":3,"method":"tools/call","params":{"name":"browser_get_tabs"}}"#)
        .await
        .unwrap();
    let result = tool_text(&resp);
    assert_eq!(result["success"], true);
    assert_eq!(result["queued"], true);
    assert_eq!(relay.queue.len().await, 1);
}

#[tokio::test]
async fn relay_down_is_reported_in_tool_result() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let server = McpServer::new(RelayClient::new(&Endpoint::new("127.0.0.1", port)).unwrap());
    let resp = server
        .handle_line(r#"{"id":4,"method":"tools/call","params":{"name":"browser_click"}}"#)
        .await
        .unwrap();
    let result = tool_text(&resp);
    assert_eq!(result["success"], false);
    assert!(result["error"].is_string());
}
