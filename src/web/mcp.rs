//! MCP dev-server bridge: one SSE connection per logical client session,
//! out-of-band JSON-RPC messages POSTed to a session-addressed endpoint.

use crate::module::ModuleDescriptor;
use crate::plugin::HookStageDispatcher;
use crate::session::{SessionTransport, SessionTransportRegistry};
use crate::state::AppState;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::http::{Method, StatusCode};
use warp::{Filter, Rejection, Reply};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Answers JSON-RPC requests delivered to a session. Shared by every
/// session of one server.
pub struct McpBridge {
    dispatcher: Arc<HookStageDispatcher>,
    config_digest: Value,
}

impl McpBridge {
    pub fn new(dispatcher: Arc<HookStageDispatcher>, config_digest: Value) -> Self {
        Self {
            dispatcher,
            config_digest,
        }
    }

    /// Handle one request, returning `None` for notifications.
    fn handle(&self, request: &Value) -> Option<Value> {
        let id = request.get("id").cloned();
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");

        // Requests without an id are notifications; nothing goes back.
        id.as_ref()?;

        let result = match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": "lathe",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.get("params").unwrap_or(&Value::Null)),
            other => Err((-32601, format!("method not found: {other}"))),
        };

        Some(match result {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
        })
    }

    fn list_tools(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": "get-bundler-config",
                    "description": "Get the bundler config digest, including the registered plugins",
                    "inputSchema": { "type": "object", "properties": {} },
                },
                {
                    "name": "get-module-info",
                    "description": "Get the pipeline's descriptor digest for a module id",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "description": "The module id" }
                        },
                        "required": ["id"],
                    },
                },
            ]
        })
    }

    fn call_tool(&self, params: &Value) -> Result<Value, (i64, String)> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let arguments = params.get("arguments").unwrap_or(&Value::Null);

        let payload = match name {
            "get-bundler-config" => json!({
                "config": self.config_digest,
                "plugins": self.dispatcher.registry().names(),
            }),
            "get-module-info" => {
                let id = arguments
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| (-32602i64, "missing argument: id".to_string()))?;
                let descriptor = ModuleDescriptor::parse(id);
                json!({
                    "id": descriptor.id,
                    "resolvedPath": descriptor.resolved_path,
                    "moduleType": descriptor.module_type.as_str(),
                    "query": descriptor.query,
                    "virtual": crate::virtualmod::is_virtual(id),
                })
            }
            other => return Err((-32602, format!("unknown tool: {other}"))),
        };

        Ok(json!({
            "content": [{ "type": "text", "text": payload.to_string() }]
        }))
    }
}

/// Transport side of one SSE session: messages POSTed out-of-band are
/// answered over the push channel.
pub struct SseSession {
    bridge: Arc<McpBridge>,
    tx: mpsc::UnboundedSender<warp::sse::Event>,
}

impl SseSession {
    pub fn new(bridge: Arc<McpBridge>, tx: mpsc::UnboundedSender<warp::sse::Event>) -> Self {
        Self { bridge, tx }
    }
}

#[async_trait]
impl SessionTransport for SseSession {
    async fn handle_message(&self, body: Bytes) -> anyhow::Result<()> {
        let response = match serde_json::from_slice::<Value>(&body) {
            Ok(request) => self.bridge.handle(&request),
            Err(e) => Some(json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": -32700, "message": format!("parse error: {e}") },
            })),
        };

        if let Some(response) = response {
            let event = warp::sse::Event::default()
                .event("message")
                .json_data(&response)?;
            self.tx
                .send(event)
                .map_err(|_| anyhow::anyhow!("push channel closed"))?;
        }
        Ok(())
    }
}

// Removes the session when the SSE response stream is dropped.
struct SessionGuard {
    sessions: Arc<SessionTransportRegistry>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.close(&self.session_id);
    }
}

/// The `{base}/sse` and `{base}/messages` routes.
pub fn routes(
    state: Arc<AppState>,
    bridge: Arc<McpBridge>,
    base: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let sse_state = state.clone();
    let sse_bridge = bridge.clone();
    let sse_base = base.clone();
    let sse = warp::path(base.clone())
        .and(warp::path("sse"))
        .and(warp::path::end())
        .and(warp::get())
        .map(move || establish_session(sse_state.clone(), sse_bridge.clone(), sse_base.clone()));

    let messages_state = state;
    let messages = warp::path(base)
        .and(warp::path("messages"))
        .and(warp::path::end())
        .and(warp::filters::method::method())
        .and(
            warp::filters::query::raw()
                .or(warp::any().map(String::new))
                .unify(),
        )
        .and(warp::body::bytes())
        .and(warp::any().map(move || messages_state.clone()))
        .and_then(handle_message_post);

    sse.or(messages)
}

fn establish_session(
    state: Arc<AppState>,
    bridge: Arc<McpBridge>,
    base: String,
) -> warp::reply::Response {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(SseSession::new(bridge, tx.clone()));

    let session_id = match state.sessions.open(transport) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("failed to open session: {e}");
            return warp::reply::with_status(
                "Internal Server Error",
                StatusCode::INTERNAL_SERVER_ERROR,
            )
            .into_response();
        }
    };

    // First event tells the client where to POST its messages.
    let endpoint = format!("/{base}/messages?sessionId={session_id}");
    let _ = tx.send(warp::sse::Event::default().event("endpoint").data(endpoint));

    let guard = SessionGuard {
        sessions: state.sessions.clone(),
        session_id,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _keep_alive = &guard;
        Ok::<_, Infallible>(event)
    });

    warp::sse::reply(warp::sse::keep_alive().stream(stream)).into_response()
}

async fn handle_message_post(
    method: Method,
    raw_query: String,
    body: Bytes,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, Rejection> {
    if method != Method::POST {
        return Ok(status_reply(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"));
    }

    let Some(session_id) = query_value(&raw_query, "sessionId") else {
        return Ok(status_reply(StatusCode::BAD_REQUEST, "Bad Request"));
    };

    match state.sessions.deliver(&session_id, body).await {
        Ok(()) => Ok(status_reply(StatusCode::OK, "OK")),
        Err(crate::error::PipelineError::Session(crate::error::SessionError::NotFound(_))) => {
            tracing::debug!(session_id = %session_id, "message for unknown session");
            Ok(status_reply(StatusCode::NOT_FOUND, "Not Found"))
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, "message delivery failed: {e}");
            Ok(status_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ))
        }
    }
}

fn status_reply(status: StatusCode, body: &'static str) -> warp::reply::Response {
    warp::reply::with_status(body, status).into_response()
}

fn query_value(raw: &str, key: &str) -> Option<String> {
    raw.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::plugin::{Plugin, PluginRegistry};
    use crate::virtualmod::VirtualModuleRegistry;
    use warp::test::request;

    fn test_state() -> (Arc<AppState>, Arc<McpBridge>) {
        let dispatcher = Arc::new(HookStageDispatcher::new(
            Arc::new(PluginRegistry::new(vec![Plugin::new("plugin:babel", 99)]).unwrap()),
            Arc::new(VirtualModuleRegistry::new()),
        ));
        let bridge = Arc::new(McpBridge::new(dispatcher.clone(), json!({"root": "/app"})));
        let (state, _) = AppState::new(Config::default(), dispatcher);
        (state, bridge)
    }

    #[tokio::test]
    async fn post_to_unknown_session_is_404() {
        let (state, bridge) = test_state();
        let routes = routes(state, bridge, "__mcp".to_string());

        let resp = request()
            .method("POST")
            .path("/__mcp/messages?sessionId=unknown")
            .body("{}")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn post_without_session_id_is_400() {
        let (state, bridge) = test_state();
        let routes = routes(state, bridge, "__mcp".to_string());

        let resp = request()
            .method("POST")
            .path("/__mcp/messages")
            .body("{}")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 400);

        let resp = request()
            .method("POST")
            .path("/__mcp/messages?sessionId=")
            .body("{}")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 400);
    }

    struct RefusingTransport;

    #[async_trait::async_trait]
    impl crate::session::SessionTransport for RefusingTransport {
        async fn handle_message(&self, _body: bytes::Bytes) -> anyhow::Result<()> {
            anyhow::bail!("stream gone")
        }
    }

    #[tokio::test]
    async fn post_to_broken_transport_is_500() {
        let (state, bridge) = test_state();
        state
            .sessions
            .open_with_id("s1".to_string(), Arc::new(RefusingTransport))
            .unwrap();
        let routes = routes(state, bridge, "__mcp".to_string());

        let resp = request()
            .method("POST")
            .path("/__mcp/messages?sessionId=s1")
            .body("{}")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 500);
    }

    #[tokio::test]
    async fn wrong_method_is_405_even_with_valid_session() {
        let (state, bridge) = test_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        state
            .sessions
            .open_with_id("s1".to_string(), Arc::new(SseSession::new(bridge.clone(), tx)))
            .unwrap();
        let routes = routes(state, bridge, "__mcp".to_string());

        let resp = request()
            .method("GET")
            .path("/__mcp/messages?sessionId=s1")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 405);
    }

    #[tokio::test]
    async fn post_to_live_session_is_200_and_answers_over_push_channel() {
        let (state, bridge) = test_state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .sessions
            .open_with_id("s1".to_string(), Arc::new(SseSession::new(bridge.clone(), tx)))
            .unwrap();
        let routes = routes(state, bridge, "__mcp".to_string());

        let resp = request()
            .method("POST")
            .path("/__mcp/messages?sessionId=s1")
            .body(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 200);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn sse_connect_registers_session_and_drop_purges_it() {
        let (state, bridge) = test_state();
        let routes = routes(state.clone(), bridge, "__mcp".to_string());

        let reply = request()
            .method("GET")
            .path("/__mcp/sse")
            .filter(&routes)
            .await
            .unwrap();
        assert_eq!(state.sessions.len(), 1);

        drop(reply);
        assert_eq!(state.sessions.len(), 0);

        // A POST for the purged session now misses.
        let routes2 = {
            let (_, bridge) = test_state();
            super::routes(state.clone(), bridge, "__mcp".to_string())
        };
        let resp = request()
            .method("POST")
            .path("/__mcp/messages?sessionId=whatever")
            .body("{}")
            .reply(&routes2)
            .await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn initialize_and_tools_round_trip() {
        let (_, bridge) = test_state();

        let response = bridge
            .handle(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
            .unwrap();
        assert_eq!(response["result"]["serverInfo"]["name"], "lathe");

        let response = bridge
            .handle(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);

        let response = bridge
            .handle(&json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "get-bundler-config", "arguments": {}}
            }))
            .unwrap();
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let digest: Value = serde_json::from_str(text).unwrap();
        assert_eq!(digest["plugins"][0], "plugin:babel");

        let response = bridge
            .handle(&json!({
                "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                "params": {"name": "get-module-info", "arguments": {"id": "/src/a.vue?type=style"}}
            }))
            .unwrap();
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let info: Value = serde_json::from_str(text).unwrap();
        assert_eq!(info["resolvedPath"], "/src/a.vue");

        let response = bridge
            .handle(&json!({"jsonrpc": "2.0", "id": 5, "method": "no-such"}))
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);

        // Notifications produce no response.
        assert!(bridge
            .handle(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .is_none());
    }
}
