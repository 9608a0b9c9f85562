use crate::error::{ConfigError, PipelineError, Result};
use crate::plugin::DevServerHandle;
use crate::state::AppState;
use crate::web::mcp::McpBridge;
use serde_json::json;
use std::sync::Arc;
use warp::Filter;

pub mod mcp;

/// Start the dev-server bridge and block until shutdown is signalled.
pub async fn start_server(state: Arc<AppState>) -> Result<()> {
    let config = state.config.read().await;
    let addr = config.server_address();
    let base = config.mcp.base_path.clone();
    let mcp_enabled = config.mcp.enabled;
    let manifest_path = config.mcp.manifest_path.clone();
    let sse_url = config.sse_url();
    let config_digest = json!({
        "devServer": { "host": config.dev_server.host, "port": config.dev_server.port },
        "virtualModules": config.virtual_modules.len(),
    });
    drop(config);

    // Plugin-contributed middleware registers once, restarts included.
    state
        .dispatcher
        .configure_dev_server(&DevServerHandle {
            address: addr.clone(),
            sessions: state.sessions.clone(),
        })
        .await?;

    if mcp_enabled {
        if let Some(path) = manifest_path {
            crate::manifest::write_manifest(&path, &sse_url).await?;
        }
    }

    tracing::info!("Starting dev-server bridge on {}", addr);

    let bridge = Arc::new(McpBridge::new(state.dispatcher.clone(), config_digest));
    let routes = create_routes(state.clone(), bridge, base, mcp_enabled);

    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| PipelineError::Config(ConfigError::Parse(format!("Invalid bridge address: {e}"))))?;

    let shutdown_state = state.clone();
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown_state.shutdown_tx.subscribe().recv().await;
    });

    server.await;

    tracing::info!("Dev-server bridge stopped");
    Ok(())
}

fn create_routes(
    state: Arc<AppState>,
    bridge: Arc<McpBridge>,
    base: String,
    mcp_enabled: bool,
) -> warp::filters::BoxedFilter<(warp::reply::Response,)> {
    let health = warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&json!({
            "status": "healthy",
            "service": "lathe-dev-bridge"
        }))
    });

    if mcp_enabled {
        mcp::routes(state, bridge, base)
            .map(warp::Reply::into_response)
            .or(health.map(warp::Reply::into_response))
            .unify()
            .boxed()
    } else {
        health.map(warp::Reply::into_response).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::plugin::{HookStageDispatcher, Plugin, PluginRegistry};
    use crate::virtualmod::VirtualModuleRegistry;
    use warp::test::request;

    fn test_state() -> Arc<AppState> {
        let dispatcher = Arc::new(HookStageDispatcher::new(
            Arc::new(PluginRegistry::new(vec![Plugin::new("p", 0)]).unwrap()),
            Arc::new(VirtualModuleRegistry::new()),
        ));
        let (state, _) = AppState::new(Config::default(), dispatcher);
        state
    }

    #[tokio::test]
    async fn health_route_reports_healthy() {
        let state = test_state();
        let bridge = Arc::new(McpBridge::new(state.dispatcher.clone(), json!({})));
        let routes = create_routes(state, bridge, "__mcp".to_string(), true);

        let resp = request().method("GET").path("/health").reply(&routes).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn mcp_routes_absent_when_disabled() {
        let state = test_state();
        let bridge = Arc::new(McpBridge::new(state.dispatcher.clone(), json!({})));
        let routes = create_routes(state, bridge, "__mcp".to_string(), false);

        let resp = request()
            .method("POST")
            .path("/__mcp/messages?sessionId=x")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), 404);
    }
}
