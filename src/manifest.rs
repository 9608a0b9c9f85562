//! Editor integration manifest: a JSON file the dev server patches with
//! its own MCP endpoint on startup, preserving everything else in it.

use crate::error::Result;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

const SERVERS_KEY: &str = "mcpServers";
const ENTRY_NAME: &str = "lathe";

/// Read-merge-write the manifest at `path`: set `mcpServers.lathe.url` to
/// `sse_url`, keep unrelated keys and sibling server entries untouched.
/// A missing file starts from an empty object.
pub async fn write_manifest(path: &Path, sse_url: &str) -> Result<()> {
    let existing = match tokio::fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str::<Value>(&text)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => json!({}),
        Err(e) => return Err(e.into()),
    };

    // Anything other than an object is unusable and gets rebuilt.
    let mut root = match existing {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    let servers = root
        .entry(SERVERS_KEY.to_string())
        .or_insert_with(|| json!({}));
    if !servers.is_object() {
        *servers = json!({});
    }
    if let Value::Object(servers) = servers {
        servers.insert(ENTRY_NAME.to_string(), json!({ "url": sse_url }));
    }
    let manifest = Value::Object(root);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, serde_json::to_string_pretty(&manifest)?).await?;

    info!(path = %path.display(), url = sse_url, "manifest updated");
    Ok(())
}
