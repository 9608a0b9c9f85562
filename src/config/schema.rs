use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub dev_server: DevServerConfig,
    pub mcp: McpConfig,
    /// Virtual modules registered at configuration time.
    pub virtual_modules: Vec<VirtualModuleDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    #[serde(default = "default_mcp_enabled")]
    pub enabled: bool,
    /// Path segment the SSE and message routes hang off, without slashes.
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Editor integration manifest to read-merge-write on startup, if any.
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: default_mcp_enabled(),
            base_path: default_base_path(),
            manifest_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualModuleDef {
    pub namespace: String,
    pub name: String,
    pub content: String,
    #[serde(default = "default_module_type")]
    pub module_type: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9100
}

fn default_mcp_enabled() -> bool {
    true
}

fn default_base_path() -> String {
    "__mcp".to_string()
}

fn default_module_type() -> String {
    "js".to_string()
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.dev_server.host, self.dev_server.port)
    }

    /// URL a client uses to establish the SSE session.
    pub fn sse_url(&self) -> String {
        format!(
            "http://{}/{}/sse",
            self.server_address(),
            self.mcp.base_path
        )
    }
}
