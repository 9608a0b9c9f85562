//! External-compiler transform plugin.
//!
//! Wraps any `(source, id, options) -> {code, map?}` compiler behind the
//! transform stage. The compiler is a black box; its failures surface as
//! transform errors attributed to this plugin and module.

use crate::error::Result;
use crate::filter::{Filter, FilterSpec};
use crate::plugin::{Plugin, TransformHook, TransformInput, TransformOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// What a compiler hands back for one module.
#[derive(Debug, Clone)]
pub struct CompiledOutput {
    pub code: String,
    pub map: Option<Value>,
}

/// Boundary to a wrapped compiler (Babel, Svelte, Vue, Solid, ...).
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, source: &str, id: &str, options: &Value)
        -> anyhow::Result<CompiledOutput>;
}

#[derive(Debug, Clone)]
pub struct CompilerPluginOptions {
    pub name: String,
    /// Larger runs earlier. Matches the conventional default for compiler
    /// adapter plugins.
    pub priority: i32,
    pub filter: FilterSpec,
    /// Opaque options forwarded to the compiler on every call.
    pub compiler_options: Value,
}

impl Default for CompilerPluginOptions {
    fn default() -> Self {
        Self {
            name: "plugin:compiler".to_string(),
            priority: 99,
            filter: FilterSpec {
                module_types: vec![
                    "js".to_string(),
                    "jsx".to_string(),
                    "ts".to_string(),
                    "tsx".to_string(),
                ],
                ..FilterSpec::default()
            },
            compiler_options: Value::Null,
        }
    }
}

struct CompilerTransform {
    compiler: Arc<dyn Compiler>,
    options: Value,
}

#[async_trait]
impl TransformHook for CompilerTransform {
    async fn transform(&self, input: &TransformInput) -> anyhow::Result<Option<TransformOutput>> {
        let output = self
            .compiler
            .compile(&input.content, &input.descriptor.id, &self.options)
            .await?;
        debug!(id = %input.descriptor.id, "compiled");
        Ok(Some(TransformOutput {
            content: output.code,
            module_type: None,
            source_map: output.map,
        }))
    }
}

/// Build a transform plugin around `compiler`, filter-gated by the
/// options. Fails on a malformed filter.
pub fn compiler_plugin(
    compiler: Arc<dyn Compiler>,
    options: CompilerPluginOptions,
) -> Result<Plugin> {
    let filter = Filter::compile(&options.filter).map_err(crate::error::PipelineError::Filter)?;
    Ok(Plugin::new(options.name, options.priority).with_transform(
        filter,
        Arc::new(CompilerTransform {
            compiler,
            options: options.compiler_options,
        }),
    ))
}
