//! Staged hook dispatch.
//!
//! Stages run in the fixed order config, configResolved, resolve, load,
//! transform, buildEnd, finish. `resolve` and `load` are first-match-wins;
//! `transform` chains every matching plugin's output into the next. All
//! stages are fail-fast: the first executor error aborts dispatch for the
//! module, wrapped with the offending plugin, stage, and module id.

use crate::error::{HookError, HookStage, PipelineError, Result};
use crate::filter::MatchContext;
use crate::module::ModuleDescriptor;
use crate::plugin::{LoadedModule, PluginRegistry, ResolvedModule, TransformInput};
use crate::virtualmod::{self, VirtualModuleRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Chain of `(source, importer)` pairs for the resolution in flight; the
/// cycle guard rejects re-entry instead of looping.
#[derive(Debug, Default)]
pub struct ResolveChain {
    seen: Vec<(String, Option<String>)>,
}

impl ResolveChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn contains(&self, source: &str, importer: Option<&str>) -> bool {
        self.seen
            .iter()
            .any(|(s, i)| s == source && i.as_deref() == importer)
    }

    fn contains_source(&self, source: &str) -> bool {
        self.seen.iter().any(|(s, _)| s == source)
    }
}

/// Final product of the transform stage for one module.
#[derive(Debug, Clone)]
pub struct TransformedModule {
    pub content: String,
    pub descriptor: ModuleDescriptor,
    /// Source maps in application order. Composition into a single map is
    /// the bundler's source-map chain utility's job.
    pub source_maps: Vec<serde_json::Value>,
}

/// Orchestrates the ordered plugin set through the staged hooks, applying
/// each hook's filter before invoking its executor.
pub struct HookStageDispatcher {
    registry: Arc<PluginRegistry>,
    virtuals: Arc<VirtualModuleRegistry>,
    dev_server_configured: AtomicBool,
}

impl HookStageDispatcher {
    pub fn new(registry: Arc<PluginRegistry>, virtuals: Arc<VirtualModuleRegistry>) -> Self {
        Self {
            registry,
            virtuals,
            dev_server_configured: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn virtuals(&self) -> &VirtualModuleRegistry {
        &self.virtuals
    }

    /// Run the config stage: every plugin's partial config is deep-merged
    /// into the evolving one (arrays replaced, objects merged key-wise),
    /// then `configResolved` observers see the final value.
    pub async fn resolve_config(&self, user_config: serde_json::Value) -> Result<serde_json::Value> {
        let mut merged = user_config;

        for plugin in self.registry.ordered() {
            let Some(hook) = &plugin.config else { continue };
            let partial = hook
                .config(&merged)
                .await
                .map_err(|e| wrap(&plugin.name, HookStage::Config, "<config>", e))?;
            if let Some(partial) = partial {
                trace!(plugin = %plugin.name, "merging partial config");
                deep_merge(&mut merged, partial);
            }
        }

        for plugin in self.registry.ordered() {
            let Some(hook) = &plugin.config_resolved else { continue };
            hook.config_resolved(&merged)
                .await
                .map_err(|e| wrap(&plugin.name, HookStage::ConfigResolved, "<config>", e))?;
        }

        Ok(merged)
    }

    /// Resolve an import specifier. Plugins are tried in priority order and
    /// the first non-null result wins; `None` hands control back to the
    /// caller's own resolution.
    pub async fn resolve(
        &self,
        source: &str,
        importer: Option<&str>,
    ) -> Result<Option<ResolvedModule>> {
        let mut chain = ResolveChain::new();
        self.resolve_chained(source, importer, &mut chain).await
    }

    /// Resolve within an existing chain, for plugins that re-enter the
    /// resolver for their own imports.
    pub async fn resolve_chained(
        &self,
        source: &str,
        importer: Option<&str>,
        chain: &mut ResolveChain,
    ) -> Result<Option<ResolvedModule>> {
        if chain.contains(source, importer) {
            return Err(HookError::ResolutionCycle {
                specifier: source.to_string(),
                importer: importer.map(String::from),
            }
            .into());
        }
        chain.seen.push((source.to_string(), importer.map(String::from)));

        // Registered virtual ids resolve without plugin dispatch.
        if self.virtuals.resolve(source) {
            return Ok(Some(ResolvedModule {
                resolved_path: source.to_string(),
                module_type: None,
            }));
        }

        let descriptor = ModuleDescriptor::parse(source);
        let ctx = MatchContext {
            source: Some(source),
            importer,
        };

        for plugin in self.registry.ordered() {
            let Some(hook) = &plugin.resolve else { continue };
            if !hook.filter.matches(&descriptor, ctx) {
                continue;
            }
            let result = hook
                .executor
                .resolve(source, importer)
                .await
                .map_err(|e| wrap(&plugin.name, HookStage::Resolve, source, e))?;
            if let Some(resolved) = result {
                if chain.contains_source(&resolved.resolved_path) {
                    return Err(HookError::ResolutionCycle {
                        specifier: resolved.resolved_path,
                        importer: Some(source.to_string()),
                    }
                    .into());
                }
                debug!(plugin = %plugin.name, source, resolved = %resolved.resolved_path, "resolved");
                return Ok(Some(resolved));
            }
        }

        Ok(None)
    }

    /// Load a module's content. Ids in the reserved virtual namespace are
    /// answered by the virtual registry before plugin dispatch; otherwise
    /// plugins are tried first-match-wins.
    pub async fn load(&self, descriptor: &ModuleDescriptor) -> Result<Option<LoadedModule>> {
        if virtualmod::is_virtual(&descriptor.id) {
            if self.virtuals.resolve(&descriptor.id) {
                return self.virtuals.load(&descriptor.id).await.map(Some);
            }
            // A prefixed id can never come from disk; a plugin may still
            // synthesize it, but nothing else can.
            if let Some(loaded) = self.dispatch_load(descriptor).await? {
                return Ok(Some(loaded));
            }
            return self.virtuals.load(&descriptor.id).await.map(Some);
        }

        self.dispatch_load(descriptor).await
    }

    async fn dispatch_load(&self, descriptor: &ModuleDescriptor) -> Result<Option<LoadedModule>> {
        let ctx = MatchContext::default();
        for plugin in self.registry.ordered() {
            let Some(hook) = &plugin.load else { continue };
            if !hook.filter.matches(descriptor, ctx) {
                continue;
            }
            let result = hook
                .executor
                .load(descriptor)
                .await
                .map_err(|e| wrap(&plugin.name, HookStage::Load, &descriptor.id, e))?;
            if let Some(loaded) = result {
                debug!(plugin = %plugin.name, id = %descriptor.id, "loaded");
                return Ok(Some(loaded));
            }
        }
        Ok(None)
    }

    /// Run the transform chain. Every matching plugin receives the output
    /// of the previous one; a returned module type re-evaluates filters for
    /// the plugins that follow in the same pass.
    pub async fn transform(
        &self,
        content: String,
        descriptor: ModuleDescriptor,
    ) -> Result<TransformedModule> {
        let mut current = TransformInput {
            content,
            descriptor,
        };
        let mut source_maps = Vec::new();

        for plugin in self.registry.ordered() {
            let Some(hook) = &plugin.transform else { continue };
            if !hook.filter.matches(&current.descriptor, MatchContext::default()) {
                continue;
            }
            let result = hook.executor.transform(&current).await.map_err(|e| {
                PipelineError::Hook(HookError::TransformFailed {
                    plugin: plugin.name.clone(),
                    module: current.descriptor.id.clone(),
                    message: format!("{e:#}"),
                })
            })?;

            let Some(output) = result else {
                trace!(plugin = %plugin.name, id = %current.descriptor.id, "transform passed through");
                continue;
            };

            debug!(plugin = %plugin.name, id = %current.descriptor.id, "transformed");
            current.content = output.content;
            if let Some(module_type) = output.module_type {
                current.descriptor.module_type = module_type;
            }
            if let Some(map) = output.source_map {
                source_maps.push(map);
            }
        }

        Ok(TransformedModule {
            content: current.content,
            descriptor: current.descriptor,
            source_maps,
        })
    }

    /// Run every plugin's `buildEnd` hook in priority order.
    pub async fn build_end(&self) -> Result<()> {
        self.run_lifecycle(HookStage::BuildEnd).await
    }

    /// Run every plugin's `finish` hook in priority order.
    pub async fn finish(&self) -> Result<()> {
        self.run_lifecycle(HookStage::Finish).await
    }

    async fn run_lifecycle(&self, stage: HookStage) -> Result<()> {
        for plugin in self.registry.ordered() {
            let hook = match stage {
                HookStage::BuildEnd => &plugin.build_end,
                HookStage::Finish => &plugin.finish,
                _ => unreachable!("not a lifecycle stage"),
            };
            let Some(hook) = hook else { continue };
            hook.run()
                .await
                .map_err(|e| wrap(&plugin.name, stage, "<build>", e))?;
        }
        Ok(())
    }

    /// Run `configureDevServer` hooks once. Repeated server restarts are
    /// no-ops so middleware never registers twice.
    pub async fn configure_dev_server(&self, server: &crate::plugin::DevServerHandle) -> Result<()> {
        if self.dev_server_configured.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for plugin in self.registry.ordered() {
            let Some(hook) = &plugin.configure_dev_server else { continue };
            hook.configure(server)
                .await
                .map_err(|e| wrap(&plugin.name, HookStage::ConfigureDevServer, "<dev-server>", e))?;
        }
        Ok(())
    }
}

fn wrap(plugin: &str, stage: HookStage, module: &str, error: anyhow::Error) -> PipelineError {
    PipelineError::Hook(HookError::Failed {
        plugin: plugin.to_string(),
        stage,
        module: module.to_string(),
        message: format!("{error:#}"),
    })
}

/// Deep-merge `patch` into `target`. Objects merge key-wise; arrays and
/// scalars are replaced wholesale.
fn deep_merge(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target_slot, patch) => *target_slot = patch,
    }
}
