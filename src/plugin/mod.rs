//! Plugin surface and the staged dispatch machinery.
//!
//! A plugin is a record of optional capabilities; a missing field means
//! the plugin does not participate in that stage. The filter-gated stages
//! pair a [`Filter`](crate::filter::Filter) with an executor so the
//! dispatcher can reject cheaply without invoking plugin code.

use crate::filter::Filter;
use crate::module::{ModuleDescriptor, ModuleType};
use async_trait::async_trait;
use std::sync::Arc;

pub mod dispatcher;
pub mod registry;

pub use dispatcher::HookStageDispatcher;
pub use registry::PluginRegistry;

/// Result of a successful `resolve` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub resolved_path: String,
    /// Explicit module type override; `None` defers to extension inference.
    pub module_type: Option<ModuleType>,
}

/// Result of a successful `load` hook, and what the virtual module
/// registry materializes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub content: String,
    pub module_type: ModuleType,
}

/// What a `transform` executor receives: the content produced by the
/// previous matching plugin and the current descriptor.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub content: String,
    pub descriptor: ModuleDescriptor,
}

/// What a `transform` executor may return. `module_type` switches the
/// descriptor type for the rest of the chain; `source_map` is collected
/// in application order.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub content: String,
    pub module_type: Option<ModuleType>,
    pub source_map: Option<serde_json::Value>,
}

#[async_trait]
pub trait ConfigHook: Send + Sync {
    /// Return a partial config to deep-merge into the evolving one, or
    /// `None` to leave it untouched.
    async fn config(&self, current: &serde_json::Value) -> anyhow::Result<Option<serde_json::Value>>;
}

#[async_trait]
pub trait ConfigResolvedHook: Send + Sync {
    /// Observe the final merged config. Must not be used to mutate it;
    /// capture what later stages need.
    async fn config_resolved(&self, config: &serde_json::Value) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ResolveHook: Send + Sync {
    /// Map an import specifier to a resolved path, or `None` to pass.
    async fn resolve(
        &self,
        source: &str,
        importer: Option<&str>,
    ) -> anyhow::Result<Option<ResolvedModule>>;
}

#[async_trait]
pub trait LoadHook: Send + Sync {
    /// Produce content for a resolved module, or `None` to pass.
    async fn load(&self, descriptor: &ModuleDescriptor) -> anyhow::Result<Option<LoadedModule>>;
}

#[async_trait]
pub trait TransformHook: Send + Sync {
    /// Rewrite content, or `None` for "no change, pass through".
    async fn transform(&self, input: &TransformInput) -> anyhow::Result<Option<TransformOutput>>;
}

#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Side-effecting hook run after the module graph is stable. May fail
    /// to abort the build.
    async fn run(&self) -> anyhow::Result<()>;
}

/// What `configureDevServer` hooks see: where the bridge listens and the
/// session registry backing its streaming endpoints.
#[derive(Clone)]
pub struct DevServerHandle {
    pub address: String,
    pub sessions: Arc<crate::session::SessionTransportRegistry>,
}

#[async_trait]
pub trait DevServerHook: Send + Sync {
    /// Runs once per process even across server restarts, so registration
    /// side effects never duplicate.
    async fn configure(&self, server: &DevServerHandle) -> anyhow::Result<()>;
}

/// A filter paired with its stage executor.
pub struct FilteredHook<T: ?Sized> {
    pub filter: Filter,
    pub executor: Arc<T>,
}

impl<T: ?Sized> FilteredHook<T> {
    pub fn new(filter: Filter, executor: Arc<T>) -> Self {
        Self { filter, executor }
    }
}

impl<T: ?Sized> Clone for FilteredHook<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            executor: self.executor.clone(),
        }
    }
}

/// One plugin: a name, a priority (larger runs earlier), and the hooks it
/// implements.
#[derive(Default, Clone)]
pub struct Plugin {
    pub name: String,
    pub priority: i32,
    pub config: Option<Arc<dyn ConfigHook>>,
    pub config_resolved: Option<Arc<dyn ConfigResolvedHook>>,
    pub resolve: Option<FilteredHook<dyn ResolveHook>>,
    pub load: Option<FilteredHook<dyn LoadHook>>,
    pub transform: Option<FilteredHook<dyn TransformHook>>,
    pub build_end: Option<Arc<dyn LifecycleHook>>,
    pub finish: Option<Arc<dyn LifecycleHook>>,
    pub configure_dev_server: Option<Arc<dyn DevServerHook>>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Plugin {
            name: name.into(),
            priority,
            ..Plugin::default()
        }
    }

    pub fn with_resolve(mut self, filter: Filter, executor: Arc<dyn ResolveHook>) -> Self {
        self.resolve = Some(FilteredHook::new(filter, executor));
        self
    }

    pub fn with_load(mut self, filter: Filter, executor: Arc<dyn LoadHook>) -> Self {
        self.load = Some(FilteredHook::new(filter, executor));
        self
    }

    pub fn with_transform(mut self, filter: Filter, executor: Arc<dyn TransformHook>) -> Self {
        self.transform = Some(FilteredHook::new(filter, executor));
        self
    }

    pub fn with_config(mut self, hook: Arc<dyn ConfigHook>) -> Self {
        self.config = Some(hook);
        self
    }

    pub fn with_config_resolved(mut self, hook: Arc<dyn ConfigResolvedHook>) -> Self {
        self.config_resolved = Some(hook);
        self
    }

    pub fn with_build_end(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.build_end = Some(hook);
        self
    }

    pub fn with_finish(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.finish = Some(hook);
        self
    }

    pub fn with_configure_dev_server(mut self, hook: Arc<dyn DevServerHook>) -> Self {
        self.configure_dev_server = Some(hook);
        self
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("config", &self.config.is_some())
            .field("config_resolved", &self.config_resolved.is_some())
            .field("resolve", &self.resolve.is_some())
            .field("load", &self.load.is_some())
            .field("transform", &self.transform.is_some())
            .field("build_end", &self.build_end.is_some())
            .field("finish", &self.finish.is_some())
            .field("configure_dev_server", &self.configure_dev_server.is_some())
            .finish()
    }
}
