//! Registry for modules that have no file on disk. Ids live in a reserved
//! namespace that can never collide with a real path, and content comes
//! either from configuration-time strings or from async generators whose
//! output is memoized per build.

use crate::error::{PipelineError, Result, VirtualModuleError};
use crate::module::ModuleType;
use crate::plugin::LoadedModule;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Reserved id prefix. NUL is illegal in paths on every supported OS, so a
/// prefixed id can never resolve against the filesystem.
pub const VIRTUAL_PREFIX: &str = "\0virtual:";

const ESCAPE: char = '\\';
const DELIMITER: char = ':';

/// Encode a namespace/name pair into a virtual module id. The delimiter and
/// escape characters inside either part are escaped so decoding is exact.
pub fn encode(namespace: &str, name: &str) -> String {
    format!(
        "{VIRTUAL_PREFIX}{}{DELIMITER}{}",
        escape_part(namespace),
        escape_part(name)
    )
}

/// Inverse of [`encode`]. Fails on ids without the reserved prefix, without
/// a namespace delimiter, or with a dangling escape.
pub fn decode(id: &str) -> Result<(String, String)> {
    let body = id
        .strip_prefix(VIRTUAL_PREFIX)
        .ok_or_else(|| VirtualModuleError::MalformedId(printable(id)))?;

    let mut namespace = String::new();
    let mut chars = body.chars();
    loop {
        match chars.next() {
            Some(ESCAPE) => match chars.next() {
                Some(c) => namespace.push(c),
                None => return Err(VirtualModuleError::MalformedId(printable(id)).into()),
            },
            Some(DELIMITER) => break,
            Some(c) => namespace.push(c),
            None => return Err(VirtualModuleError::MalformedId(printable(id)).into()),
        }
    }

    let mut name = String::new();
    let mut rest = chars;
    loop {
        match rest.next() {
            Some(ESCAPE) => match rest.next() {
                Some(c) => name.push(c),
                None => return Err(VirtualModuleError::MalformedId(printable(id)).into()),
            },
            Some(c) => name.push(c),
            None => break,
        }
    }

    Ok((namespace, name))
}

pub fn is_virtual(id: &str) -> bool {
    id.starts_with(VIRTUAL_PREFIX)
}

fn escape_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if c == ESCAPE || c == DELIMITER {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn printable(id: &str) -> String {
    id.replace('\0', "\\0")
}

/// Produces the content of a generator-backed virtual module. May perform
/// I/O, but must be idempotent with respect to repeated loads.
#[async_trait]
pub trait VirtualModuleGenerator: Send + Sync {
    async fn generate(&self, id: &str) -> anyhow::Result<String>;
}

enum VirtualContent {
    Static(String),
    Generator(Arc<dyn VirtualModuleGenerator>),
}

struct VirtualEntry {
    content: VirtualContent,
    module_type: ModuleType,
    // First successful generator run wins; concurrent loads share it.
    materialized: OnceCell<String>,
}

/// Owns all virtual module entries for one build. Consulted by the
/// dispatcher before plugin `load` dispatch for prefixed ids.
#[derive(Default)]
pub struct VirtualModuleRegistry {
    entries: DashMap<String, Arc<VirtualEntry>>,
}

impl VirtualModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a virtual module with pre-computed content.
    pub fn define(&self, id: impl Into<String>, content: impl Into<String>, module_type: ModuleType) {
        self.entries.insert(
            id.into(),
            Arc::new(VirtualEntry {
                content: VirtualContent::Static(content.into()),
                module_type,
                materialized: OnceCell::new(),
            }),
        );
    }

    /// Register a virtual module whose content is computed on first load.
    pub fn define_generated(
        &self,
        id: impl Into<String>,
        generator: Arc<dyn VirtualModuleGenerator>,
        module_type: ModuleType,
    ) {
        self.entries.insert(
            id.into(),
            Arc::new(VirtualEntry {
                content: VirtualContent::Generator(generator),
                module_type,
                materialized: OnceCell::new(),
            }),
        );
    }

    /// True iff the id carries the reserved prefix and is registered.
    pub fn resolve(&self, id: &str) -> bool {
        is_virtual(id) && self.entries.contains_key(id)
    }

    /// Materialize an entry. Generator output is cached by id, so repeated
    /// and concurrent loads run the generator once.
    pub async fn load(&self, id: &str) -> Result<LoadedModule> {
        let entry = self
            .entries
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| VirtualModuleError::NotFound(printable(id)))?;

        let content = match &entry.content {
            VirtualContent::Static(content) => content.clone(),
            VirtualContent::Generator(generator) => entry
                .materialized
                .get_or_try_init(|| async {
                    generator.generate(id).await.map_err(|e| {
                        PipelineError::Virtual(VirtualModuleError::GeneratorFailed {
                            id: printable(id),
                            message: e.to_string(),
                        })
                    })
                })
                .await?
                .clone(),
        };

        Ok(LoadedModule {
            content,
            module_type: entry.module_type,
        })
    }
}
