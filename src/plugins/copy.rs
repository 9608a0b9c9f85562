//! Post-build file copying plugin. Runs in the `finish` stage; with
//! `copy_once` set, watch-mode rebuilds copy only on the first pass.

use crate::error::Result;
use crate::plugin::{LifecycleHook, Plugin};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CopyTarget {
    pub src: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct CopyPluginOptions {
    pub targets: Vec<CopyTarget>,
    /// Copy on the first finish only. Useful in watch mode.
    pub copy_once: bool,
}

struct CopyFinish {
    targets: Vec<CopyTarget>,
    copy_once: bool,
    copied: AtomicBool,
}

#[async_trait]
impl LifecycleHook for CopyFinish {
    async fn run(&self) -> anyhow::Result<()> {
        if self.copy_once && self.copied.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for target in &self.targets {
            if let Some(parent) = target.dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&target.src, &target.dest).await?;
            info!(
                src = %target.src.display(),
                dest = %target.dest.display(),
                "copied"
            );
        }
        Ok(())
    }
}

/// Build the copy plugin. Priority is low so it runs after other finish
/// hooks have settled outputs.
pub fn copy_plugin(options: CopyPluginOptions) -> Result<Plugin> {
    Ok(Plugin::new("plugin:copy", -50).with_finish(Arc::new(CopyFinish {
        targets: options.targets,
        copy_once: options.copy_once,
        copied: AtomicBool::new(false),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{HookStageDispatcher, PluginRegistry};
    use crate::virtualmod::VirtualModuleRegistry;

    async fn dispatcher_with_copy(options: CopyPluginOptions) -> HookStageDispatcher {
        HookStageDispatcher::new(
            Arc::new(PluginRegistry::new(vec![copy_plugin(options).unwrap()]).unwrap()),
            Arc::new(VirtualModuleRegistry::new()),
        )
    }

    #[tokio::test]
    async fn copies_targets_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("asset.txt");
        let dest = dir.path().join("dist/static/asset.txt");
        tokio::fs::write(&src, "payload").await.unwrap();

        let d = dispatcher_with_copy(CopyPluginOptions {
            targets: vec![CopyTarget {
                src: src.clone(),
                dest: dest.clone(),
            }],
            copy_once: false,
        })
        .await;

        d.finish().await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&dest).await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn copy_once_skips_repeat_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("asset.txt");
        let dest = dir.path().join("out/asset.txt");
        tokio::fs::write(&src, "v1").await.unwrap();

        let d = dispatcher_with_copy(CopyPluginOptions {
            targets: vec![CopyTarget {
                src: src.clone(),
                dest: dest.clone(),
            }],
            copy_once: true,
        })
        .await;

        d.finish().await.unwrap();
        tokio::fs::write(&src, "v2").await.unwrap();
        d.finish().await.unwrap();

        // Second finish was a no-op.
        assert_eq!(tokio::fs::read_to_string(&dest).await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn missing_source_aborts_finish_with_attribution() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher_with_copy(CopyPluginOptions {
            targets: vec![CopyTarget {
                src: dir.path().join("nope.txt"),
                dest: dir.path().join("out/nope.txt"),
            }],
            copy_once: false,
        })
        .await;

        let err = d.finish().await.unwrap_err();
        assert!(err.to_string().contains("plugin:copy"));
    }
}
