//! Bundler adapter boundary
//!
//! kiln does not bundle anything itself: module resolution, transformation
//! and artifact emission belong to an external engine reached through the
//! [`BundlerAdapter`] trait. kiln's job is to prepare [`TargetConfig`]s,
//! sequence the engine invocations, and consume the uniform
//! [`BuildStatus`] / [`BuildSummary`] results.

mod process;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Engine;

pub use process::EngineCli;

/// Uniform result/event type for every build or dev-server operation,
/// used both as a function result and as an asynchronous callback payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStatus {
    pub success: bool,
    pub port: Option<u16>,
    pub message: Option<String>,
}

/// Callback receiving build progress
pub type OnBuildStatus = Arc<dyn Fn(BuildStatus) + Send + Sync>;

/// A status callback that drops everything
pub fn ignore_status() -> OnBuildStatus {
    Arc::new(|_| {})
}

/// What a target is compiled as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Plain web page bundle
    Web,
    /// Desktop main process
    Main,
    /// Desktop preload script
    Preload,
    /// Desktop renderer (a web bundle with desktop flavor)
    Renderer,
}

/// Emit mode forwarded to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitMode {
    Development,
    Production,
}

/// One engine invocation: entries, output placement and flags for a single
/// build target. Recreated per build/rebuild from the resolved context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target name (`main`, `preload-*`, `renderer`, page names for web)
    pub name: String,

    pub kind: TargetKind,

    pub engine: Engine,

    pub mode: EmitMode,

    /// Entry name → absolute entry path
    pub entries: BTreeMap<String, PathBuf>,

    /// Absolute output directory
    pub out_dir: PathBuf,

    /// Whether the engine may destructively clean `out_dir` before emitting.
    /// For targets sharing an output directory, at most one configuration
    /// in a run may carry this flag.
    pub clean: bool,

    /// Public base path for emitted asset URLs
    pub public_path: String,

    /// Import aliases forwarded to the engine
    pub alias: BTreeMap<String, PathBuf>,

    /// Resolvable extensions forwarded to the engine
    pub extensions: Vec<String>,

    /// Modules left external (not bundled)
    pub externals: Vec<String>,

    /// Compile-time definitions injected into the bundle environment
    pub define: BTreeMap<String, String>,

    /// Browser-target string for web-flavored targets
    pub browser_targets: Option<String>,
}

impl TargetConfig {
    /// Copy of this configuration with the destructive clean disabled
    pub fn without_clean(&self) -> TargetConfig {
        TargetConfig {
            clean: false,
            ..self.clone()
        }
    }
}

/// One emitted artifact, as reported by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub name: String,
    pub bytes: u64,
}

/// One bundled module and its imports, as reported by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: String,
    pub imports: Vec<String>,
}

/// Aggregated result of a completed engine run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSummary {
    pub assets: Vec<AssetRecord>,
    pub modules: Vec<ModuleRecord>,
    pub errors: u32,
    pub warnings: u32,
    pub duration_ms: u64,
}

/// Options for starting a dev server
#[derive(Debug, Clone, Copy)]
pub struct DevServerOptions {
    pub port: u16,
}

/// Handle to a running dev server
pub struct DevServerHandle {
    port: u16,
    task: tokio::task::JoinHandle<Result<()>>,
}

impl DevServerHandle {
    pub fn new(port: u16, task: tokio::task::JoinHandle<Result<()>>) -> Self {
        Self { port, task }
    }

    /// Port the server is listening on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait until the server terminates (normally it never does)
    pub async fn wait(self) -> Result<()> {
        self.task.await.context("dev server task failed")?
    }
}

/// The wrapped bundling engine.
///
/// Contract: `run_build` settles when the batched build completes or
/// fails; `watch_build` settles only on an unrecoverable watch error and
/// delivers per-build results through the status callback; `start_dev_server`
/// returns once the server is listening. All three report progress through
/// the uniform [`BuildStatus`] callback.
#[async_trait]
pub trait BundlerAdapter: Send + Sync {
    /// Run a single batched production build over one or more targets
    async fn run_build(
        &self,
        configs: &[TargetConfig],
        on_status: OnBuildStatus,
    ) -> Result<BuildSummary>;

    /// Start a continuous watch build for one target
    async fn watch_build(
        &self,
        config: &TargetConfig,
        on_status: OnBuildStatus,
    ) -> Result<BuildSummary>;

    /// Start a dev server for one target
    async fn start_dev_server(
        &self,
        config: &TargetConfig,
        opts: DevServerOptions,
        on_status: OnBuildStatus,
    ) -> Result<DevServerHandle>;
}
