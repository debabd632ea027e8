//! Desktop multi-target coordination
//!
//! Sequences the three engine invocations of a desktop run — main,
//! preload(s), renderer — around one invariant: main and preload share an
//! output directory, and that directory is destructively cleaned exactly
//! once per build, before any engine writes into it.
//!
//! Production builds first attempt a union build (one batched invocation
//! covering every target) and silently fall back to split builds when the
//! union is not possible. Dev mode runs the renderer dev server plus
//! main/preload watches and hands rebuild events to the process
//! supervisor.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use futures_util::future::try_join_all;
use tracing::{debug, error, info};

use crate::bundler::{
    ignore_status, BuildSummary, BundlerAdapter, DevServerHandle, DevServerOptions,
    OnBuildStatus, TargetConfig,
};
use crate::compile::{CompileStrategy, ResolvedContext};
use crate::config::Engine;
use crate::error::KilnError;
use crate::report;

use super::supervisor::{ProcessSupervisor, RuntimeLauncher, SupervisorOptions};
use super::target::{main_target, preload_targets, renderer_target, shared_out_dir};

/// Coordinates desktop builds across the native and renderer engines
pub struct TargetCoordinator {
    /// Engine for main and preload targets (the runtime's native engine)
    native: Arc<dyn BundlerAdapter>,

    /// Engine for the renderer target
    renderer: Arc<dyn BundlerAdapter>,

    launcher: Arc<dyn RuntimeLauncher>,
}

/// A running desktop dev session
pub struct DevSession {
    pub supervisor: Arc<ProcessSupervisor>,
    pub renderer_port: u16,

    /// Keeps the renderer dev server alive for the session's lifetime
    _renderer_server: DevServerHandle,
}

impl TargetCoordinator {
    pub fn new(
        native: Arc<dyn BundlerAdapter>,
        renderer: Arc<dyn BundlerAdapter>,
        launcher: Arc<dyn RuntimeLauncher>,
    ) -> Self {
        Self {
            native,
            renderer,
            launcher,
        }
    }

    /// Union build: one batched invocation covering all targets.
    ///
    /// The shared directory was already reset by the caller, so every
    /// individual clean flag is forced off; only the renderer's own stale
    /// output still needs removing here.
    async fn union_build(
        &self,
        main: &TargetConfig,
        preloads: &[TargetConfig],
        renderer: &TargetConfig,
    ) -> Result<BuildSummary> {
        if renderer.engine != Engine::Rspack {
            return Err(KilnError::Build(format!(
                "union build requires the native engine, renderer uses '{}'",
                renderer.engine
            ))
            .into());
        }

        let _ = tokio::fs::remove_dir_all(&renderer.out_dir).await;

        let mut configs = Vec::with_capacity(preloads.len() + 2);
        configs.push(main.without_clean());
        configs.extend(preloads.iter().map(TargetConfig::without_clean));
        configs.push(renderer.without_clean());

        self.native.run_build(&configs, ignore_status()).await
    }

    /// Split build: main+preload through the native engine, then the
    /// renderer independently through its own adapter (which performs its
    /// own clean, since it no longer shares the run)
    async fn split_build(
        &self,
        main: &TargetConfig,
        preloads: &[TargetConfig],
        renderer: &TargetConfig,
    ) -> Result<BuildSummary> {
        let mut combined = Vec::with_capacity(preloads.len() + 1);
        combined.push(main.without_clean());
        combined.extend(preloads.iter().map(TargetConfig::without_clean));

        let mut summary = self.native.run_build(&combined, ignore_status()).await?;

        let renderer_summary = self
            .renderer
            .run_build(std::slice::from_ref(renderer), ignore_status())
            .await?;

        summary.assets.extend(renderer_summary.assets);
        summary.modules.extend(renderer_summary.modules);
        summary.errors += renderer_summary.errors;
        summary.warnings += renderer_summary.warnings;
        summary.duration_ms += renderer_summary.duration_ms;

        Ok(summary)
    }

    /// Start the renderer dev server and wait for its assigned port
    async fn start_renderer_dev(&self, ctx: &ResolvedContext) -> Result<DevServerHandle> {
        let config = renderer_target(ctx);

        let on_status: OnBuildStatus = Arc::new(|status| {
            if !status.success {
                if let Some(message) = status.message {
                    error!("{}", message);
                }
            }
        });

        self.renderer
            .start_dev_server(&config, DevServerOptions { port: ctx.port }, on_status)
            .await
    }

    /// Start one watch build; resolves once the watch reports its first
    /// successful build, while later rebuilds feed the supervisor
    async fn watch_until_first_build(
        &self,
        config: TargetConfig,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Result<()> {
        let (first_tx, first_rx) = tokio::sync::oneshot::channel::<()>();
        let first_tx = parking_lot::Mutex::new(Some(first_tx));

        let name = config.name.clone();
        let on_status: OnBuildStatus = Arc::new(move |status| {
            if status.success {
                match first_tx.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(());
                    }
                    // Successful incremental rebuild
                    None => supervisor.request_restart(),
                }
            } else if let Some(message) = status.message {
                error!("{}", message);
            }
        });

        let adapter = Arc::clone(&self.native);
        tokio::spawn(async move {
            // Settles only on an unrecoverable watch error
            if let Err(err) = adapter.watch_build(&config, on_status).await {
                error!("watch build for '{}' terminated: {:#}", name, err);
            }
        });

        first_rx
            .await
            .context("watch build ended before its first successful build")
    }

    /// Bring up the full dev session: renderer first (its port feeds the
    /// runtime environment), then the main/preload watches, then the
    /// runtime process
    pub async fn run_dev(&self, ctx: Arc<ResolvedContext>) -> Result<DevSession> {
        let renderer_server = self.start_renderer_dev(&ctx).await?;
        let renderer_port = renderer_server.port();
        info!("renderer dev server listening on port {}", renderer_port);

        let entry_file = shared_out_dir(&ctx).join("main.js");
        let mut opts = SupervisorOptions::new(entry_file, renderer_port);
        opts.inspect_port = ctx.config.desktop.inspect_port;
        opts.controlled_restart = ctx.config.desktop.controlled_restart;

        let supervisor = ProcessSupervisor::new(Arc::clone(&self.launcher), opts);

        let main = main_target(&ctx);
        let preloads = preload_targets(&ctx)?;

        let mut watches = Vec::with_capacity(preloads.len() + 1);
        watches.push(self.watch_until_first_build(main, Arc::clone(&supervisor)));
        for preload in preloads {
            watches.push(self.watch_until_first_build(preload, Arc::clone(&supervisor)));
        }

        // Both target watches must report a first successful build before
        // the runtime process starts
        try_join_all(watches).await?;

        supervisor.start().await?;

        Ok(DevSession {
            supervisor,
            renderer_port,
            _renderer_server: renderer_server,
        })
    }
}

#[async_trait]
impl CompileStrategy for TargetCoordinator {
    async fn dev(&self, ctx: Arc<ResolvedContext>) -> Result<()> {
        let session = self.run_dev(ctx).await?;

        eprintln!(
            "\n{} Desktop dev session ready (renderer on port {})\n",
            "✓".green().bold(),
            session.renderer_port
        );

        session.supervisor.interactive_loop().await
    }

    async fn build(&self, ctx: Arc<ResolvedContext>) -> Result<()> {
        let main = main_target(&ctx);
        let preloads = preload_targets(&ctx)?;
        let renderer = renderer_target(&ctx);

        // The one designated clean of the shared main/preload directory;
        // no later step repeats it on any path.
        let shared = shared_out_dir(&ctx);
        let _ = tokio::fs::remove_dir_all(&shared).await;

        let summary = match self.union_build(&main, &preloads, &renderer).await {
            Ok(summary) => summary,
            Err(union_err) => {
                // Recovered locally; the operator only sees the final outcome
                debug!("union build failed, falling back to split builds: {:#}", union_err);

                match self.split_build(&main, &preloads, &renderer).await {
                    Ok(summary) => summary,
                    Err(fallback_err) => {
                        return Err(KilnError::Build(format!(
                            "split build failed: {:#}; union build previously failed: {:#}",
                            fallback_err, union_err
                        ))
                        .into());
                    }
                }
            }
        };

        report::emit_report(&ctx.config.build, &summary, &renderer.out_dir)
    }
}
