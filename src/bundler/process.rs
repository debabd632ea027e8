//! Process-backed engine driver
//!
//! Resolves the engine CLI from the target project's own dependencies
//! (`node_modules/.bin`), hands it the prepared target configurations as
//! JSON on stdin, and consumes a line-oriented JSON event stream on its
//! stdout. The engine stays a black box: kiln only sequences invocations
//! and translates events into [`BuildStatus`] callbacks.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout};
use tracing::{debug, warn};

use crate::config::Engine;
use crate::error::KilnError;

use super::{
    BuildStatus, BuildSummary, BundlerAdapter, DevServerHandle, DevServerOptions, OnBuildStatus,
    TargetConfig,
};

/// Engine CLI invoked as a child process
pub struct EngineCli {
    engine: Engine,
    root: PathBuf,
}

impl EngineCli {
    pub fn new(engine: Engine, root: PathBuf) -> Self {
        Self { engine, root }
    }

    /// Resolve the engine binary from the project's own node_modules,
    /// falling back to the PATH
    fn resolve_bin(&self) -> Result<PathBuf> {
        let name = self.engine.to_string();

        let local = self.root.join("node_modules").join(".bin").join(&name);
        if local.is_file() {
            return Ok(local);
        }

        if cfg!(windows) {
            let cmd = self
                .root
                .join("node_modules")
                .join(".bin")
                .join(format!("{}.cmd", name));
            if cmd.is_file() {
                return Ok(cmd);
            }
        }

        which::which(&name).map_err(|_| {
            KilnError::Build(format!(
                "cannot resolve the '{}' engine; install it as a devDependency of this project",
                name
            ))
            .into()
        })
    }

    /// Spawn the engine with the given subcommand, writing the payload as
    /// JSON to its stdin
    async fn spawn<T: Serialize>(&self, subcommand: &str, payload: &T) -> Result<Child> {
        let bin = self.resolve_bin()?;
        debug!("spawning {} {}", bin.display(), subcommand);

        let mut child = tokio::process::Command::new(&bin)
            .arg(subcommand)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn engine: {}", bin.display()))?;

        let json =
            serde_json::to_vec(payload).context("Failed to serialize engine configuration")?;

        let mut stdin = child
            .stdin
            .take()
            .context("engine child has no stdin handle")?;
        stdin
            .write_all(&json)
            .await
            .context("Failed to write engine configuration")?;
        drop(stdin);

        Ok(child)
    }
}

/// Events emitted by the engine on stdout, one JSON object per line
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum EngineEvent {
    Progress { message: String },
    Asset { name: String, bytes: u64 },
    Module { id: String, imports: Vec<String> },
    Done { errors: u32, warnings: u32, duration_ms: u64 },
    Listening { port: u16 },
}

struct EventStream {
    lines: Lines<BufReader<ChildStdout>>,
}

impl EventStream {
    fn new(child: &mut Child) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .context("engine child has no stdout handle")?;
        Ok(Self {
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Next event, skipping lines that are not part of the protocol
    async fn next(&mut self) -> Result<Option<EngineEvent>> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<EngineEvent>(line) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => {
                    // Engines are free to print plain diagnostics
                    debug!("non-protocol engine output ({}): {}", err, line);
                }
            }
        }
        Ok(None)
    }
}

/// Payload for watch/serve runs: a single target plus server options
#[derive(Serialize)]
struct SingleTargetPayload<'a> {
    config: &'a TargetConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

fn summary_status(summary: &BuildSummary) -> BuildStatus {
    if summary.errors > 0 {
        BuildStatus {
            success: false,
            port: None,
            message: Some(format!("compiled with {} error", summary.errors)),
        }
    } else {
        BuildStatus {
            success: true,
            port: None,
            message: None,
        }
    }
}

#[async_trait]
impl BundlerAdapter for EngineCli {
    async fn run_build(
        &self,
        configs: &[TargetConfig],
        on_status: OnBuildStatus,
    ) -> Result<BuildSummary> {
        let mut child = self.spawn("build", &configs).await?;
        let mut events = EventStream::new(&mut child)?;

        let mut summary = BuildSummary::default();
        let mut done = false;

        while let Some(event) = events.next().await? {
            match event {
                EngineEvent::Progress { message } => debug!("{}", message),
                EngineEvent::Asset { name, bytes } => {
                    summary.assets.push(super::AssetRecord { name, bytes });
                }
                EngineEvent::Module { id, imports } => {
                    summary.modules.push(super::ModuleRecord { id, imports });
                }
                EngineEvent::Done {
                    errors,
                    warnings,
                    duration_ms,
                } => {
                    summary.errors = errors;
                    summary.warnings = warnings;
                    summary.duration_ms = duration_ms;
                    done = true;
                    break;
                }
                EngineEvent::Listening { .. } => {
                    warn!("unexpected listening event during a production build");
                }
            }
        }

        let status = child.wait().await.context("Failed to await engine exit")?;

        if !done {
            return Err(KilnError::Build(format!(
                "engine terminated without completing the build ({})",
                status
            ))
            .into());
        }

        let build_status = summary_status(&summary);
        let failed = !build_status.success;
        let message = build_status.message.clone();
        on_status(build_status);

        if failed {
            return Err(KilnError::Build(
                message.unwrap_or_else(|| "build failed".to_string()),
            )
            .into());
        }

        Ok(summary)
    }

    async fn watch_build(
        &self,
        config: &TargetConfig,
        on_status: OnBuildStatus,
    ) -> Result<BuildSummary> {
        let payload = SingleTargetPayload { config, port: None };
        let mut child = self.spawn("watch", &payload).await?;
        let mut events = EventStream::new(&mut child)?;

        let mut summary = BuildSummary::default();

        // Per-build results flow through the callback; this future only
        // settles when the watch itself dies.
        while let Some(event) = events.next().await? {
            match event {
                EngineEvent::Progress { message } => debug!("{}", message),
                EngineEvent::Asset { name, bytes } => {
                    summary.assets.push(super::AssetRecord { name, bytes });
                }
                EngineEvent::Module { id, imports } => {
                    summary.modules.push(super::ModuleRecord { id, imports });
                }
                EngineEvent::Done {
                    errors,
                    warnings,
                    duration_ms,
                } => {
                    summary.errors = errors;
                    summary.warnings = warnings;
                    summary.duration_ms = duration_ms;
                    on_status(summary_status(&summary));
                    summary.assets.clear();
                    summary.modules.clear();
                }
                EngineEvent::Listening { .. } => {
                    warn!("unexpected listening event during a watch build");
                }
            }
        }

        let status = child.wait().await.context("Failed to await engine exit")?;
        Err(KilnError::Build(format!("watch build terminated unexpectedly ({})", status)).into())
    }

    async fn start_dev_server(
        &self,
        config: &TargetConfig,
        opts: DevServerOptions,
        on_status: OnBuildStatus,
    ) -> Result<DevServerHandle> {
        let payload = SingleTargetPayload {
            config,
            port: Some(opts.port),
        };
        let mut child = self.spawn("serve", &payload).await?;
        let mut events = EventStream::new(&mut child)?;

        // Wait until the engine reports its listening port
        let port = loop {
            match events.next().await? {
                Some(EngineEvent::Listening { port }) => break port,
                Some(EngineEvent::Progress { message }) => debug!("{}", message),
                Some(_) => {}
                None => {
                    let status = child.wait().await.context("Failed to await engine exit")?;
                    let message =
                        format!("dev server terminated before listening ({})", status);
                    on_status(BuildStatus {
                        success: false,
                        port: None,
                        message: Some(message.clone()),
                    });
                    return Err(KilnError::Build(message).into());
                }
            }
        };

        on_status(BuildStatus {
            success: true,
            port: Some(port),
            message: None,
        });

        // Keep draining events until the server dies
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await? {
                if let EngineEvent::Done { errors, .. } = event {
                    on_status(if errors > 0 {
                        BuildStatus {
                            success: false,
                            port: Some(port),
                            message: Some(format!("compiled with {} error", errors)),
                        }
                    } else {
                        BuildStatus {
                            success: true,
                            port: Some(port),
                            message: None,
                        }
                    });
                }
            }

            let status = child.wait().await.context("Failed to await engine exit")?;
            Err::<(), anyhow::Error>(
                KilnError::Build(format!("dev server terminated unexpectedly ({})", status))
                    .into(),
            )
        });

        Ok(DevServerHandle::new(port, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_event_parsing() {
        let asset: EngineEvent =
            serde_json::from_str(r#"{"event":"asset","name":"main.js","bytes":1024}"#).unwrap();
        assert!(matches!(asset, EngineEvent::Asset { ref name, bytes: 1024 } if name == "main.js"));

        let done: EngineEvent =
            serde_json::from_str(r#"{"event":"done","errors":0,"warnings":2,"duration_ms":180}"#)
                .unwrap();
        assert!(matches!(done, EngineEvent::Done { errors: 0, warnings: 2, .. }));

        let listening: EngineEvent =
            serde_json::from_str(r#"{"event":"listening","port":5173}"#).unwrap();
        assert!(matches!(listening, EngineEvent::Listening { port: 5173 }));
    }

    #[test]
    fn test_summary_status_reflects_errors() {
        let ok = BuildSummary::default();
        assert!(summary_status(&ok).success);

        let failed = BuildSummary {
            errors: 3,
            ..Default::default()
        };
        let status = summary_status(&failed);
        assert!(!status.success);
        assert_eq!(status.message.as_deref(), Some("compiled with 3 error"));
    }

    #[test]
    fn test_resolve_bin_prefers_local_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("node_modules").join(".bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        std::fs::write(bin_dir.join("rspack"), "#!/bin/sh\n").unwrap();

        let cli = EngineCli::new(Engine::Rspack, dir.path().to_path_buf());
        let resolved = cli.resolve_bin().unwrap();
        assert_eq!(resolved, bin_dir.join("rspack"));
    }
}
