//! Web compile strategy
//!
//! Dev-serves or builds the page bundle through the configured engine
//! adapter. The desktop renderer reuses [`web_target`] with its own output
//! placement (see the desktop target builders).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use tracing::error;

use crate::bundler::{
    BundlerAdapter, DevServerOptions, OnBuildStatus, TargetConfig, TargetKind,
};
use crate::report;

use super::{CompileStrategy, ResolvedContext};

/// Build the web target configuration from the resolved context
pub fn web_target(ctx: &ResolvedContext) -> TargetConfig {
    let entries = ctx
        .pages
        .iter()
        .map(|(name, page)| (name.clone(), ctx.resolve(&page.entry)))
        .collect();

    TargetConfig {
        name: "web".to_string(),
        kind: TargetKind::Web,
        engine: ctx.config.engine,
        mode: ctx.emit_mode(),
        entries,
        out_dir: ctx.resolve(&ctx.config.build.out_dir_name),
        clean: true,
        public_path: ctx.base.clone(),
        alias: ctx.alias_map(),
        extensions: ctx.extensions(),
        externals: Vec::new(),
        define: ctx.env.clone(),
        browser_targets: Some(ctx.browser_targets.clone()),
    }
}

/// Compile strategy for plain web projects
pub struct WebCompileService {
    adapter: Arc<dyn BundlerAdapter>,
}

impl WebCompileService {
    pub fn new(adapter: Arc<dyn BundlerAdapter>) -> Self {
        Self { adapter }
    }

    fn rebuild_logger() -> OnBuildStatus {
        Arc::new(|status| {
            if !status.success {
                if let Some(message) = status.message {
                    error!("{}", message);
                }
            }
        })
    }
}

#[async_trait]
impl CompileStrategy for WebCompileService {
    async fn dev(&self, ctx: Arc<ResolvedContext>) -> Result<()> {
        let config = web_target(&ctx);

        let handle = self
            .adapter
            .start_dev_server(
                &config,
                DevServerOptions { port: ctx.port },
                Self::rebuild_logger(),
            )
            .await?;

        eprintln!(
            "\n{} Dev server listening at {}\n",
            "→".blue(),
            format!("http://localhost:{}{}", handle.port(), ctx.base)
                .cyan()
                .underline()
        );

        // Serves until the engine dies
        handle.wait().await
    }

    async fn build(&self, ctx: Arc<ResolvedContext>) -> Result<()> {
        let config = web_target(&ctx);

        let summary = self
            .adapter
            .run_build(std::slice::from_ref(&config), Self::rebuild_logger())
            .await?;

        report::emit_report(&ctx.config.build, &summary, &config.out_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{Command, CompileRequest, Platform};
    use crate::config::UserConfig;
    use std::collections::BTreeMap;

    fn context(command: Command) -> ResolvedContext {
        let root = std::env::temp_dir();
        crate::compile::context::build_context(
            &CompileRequest {
                command,
                mode: None,
                platform: Platform::Web,
                config_file: None,
            },
            root,
            None,
            BTreeMap::new(),
            UserConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_web_target_shape() {
        let ctx = context(Command::Build);
        let config = web_target(&ctx);

        assert_eq!(config.kind, TargetKind::Web);
        assert!(config.clean);
        assert_eq!(config.public_path, "/");
        assert_eq!(config.out_dir, ctx.resolve("dist"));
        assert!(config.entries.contains_key("index"));
        assert_eq!(
            config.mode,
            crate::bundler::EmitMode::Production
        );
    }

    #[test]
    fn test_web_target_dev_mode() {
        let ctx = context(Command::Dev);
        let config = web_target(&ctx);
        assert_eq!(config.mode, crate::bundler::EmitMode::Development);
    }
}
