//! Compile service lifecycle
//!
//! A [`CompileService`] owns one build request from creation to terminal
//! state: `Created → ContextLoading → ConfigLoading → Dispatched →
//! Running → Terminal`. Transitions are strictly sequential and
//! non-reentrant; a new request always creates a new instance.
//!
//! Concrete dev/build behavior lives behind the [`CompileStrategy`] seam,
//! selected by platform tag at construction time: the web service for
//! `Platform::Web`, the desktop target coordinator for `Platform::Desktop`.

pub mod context;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bundler::EngineCli;
use crate::config::{ConfigResolver, FileConfigResolver};
use crate::desktop::{DesktopLauncher, TargetCoordinator};
use crate::error::KilnError;

pub use context::{PackageMeta, ResolvedContext};
pub use web::WebCompileService;

/// The lifecycle command being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Dev,
    Build,
}

/// Platform the artifacts are produced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Desktop,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Desktop => "desktop",
        }
    }
}

/// One build/dev request; immutable once created
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub command: Command,
    pub mode: Option<String>,
    pub platform: Platform,
    pub config_file: Option<PathBuf>,
}

/// Lifecycle states of a compile service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    ContextLoading,
    ConfigLoading,
    Dispatched,
    Running(Command),
    Terminal(bool),
}

/// Concrete dev/build behavior for one platform.
///
/// Contract: `dev()`/`build()` may suspend arbitrarily but must settle to
/// success or an error; the service performs no retries.
#[async_trait]
pub trait CompileStrategy: Send + Sync {
    async fn dev(&self, ctx: Arc<ResolvedContext>) -> Result<()>;
    async fn build(&self, ctx: Arc<ResolvedContext>) -> Result<()>;
}

/// The compile-service lifecycle state machine
pub struct CompileService {
    request: CompileRequest,
    state: ServiceState,
}

impl CompileService {
    pub fn new(request: CompileRequest) -> Self {
        Self {
            request,
            state: ServiceState::Created,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    fn expect_state(&self, expected: ServiceState) -> Result<()> {
        if self.state != expected {
            return Err(KilnError::Config(format!(
                "compile service is not reentrant: expected {:?}, found {:?}",
                expected, self.state
            ))
            .into());
        }
        Ok(())
    }

    /// Resolve everything a build needs: package metadata (best-effort),
    /// the assembled environment map, and the validated user configuration.
    pub async fn initialize(
        &mut self,
        resolver: &dyn ConfigResolver,
    ) -> Result<Arc<ResolvedContext>> {
        self.expect_state(ServiceState::Created)?;
        self.state = ServiceState::ContextLoading;

        let root = std::env::current_dir()?;
        let package = context::load_package_meta(&root);
        let env = context::assemble_env(&root, &self.request);

        self.state = ServiceState::ConfigLoading;

        let descriptor = crate::config::ConfigEnv {
            mode: self.request.mode.clone().unwrap_or_default(),
            env: env.clone(),
            command: self.request.command,
        };

        // A deferred configuration function runs exactly once, here.
        let config = resolver.load()?.resolve(&descriptor)?;

        let ctx = context::build_context(&self.request, root, package, env, config)?;

        self.state = ServiceState::Dispatched;
        debug!("context resolved, port {}", ctx.port);

        Ok(Arc::new(ctx))
    }

    /// Dispatch to the strategy's dev or build lifecycle hook
    pub async fn start_compile(
        &mut self,
        ctx: Arc<ResolvedContext>,
        strategy: &dyn CompileStrategy,
    ) -> Result<()> {
        self.expect_state(ServiceState::Dispatched)?;
        self.state = ServiceState::Running(self.request.command);

        let result = match self.request.command {
            Command::Dev => strategy.dev(ctx).await,
            Command::Build => strategy.build(ctx).await,
        };

        self.state = ServiceState::Terminal(result.is_ok());
        result
    }
}

/// Pick the concrete strategy for a resolved context
pub fn select_strategy(ctx: &ResolvedContext) -> Box<dyn CompileStrategy> {
    match ctx.platform {
        Platform::Web => Box::new(WebCompileService::new(Arc::new(EngineCli::new(
            ctx.config.engine,
            ctx.root.clone(),
        )))),
        Platform::Desktop => Box::new(TargetCoordinator::new(
            Arc::new(EngineCli::new(crate::config::Engine::Rspack, ctx.root.clone())),
            Arc::new(EngineCli::new(ctx.config.engine, ctx.root.clone())),
            Arc::new(DesktopLauncher::new(ctx.root.clone(), ctx.config.desktop.runtime.clone())),
        )),
    }
}

/// Run one request end to end: initialize, select the strategy, dispatch
pub async fn start(request: CompileRequest) -> Result<()> {
    let config_path = request
        .config_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("kiln.toml"));
    let resolver = FileConfigResolver::new(config_path);

    let mut service = CompileService::new(request);
    let ctx = service.initialize(&resolver).await?;
    let strategy = select_strategy(&ctx);
    service.start_compile(ctx, strategy.as_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, UserConfig};

    struct StaticResolver;

    impl ConfigResolver for StaticResolver {
        fn load(&self) -> Result<ConfigSource> {
            Ok(ConfigSource::Static(UserConfig::default()))
        }
    }

    struct NoopStrategy;

    #[async_trait]
    impl CompileStrategy for NoopStrategy {
        async fn dev(&self, _ctx: Arc<ResolvedContext>) -> Result<()> {
            Ok(())
        }

        async fn build(&self, _ctx: Arc<ResolvedContext>) -> Result<()> {
            Ok(())
        }
    }

    fn request(command: Command) -> CompileRequest {
        CompileRequest {
            command,
            mode: None,
            platform: Platform::Web,
            config_file: None,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_runs_to_terminal_success() {
        let mut service = CompileService::new(request(Command::Build));
        assert_eq!(service.state(), ServiceState::Created);

        let ctx = service.initialize(&StaticResolver).await.unwrap();
        assert_eq!(service.state(), ServiceState::Dispatched);

        service.start_compile(ctx, &NoopStrategy).await.unwrap();
        assert_eq!(service.state(), ServiceState::Terminal(true));
    }

    #[tokio::test]
    async fn test_lifecycle_is_not_reentrant() {
        let mut service = CompileService::new(request(Command::Dev));
        let ctx = service.initialize(&StaticResolver).await.unwrap();

        service
            .start_compile(ctx.clone(), &NoopStrategy)
            .await
            .unwrap();

        // A second dispatch on the same instance is rejected
        let err = service
            .start_compile(ctx, &NoopStrategy)
            .await
            .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 1);

        // So is re-initialization
        let err = service.initialize(&StaticResolver).await.unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 1);
    }
}
