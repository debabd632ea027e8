//! Configuration handling for kiln
//!
//! Parses and manages kiln.toml configuration files. A configuration is
//! resolved through a [`ConfigResolver`] into a [`ConfigSource`]: either a
//! static value or a deferred function of the resolution descriptor
//! (mode + environment + command), invoked exactly once during compile
//! service initialization. The resolved value must pass [`UserConfig::validate`].

mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compile::Command;
use crate::error::KilnError;

pub use schema::*;

/// Main user configuration structure (kiln.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// Bundling engine for the web/renderer build
    #[serde(default)]
    pub engine: Engine,

    /// Device class (pc or mobile) controlling browser targets
    #[serde(default)]
    pub target: DeviceTarget,

    /// Page map; when empty, a default `index` page is assumed
    #[serde(default)]
    pub pages: BTreeMap<String, PageEntry>,

    /// Development server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Build output settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Module resolution settings
    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Desktop (main/preload/renderer) settings
    #[serde(default)]
    pub desktop: DesktopConfig,
}

impl UserConfig {
    /// Validate the configuration
    ///
    /// Schema-level checks only; checks that depend on the command (such as
    /// rejecting an external-host base in dev mode) run during context
    /// resolution.
    pub fn validate(&self) -> Result<()> {
        if self.build.base.is_empty() {
            return Err(KilnError::Config("build.base must not be empty".into()).into());
        }

        if self.build.out_dir_name.is_empty() {
            return Err(KilnError::Config("build.out_dir_name must not be empty".into()).into());
        }

        for (name, page) in &self.pages {
            if page.entry.is_empty() {
                return Err(
                    KilnError::Config(format!("pages.{}.entry must not be empty", name)).into(),
                );
            }
        }

        if let Some(PreloadEntries::List(entries)) = &self.desktop.preload.entries {
            if entries.iter().any(|entry| entry.is_empty()) {
                return Err(
                    KilnError::Config("desktop.preload.entries contains an empty path".into())
                        .into(),
                );
            }
        }

        if self.desktop.runtime.is_empty() {
            return Err(KilnError::Config("desktop.runtime must not be empty".into()).into());
        }

        Ok(())
    }
}

/// Descriptor handed to configuration resolution: the command-line mode,
/// the assembled environment map, and the command being executed
#[derive(Debug, Clone)]
pub struct ConfigEnv {
    pub mode: String,
    pub env: BTreeMap<String, String>,
    pub command: Command,
}

/// A loaded-but-unresolved configuration
///
/// `Deferred` carries a function of the [`ConfigEnv`] descriptor; it is
/// invoked exactly once, synchronously, during initialization.
pub enum ConfigSource {
    Static(UserConfig),
    Deferred(Box<dyn FnOnce(&ConfigEnv) -> Result<UserConfig> + Send>),
}

impl std::fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Static(config) => f.debug_tuple("Static").field(config).finish(),
            ConfigSource::Deferred(_) => f.debug_tuple("Deferred").field(&"<fn>").finish(),
        }
    }
}

impl ConfigSource {
    /// Resolve to a concrete configuration and validate it.
    /// Validation failure fails the whole initialization.
    pub fn resolve(self, env: &ConfigEnv) -> Result<UserConfig> {
        let config = match self {
            ConfigSource::Static(config) => config,
            ConfigSource::Deferred(resolve) => resolve(env)?,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Source of user configuration
pub trait ConfigResolver: Send {
    /// Load the configuration source; resolution to a concrete value
    /// happens later against the descriptor
    fn load(&self) -> Result<ConfigSource>;
}

/// Resolver backed by a kiln.toml file
///
/// The file may carry `[overrides.<mode>]` tables with partial settings
/// merged over the base for the matching mode. Files with overrides load
/// as a deferred source so the merge runs against the actual descriptor.
pub struct FileConfigResolver {
    path: PathBuf,
}

impl FileConfigResolver {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigResolver for FileConfigResolver {
    fn load(&self) -> Result<ConfigSource> {
        if !self.path.exists() {
            // No config file is fine: every setting has a default
            return Ok(ConfigSource::Static(UserConfig::default()));
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file: {}", self.path.display()))?;

        let mut value: toml::Value = toml::from_str(&content)
            .map_err(|err| KilnError::Config(format!("failed to parse kiln.toml: {}", err)))?;

        let overrides = value
            .as_table_mut()
            .and_then(|table| table.remove("overrides"));

        match overrides {
            Some(toml::Value::Table(overrides)) if !overrides.is_empty() => {
                Ok(ConfigSource::Deferred(Box::new(move |env: &ConfigEnv| {
                    let mut merged = value;
                    if let Some(overlay) = overrides.get(&env.mode) {
                        merge_toml(&mut merged, overlay);
                    }
                    deserialize_config(merged)
                })))
            }
            Some(_) => Err(KilnError::Config("overrides must be a table of modes".into()).into()),
            None => Ok(ConfigSource::Static(deserialize_config(value)?)),
        }
    }
}

fn deserialize_config(value: toml::Value) -> Result<UserConfig> {
    value
        .try_into()
        .map_err(|err| KilnError::Config(format!("invalid kiln.toml: {}", err)).into())
}

/// Recursively merge an overlay table into a base value. Non-table values
/// in the overlay replace the base wholesale.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(mode: &str) -> ConfigEnv {
        ConfigEnv {
            mode: mode.to_string(),
            env: BTreeMap::new(),
            command: Command::Build,
        }
    }

    fn write_config(content: &str) -> (tempfile::TempDir, FileConfigResolver) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        std::fs::write(&path, content).unwrap();
        (dir, FileConfigResolver::new(path))
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let resolver = FileConfigResolver::new("/nonexistent/kiln.toml");
        let config = resolver.load().unwrap().resolve(&descriptor("")).unwrap();

        assert_eq!(config.engine, Engine::Rspack);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.build.base, "/");
    }

    #[test]
    fn test_static_config_loads_once() {
        let (_dir, resolver) = write_config("engine = \"vite\"\n[server]\nport = 9000\n");
        let config = resolver.load().unwrap().resolve(&descriptor("")).unwrap();

        assert_eq!(config.engine, Engine::Vite);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_mode_overlay_is_deferred_and_merged() {
        let (_dir, resolver) = write_config(
            "[server]\nport = 9000\n[build]\nbase = \"/app/\"\n[overrides.staging.build]\nbase = \"/staging/\"\n",
        );

        let source = resolver.load().unwrap();
        assert!(matches!(source, ConfigSource::Deferred(_)));

        let staging = source.resolve(&descriptor("staging")).unwrap();
        assert_eq!(staging.build.base, "/staging/");
        // Untouched keys survive the merge
        assert_eq!(staging.server.port, 9000);

        let other = resolver
            .load()
            .unwrap()
            .resolve(&descriptor("production"))
            .unwrap();
        assert_eq!(other.build.base, "/app/");
    }

    #[test]
    fn test_validation_failure_is_config_error() {
        let (_dir, resolver) = write_config("[build]\nbase = \"\"\n");
        let err = resolver
            .load()
            .unwrap()
            .resolve(&descriptor(""))
            .unwrap_err();

        assert_eq!(crate::error::exit_code_for(&err), 1);
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let (_dir, resolver) = write_config("engine = \"webpack\"\n");
        let err = resolver.load().unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 1);
    }
}
