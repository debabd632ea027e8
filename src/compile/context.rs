//! Resolved build context
//!
//! Built once during compile-service initialization and handed read-only
//! to downstream coordinators as `Arc<ResolvedContext>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use crate::bundler::EmitMode;
use crate::config::{PageEntry, UserConfig};
use crate::error::KilnError;
use crate::utils::{find_available_port, is_external_host, load_env_file};

use super::{Command, CompileRequest, Platform};

/// Package metadata of the target project, read best-effort from its
/// package.json
#[derive(Debug, Clone)]
pub struct PackageMeta {
    pub name: String,
    pub version: Option<semver::Version>,
}

#[derive(Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
}

/// Everything a build needs, resolved once.
///
/// Owned by the compile service that created it; read-only to downstream
/// coordinators.
#[derive(Debug)]
pub struct ResolvedContext {
    pub command: Command,
    pub platform: Platform,
    pub mode: Option<String>,

    /// Working directory of the target project
    pub root: PathBuf,

    pub package: Option<PackageMeta>,

    /// Assembled environment map (MODE/PLATFORM plus env-file values)
    pub env: BTreeMap<String, String>,

    pub config: UserConfig,

    /// Public base path
    pub base: String,

    /// Browser-target string for web-flavored builds
    pub browser_targets: String,

    /// Assigned dev-server port
    pub port: u16,

    /// Page map with defaults applied
    pub pages: BTreeMap<String, PageEntry>,

    pub has_react: bool,
    pub has_vue: bool,
}

/// Extensions the engine resolves when imports omit one
const DEFAULT_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".mjs", ".js", ".jsx", ".json"];

impl ResolvedContext {
    /// Resolve a path against the project root
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.root.join(path)
    }

    pub fn emit_mode(&self) -> EmitMode {
        match self.command {
            Command::Dev => EmitMode::Development,
            Command::Build => EmitMode::Production,
        }
    }

    /// Import aliases: user entries merged over the built-in `@` → `src`
    pub fn alias_map(&self) -> BTreeMap<String, PathBuf> {
        let mut alias = BTreeMap::new();
        alias.insert("@".to_string(), self.resolve("src"));

        for (name, path) in &self.config.resolve.alias {
            alias.insert(name.clone(), self.resolve(path));
        }

        alias
    }

    /// Resolvable extensions; the user list replaces the built-in one
    pub fn extensions(&self) -> Vec<String> {
        match &self.config.resolve.extensions {
            Some(extensions) => extensions.clone(),
            None => DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

/// Read package metadata; absence or malformed content is not fatal
pub fn load_package_meta(root: &Path) -> Option<PackageMeta> {
    let raw = std::fs::read_to_string(root.join("package.json")).ok()?;
    let parsed: PackageJson = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!("ignoring malformed package.json: {}", err);
            return None;
        }
    };

    Some(PackageMeta {
        name: parsed.name.unwrap_or_default(),
        version: parsed
            .version
            .as_deref()
            .and_then(|version| semver::Version::parse(version).ok()),
    })
}

fn framework_hints(root: &Path) -> (bool, bool) {
    let Ok(raw) = std::fs::read_to_string(root.join("package.json")) else {
        return (false, false);
    };
    let Ok(parsed) = serde_json::from_str::<PackageJson>(&raw) else {
        return (false, false);
    };

    let has = |name: &str| {
        parsed.dependencies.contains_key(name) || parsed.dev_dependencies.contains_key(name)
    };
    (has("react"), has("vue"))
}

/// Assemble the environment map: retained command-line pairs first, then
/// discovered env-file values on top
pub fn assemble_env(root: &Path, request: &CompileRequest) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("PLATFORM".to_string(), request.platform.as_str().to_string());
    env.insert(
        "MODE".to_string(),
        request.mode.clone().unwrap_or_default(),
    );

    for (key, value) in load_env_file(root, request.mode.as_deref()) {
        env.insert(key, value);
    }

    env
}

fn browser_targets(config: &UserConfig) -> String {
    use crate::config::DeviceTarget;

    let mut targets = vec!["defaults".to_string()];
    match config.target {
        DeviceTarget::Mobile => {
            targets.push("IOS >= 10".to_string());
            targets.push("Chrome >= 51".to_string());
        }
        DeviceTarget::Pc => {
            targets.push(">=0.1%".to_string());
            targets.push("Chrome >= 56".to_string());
            targets.push("Safari >= 10".to_string());
            targets.push("last 2 versions".to_string());
            targets.push("not dead".to_string());
        }
    }
    targets.join(",")
}

fn default_pages() -> BTreeMap<String, PageEntry> {
    let mut pages = BTreeMap::new();
    pages.insert(
        "index".to_string(),
        PageEntry {
            html: "index.html".to_string(),
            entry: "src/index".to_string(),
        },
    );
    pages
}

/// Build the resolved context from an initialized request
pub fn build_context(
    request: &CompileRequest,
    root: PathBuf,
    package: Option<PackageMeta>,
    env: BTreeMap<String, String>,
    config: UserConfig,
) -> Result<ResolvedContext> {
    let base = config.build.base.clone();

    // An external host only makes sense for deployed artifacts
    if request.command == Command::Dev && is_external_host(&base) {
        return Err(KilnError::Config(
            "build.base must not be an external host during local development".to_string(),
        )
        .into());
    }

    let pages = if config.pages.is_empty() {
        default_pages()
    } else {
        config.pages.clone()
    };

    let port = find_available_port(config.server.port)?;
    let targets = browser_targets(&config);
    let (has_react, has_vue) = framework_hints(&root);

    Ok(ResolvedContext {
        command: request.command,
        platform: request.platform,
        mode: request.mode.clone(),
        root,
        package,
        env,
        config,
        base,
        browser_targets: targets,
        port,
        pages,
        has_react,
        has_vue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: Command, mode: Option<&str>) -> CompileRequest {
        CompileRequest {
            command,
            mode: mode.map(String::from),
            platform: Platform::Web,
            config_file: None,
        }
    }

    #[test]
    fn test_external_base_rejected_in_dev_only() {
        let root = tempfile::tempdir().unwrap();
        let config = UserConfig {
            build: crate::config::BuildConfig {
                base: "https://cdn.example.com/app/".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let err = build_context(
            &request(Command::Dev, None),
            root.path().to_path_buf(),
            None,
            BTreeMap::new(),
            config.clone(),
        )
        .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 1);

        // The same base is fine for production builds
        build_context(
            &request(Command::Build, None),
            root.path().to_path_buf(),
            None,
            BTreeMap::new(),
            config,
        )
        .unwrap();
    }

    #[test]
    fn test_default_pages_applied() {
        let root = tempfile::tempdir().unwrap();
        let ctx = build_context(
            &request(Command::Build, None),
            root.path().to_path_buf(),
            None,
            BTreeMap::new(),
            UserConfig::default(),
        )
        .unwrap();

        let index = ctx.pages.get("index").unwrap();
        assert_eq!(index.html, "index.html");
        assert_eq!(index.entry, "src/index");
    }

    #[test]
    fn test_env_file_values_override_retained_pairs() {
        let root = tempfile::tempdir().unwrap();
        let env_dir = root.path().join("env");
        std::fs::create_dir(&env_dir).unwrap();
        std::fs::write(env_dir.join(".env.staging"), "MODE=from-file\nEXTRA=1\n").unwrap();

        let env = assemble_env(root.path(), &request(Command::Dev, Some("staging")));

        assert_eq!(env.get("PLATFORM").map(String::as_str), Some("web"));
        assert_eq!(env.get("MODE").map(String::as_str), Some("from-file"));
        assert_eq!(env.get("EXTRA").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_alias_and_extensions_defaults_and_overrides() {
        let root = tempfile::tempdir().unwrap();

        let mut config = UserConfig::default();
        config
            .resolve
            .alias
            .insert("~assets".to_string(), "src/assets".to_string());

        let ctx = build_context(
            &request(Command::Build, None),
            root.path().to_path_buf(),
            None,
            BTreeMap::new(),
            config,
        )
        .unwrap();

        let alias = ctx.alias_map();
        assert_eq!(alias.get("@"), Some(&ctx.resolve("src")));
        assert_eq!(alias.get("~assets"), Some(&ctx.resolve("src/assets")));

        let extensions = ctx.extensions();
        assert!(extensions.contains(&".ts".to_string()));
        assert!(extensions.contains(&".json".to_string()));
    }

    #[test]
    fn test_package_meta_is_best_effort() {
        let root = tempfile::tempdir().unwrap();
        assert!(load_package_meta(root.path()).is_none());

        std::fs::write(
            root.path().join("package.json"),
            r#"{"name":"demo-app","version":"1.2.3","dependencies":{"react":"^18"}}"#,
        )
        .unwrap();

        let meta = load_package_meta(root.path()).unwrap();
        assert_eq!(meta.name, "demo-app");
        assert_eq!(meta.version.unwrap().to_string(), "1.2.3");

        let (has_react, has_vue) = framework_hints(root.path());
        assert!(has_react);
        assert!(!has_vue);
    }
}
