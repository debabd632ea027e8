//! Configuration schema definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bundling engine driving a build
///
/// Resolved once at configuration-load time and dispatched via exhaustive
/// match everywhere downstream. `Rspack` is the desktop runtime's native
/// engine; the desktop union build requires the renderer to use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Rspack,
    Vite,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::Rspack
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Rspack => write!(f, "rspack"),
            Engine::Vite => write!(f, "vite"),
        }
    }
}

/// Device class the web artifacts are compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTarget {
    Pc,
    Mobile,
}

impl Default for DeviceTarget {
    fn default() -> Self {
        DeviceTarget::Pc
    }
}

/// One HTML page and its script entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageEntry {
    /// HTML template path, relative to the project root
    pub html: String,

    /// Script entry path, relative to the project root
    pub entry: String,
}

/// Development server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Preferred dev-server port; the actual port may walk forward when taken
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_port() -> u16 {
    8080
}

/// Build output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Public base path for emitted assets
    #[serde(default = "default_base")]
    pub base: String,

    /// Output directory name for web builds
    #[serde(default = "default_out_dir_name")]
    pub out_dir_name: String,

    /// Measure and report gzip sizes of emitted assets
    #[serde(default)]
    pub gzip: bool,

    /// Emit kiln-report.json next to the build output
    #[serde(default)]
    pub out_report: bool,

    /// Run the module dependency-cycle check on completed builds
    #[serde(default)]
    pub dependency_cycle_check: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base: default_base(),
            out_dir_name: default_out_dir_name(),
            gzip: false,
            out_report: false,
            dependency_cycle_check: false,
        }
    }
}

fn default_base() -> String {
    "/".to_string()
}

fn default_out_dir_name() -> String {
    "dist".to_string()
}

/// Module resolution settings forwarded to the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Import aliases (name → project-relative path), merged over the
    /// built-in `@` → `src`
    #[serde(default)]
    pub alias: BTreeMap<String, String>,

    /// Resolvable extensions; replaces the built-in list when set
    pub extensions: Option<Vec<String>>,
}

/// Desktop (main/preload/renderer) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    /// Name of the runtime dependency resolved from the target project's
    /// own node_modules
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Port passed to the runtime's `--inspect` flag during development
    #[serde(default = "default_inspect_port")]
    pub inspect_port: u16,

    /// When enabled, automatic restarts after rebuilds are suppressed and
    /// only the operator `r` command restarts the runtime process
    #[serde(default)]
    pub controlled_restart: bool,

    /// Main-process build settings
    #[serde(default)]
    pub main: DesktopMainConfig,

    /// Preload-script build settings
    #[serde(default)]
    pub preload: DesktopPreloadConfig,

    /// Output layout shared by all desktop targets
    #[serde(default)]
    pub build: DesktopBuildConfig,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            inspect_port: default_inspect_port(),
            controlled_restart: false,
            main: DesktopMainConfig::default(),
            preload: DesktopPreloadConfig::default(),
            build: DesktopBuildConfig::default(),
        }
    }
}

fn default_runtime() -> String {
    "electron".to_string()
}

fn default_inspect_port() -> u16 {
    5858
}

/// Main-process target settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesktopMainConfig {
    /// Entry file, relative to the project root
    pub entry: Option<String>,

    /// Output directory override
    pub output: Option<String>,
}

/// Preload-script target settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesktopPreloadConfig {
    /// Preload entries: either a list of file paths (names derived from
    /// the file stems) or an explicit name → path map
    pub entries: Option<PreloadEntries>,

    /// Output directory override
    pub output: Option<String>,
}

/// Desktop output layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesktopBuildConfig {
    /// Root output directory; targets append `main` / `renderer`
    pub out_dir: Option<String>,
}

/// Preload entry forms accepted in kiln.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreloadEntries {
    /// File paths; each derives its output name from the file stem
    List(Vec<String>),

    /// Explicit output name → entry path map
    Map(BTreeMap<String, String>),
}
