//! Desktop target construction
//!
//! Builds the three engine configurations of a desktop run. Main and
//! preload conventionally share one output directory, so only the main
//! configuration may ever carry the destructive clean flag, and only for
//! production builds; preload cleans are always off.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::bundler::{TargetConfig, TargetKind};
use crate::compile::web::web_target;
use crate::compile::{Command, ResolvedContext};
use crate::config::PreloadEntries;
use crate::error::KilnError;

const DEFAULT_MAIN_ENTRY: &str = "src/main/index.ts";
const DEFAULT_PRELOAD_ENTRY: &str = "src/preload/index.ts";
const DEFAULT_DESKTOP_OUT: &str = "dist/desktop";

/// Derived output name prefix for preload entries
const PRELOAD_PREFIX: &str = "preload";

/// Output directory shared by main and preload
pub fn shared_out_dir(ctx: &ResolvedContext) -> PathBuf {
    let desktop = &ctx.config.desktop;

    if let Some(out_dir) = &desktop.build.out_dir {
        return ctx.resolve(out_dir).join("main");
    }

    ctx.resolve(DEFAULT_DESKTOP_OUT).join("main")
}

fn main_out_dir(ctx: &ResolvedContext) -> PathBuf {
    let desktop = &ctx.config.desktop;

    if desktop.build.out_dir.is_some() {
        return shared_out_dir(ctx);
    }
    if let Some(output) = &desktop.main.output {
        return ctx.resolve(output);
    }

    shared_out_dir(ctx)
}

fn preload_out_dir(ctx: &ResolvedContext) -> PathBuf {
    let desktop = &ctx.config.desktop;

    if desktop.build.out_dir.is_some() {
        return shared_out_dir(ctx);
    }
    if let Some(output) = &desktop.preload.output {
        return ctx.resolve(output);
    }

    shared_out_dir(ctx)
}

/// Main-process target
pub fn main_target(ctx: &ResolvedContext) -> TargetConfig {
    let entry = ctx
        .config
        .desktop
        .main
        .entry
        .as_deref()
        .unwrap_or(DEFAULT_MAIN_ENTRY);

    let mut entries = BTreeMap::new();
    entries.insert("main".to_string(), ctx.resolve(entry));

    TargetConfig {
        name: "main".to_string(),
        kind: TargetKind::Main,
        engine: crate::config::Engine::Rspack,
        mode: ctx.emit_mode(),
        entries,
        out_dir: main_out_dir(ctx),
        // Watch builds must never clean: preload shares this directory
        clean: ctx.command == Command::Build,
        public_path: "./".to_string(),
        alias: ctx.alias_map(),
        extensions: ctx.extensions(),
        externals: vec![ctx.config.desktop.runtime.clone()],
        define: ctx.env.clone(),
        browser_targets: None,
    }
}

/// Expand preload entries into a name → path map.
///
/// List entries derive their output name from the file stem, prefixed with
/// `preload-`; two list entries collapsing to the same derived name are a
/// fatal configuration error, raised before any build starts.
fn resolve_preload_entries(ctx: &ResolvedContext) -> Result<BTreeMap<String, String>> {
    let mut entries = BTreeMap::new();

    match &ctx.config.desktop.preload.entries {
        None => {
            entries.insert(
                format!("{}-index", PRELOAD_PREFIX),
                DEFAULT_PRELOAD_ENTRY.to_string(),
            );
        }
        Some(PreloadEntries::List(paths)) => {
            for path in paths {
                let stem = Path::new(path)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_default();
                let name = format!("{}-{}", PRELOAD_PREFIX, stem);

                if entries.contains_key(&name) {
                    return Err(KilnError::Config(format!(
                        "preload entries collide on derived output name: {}",
                        name
                    ))
                    .into());
                }

                entries.insert(name, path.clone());
            }
        }
        Some(PreloadEntries::Map(map)) => {
            entries.extend(map.clone());
        }
    }

    Ok(entries)
}

/// One target per preload entry
pub fn preload_targets(ctx: &ResolvedContext) -> Result<Vec<TargetConfig>> {
    let entries = resolve_preload_entries(ctx)?;
    let out_dir = preload_out_dir(ctx);

    let mut targets = Vec::with_capacity(entries.len());

    for (name, entry) in entries {
        let mut target_entries = BTreeMap::new();
        target_entries.insert(name.clone(), ctx.resolve(&entry));

        targets.push(TargetConfig {
            name,
            kind: TargetKind::Preload,
            engine: crate::config::Engine::Rspack,
            mode: ctx.emit_mode(),
            entries: target_entries,
            out_dir: out_dir.clone(),
            clean: false,
            public_path: "./".to_string(),
            alias: ctx.alias_map(),
            extensions: ctx.extensions(),
            externals: vec![ctx.config.desktop.runtime.clone()],
            define: ctx.env.clone(),
            browser_targets: None,
        });
    }

    Ok(targets)
}

/// Renderer target: the web configuration with desktop placement
pub fn renderer_target(ctx: &ResolvedContext) -> TargetConfig {
    let mut config = web_target(ctx);

    config.name = "renderer".to_string();
    config.kind = TargetKind::Renderer;
    config.public_path = "./".to_string();
    config.out_dir = match &ctx.config.desktop.build.out_dir {
        Some(out_dir) => ctx.resolve(out_dir).join("renderer"),
        None => ctx.resolve(DEFAULT_DESKTOP_OUT).join("renderer"),
    };

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{CompileRequest, Platform};
    use crate::config::{DesktopConfig, DesktopPreloadConfig, UserConfig};

    fn context_with(config: UserConfig, command: Command) -> ResolvedContext {
        crate::compile::context::build_context(
            &CompileRequest {
                command,
                mode: None,
                platform: Platform::Desktop,
                config_file: None,
            },
            std::env::temp_dir(),
            None,
            Default::default(),
            config,
        )
        .unwrap()
    }

    fn config_with_preloads(entries: PreloadEntries) -> UserConfig {
        UserConfig {
            desktop: DesktopConfig {
                preload: DesktopPreloadConfig {
                    entries: Some(entries),
                    output: None,
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_main_and_preload_share_output_dir() {
        let ctx = context_with(UserConfig::default(), Command::Build);
        let main = main_target(&ctx);
        let preloads = preload_targets(&ctx).unwrap();

        assert_eq!(main.out_dir, preloads[0].out_dir);
        assert_eq!(main.out_dir, shared_out_dir(&ctx));
        assert!(main.out_dir.ends_with("dist/desktop/main"));
    }

    #[test]
    fn test_only_main_cleans_and_only_for_builds() {
        let build_ctx = context_with(UserConfig::default(), Command::Build);
        assert!(main_target(&build_ctx).clean);
        assert!(preload_targets(&build_ctx).unwrap().iter().all(|t| !t.clean));

        let dev_ctx = context_with(UserConfig::default(), Command::Dev);
        assert!(!main_target(&dev_ctx).clean);
    }

    #[test]
    fn test_preload_list_entries_derive_names() {
        let ctx = context_with(
            config_with_preloads(PreloadEntries::List(vec![
                "src/preload/a.ts".to_string(),
                "src/preload/b.ts".to_string(),
            ])),
            Command::Build,
        );

        let targets = preload_targets(&ctx).unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["preload-a", "preload-b"]);
    }

    #[test]
    fn test_colliding_preload_stems_fail_before_any_build() {
        let ctx = context_with(
            config_with_preloads(PreloadEntries::List(vec![
                "x/a.ts".to_string(),
                "y/a.ts".to_string(),
            ])),
            Command::Build,
        );

        let err = preload_targets(&ctx).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 1);
        assert!(err.to_string().contains("preload-a"));
    }

    #[test]
    fn test_preload_map_entries_pass_through() {
        let mut map = BTreeMap::new();
        map.insert("preload-custom".to_string(), "src/custom.ts".to_string());

        let ctx = context_with(config_with_preloads(PreloadEntries::Map(map)), Command::Build);
        let targets = preload_targets(&ctx).unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "preload-custom");
    }

    #[test]
    fn test_default_preload_entry() {
        let ctx = context_with(UserConfig::default(), Command::Build);
        let targets = preload_targets(&ctx).unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "preload-index");
    }

    #[test]
    fn test_out_dir_override_groups_targets() {
        let config = UserConfig {
            desktop: DesktopConfig {
                build: crate::config::DesktopBuildConfig {
                    out_dir: Some("out/app".to_string()),
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = context_with(config, Command::Build);

        assert!(main_target(&ctx).out_dir.ends_with("out/app/main"));
        assert!(renderer_target(&ctx).out_dir.ends_with("out/app/renderer"));
    }

    #[test]
    fn test_renderer_target_flavor() {
        let ctx = context_with(UserConfig::default(), Command::Build);
        let renderer = renderer_target(&ctx);

        assert_eq!(renderer.kind, TargetKind::Renderer);
        assert_eq!(renderer.public_path, "./");
        assert!(renderer.out_dir.ends_with("dist/desktop/renderer"));
        assert!(renderer.clean);
    }
}
