//! Utility functions and helpers

use std::collections::BTreeMap;
use std::fs;
use std::net::TcpListener;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

/// Load mode-specific environment values from the project's `env/` folder.
///
/// With no mode, `env/.env` is read; with a mode, `env/.env.{mode}`. A
/// missing folder or file contributes nothing and only logs a warning,
/// matching the best-effort contract of environment assembly.
pub fn load_env_file(root: &Path, mode: Option<&str>) -> BTreeMap<String, String> {
    let env_dir = root.join("env");
    if !env_dir.is_dir() {
        warn!("env folder not found");
        return BTreeMap::new();
    }

    let file = match mode {
        Some(mode) => env_dir.join(format!(".env.{}", mode)),
        None => env_dir.join(".env"),
    };

    if !file.is_file() {
        match mode {
            Some(mode) => warn!(".env.{} file not found", mode),
            None => warn!(".env file not found"),
        }
        return BTreeMap::new();
    }

    match fs::read_to_string(&file) {
        Ok(content) => parse_env_content(&content),
        Err(err) => {
            warn!("failed to read {}: {}", file.display(), err);
            BTreeMap::new()
        }
    }
}

/// Parse `KEY=VALUE` lines; `#` comments and blank lines are skipped,
/// surrounding single or double quotes on values are stripped.
fn parse_env_content(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = value.trim();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
            {
                value = &value[1..value.len() - 1];
            }
        }

        values.insert(key.to_string(), value.to_string());
    }

    values
}

/// Find a usable dev-server port, starting from the preferred one and
/// walking forward. Falls back to an ephemeral port if the whole range
/// is taken.
pub fn find_available_port(preferred: u16) -> Result<u16> {
    for candidate in preferred..preferred.saturating_add(100) {
        if TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
            return Ok(candidate);
        }
    }

    // Whole range busy: let the OS pick one
    let listener =
        TcpListener::bind(("127.0.0.1", 0)).context("Failed to probe for a free port")?;
    let port = listener
        .local_addr()
        .context("Failed to read probed port")?
        .port();
    Ok(port)
}

/// Check whether a base path points at an external host
pub fn is_external_host(base: &str) -> bool {
    base.starts_with("http://") || base.starts_with("https://")
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs_f64();

    if secs >= 60.0 {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = secs - (mins as f64 * 60.0);
        format!("{}m {:.2}s", mins, remaining_secs)
    } else if secs >= 1.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.0}ms", secs * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_content() {
        let parsed = parse_env_content(
            "# comment\nAPI_HOST=https://api.internal\nEMPTY=\nQUOTED=\"hello world\"\n  SPACED  =  padded  \nnot-a-pair\n",
        );

        assert_eq!(
            parsed.get("API_HOST").map(String::as_str),
            Some("https://api.internal")
        );
        assert_eq!(parsed.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(parsed.get("QUOTED").map(String::as_str), Some("hello world"));
        assert_eq!(parsed.get("SPACED").map(String::as_str), Some("padded"));
        assert!(!parsed.contains_key("not-a-pair"));
    }

    #[test]
    fn test_load_env_file_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_file(dir.path(), None).is_empty());
        assert!(load_env_file(dir.path(), Some("staging")).is_empty());
    }

    #[test]
    fn test_load_env_file_mode_selection() {
        let dir = tempfile::tempdir().unwrap();
        let env_dir = dir.path().join("env");
        std::fs::create_dir(&env_dir).unwrap();
        std::fs::write(env_dir.join(".env"), "NAME=base\n").unwrap();
        std::fs::write(env_dir.join(".env.staging"), "NAME=staging\n").unwrap();

        assert_eq!(
            load_env_file(dir.path(), None)
                .get("NAME")
                .map(String::as_str),
            Some("base")
        );
        assert_eq!(
            load_env_file(dir.path(), Some("staging"))
                .get("NAME")
                .map(String::as_str),
            Some("staging")
        );
    }

    #[test]
    fn test_is_external_host() {
        assert!(is_external_host("https://cdn.example.com/app/"));
        assert!(is_external_host("http://cdn.example.com"));
        assert!(!is_external_host("/"));
        assert!(!is_external_host("/static/"));
    }

    #[test]
    fn test_find_available_port_walks_forward() {
        // Hold a port open, then ask for it: the probe must return a
        // different one.
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = held.local_addr().unwrap().port();

        let assigned = find_available_port(busy).unwrap();
        assert_ne!(assigned, busy);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn test_format_duration() {
        use std::time::Duration;

        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs_f64(1.5)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5.00s");
    }
}
