//! Configuration loading from `~/.parley/config.toml` with defaults.
//!
//! The `include` field names further TOML files, relative to the config
//! file's directory, that are deep-merged underneath the root file.

use parley_types::ParleyConfig;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Maximum include nesting depth.
const MAX_INCLUDE_DEPTH: u32 = 10;

/// Load configuration from a TOML file, with defaults.
///
/// A missing file yields the defaults; an unreadable or invalid file is
/// logged and also yields the defaults.
pub fn load_config(path: Option<&Path>) -> ParleyConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return ParleyConfig::default();
    }

    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Failed to read config file, using defaults");
            return ParleyConfig::default();
        }
    };
    let mut root: toml::Value = match toml::from_str(&contents) {
        Ok(root) => root,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Failed to parse config, using defaults");
            return ParleyConfig::default();
        }
    };

    let config_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let mut visited = HashSet::new();
    visited.insert(std::fs::canonicalize(&config_path).unwrap_or_else(|_| config_path.clone()));
    if let Err(e) = resolve_includes(&mut root, &config_dir, &mut visited, 0) {
        warn!(error = %e, "Config include resolution failed, using root config only");
    }
    if let toml::Value::Table(ref mut table) = root {
        table.remove("include");
    }

    match root.try_into::<ParleyConfig>() {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Failed to deserialize config, using defaults");
            ParleyConfig::default()
        }
    }
}

/// Merge included files underneath `root`; later includes override
/// earlier ones and the root overrides them all.
fn resolve_includes(
    root: &mut toml::Value,
    config_dir: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: u32,
) -> Result<(), String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(format!("Config include depth exceeded maximum of {MAX_INCLUDE_DEPTH}"));
    }
    let includes: Vec<String> = match root {
        toml::Value::Table(table) => match table.get("include") {
            Some(toml::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => return Ok(()),
        },
        _ => return Ok(()),
    };
    if includes.is_empty() {
        return Ok(());
    }

    let canonical_dir = std::fs::canonicalize(config_dir)
        .map_err(|e| format!("Config dir cannot be canonicalized: {e}"))?;
    let mut merged = toml::Value::Table(toml::map::Map::new());
    for include in &includes {
        let relative = Path::new(include);
        if relative.is_absolute() {
            return Err(format!("Config include rejects absolute path: {include}"));
        }
        if relative.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(format!("Config include rejects path traversal: {include}"));
        }
        let canonical = std::fs::canonicalize(config_dir.join(relative))
            .map_err(|e| format!("Config include '{include}' cannot be resolved: {e}"))?;
        if !canonical.starts_with(&canonical_dir) {
            return Err(format!("Config include '{include}' escapes config directory"));
        }
        if !visited.insert(canonical.clone()) {
            return Err(format!("Circular config include detected: {include}"));
        }

        info!(include = %include, "Loading config include");
        let contents = std::fs::read_to_string(&canonical)
            .map_err(|e| format!("Failed to read config include '{include}': {e}"))?;
        let mut value: toml::Value = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config include '{include}': {e}"))?;
        let include_dir = canonical.parent().unwrap_or(config_dir).to_path_buf();
        resolve_includes(&mut value, &include_dir, visited, depth + 1)?;
        if let toml::Value::Table(ref mut table) = value {
            table.remove("include");
        }
        deep_merge_toml(&mut merged, &value);
    }

    let mut overlay = root.clone();
    if let toml::Value::Table(ref mut table) = overlay {
        table.remove("include");
    }
    deep_merge_toml(&mut merged, &overlay);
    *root = merged;
    Ok(())
}

/// Deep-merge two TOML values; `overlay` wins except that tables merge.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(existing) => deep_merge_toml(existing, value),
                    None => {
                        base_table.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    parley_home().join("config.toml")
}

/// Get the default Parley home directory.
pub fn parley_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".parley")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::ExceptionTransmission;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/parley/config.toml")));
        assert_eq!(config, ParleyConfig::default());
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [not toml").unwrap();
        assert_eq!(load_config(Some(&path)), ParleyConfig::default());
    }

    #[test]
    fn test_loads_space_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[space]
first_proxy_id = 10

[space.default_policy]
response_timeout_ms = 750
exception_transmission = "whole"
"#
        )
        .unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.space.first_proxy_id, 10);
        assert_eq!(config.space.default_policy.response_timeout_ms, 750);
        assert_eq!(
            config.space.default_policy.exception_transmission,
            ExceptionTransmission::Whole
        );
    }

    #[test]
    fn test_includes_merge_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.toml"),
            "[node]\nlisten_addr = \"0.0.0.0:9000\"\ncheck_fingerprint = false\n",
        )
        .unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "include = [\"base.toml\"]\n\n[node]\nlisten_addr = \"127.0.0.1:9001\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.node.listen_addr, "127.0.0.1:9001");
        assert!(!config.node.check_fingerprint);
    }

    #[test]
    fn test_include_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut root: toml::Value = toml::from_str("include = [\"../escape.toml\"]").unwrap();
        let mut visited = HashSet::new();
        let err = resolve_includes(&mut root, dir.path(), &mut visited, 0).unwrap_err();
        assert!(err.contains("path traversal"));
    }

    #[test]
    fn test_deep_merge() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\nz = 4\n").unwrap();
        deep_merge_toml(&mut base, &overlay);
        let a = base.get("a").unwrap();
        assert_eq!(a.get("x").unwrap().as_integer(), Some(1));
        assert_eq!(a.get("y").unwrap().as_integer(), Some(3));
        assert_eq!(a.get("z").unwrap().as_integer(), Some(4));
    }

    #[test]
    fn test_home_paths() {
        assert!(default_config_path().ends_with(".parley/config.toml"));
    }
}
