use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::CourierConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Load config from the given path (any supported format), then apply
/// `COURIER_*` environment overrides.
pub fn load_config(path: &Path) -> Result<CourierConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./courier.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/courier/courier.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CourierConfig::default()` (with env overrides) if no config file
/// is found or the file fails to load.
pub fn discover_and_load() -> CourierConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = CourierConfig::default();
    if let Err(e) = apply_env_overrides(&mut config) {
        warn!(error = %e, "ignoring invalid environment override");
    }
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/courier/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "courier").map(|d| d.config_dir().to_path_buf())
}

/// Parse raw config text, picking the format from the file extension.
pub fn parse_config(raw: &str, path: &Path) -> Result<CourierConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

/// Parse raw config text into a format-neutral JSON tree.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw).map_err(|e| Error::parse(path, e))?;
            serde_json::to_value(v).context("convert TOML tree")
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value =
                serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e))?;
            serde_json::to_value(v).context("convert YAML tree")
        },
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

/// Apply `COURIER_*` environment overrides to the dispatch settings.
pub fn apply_env_overrides(config: &mut CourierConfig) -> Result<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_env_overrides_with(
    config: &mut CourierConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        raw.trim()
            .parse()
            .map_err(|e: T::Err| Error::invalid_value(key, e.to_string()))
    }

    let d = &mut config.dispatch;
    if let Some(v) = lookup("COURIER_CONCURRENCY_IN_SESSION") {
        d.concurrency_in_session = parsed("COURIER_CONCURRENCY_IN_SESSION", &v)?;
    }
    if let Some(v) = lookup("COURIER_POOL_SIZE") {
        d.pool_size = parsed("COURIER_POOL_SIZE", &v)?;
    }
    if let Some(v) = lookup("COURIER_TICK_MS") {
        d.tick_ms = parsed("COURIER_TICK_MS", &v)?;
    }
    if let Some(v) = lookup("COURIER_ADMIN_PREFIX") {
        d.admin_prefix = v;
    }
    if let Some(v) = lookup("COURIER_SEND_RETRIES") {
        d.send_retries = parsed("COURIER_SEND_RETRIES", &v)?;
    }
    if let Some(v) = lookup("COURIER_SEND_RETRY_BACKOFF_MS") {
        d.send_retry_backoff_ms = parsed("COURIER_SEND_RETRY_BACKOFF_MS", &v)?;
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_each_format() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("courier.toml");
        std::fs::write(&toml_path, "[dispatch]\npool_size = 3\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().dispatch.pool_size, 3);

        let yaml_path = dir.path().join("courier.yaml");
        std::fs::write(&yaml_path, "dispatch:\n  tick_ms: 50\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().dispatch.tick_ms, 50);

        let json_path = dir.path().join("courier.json");
        std::fs::write(&json_path, r#"{"chat": {"group_at_off": true}}"#).unwrap();
        assert!(load_config(&json_path).unwrap().chat.group_at_off);
    }

    #[test]
    fn env_default_applies_before_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(
            &path,
            "[dispatch]\nadmin_prefix = \"${COURIER_LOADER_TEST_UNSET_PREFIX:-!}\"\n",
        )
        .unwrap();
        assert_eq!(load_config(&path).unwrap().dispatch.admin_prefix, "!");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = parse_config("", Path::new("courier.ini")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ext) if ext == "ini"));
    }

    #[test]
    fn parse_error_names_file() {
        let err = parse_config("[dispatch\n", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse broken.toml"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn env_overrides() {
        let mut config = CourierConfig::default();
        apply_env_overrides_with(&mut config, |name| match name {
            "COURIER_POOL_SIZE" => Some("16".into()),
            "COURIER_TICK_MS" => Some(" 20 ".into()),
            "COURIER_ADMIN_PREFIX" => Some("!".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.dispatch.pool_size, 16);
        assert_eq!(config.dispatch.tick_ms, 20);
        assert_eq!(config.dispatch.admin_prefix, "!");
        assert_eq!(config.dispatch.concurrency_in_session, 4);
    }

    #[test]
    fn invalid_env_override_is_error() {
        let mut config = CourierConfig::default();
        let err = apply_env_overrides_with(&mut config, |name| {
            (name == "COURIER_SEND_RETRIES").then(|| "many".into())
        })
        .unwrap_err();
        assert!(err.to_string().contains("COURIER_SEND_RETRIES"));
    }

    #[test]
    fn value_tree_is_format_neutral() {
        let from_toml =
            parse_config_value("[dispatch]\npool_size = 2\n", Path::new("a.toml")).unwrap();
        let from_yaml =
            parse_config_value("dispatch:\n  pool_size: 2\n", Path::new("a.yml")).unwrap();
        assert_eq!(from_toml, from_yaml);
    }
}
