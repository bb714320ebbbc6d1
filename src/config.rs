#![forbid(unsafe_code)]

//! Runtime settings for the engagement server.
//!
//! Values come from (highest precedence first) explicit overrides such as CLI
//! flags, the process environment, and finally a `.env` file.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_NEWTUBE_PORT: u16 = 8080;
pub const DEFAULT_NEWTUBE_HOST: &str = "127.0.0.1";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub db_path: PathBuf,
    pub newtube_port: u16,
    pub newtube_host: String,
    pub busy_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub db_path: Option<PathBuf>,
    pub newtube_port: Option<u16>,
    pub newtube_host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_settings(&file_vars, env_var_string, overrides)
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let db_path = overrides
        .db_path
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("ENGAGEMENT_DB_PATH", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("ENGAGEMENT_DB_PATH not set"))?;
    let newtube_port = overrides
        .newtube_port
        .or_else(|| {
            lookup_value("NEWTUBE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_NEWTUBE_PORT);
    let newtube_host = overrides
        .newtube_host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("NEWTUBE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_NEWTUBE_HOST.to_string());
    let busy_timeout_ms = lookup_value("ENGAGEMENT_BUSY_TIMEOUT_MS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_BUSY_TIMEOUT_MS);

    Ok(RuntimeSettings {
        db_path: PathBuf::from(db_path),
        newtube_port,
        newtube_host,
        busy_timeout: Duration::from_millis(busy_timeout_ms),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a dotenv-style file. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = unquote(value_raw.trim());
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None, RuntimeOverrides::default()).unwrap()
    }

    #[test]
    fn defaults_apply_when_only_db_path_is_set() {
        let settings = settings_from("ENGAGEMENT_DB_PATH=\"/data/engagement.db\"\n");
        assert_eq!(settings.db_path, PathBuf::from("/data/engagement.db"));
        assert_eq!(settings.newtube_port, DEFAULT_NEWTUBE_PORT);
        assert_eq!(settings.newtube_host, DEFAULT_NEWTUBE_HOST);
        assert_eq!(
            settings.busy_timeout,
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        );
    }

    #[test]
    fn missing_db_path_is_an_error() {
        let vars = HashMap::new();
        let err = build_runtime_settings(&vars, |_| None, RuntimeOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("ENGAGEMENT_DB_PATH"));
    }

    #[test]
    fn reads_port_host_and_busy_timeout() {
        let settings = settings_from(
            "ENGAGEMENT_DB_PATH=/db\nNEWTUBE_PORT=\"4242\"\nNEWTUBE_HOST='0.0.0.0'\nENGAGEMENT_BUSY_TIMEOUT_MS=250\n",
        );
        assert_eq!(settings.newtube_port, 4242);
        assert_eq!(settings.newtube_host, "0.0.0.0");
        assert_eq!(settings.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("ENGAGEMENT_DB_PATH=\"/file\"\n").path()).unwrap();
        let settings = build_runtime_settings(
            &vars,
            |key| (key == "ENGAGEMENT_DB_PATH").then(|| "/env".to_string()),
            RuntimeOverrides::default(),
        )
        .unwrap();
        assert_eq!(settings.db_path, PathBuf::from("/env"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("ENGAGEMENT_DB_PATH".to_string(), "/file".to_string());
        vars.insert("NEWTUBE_PORT".to_string(), "7000".to_string());

        let settings = build_runtime_settings(
            &vars,
            |key| (key == "NEWTUBE_PORT").then(|| "8000".to_string()),
            RuntimeOverrides {
                db_path: Some(PathBuf::from("/override")),
                newtube_port: Some(9000),
                newtube_host: Some("  ".into()),
                env_path: None,
            },
        )
        .unwrap();

        assert_eq!(settings.db_path, PathBuf::from("/override"));
        assert_eq!(settings.newtube_port, 9000);
        assert_eq!(settings.newtube_host, DEFAULT_NEWTUBE_HOST);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from(
            "ENGAGEMENT_DB_PATH=/db\nNEWTUBE_PORT=nope\nENGAGEMENT_BUSY_TIMEOUT_MS=-1\n",
        );
        assert_eq!(settings.newtube_port, DEFAULT_NEWTUBE_PORT);
        assert_eq!(
            settings.busy_timeout,
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        );
    }

    #[test]
    fn read_env_file_handles_export_comments_and_garbage() {
        let cfg = make_config(
            r#"
            export ENGAGEMENT_DB_PATH="/db"
            # comment
            INVALID_LINE
            =orphan
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("ENGAGEMENT_DB_PATH").unwrap(), "/db");
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
