use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracedbError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    /// Deadline applied to every engine operation.
    pub query_timeout: Duration,
    /// Window used for queries that leave lookback unset.
    pub default_lookback: Duration,
    pub retention_ttl: Duration,
    pub retention_max_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("tracedb/tracedb.duckdb"),
            query_timeout: Duration::from_secs(10),
            default_lookback: Duration::from_secs(60 * 60 * 24),
            retention_ttl: Duration::from_secs(60 * 60 * 24 * 7),
            retention_max_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    query_timeout: Option<String>,
    default_lookback: Option<String>,
    retention_ttl: Option<String>,
    retention_max_bytes: Option<u64>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACEDB_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracedb/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| TracedbError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| TracedbError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let retention_max_bytes = match env::var("TRACEDB_RETENTION_MAX_BYTES") {
        Ok(v) => Some(v.parse::<u64>().map_err(|e| {
            TracedbError::Config(format!("bad TRACEDB_RETENTION_MAX_BYTES in environment: {e}"))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        db_path: env::var("TRACEDB_DB_PATH").ok().map(PathBuf::from),
        query_timeout: env::var("TRACEDB_QUERY_TIMEOUT").ok(),
        default_lookback: env::var("TRACEDB_DEFAULT_LOOKBACK").ok(),
        retention_ttl: env::var("TRACEDB_RETENTION_TTL").ok(),
        retention_max_bytes,
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.query_timeout {
        cfg.query_timeout = parse_duration(&v, "query_timeout", source)?;
    }
    if let Some(v) = overrides.default_lookback {
        cfg.default_lookback = parse_duration(&v, "default_lookback", source)?;
    }
    if let Some(v) = overrides.retention_ttl {
        cfg.retention_ttl = parse_duration(&v, "retention_ttl", source)?;
    }
    if let Some(v) = overrides.retention_max_bytes {
        cfg.retention_max_bytes = v;
    }
    Ok(())
}

fn parse_duration(value: &str, field: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        TracedbError::Config(format!("bad {field} in {source}: {e} (value={value})"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.db_path.ends_with("tracedb/tracedb.duckdb"));
        assert_eq!(cfg.query_timeout, Duration::from_secs(10));
    }

    #[test]
    fn overrides_apply_in_order() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            ConfigOverrides {
                db_path: Some(PathBuf::from("/tmp/t.duckdb")),
                query_timeout: Some("2s".into()),
                default_lookback: None,
                retention_ttl: Some("1h".into()),
                retention_max_bytes: Some(1024),
            },
            "test",
        )
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/t.duckdb"));
        assert_eq!(cfg.query_timeout, Duration::from_secs(2));
        assert_eq!(cfg.retention_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.retention_max_bytes, 1024);
    }

    #[test]
    fn bad_duration_is_a_config_error() {
        let mut cfg = Config::default();
        let err = apply_overrides(
            &mut cfg,
            ConfigOverrides {
                query_timeout: Some("soon".into()),
                ..ConfigOverrides::default()
            },
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, TracedbError::Config(_)));
    }
}
