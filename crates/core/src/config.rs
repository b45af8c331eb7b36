use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LlmTraceError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    /// Finalized spans older than this are eligible for pruning.
    pub retention: Duration,
    /// When off, prompt text is stored as a redaction marker.
    pub log_prompts: bool,
    /// When off, response text is stored as a redaction marker.
    pub log_responses: bool,
    /// Prompt/response text is truncated to this many characters before
    /// entering the in-flight map.
    pub max_text_len: usize,
    /// Count-based sliding window for the rolling error rate.
    pub error_window: usize,
    /// Error-rate fraction (0..=1) at which the anomaly alert raises.
    pub error_rate_threshold: f64,
    /// In-flight spans older than this count as leaked.
    pub leak_threshold: Duration,
    /// Optional TOML pricing table overlaid on the built-in one.
    pub pricing_path: Option<PathBuf>,
    pub write_batch_size: usize,
    pub write_flush_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("llmtrace/llmtrace.duckdb"),
            retention: Duration::from_secs(60 * 60 * 24 * 30),
            log_prompts: true,
            log_responses: true,
            max_text_len: 10_000,
            error_window: 100,
            error_rate_threshold: 0.05,
            leak_threshold: Duration::from_secs(60 * 10),
            pricing_path: None,
            write_batch_size: 256,
            write_flush_ms: 200,
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
        let env_overrides = load_env_overrides();
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    retention: Option<String>,
    log_prompts: Option<bool>,
    log_responses: Option<bool>,
    max_text_len: Option<usize>,
    error_window: Option<usize>,
    error_rate_threshold: Option<f64>,
    leak_threshold: Option<String>,
    pricing_path: Option<PathBuf>,
    write_batch_size: Option<usize>,
    write_flush_ms: Option<u64>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("LLMTRACE_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("llmtrace/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| LlmTraceError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| LlmTraceError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> ConfigOverrides {
    ConfigOverrides {
        db_path: env::var("LLMTRACE_DB_PATH").ok().map(PathBuf::from),
        retention: env::var("LLMTRACE_RETENTION").ok(),
        log_prompts: env_bool("LLMTRACE_LOG_PROMPTS"),
        log_responses: env_bool("LLMTRACE_LOG_RESPONSES"),
        max_text_len: env_parse("LLMTRACE_MAX_TEXT_LEN"),
        error_window: env_parse("LLMTRACE_ERROR_WINDOW"),
        error_rate_threshold: env_parse("LLMTRACE_ERROR_RATE_THRESHOLD"),
        leak_threshold: env::var("LLMTRACE_LEAK_THRESHOLD").ok(),
        pricing_path: env::var("LLMTRACE_PRICING_PATH").ok().map(PathBuf::from),
        write_batch_size: env_parse("LLMTRACE_WRITE_BATCH_SIZE"),
        write_flush_ms: env_parse("LLMTRACE_WRITE_FLUSH_MS"),
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.retention {
        cfg.retention = humantime::parse_duration(&v).map_err(|e| {
            LlmTraceError::Config(format!("bad retention in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.log_prompts {
        cfg.log_prompts = v;
    }
    if let Some(v) = overrides.log_responses {
        cfg.log_responses = v;
    }
    if let Some(v) = overrides.max_text_len {
        cfg.max_text_len = v;
    }
    if let Some(v) = overrides.error_window {
        if v == 0 {
            return Err(LlmTraceError::Config(format!(
                "error_window in {source} must be positive"
            )));
        }
        cfg.error_window = v;
    }
    if let Some(v) = overrides.error_rate_threshold {
        if !(0.0..=1.0).contains(&v) {
            return Err(LlmTraceError::Config(format!(
                "error_rate_threshold in {source} must be in 0..=1 (value={v})"
            )));
        }
        cfg.error_rate_threshold = v;
    }
    if let Some(v) = overrides.leak_threshold {
        cfg.leak_threshold = humantime::parse_duration(&v).map_err(|e| {
            LlmTraceError::Config(format!("bad leak_threshold in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.pricing_path {
        cfg.pricing_path = Some(v);
    }
    if let Some(v) = overrides.write_batch_size {
        cfg.write_batch_size = v;
    }
    if let Some(v) = overrides.write_flush_ms {
        cfg.write_flush_ms = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retains_a_month() {
        let cfg = Config::default();
        assert_eq!(cfg.retention, Duration::from_secs(2_592_000));
        assert!(cfg.log_prompts);
        assert!(cfg.log_responses);
    }

    #[test]
    fn file_overrides_apply() {
        let mut cfg = Config::default();
        let overrides: ConfigOverrides = toml::from_str(
            "retention = \"7d\"\nlog_prompts = false\nerror_rate_threshold = 0.3\n",
        )
        .unwrap();
        apply_overrides(&mut cfg, overrides, "config file").unwrap();
        assert_eq!(cfg.retention, Duration::from_secs(604_800));
        assert!(!cfg.log_prompts);
        assert_eq!(cfg.error_rate_threshold, 0.3);
    }

    #[test]
    fn rejects_bad_threshold() {
        let mut cfg = Config::default();
        let overrides = ConfigOverrides {
            error_rate_threshold: Some(1.5),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, overrides, "config file").is_err());
    }

    #[test]
    fn rejects_zero_window() {
        let mut cfg = Config::default();
        let overrides = ConfigOverrides {
            error_window: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, overrides, "config file").is_err());
    }
}
