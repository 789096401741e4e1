use crate::error::ConfigError;
use crate::token_bucket::TokenBucket;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::{Path, PathBuf}};
use tracing::info;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String, // e.g., "0.0.0.0"
    #[serde(default = "default_port")]
    pub port: u16,
}
fn default_bind_addr() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr(), port: default_port() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: f64, // max burst
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64, // tokens per second
}
fn default_capacity() -> f64 { 10.0 }
fn default_refill_rate() -> f64 { 3.0 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { capacity: default_capacity(), refill_rate: default_refill_rate() }
    }
}

impl RateLimitConfig {
    pub fn build_bucket(&self) -> Result<TokenBucket, ConfigError> {
        TokenBucket::new(self.capacity, self.refill_rate)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
}
fn default_model_path() -> PathBuf { PathBuf::from("model.json") }

impl Default for ModelConfig {
    fn default() -> Self { Self { path: default_model_path() } }
}

impl Config {
    /// Reads the YAML file at `path` (defaults when it does not exist), then
    /// applies environment overrides. Limiter settings are validated where the
    /// bucket is built, so a reload can keep the old bucket and still apply
    /// the rest of the file.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let mut cfg: Self = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            info!("no config file at {}, using defaults", path.display());
            Self::default()
        };
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }
}

pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = var("AGE_HTTP_ADDR") { cfg.server.bind_addr = addr; }
    // PORT is honoured for platform deployments; AGE_HTTP_PORT wins when both are set.
    for key in ["PORT", "AGE_HTTP_PORT"] {
        if let Some(p) = var(key).and_then(|v| v.parse::<u16>().ok()) { cfg.server.port = p; }
    }
    if let Some(c) = var("AGE_RATE_CAPACITY").and_then(|v| v.parse::<f64>().ok()) {
        cfg.rate_limit.capacity = c;
    }
    if let Some(r) = var("AGE_RATE_REFILL").and_then(|v| v.parse::<f64>().ok()) {
        cfg.rate_limit.refill_rate = r;
    }
    if let Some(p) = var("AGE_MODEL_PATH") { cfg.model.path = PathBuf::from(p); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = Config::default();
        assert_eq!(cfg.server.bind_addr, "0.0.0.0");
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.rate_limit.capacity, 10.0);
        assert_eq!(cfg.rate_limit.refill_rate, 3.0);
        assert_eq!(cfg.model.path, PathBuf::from("model.json"));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("rate_limit:\n  capacity: 25\n").unwrap();
        assert_eq!(cfg.rate_limit.capacity, 25.0);
        assert_eq!(cfg.rate_limit.refill_rate, 3.0);
        assert_eq!(cfg.server.port, 5000);
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("AGE_HTTP_ADDR", "127.0.0.1"),
            ("AGE_RATE_CAPACITY", "not-a-number"),
            ("AGE_RATE_REFILL", "0.5"),
            ("AGE_MODEL_PATH", "/srv/models/age.json"),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.bind_addr, "127.0.0.1");
        assert_eq!(cfg.rate_limit.capacity, 10.0);
        assert_eq!(cfg.rate_limit.refill_rate, 0.5);
        assert_eq!(cfg.model.path, PathBuf::from("/srv/models/age.json"));
    }

    #[test]
    fn explicit_port_wins_over_platform_port() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |k| match k {
            "PORT" => Some("8080".into()),
            "AGE_HTTP_PORT" => Some("9090".into()),
            _ => None,
        });
        assert_eq!(cfg.server.port, 9090);
    }

    #[test]
    fn load_keeps_invalid_limiter_for_the_bucket_builder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "rate_limit:\n  capacity: 0\n  refill_rate: 1\n").unwrap();
        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.rate_limit.capacity, 0.0);
        let err = cfg.rate_limit.build_bucket().unwrap_err();
        assert!(err.to_string().contains("capacity"), "{}", err);
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from_path(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(cfg.rate_limit, RateLimitConfig::default());
    }
}
