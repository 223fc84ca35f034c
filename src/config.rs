// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::source::ApiType;

pub const ENV_CONFIG_PATH: &str = "TRIAGE_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub model: ModelConfig,
    pub twitter: TwitterConfig,
    pub streaming: StreamingConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub vectorizer_path: PathBuf,
    pub model_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vectorizer_path: PathBuf::from("models/tfidf_vectorizer.json"),
            model_path: PathBuf::from("models/disaster_model.json"),
        }
    }
}

/// Credentials are never read from files; only from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    pub api_type: ApiType,
    pub simulation_mode: bool,
    pub request_timeout_secs: u64,
    pub max_results_cap: usize,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub bearer_token: Option<String>,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            api_type: ApiType::Official,
            simulation_mode: true,
            request_timeout_secs: 30,
            max_results_cap: 100,
            api_key: None,
            bearer_token: None,
        }
    }
}

impl TwitterConfig {
    /// The credential the selected provider needs: bearer token for the
    /// official API, api key for twitterapi.io.
    pub fn credential(&self) -> Option<&str> {
        let c = match self.api_type {
            ApiType::Official => self.bearer_token.as_deref(),
            ApiType::TwitterapiIo => self.api_key.as_deref(),
        };
        c.filter(|s| !s.trim().is_empty())
    }

    /// Simulation is forced whenever the needed credential is missing.
    pub fn effective_simulation(&self) -> bool {
        self.simulation_mode || self.credential().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    pub stop_timeout_secs: u64,
    /// Start the polling loop at boot.
    pub autostart: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            batch_size: 20,
            stop_timeout_secs: 5,
            autostart: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: crate::cache::DEFAULT_CAPACITY,
        }
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<TriageConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading triage config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
}

/// Load config using env var + fallbacks, then apply env overrides:
/// 1) $TRIAGE_CONFIG_PATH
/// 2) config/triage.toml
/// 3) config/triage.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<TriageConfig> {
    let mut cfg = load_file_layer()?;
    apply_overrides(&mut cfg, |k| std::env::var(k).ok());
    Ok(cfg)
}

fn load_file_layer() -> Result<TriageConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("TRIAGE_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/triage.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/triage.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(TriageConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<TriageConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing triage config json");
    }
    match toml::from_str::<TriageConfig>(s) {
        Ok(c) => Ok(c),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported triage config format: {toml_err}")),
    }
}

/// Apply environment overrides through `lookup` (env in production, a map in tests).
/// Unparseable values are ignored with a warning.
pub fn apply_overrides<F>(cfg: &mut TriageConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("TWITTER_API_KEY") {
        cfg.twitter.api_key = Some(v);
    }
    if let Some(v) = get("TWITTER_BEARER_TOKEN") {
        cfg.twitter.bearer_token = Some(v);
    }
    if let Some(v) = get("TWITTER_API_TYPE") {
        match v.parse::<ApiType>() {
            Ok(t) => cfg.twitter.api_type = t,
            Err(e) => warn!(error = %e, "ignoring TWITTER_API_TYPE"),
        }
    }
    if let Some(v) = get("SIMULATION_MODE") {
        match parse_bool(&v) {
            Some(b) => cfg.twitter.simulation_mode = b,
            None => warn!(value = %v, "ignoring SIMULATION_MODE"),
        }
    }
    if let Some(v) = get("MODEL_PATH") {
        cfg.model.model_path = PathBuf::from(v);
    }
    if let Some(v) = get("VECTORIZER_PATH") {
        cfg.model.vectorizer_path = PathBuf::from(v);
    }
    if let Some(v) = get("STREAM_INTERVAL_SECS") {
        match v.parse::<u64>() {
            Ok(n) if n > 0 => cfg.streaming.interval_secs = n,
            _ => warn!(value = %v, "ignoring STREAM_INTERVAL_SECS"),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
