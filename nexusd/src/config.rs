//! `nexusd.toml` loading.
//!
//! Every section is optional. A missing, unreadable or unparsable file logs
//! a warning and yields the built-in defaults; `NEXUS_*` environment
//! variables are applied on top, and CLI flags on top of those.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nexus_common::limits::parse_env_bool;
use nexus_containers::{default_catalogue, ContainerToolSpec};
use nexus_gate::DangerPattern;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CONFIG_FILE_NAME: &str = "nexusd.toml";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSettings,
    pub store: StoreSettings,
    pub gate: GateSettings,
    pub brain: BrainSettings,
    pub containers: ContainerSettings,
}

/// Control-loop timings and result lifetimes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub interval_ms: u64,
    /// Run container cleanup every N cycles.
    pub cleanup_every: u64,
    /// Persist statistics every M cycles.
    pub stats_every: u64,
    pub answer_ttl_secs: u64,
    pub job_result_ttl_secs: u64,
    pub logs_cap: usize,
    pub scheduler_batch: usize,
    pub instance_lease_secs: u64,
    pub refuse_if_running: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            cleanup_every: 120,
            stats_every: 1_200,
            answer_ttl_secs: 300,
            job_result_ttl_secs: 86_400,
            logs_cap: 500,
            scheduler_batch: 16,
            instance_lease_secs: 30,
            refuse_if_running: false,
        }
    }
}

impl DaemonSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn answer_ttl(&self) -> Duration {
        Duration::from_secs(self.answer_ttl_secs.max(1))
    }

    pub fn job_result_ttl(&self) -> Duration {
        Duration::from_secs(self.job_result_ttl_secs.max(1))
    }

    pub fn instance_lease(&self) -> Duration {
        Duration::from_secs(self.instance_lease_secs.max(1))
    }

    /// Cycles between lease refreshes, so the lease is renewed at least
    /// twice per lease period.
    pub fn lease_refresh_every(&self) -> u64 {
        let half_lease_ms = self.instance_lease().as_millis() as u64 / 2;
        (half_lease_ms / self.interval_ms.max(1)).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub redis_url: String,
    /// Use the in-process store instead of Redis (single process only).
    pub memory: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            memory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub name: String,
    pub regex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub working_dir: PathBuf,
    pub shell: String,
    pub timeout_ms: Option<u64>,
    pub max_output_bytes: Option<u64>,
    pub extra_patterns: Vec<PatternEntry>,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            shell: "/bin/sh".to_string(),
            timeout_ms: None,
            max_output_bytes: None,
            extra_patterns: Vec::new(),
        }
    }
}

impl GateSettings {
    pub fn configured_limits(&self) -> (Option<u64>, Option<u64>) {
        (self.timeout_ms, self.max_output_bytes)
    }

    /// Compile the extra patterns, skipping (and logging) invalid ones.
    pub fn compiled_patterns(&self) -> Vec<DangerPattern> {
        self.extra_patterns
            .iter()
            .filter_map(|entry| match DangerPattern::new(entry.name.clone(), &entry.regex) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    warn!(name = %entry.name, error = %err, "Danger pattern skipped");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainSettings {
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub max_tokens: u32,
    /// Tier name to model identifier overrides.
    pub models: HashMap<String, String>,
}

impl Default for BrainSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: nexus_backend_openai::DEFAULT_API_KEY_ENV.to_string(),
            max_tokens: nexus_brain::DEFAULT_MAX_OUTPUT_TOKENS,
            models: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    pub enabled: bool,
    pub tools: Vec<ContainerToolSpec>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tools: default_catalogue(),
        }
    }
}

/// `--config`, else `NEXUS_CONFIG`, else `./nexusd.toml` when it exists.
pub fn resolve_config_path(cli: Option<PathBuf>) -> Option<PathBuf> {
    cli.or_else(|| {
        std::env::var("NEXUS_CONFIG")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from)
    })
    .or_else(|| {
        let candidate = std::env::current_dir().ok()?.join(CONFIG_FILE_NAME);
        candidate.is_file().then_some(candidate)
    })
}

pub fn load_config(config_path: Option<&Path>) -> DaemonConfig {
    let Some(path) = config_path else {
        return DaemonConfig::default();
    };

    let contents = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(err) => {
            warn!("Failed to read config file {}: {}", path.display(), err);
            return DaemonConfig::default();
        }
    };

    match toml::from_str::<DaemonConfig>(&contents) {
        Ok(mut config) => {
            if let Some(base) = path.parent() {
                if config.gate.working_dir.is_relative() && !base.as_os_str().is_empty() {
                    config.gate.working_dir = base.join(&config.gate.working_dir);
                }
            }
            info!(
                tools = config.containers.tools.len(),
                "Loaded configuration from {}",
                path.display()
            );
            config
        }
        Err(err) => {
            warn!("Failed to parse {}: {}", path.display(), err);
            DaemonConfig::default()
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = env_string(name)?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Invalid {} value '{}': {}", name, raw, err);
            None
        }
    }
}

impl DaemonConfig {
    /// Overlay `NEXUS_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(url) = env_string("NEXUS_REDIS_URL") {
            self.store.redis_url = url;
        }
        if let Some(memory) = parse_env_bool("NEXUS_MEMORY_STORE") {
            self.store.memory = memory;
        }
        if let Some(interval) = env_u64("NEXUS_INTERVAL_MS") {
            self.daemon.interval_ms = interval;
        }
        if let Some(refuse) = parse_env_bool("NEXUS_REFUSE_IF_RUNNING") {
            self.daemon.refuse_if_running = refuse;
        }
        if let Some(dir) = env_string("NEXUS_WORKDIR") {
            self.gate.working_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_string("NEXUS_LLM_BASE_URL") {
            self.brain.base_url = Some(url);
        }
        if let Some(enabled) = parse_env_bool("NEXUS_CONTAINERS") {
            self.containers.enabled = enabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.daemon.interval_ms, 500);
        assert_eq!(config.daemon.cleanup_every, 120);
        assert_eq!(config.daemon.stats_every, 1_200);
        assert_eq!(config.daemon.answer_ttl(), Duration::from_secs(300));
        assert_eq!(config.daemon.job_result_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.daemon.lease_refresh_every(), 30);
        assert!(config.containers.enabled);
        assert_eq!(config.containers.tools.len(), default_catalogue().len());
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let gate = GateSettings {
            extra_patterns: vec![
                PatternEntry {
                    name: "ok".into(),
                    regex: r"curl\s.*\|\s*sh".into(),
                },
                PatternEntry {
                    name: "broken".into(),
                    regex: "(".into(),
                },
            ],
            ..GateSettings::default()
        };
        let compiled = gate.compiled_patterns();
        assert_eq!(compiled.len(), 1);
        assert_eq!(compiled[0].name(), "ok");
    }
}
