//! Configuration and shared engine context
//!
//! All tunables live in a serde-backed [`Config`] loaded from TOML with
//! per-section defaults; CLI flags are overlaid afterwards. Global mutable
//! state (policy rules, pipeline counters, intel tables) is carried in an
//! explicit [`EngineContext`] passed by reference to every component.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intel::IntelDb;
use crate::models::{PolicyAction, PolicyRule, PolicyRuleDraft, Severity};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub synthetic: SyntheticConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub ml: MlConfig,

    #[serde(default)]
    pub defense: DefenseConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// HTTP/WS bind port
    pub port: u16,
    /// Persistent graph container path
    pub db_path: PathBuf,
    /// Extra prefixes treated as internal besides RFC1918/loopback
    pub local_prefixes: Vec<String>,
    /// Internal services whose east-west traffic is still analyzed
    pub interesting_internal: Vec<IpAddr>,
    /// Internal IP -> department assignment for policy matching.
    /// Kept last so TOML serialization emits plain values first.
    pub departments: HashMap<String, String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let mut departments = HashMap::new();
        departments.insert("192.168.1.10".to_string(), "Engineering".to_string());
        departments.insert("192.168.1.11".to_string(), "Design".to_string());
        departments.insert("192.168.1.12".to_string(), "Finance".to_string());
        departments.insert("192.168.1.13".to_string(), "Engineering".to_string());
        departments.insert("192.168.1.14".to_string(), "Legal".to_string());

        Self {
            port: 8000,
            db_path: PathBuf::from("shadowhunter.db"),
            local_prefixes: Vec::new(),
            departments,
            interesting_internal: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface name (None = auto-detect default device)
    pub interface: Option<String>,
    /// Rolling flow aggregation window in seconds
    pub flow_window_secs: u64,
    /// Capture snapshot length
    pub snaplen: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            flow_window_secs: 2,
            snaplen: 65535,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// RNG seed for reproducible demo traffic
    pub seed: Option<u64>,
    /// Events per simulated second, lower bound
    pub min_events_per_sec: u32,
    /// Events per simulated second, upper bound
    pub max_events_per_sec: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: None,
            min_events_per_sec: 10,
            max_events_per_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Number of partitioned analyzer workers
    pub workers: usize,
    /// Queue depth per worker
    pub queue_depth: usize,
    /// Alert ring buffer capacity
    pub alert_ring_capacity: usize,
    /// ML risk at or above which auto-response triggers
    pub critical_risk: f64,
    /// Shutdown drain grace period in seconds
    pub drain_grace_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 4096,
            alert_ring_capacity: 1000,
            critical_risk: 95.0,
            drain_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub enabled: bool,
    /// Directory holding serialized model files (None = cold start)
    pub model_dir: Option<PathBuf>,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseConfig {
    /// Enable active probing of suspicious destinations
    pub probing_enabled: bool,
    /// Enable auto-blocking on critical alerts
    pub auto_block_enabled: bool,
    /// Blocklist entry TTL in seconds
    pub block_ttl_secs: u64,
    /// Maximum concurrent blocklist entries
    pub max_blocked: usize,
    /// Per-target probe cooldown in seconds
    pub probe_cooldown_secs: u64,
    /// Global probe rate limit per rolling minute
    pub max_probes_per_minute: usize,
    /// Hard per-probe timeout in seconds
    pub probe_timeout_secs: u64,
    /// Expired-entry sweeper interval in seconds
    pub sweep_interval_secs: u64,
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            probing_enabled: true,
            auto_block_enabled: true,
            block_ttl_secs: 3600,
            max_blocked: 500,
            probe_cooldown_secs: 300,
            max_probes_per_minute: 10,
            probe_timeout_secs: 5,
            sweep_interval_secs: 30,
        }
    }
}

/// Pipeline counters, updated lock-free from every stage.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_processed: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub dropped_analysis: AtomicU64,
    pub store_failures_total: AtomicU64,
    pub detector_panics: AtomicU64,
    pub probes_sent: AtomicU64,
    pub probes_skipped: AtomicU64,
    pub probes_failed: AtomicU64,
    pub input_malformed: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        let mut map = HashMap::new();
        map.insert("events_processed", self.events_processed.load(Ordering::Relaxed));
        map.insert("alerts_emitted", self.alerts_emitted.load(Ordering::Relaxed));
        map.insert("dropped_analysis", self.dropped_analysis.load(Ordering::Relaxed));
        map.insert(
            "store_failures_total",
            self.store_failures_total.load(Ordering::Relaxed),
        );
        map.insert("detector_panics", self.detector_panics.load(Ordering::Relaxed));
        map.insert("probes_sent", self.probes_sent.load(Ordering::Relaxed));
        map.insert("probes_skipped", self.probes_skipped.load(Ordering::Relaxed));
        map.insert("probes_failed", self.probes_failed.load(Ordering::Relaxed));
        map.insert("input_malformed", self.input_malformed.load(Ordering::Relaxed));
        map
    }
}

/// Copy-on-write policy rule table. Writers rebuild the whole vector and
/// atomically publish a new Arc; readers hold cheap snapshots.
pub struct PolicyStore {
    rules: RwLock<Arc<Vec<PolicyRule>>>,
}

impl PolicyStore {
    pub fn with_defaults() -> Self {
        Self {
            rules: RwLock::new(Arc::new(default_policy_rules())),
        }
    }

    pub fn empty() -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<PolicyRule>> {
        self.rules.read().clone()
    }

    /// Insert a new rule. Fails on a duplicate (name, service) pair.
    pub fn create(&self, draft: PolicyRuleDraft) -> Result<PolicyRule, PolicyStoreError> {
        let mut guard = self.rules.write();
        if guard
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(&draft.name) && r.service.eq_ignore_ascii_case(&draft.service))
        {
            return Err(PolicyStoreError::Conflict);
        }

        let rule = PolicyRule {
            id: format!("rule-{}", &Uuid::new_v4().simple().to_string()[..8]),
            name: draft.name,
            action: draft.action,
            service: draft.service,
            department: draft.department,
            severity: draft.severity,
            enabled: draft.enabled,
            description: draft.description,
        };

        let mut next: Vec<PolicyRule> = guard.as_ref().clone();
        next.push(rule.clone());
        *guard = Arc::new(next);
        Ok(rule)
    }

    pub fn toggle(&self, id: &str) -> Result<PolicyRule, PolicyStoreError> {
        let mut guard = self.rules.write();
        let mut next: Vec<PolicyRule> = guard.as_ref().clone();
        let rule = next
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(PolicyStoreError::NotFound)?;
        rule.enabled = !rule.enabled;
        let updated = rule.clone();
        *guard = Arc::new(next);
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<(), PolicyStoreError> {
        let mut guard = self.rules.write();
        if !guard.iter().any(|r| r.id == id) {
            return Err(PolicyStoreError::NotFound);
        }
        let next: Vec<PolicyRule> = guard.iter().filter(|r| r.id != id).cloned().collect();
        *guard = Arc::new(next);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolicyStoreError {
    #[error("rule not found")]
    NotFound,
    #[error("a rule with the same name and service already exists")]
    Conflict,
}

fn default_policy_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            id: "rule-default-1".to_string(),
            name: "Block ChatGPT for Finance".to_string(),
            action: PolicyAction::Block,
            service: "chatgpt".to_string(),
            department: "Finance".to_string(),
            severity: Severity::High,
            enabled: true,
            description: "Prevent the Finance department from sending financial data to ChatGPT"
                .to_string(),
        },
        PolicyRule {
            id: "rule-default-2".to_string(),
            name: "Allow Copilot for Engineering".to_string(),
            action: PolicyAction::Allow,
            service: "copilot".to_string(),
            department: "Engineering".to_string(),
            severity: Severity::Low,
            enabled: true,
            description: "Engineering is approved to use GitHub Copilot".to_string(),
        },
        PolicyRule {
            id: "rule-default-3".to_string(),
            name: "Monitor Midjourney Usage".to_string(),
            action: PolicyAction::Monitor,
            service: "midjourney".to_string(),
            department: "All".to_string(),
            severity: Severity::Medium,
            enabled: true,
            description: "Log all Midjourney image generation activity".to_string(),
        },
        PolicyRule {
            id: "rule-default-4".to_string(),
            name: "Block Claude for Legal".to_string(),
            action: PolicyAction::Block,
            service: "claude".to_string(),
            department: "Legal".to_string(),
            severity: Severity::High,
            enabled: false,
            description: "Restrict Legal from sharing privileged material with Claude".to_string(),
        },
    ]
}

/// Process-wide engine context. Built once at startup from the parsed
/// config; components receive it by `Arc` and read immutable snapshots.
pub struct EngineContext {
    pub config: Config,
    pub intel: IntelDb,
    pub policy: PolicyStore,
    pub stats: Arc<PipelineStats>,
    local_nets: Vec<IpNetwork>,
    interesting_internal: HashSet<IpAddr>,
}

impl EngineContext {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let mut local_nets = Vec::new();
        for prefix in &config.general.local_prefixes {
            let net: IpNetwork = prefix
                .parse()
                .with_context(|| format!("invalid local prefix: {prefix}"))?;
            local_nets.push(net);
        }
        let interesting_internal = config.general.interesting_internal.iter().copied().collect();

        Ok(Arc::new(Self {
            config,
            intel: IntelDb::new(),
            policy: PolicyStore::with_defaults(),
            stats: Arc::new(PipelineStats::default()),
            local_nets,
            interesting_internal,
        }))
    }

    /// RFC1918, loopback, or a configured local prefix.
    pub fn is_internal(&self, ip: &IpAddr) -> bool {
        crate::models::is_private_ip(ip) || self.local_nets.iter().any(|n| n.contains(*ip))
    }

    /// Internal services whose east-west traffic still goes through the
    /// detectors instead of the whitelist short-circuit.
    pub fn is_interesting_internal(&self, ip: &IpAddr) -> bool {
        self.interesting_internal.contains(ip)
    }

    /// Department of an internal endpoint, if assigned.
    pub fn department_of(&self, ip: &IpAddr) -> Option<&str> {
        self.config
            .general
            .departments
            .get(&ip.to_string())
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.general.port, 8000);
        assert_eq!(parsed.analyzer.workers, 4);
    }

    #[test]
    fn policy_toggle_is_involutive() {
        let store = PolicyStore::with_defaults();
        let before = store.snapshot()[0].enabled;
        store.toggle("rule-default-1").unwrap();
        store.toggle("rule-default-1").unwrap();
        assert_eq!(store.snapshot()[0].enabled, before);
    }

    #[test]
    fn policy_create_rejects_duplicate_name_service() {
        let store = PolicyStore::empty();
        let draft = |name: &str| PolicyRuleDraft {
            name: name.to_string(),
            action: PolicyAction::Monitor,
            service: "chatgpt".to_string(),
            department: "All".to_string(),
            severity: Severity::Medium,
            enabled: true,
            description: String::new(),
        };
        store.create(draft("Watch ChatGPT")).unwrap();
        assert_eq!(
            store.create(draft("Watch ChatGPT")).unwrap_err(),
            PolicyStoreError::Conflict
        );
    }

    #[test]
    fn local_prefix_extends_internal_space() {
        let mut config = Config::default();
        config.general.local_prefixes = vec!["100.64.0.0/10".to_string()];
        let ctx = EngineContext::new(config).unwrap();
        assert!(ctx.is_internal(&"100.64.1.2".parse().unwrap()));
        assert!(ctx.is_internal(&"192.168.0.7".parse().unwrap()));
        assert!(!ctx.is_internal(&"8.8.8.8".parse().unwrap()));
    }
}
