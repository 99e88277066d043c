//! Core data model
//!
//! Flow events, graph elements, alerts and policy records shared by every
//! pipeline stage.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport / application protocol of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Http,
    Https,
    Dns,
    Other,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Other
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Https => write!(f, "HTTPS"),
            Protocol::Dns => write!(f, "DNS"),
            Protocol::Other => write!(f, "OTHER"),
        }
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A normalized flow record emitted by a capture source.
///
/// Immutable once published. `source_port`/`destination_port` of 0 means
/// not applicable (e.g. pure DNS records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub destination_ip: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
    pub protocol: Protocol,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// 32-hex JA3 fingerprint for TLS client handshakes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ja3_hash: Option<String>,
    /// Open key/value enrichment. Recognized keys: `host`, `sni`,
    /// `dns_query`, `user_agent`, `persona`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl FlowEvent {
    /// Best display name for the destination: HTTP host, then TLS SNI,
    /// then DNS query, falling back to the destination IP literal.
    pub fn destination_name(&self) -> String {
        self.metadata
            .get("host")
            .or_else(|| self.metadata.get("sni"))
            .or_else(|| self.metadata.get("dns_query"))
            .cloned()
            .unwrap_or_else(|| self.destination_ip.to_string())
    }

    /// Hostname extracted by DPI, if any.
    pub fn hostname(&self) -> Option<&str> {
        self.metadata
            .get("host")
            .or_else(|| self.metadata.get("sni"))
            .or_else(|| self.metadata.get("dns_query"))
            .map(|s| s.as_str())
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }

    /// Partition key over the flow 5-tuple; events with equal keys are
    /// processed in publication order by a single analyzer worker.
    pub fn partition_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.source_ip.hash(&mut hasher);
        self.destination_ip.hash(&mut hasher);
        self.destination_port.hash(&mut hasher);
        self.protocol.hash(&mut hasher);
        hasher.finish()
    }
}

/// Node classification in the network graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Internal,
    External,
    /// External node confirmed or strongly suspected to host a Shadow AI
    /// service. Sticky: never downgraded except by a full reset.
    Shadow,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Internal => write!(f, "internal"),
            NodeType::External => write!(f, "external"),
            NodeType::Shadow => write!(f, "shadow"),
        }
    }
}

/// Lifecycle state of a source node, driven by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Observed,
    Flagged,
    Quarantined,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState::Observed
    }
}

/// Graph vertex. Identity is the case-folded `id` (IP literal or domain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Fused risk in [0, 100]
    pub risk_score: f64,
    pub alert_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default)]
    pub state: NodeState,
}

/// Directed edge, at most one per ordered (source, target) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Last-seen flow protocol on this edge
    pub protocol: Protocol,
    pub dst_port: u16,
    /// Cumulative bytes over all flows in this direction
    pub byte_count: u64,
    pub flow_count: u64,
    pub last_seen: DateTime<Utc>,
}

/// ML traffic classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MlClass {
    Normal,
    Suspicious,
    ShadowAi,
}

impl std::fmt::Display for MlClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MlClass::Normal => write!(f, "normal"),
            MlClass::Suspicious => write!(f, "suspicious"),
            MlClass::ShadowAi => write!(f, "shadow_ai"),
        }
    }
}

/// Kill-chain stage assignment for an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillchainStage {
    Reconnaissance,
    InitialAccess,
    Execution,
    Exfiltration,
    Impact,
}

impl KillchainStage {
    pub const ALL: [KillchainStage; 5] = [
        KillchainStage::Reconnaissance,
        KillchainStage::InitialAccess,
        KillchainStage::Execution,
        KillchainStage::Exfiltration,
        KillchainStage::Impact,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            KillchainStage::Reconnaissance => "Reconnaissance",
            KillchainStage::InitialAccess => "Initial Access",
            KillchainStage::Execution => "Execution",
            KillchainStage::Exfiltration => "Exfiltration",
            KillchainStage::Impact => "Impact",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KillchainStage::Reconnaissance => "reconnaissance",
            KillchainStage::InitialAccess => "initial_access",
            KillchainStage::Execution => "execution",
            KillchainStage::Exfiltration => "exfiltration",
            KillchainStage::Impact => "impact",
        }
    }
}

/// Security alert. Immutable once emitted, except for the active-probe
/// annotation appended to `description`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub source: String,
    pub target: String,
    pub protocol: Protocol,
    pub destination_port: u16,
    pub source_port: u16,
    pub destination_ip: IpAddr,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_classification: Option<MlClass>,
    #[serde(default)]
    pub ml_confidence: f64,
    #[serde(default)]
    pub ml_risk_score: f64,
    pub killchain_stage: KillchainStage,
}

/// Policy rule action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Block,
    Allow,
    Monitor,
}

/// Runtime-editable policy rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub name: String,
    pub action: PolicyAction,
    /// Substring matched against the destination `label|host|sni` concat;
    /// an empty service matches nothing.
    pub service: String,
    /// Department the rule applies to; "All" matches every source.
    pub department: String,
    pub severity: Severity,
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

/// New-rule request body (`id` is assigned by the server)
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRuleDraft {
    pub name: String,
    pub action: PolicyAction,
    pub service: String,
    #[serde(default = "default_department")]
    pub department: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn default_department() -> String {
    "All".to_string()
}

fn default_true() -> bool {
    true
}

/// Quarantine record held by the response manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub ip: IpAddr,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_alert_id: Option<String>,
}

impl BlocklistEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Fused output of the intelligence engine for one flow
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub classification: MlClass,
    /// Confidence of the classification in [0, 1]
    pub confidence: f64,
    /// Outlier score in [0, 1]
    pub anomaly: f64,
    /// Fused risk in [0, 100]
    pub risk: f64,
}

impl Verdict {
    /// Neutral verdict returned when no models are loaded.
    pub fn neutral() -> Self {
        Self {
            classification: MlClass::Normal,
            confidence: 0.0,
            anomaly: 0.0,
            risk: 0.0,
        }
    }
}

/// Check for RFC1918 / loopback space. The analyzer additionally honors
/// configured local prefixes.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Multicast (224.0.0.0/4 incl. SSDP) or limited broadcast.
pub fn is_multicast_or_broadcast(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_multicast() || v4.is_broadcast(),
        IpAddr::V6(v6) => v6.is_multicast(),
    }
}
