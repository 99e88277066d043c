//! Built-in detection rules

use crate::models::{FlowEvent, PolicyAction, Protocol, Severity};

use super::{DetectContext, Detector, RuleHit};

/// Outbound ports considered unremarkable for internal endpoints
const KNOWN_OUTBOUND_PORTS: &[u16] = &[53, 80, 443, 8080, 22];

/// DNS payloads above this total size suggest tunneling
const DNS_TUNNEL_BYTES: u64 = 500;

/// Single-flow upload size that triggers the exfiltration rule
const EXFIL_BYTES_SENT: u64 = 500_000;

/// Flags traffic whose HTTP Host or TLS SNI resolves to a known AI service.
pub struct AiDomainDetector;

impl Detector for AiDomainDetector {
    fn name(&self) -> &'static str {
        "ai_domain"
    }

    fn detect(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        let host = event
            .metadata
            .get("host")
            .or_else(|| event.metadata.get("sni"));

        let Some(host) = host else {
            return Vec::new();
        };
        let Some((base, category)) = ctx.engine.intel.ai_domains.lookup(host) else {
            return Vec::new();
        };

        vec![RuleHit::new(
            Severity::High,
            format!("ai_domain:{base}"),
            format!("Known AI service [{category}] accessed: {host}"),
        )
        .with_category(category)]
    }
}

/// Matches destination IPs against AI provider CIDR blocks, catching
/// SDK-pinned or DNS-bypassing access.
pub struct CidrIntelDetector;

impl Detector for CidrIntelDetector {
    fn name(&self) -> &'static str {
        "cidr_intel"
    }

    fn detect(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        let Some(hit) = ctx.engine.intel.cidr.lookup(&event.destination_ip) else {
            return Vec::new();
        };

        vec![RuleHit::new(
            hit.risk,
            format!("cidr_intel:{}", hit.cidr),
            format!(
                "Destination {} belongs to {} ({}): {}",
                event.destination_ip, hit.provider, hit.service, hit.data_risk
            ),
        )
        .with_category(hit.category)]
    }
}

/// JA3 fingerprint checks: known offensive tooling and User-Agent spoofing.
pub struct Ja3Detector;

impl Detector for Ja3Detector {
    fn name(&self) -> &'static str {
        "ja3"
    }

    fn detect(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        let Some(hash) = event.ja3_hash.as_deref() else {
            return Vec::new();
        };
        let mut hits = Vec::new();

        if let Some(entry) = ctx.engine.intel.ja3.lookup(hash) {
            if ctx.engine.intel.ja3.is_attack_tool(hash) {
                hits.push(
                    RuleHit::new(
                        Severity::High,
                        "ja3_malware",
                        format!("Attack tool TLS fingerprint: {} ({})", entry.client_name, entry.description),
                    )
                    .with_category("attack_tool"),
                );
            }
        }

        if let Some(user_agent) = event.metadata.get("user_agent") {
            if let Some(spoof) = ctx.engine.intel.ja3.detect_spoofing(hash, user_agent) {
                hits.push(
                    RuleHit::new(
                        Severity::High,
                        "identity_spoofing",
                        format!(
                            "User-Agent claims a browser but TLS fingerprint is {} ({})",
                            spoof.ja3_client,
                            spoof.ja3_category.as_str()
                        ),
                    )
                    .with_category("identity_spoofing"),
                );
            }
        }

        hits
    }
}

/// Internal endpoints reaching external hosts on unexpected ports.
pub struct AbnormalPortDetector;

impl Detector for AbnormalPortDetector {
    fn name(&self) -> &'static str {
        "abnormal_outbound_port"
    }

    fn detect(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        if !matches!(event.protocol, Protocol::Tcp | Protocol::Udp) {
            return Vec::new();
        }
        if !ctx.engine.is_internal(&event.source_ip) || ctx.engine.is_internal(&event.destination_ip) {
            return Vec::new();
        }
        if KNOWN_OUTBOUND_PORTS.contains(&event.destination_port) {
            return Vec::new();
        }

        vec![RuleHit::new(
            Severity::Medium,
            "abnormal_outbound_port",
            format!(
                "Outbound traffic to {} on unusual port {}",
                event.destination_ip, event.destination_port
            ),
        )]
    }
}

/// Oversized DNS payloads indicating tunneling.
pub struct DnsTunnelDetector;

impl Detector for DnsTunnelDetector {
    fn name(&self) -> &'static str {
        "dns_tunneling"
    }

    fn detect(&self, event: &FlowEvent, _ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        if event.protocol != Protocol::Dns || event.total_bytes() <= DNS_TUNNEL_BYTES {
            return Vec::new();
        }

        vec![RuleHit::new(
            Severity::Medium,
            "dns_tunneling",
            format!(
                "Potential DNS tunneling: {} bytes in a DNS exchange",
                event.total_bytes()
            ),
        )]
    }
}

/// Large single-flow uploads from internal hosts to external ones.
pub struct ExfiltrationDetector;

impl Detector for ExfiltrationDetector {
    fn name(&self) -> &'static str {
        "data_exfiltration"
    }

    fn detect(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        if !ctx.engine.is_internal(&event.source_ip) || ctx.engine.is_internal(&event.destination_ip) {
            return Vec::new();
        }
        if event.bytes_sent <= EXFIL_BYTES_SENT {
            return Vec::new();
        }

        vec![RuleHit::new(
            Severity::High,
            "data_exfiltration",
            format!(
                "Large upload ({} KB) to external host {}",
                event.bytes_sent / 1024,
                event.destination_ip
            ),
        )]
    }
}

/// Evaluates the runtime-editable policy rules against the destination
/// service name and the source department.
pub struct PolicyRuleDetector;

impl Detector for PolicyRuleDetector {
    fn name(&self) -> &'static str {
        "policy"
    }

    fn detect(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        let haystack = format!(
            "{}|{}|{}",
            ctx.destination_label,
            event.metadata.get("host").map(String::as_str).unwrap_or(""),
            event.metadata.get("sni").map(String::as_str).unwrap_or("")
        )
        .to_ascii_lowercase();

        let mut hits = Vec::new();
        for rule in ctx.rules.iter().filter(|r| r.enabled) {
            // An empty service matches nothing, not everything.
            if rule.service.is_empty() {
                continue;
            }
            if !haystack.contains(&rule.service.to_ascii_lowercase()) {
                continue;
            }
            let department_ok = rule.department.eq_ignore_ascii_case("All")
                || ctx
                    .source_department
                    .map(|d| d.eq_ignore_ascii_case(&rule.department))
                    .unwrap_or(false);
            if !department_ok {
                continue;
            }

            let action = match rule.action {
                PolicyAction::Block => "block",
                PolicyAction::Allow => "allow",
                PolicyAction::Monitor => "monitor",
            };
            let mut hit = RuleHit::new(
                rule.severity,
                rule.id.clone(),
                format!("Policy rule matched: {} ({action})", rule.name),
            )
            .with_category(format!("policy_{action}"));
            hit.block_requested = rule.action == PolicyAction::Block;
            hits.push(hit);
        }
        hits
    }
}
