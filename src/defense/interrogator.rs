//! Active interrogation of suspicious destinations
//!
//! Sends two read-only HTTP probes (`OPTIONS /`, `GET /v1/models`) to
//! decide whether a destination hosts an AI API. Safety guards run before a
//! single byte leaves the host: internal, multicast and quarantined targets
//! are never probed, each target has a cooldown, and a global token bucket
//! caps the probe rate. At most two probes are in flight at once.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::{DefenseConfig, PipelineStats};
use crate::models::{is_multicast_or_broadcast, is_private_ip};

use super::ResponseManager;

/// Concurrent in-flight probe limit
const MAX_IN_FLIGHT: usize = 2;

/// Header markers identifying AI vendors
const VENDOR_HEADER_PREFIXES: &[&str] = &["openai-"];
const VENDOR_HEADERS: &[&str] = &["anthropic-request-id", "anthropic-version"];

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// A safety guard or the rate limiter stopped the probe. Not an error
    /// in the pipeline sense; counted separately.
    #[error("probe skipped: {0}")]
    Skipped(&'static str),

    #[error("probe request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Outcome of a completed interrogation
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub target: String,
    pub confirmed_ai: bool,
    pub indicators: Vec<String>,
    pub status: Option<u16>,
}

/// Rate-limited probe scheduler.
pub struct Interrogator {
    enabled: bool,
    client: reqwest::Client,
    cooldown: Duration,
    max_per_minute: usize,
    cooldowns: Mutex<HashMap<String, Instant>>,
    window: Mutex<VecDeque<Instant>>,
    in_flight: Arc<Semaphore>,
    stats: Arc<PipelineStats>,
}

impl Interrogator {
    pub fn new(config: &DefenseConfig, stats: Arc<PipelineStats>) -> anyhow::Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs.max(1)))
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;

        Ok(Arc::new(Self {
            enabled: config.probing_enabled,
            client,
            cooldown: Duration::from_secs(config.probe_cooldown_secs),
            max_per_minute: config.max_probes_per_minute,
            cooldowns: Mutex::new(HashMap::new()),
            window: Mutex::new(VecDeque::new()),
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
            stats,
        }))
    }

    /// All guards must pass before any traffic is emitted. On success the
    /// rate window and cooldown are charged immediately so concurrent
    /// callers cannot exceed the limit together.
    fn check_guards(
        &self,
        target: &str,
        destination_ip: &IpAddr,
        response: &ResponseManager,
    ) -> Result<(), ProbeError> {
        if !self.enabled {
            return Err(ProbeError::Skipped("probing disabled"));
        }
        if is_private_ip(destination_ip) || is_multicast_or_broadcast(destination_ip) {
            return Err(ProbeError::Skipped("destination not external"));
        }
        if response.is_blocked(destination_ip) {
            return Err(ProbeError::Skipped("destination quarantined"));
        }

        let now = Instant::now();

        {
            let cooldowns = self.cooldowns.lock();
            if let Some(last) = cooldowns.get(target) {
                if now.duration_since(*last) < self.cooldown {
                    return Err(ProbeError::Skipped("target on cooldown"));
                }
            }
        }

        {
            let mut window = self.window.lock();
            while let Some(front) = window.front() {
                if now.duration_since(*front) >= Duration::from_secs(60) {
                    window.pop_front();
                } else {
                    break;
                }
            }
            if window.len() >= self.max_per_minute {
                return Err(ProbeError::Skipped("probe rate limit reached"));
            }
            window.push_back(now);
        }

        self.cooldowns.lock().insert(target.to_string(), now);
        Ok(())
    }

    /// Probe a target and classify it. `target` is a hostname or IP
    /// literal; probes always go out over HTTPS.
    pub async fn interrogate(
        &self,
        target: &str,
        destination_ip: &IpAddr,
        response: &ResponseManager,
    ) -> Result<ProbeReport, ProbeError> {
        if let Err(err) = self.check_guards(target, destination_ip, response) {
            self.stats.probes_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(probe_target = target, %err, "probe skipped");
            return Err(err);
        }

        let Ok(_permit) = self.in_flight.clone().acquire_owned().await else {
            self.stats.probes_skipped.fetch_add(1, Ordering::Relaxed);
            return Err(ProbeError::Skipped("probe pool closed"));
        };
        self.stats.probes_sent.fetch_add(1, Ordering::Relaxed);

        let mut indicators = Vec::new();
        let mut status = None;

        let options_url = format!("https://{target}/");
        match self.client.request(reqwest::Method::OPTIONS, &options_url).send().await {
            Ok(resp) => {
                status = Some(resp.status().as_u16());
                collect_header_indicators(resp.headers(), &mut indicators);
            }
            Err(err) => debug!(probe_target = target, %err, "OPTIONS probe failed"),
        }

        let models_url = format!("https://{target}/v1/models");
        match self.client.get(&models_url).send().await {
            Ok(resp) => {
                status = Some(resp.status().as_u16());
                collect_header_indicators(resp.headers(), &mut indicators);
                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    if body_lists_models(&body) {
                        indicators.push("models_listing".to_string());
                    }
                }
            }
            Err(err) => {
                if indicators.is_empty() && status.is_none() {
                    self.stats.probes_failed.fetch_add(1, Ordering::Relaxed);
                    return Err(ProbeError::Request(err));
                }
                debug!(probe_target = target, %err, "GET /v1/models probe failed");
            }
        }

        let confirmed_ai = indicators.iter().any(|i| i == "models_listing")
            || indicators.iter().any(|i| i.starts_with("header:"));

        if confirmed_ai {
            info!(probe_target = target, ?indicators, "active probe confirmed AI service");
        } else {
            debug!(probe_target = target, ?indicators, "active probe unconfirmed");
        }

        Ok(ProbeReport {
            target: target.to_string(),
            confirmed_ai,
            indicators,
            status,
        })
    }
}

fn collect_header_indicators(headers: &reqwest::header::HeaderMap, indicators: &mut Vec<String>) {
    for name in headers.keys() {
        let name_str = name.as_str().to_ascii_lowercase();
        let vendor = VENDOR_HEADER_PREFIXES.iter().any(|p| name_str.starts_with(p))
            || VENDOR_HEADERS.contains(&name_str.as_str());
        if vendor {
            let marker = format!("header:{name_str}");
            if !indicators.contains(&marker) {
                indicators.push(marker);
            }
        }
    }
}

/// An AI model listing is a JSON body containing an array of objects that
/// carry `id` fields, either at the top level or under `data`.
fn body_lists_models(body: &serde_json::Value) -> bool {
    fn is_model_array(value: &serde_json::Value) -> bool {
        value
            .as_array()
            .map(|items| !items.is_empty() && items.iter().all(|i| i.get("id").is_some()))
            .unwrap_or(false)
    }

    is_model_array(body) || body.get("data").map(is_model_array).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use serde_json::json;

    fn interrogator(config: &DefenseConfig) -> Arc<Interrogator> {
        Interrogator::new(config, Arc::new(PipelineStats::default())).unwrap()
    }

    fn response_manager() -> Arc<ResponseManager> {
        ResponseManager::new(&DefenseConfig::default(), Arc::new(Broker::new()))
    }

    #[test]
    fn model_listing_detection() {
        assert!(body_lists_models(&json!({
            "data": [{"id": "gpt-4"}, {"id": "gpt-3.5-turbo"}]
        })));
        assert!(body_lists_models(&json!([{"id": "claude-3"}])));
        assert!(!body_lists_models(&json!({"data": []})));
        assert!(!body_lists_models(&json!({"models": ["a", "b"]})));
        assert!(!body_lists_models(&json!("hello")));
    }

    #[tokio::test]
    async fn guards_reject_internal_targets() {
        let probe = interrogator(&DefenseConfig::default());
        let response = response_manager();
        let err = probe
            .interrogate("192.168.1.5", &"192.168.1.5".parse().unwrap(), &response)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Skipped(_)));
    }

    #[tokio::test]
    async fn guards_reject_quarantined_targets() {
        let probe = interrogator(&DefenseConfig::default());
        let response = response_manager();
        let ip: IpAddr = "198.51.100.9".parse().unwrap();
        response.block(ip, None, "critical", None);

        let err = probe
            .interrogate("198.51.100.9", &ip, &response)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Skipped("destination quarantined")));
    }

    #[test]
    fn rate_limit_boundary_is_exact() {
        let config = DefenseConfig {
            max_probes_per_minute: 10,
            probe_cooldown_secs: 300,
            ..Default::default()
        };
        let probe = interrogator(&config);
        let response = response_manager();

        // Ten distinct targets pass the window; the eleventh is dropped.
        for i in 0..10 {
            let ip: IpAddr = format!("203.0.113.{}", i + 1).parse().unwrap();
            probe
                .check_guards(&format!("host{i}.example"), &ip, &response)
                .unwrap();
        }
        let ip: IpAddr = "203.0.113.99".parse().unwrap();
        let err = probe.check_guards("host10.example", &ip, &response).unwrap_err();
        assert!(matches!(err, ProbeError::Skipped("probe rate limit reached")));
    }

    #[test]
    fn per_target_cooldown_blocks_reprobe() {
        let probe = interrogator(&DefenseConfig::default());
        let response = response_manager();
        let ip: IpAddr = "203.0.113.50".parse().unwrap();

        probe.check_guards("api.example", &ip, &response).unwrap();
        let err = probe.check_guards("api.example", &ip, &response).unwrap_err();
        assert!(matches!(err, ProbeError::Skipped("target on cooldown")));
    }

    #[test]
    fn disabled_interrogator_skips_everything() {
        let config = DefenseConfig {
            probing_enabled: false,
            ..Default::default()
        };
        let probe = interrogator(&config);
        let response = response_manager();
        let ip: IpAddr = "203.0.113.60".parse().unwrap();
        let err = probe.check_guards("x.example", &ip, &response).unwrap_err();
        assert!(matches!(err, ProbeError::Skipped("probing disabled")));
    }
}
