//! Synthetic corporate traffic generator (demo mode)
//!
//! Simulates a small office of personas with normal browsing habits,
//! internal service access, and a per-persona probability of sneaking in
//! unsanctioned AI usage. Event generation is fully driven by a seeded RNG
//! so a given seed reproduces the exact event sequence.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::broker::{Broker, BusMessage, TOPIC_TRAFFIC};
use crate::config::SyntheticConfig;
use crate::intel::ja3::PYTHON_REQUESTS_JA3;
use crate::models::{FlowEvent, Protocol};

struct Persona {
    name: &'static str,
    ip: &'static str,
    normal_sites: &'static [&'static str],
    /// Probability that a generated action is Shadow AI usage
    ai_temptation: f64,
    preferred_ai: &'static [&'static str],
}

const PERSONAS: &[Persona] = &[
    Persona {
        name: "Dev_Ravi",
        ip: "192.168.1.10",
        normal_sites: &[
            "github.com",
            "stackoverflow.com",
            "docs.python.org",
            "developer.mozilla.org",
            "crates.io",
        ],
        ai_temptation: 0.15,
        preferred_ai: &["copilot.microsoft.com", "cursor.sh", "chatgpt.com"],
    },
    Persona {
        name: "Designer_Priya",
        ip: "192.168.1.11",
        normal_sites: &[
            "figma.com",
            "dribbble.com",
            "fonts.google.com",
            "unsplash.com",
        ],
        ai_temptation: 0.12,
        preferred_ai: &["midjourney.com", "leonardo.ai"],
    },
    Persona {
        name: "Manager_Arjun",
        ip: "192.168.1.12",
        normal_sites: &[
            "mail.google.com",
            "calendar.google.com",
            "slack.com",
            "zoom.us",
        ],
        ai_temptation: 0.08,
        preferred_ai: &["chatgpt.com", "gemini.google.com"],
    },
    Persona {
        name: "DataSci_Meera",
        ip: "192.168.1.13",
        normal_sites: &[
            "kaggle.com",
            "jupyter.org",
            "scikit-learn.org",
            "arxiv.org",
        ],
        ai_temptation: 0.25,
        preferred_ai: &["huggingface.co", "api.openai.com", "api.anthropic.com"],
    },
    Persona {
        name: "Intern_Kiran",
        ip: "192.168.1.14",
        normal_sites: &[
            "google.com",
            "youtube.com",
            "reddit.com",
            "w3schools.com",
        ],
        ai_temptation: 0.30,
        preferred_ai: &["chatgpt.com", "claude.ai", "perplexity.ai"],
    },
];

struct InternalServer {
    ip: &'static str,
    port: u16,
}

const INTERNAL_SERVERS: &[InternalServer] = &[
    InternalServer { ip: "192.168.1.100", port: 445 },
    InternalServer { ip: "192.168.1.101", port: 22 },
    InternalServer { ip: "192.168.1.102", port: 8080 },
    InternalServer { ip: "192.168.1.200", port: 5432 },
];

/// Stable pseudo-public address for a domain so repeated visits build up a
/// single graph node.
fn external_ip_for(domain: &str) -> IpAddr {
    let mut acc: u32 = 0;
    for b in domain.bytes() {
        acc = acc.wrapping_mul(31).wrapping_add(b as u32);
    }
    let c = (acc >> 8) as u8;
    let d = (acc as u8).max(1);
    format!("151.101.{c}.{d}").parse().unwrap()
}

/// Persona-driven flow event source.
pub struct TrafficGenerator {
    rng: StdRng,
    min_per_sec: u32,
    max_per_sec: u32,
}

impl TrafficGenerator {
    pub fn new(config: &SyntheticConfig) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        info!(seed, "synthetic traffic generator seeded");
        Self {
            rng: StdRng::seed_from_u64(seed),
            min_per_sec: config.min_events_per_sec.max(1),
            max_per_sec: config.max_events_per_sec.max(config.min_events_per_sec.max(1)),
        }
    }

    /// Events for one simulated second.
    pub fn next_burst(&mut self) -> Vec<FlowEvent> {
        let count = self.rng.gen_range(self.min_per_sec..=self.max_per_sec);
        let mut events = Vec::with_capacity(count as usize);
        for _ in 0..count {
            events.push(self.next_event());
        }
        events
    }

    fn next_event(&mut self) -> FlowEvent {
        let persona = &PERSONAS[self.rng.gen_range(0..PERSONAS.len())];
        let roll: f64 = self.rng.gen();

        if roll < persona.ai_temptation {
            self.ai_event(persona)
        } else if roll < persona.ai_temptation + 0.15 {
            self.internal_event(persona)
        } else if roll < persona.ai_temptation + 0.25 {
            self.dns_event(persona)
        } else {
            self.browse_event(persona)
        }
    }

    fn base_event(
        &mut self,
        persona: &Persona,
        dst: IpAddr,
        dport: u16,
        protocol: Protocol,
    ) -> FlowEvent {
        let mut metadata = HashMap::new();
        metadata.insert("persona".to_string(), persona.name.to_string());
        FlowEvent {
            timestamp: Utc::now(),
            source_ip: persona.ip.parse().unwrap(),
            destination_ip: dst,
            source_port: self.rng.gen_range(49152..=65535),
            destination_port: dport,
            protocol,
            bytes_sent: 0,
            bytes_received: 0,
            ja3_hash: None,
            metadata,
        }
    }

    fn browse_event(&mut self, persona: &Persona) -> FlowEvent {
        let site = persona.normal_sites[self.rng.gen_range(0..persona.normal_sites.len())];
        let mut event = self.base_event(persona, external_ip_for(site), 443, Protocol::Https);
        event.bytes_sent = self.rng.gen_range(200..3000);
        event.bytes_received = self.rng.gen_range(5_000..50_000);
        event.metadata.insert("sni".to_string(), site.to_string());
        event.metadata.insert("host".to_string(), site.to_string());
        event
    }

    /// AI usage carries bigger payloads (prompts out, completions back) and
    /// occasionally a spoofed browser User-Agent over a scripting-client
    /// TLS stack.
    fn ai_event(&mut self, persona: &Persona) -> FlowEvent {
        let service = persona.preferred_ai[self.rng.gen_range(0..persona.preferred_ai.len())];
        let mut event = self.base_event(persona, external_ip_for(service), 443, Protocol::Https);
        event.bytes_sent = self.rng.gen_range(5_000..80_000);
        event.bytes_received = self.rng.gen_range(10_000..200_000);
        event.metadata.insert("sni".to_string(), service.to_string());
        event.metadata.insert("host".to_string(), service.to_string());

        if self.rng.gen_bool(0.15) {
            event.ja3_hash = Some(PYTHON_REQUESTS_JA3.to_string());
            event.metadata.insert(
                "user_agent".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0".to_string(),
            );
        }
        event
    }

    fn internal_event(&mut self, persona: &Persona) -> FlowEvent {
        let server = &INTERNAL_SERVERS[self.rng.gen_range(0..INTERNAL_SERVERS.len())];
        let mut event = self.base_event(
            persona,
            server.ip.parse().unwrap(),
            server.port,
            Protocol::Tcp,
        );
        event.bytes_sent = self.rng.gen_range(100..2_000);
        event.bytes_received = self.rng.gen_range(100..5_000);
        event
    }

    fn dns_event(&mut self, persona: &Persona) -> FlowEvent {
        let site = persona.normal_sites[self.rng.gen_range(0..persona.normal_sites.len())];
        let mut event = self.base_event(
            persona,
            "8.8.8.8".parse().unwrap(),
            53,
            Protocol::Dns,
        );
        event.bytes_sent = self.rng.gen_range(40..120);
        event.bytes_received = self.rng.gen_range(60..300);
        event.metadata.insert("dns_query".to_string(), site.to_string());
        event
    }
}

/// Run the generator until shutdown, publishing one burst per second.
pub async fn run(
    mut generator: TrafficGenerator,
    broker: Arc<Broker>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let burst = generator.next_burst();
                debug!(events = burst.len(), "synthetic burst");
                for event in burst {
                    broker.publish(TOPIC_TRAFFIC, BusMessage::Flow(Box::new(event)));
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
