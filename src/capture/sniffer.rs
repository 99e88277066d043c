//! Live packet sniffer
//!
//! Taps a pcap device, assembles bidirectional byte counts per 5-tuple over
//! a rolling window, runs DPI (HTTP Host, TLS SNI + JA3, DNS qname), and
//! publishes one flow event per window. Non-IP, loopback and multicast
//! traffic is dropped at the source.
//!
//! The capture loop runs on a dedicated OS thread; the broker publish path
//! is non-blocking so the loop never stalls on a slow consumer.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use tracing::{debug, info, warn};

use crate::broker::{Broker, BusMessage, TOPIC_TRAFFIC};
use crate::config::CaptureConfig;
use crate::models::{is_multicast_or_broadcast, FlowEvent, Protocol};

use super::dns::parse_qname;
use super::tls::parse_client_hello;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlowKey {
    src: IpAddr,
    dst: IpAddr,
    sport: u16,
    dport: u16,
    protocol: Protocol,
}

impl FlowKey {
    fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            sport: self.dport,
            dport: self.sport,
            protocol: self.protocol,
        }
    }
}

struct FlowAccumulator {
    bytes_sent: u64,
    bytes_received: u64,
    first_seen: Instant,
    ja3: Option<String>,
    metadata: HashMap<String, String>,
}

impl FlowAccumulator {
    fn new() -> Self {
        Self {
            bytes_sent: 0,
            bytes_received: 0,
            first_seen: Instant::now(),
            ja3: None,
            metadata: HashMap::new(),
        }
    }
}

/// Handle over the running capture thread.
pub struct SnifferHandle {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    packets: Arc<AtomicU64>,
}

impl SnifferHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn packets_seen(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }
}

/// Open the capture device and start the sniffing thread. Fails fast when
/// capture init is impossible (missing privileges, unknown interface) so
/// the launcher can abort with the capture exit code.
pub fn start(config: &CaptureConfig, broker: Arc<Broker>) -> Result<SnifferHandle> {
    let device = match &config.interface {
        Some(name) => pcap::Device::list()
            .context("listing capture devices")?
            .into_iter()
            .find(|d| d.name == *name)
            .with_context(|| format!("capture interface not found: {name}"))?,
        None => pcap::Device::lookup()
            .context("looking up default capture device")?
            .context("no capture device available")?,
    };
    info!(device = %device.name, "starting live capture");

    let capture = pcap::Capture::from_device(device)
        .context("opening capture device")?
        .promisc(true)
        .snaplen(config.snaplen)
        .timeout(500)
        .open()
        .context("activating capture (are you root?)")?;

    let stop = Arc::new(AtomicBool::new(false));
    let packets = Arc::new(AtomicU64::new(0));
    let window = Duration::from_secs(config.flow_window_secs.max(1));

    let thread = {
        let stop = stop.clone();
        let packets = packets.clone();
        std::thread::Builder::new()
            .name("sh-sniffer".to_string())
            .spawn(move || capture_loop(capture, broker, stop, packets, window))
            .context("spawning capture thread")?
    };

    Ok(SnifferHandle {
        stop,
        thread: Some(thread),
        packets,
    })
}

fn capture_loop(
    mut capture: pcap::Capture<pcap::Active>,
    broker: Arc<Broker>,
    stop: Arc<AtomicBool>,
    packets: Arc<AtomicU64>,
    window: Duration,
) {
    let mut flows: HashMap<FlowKey, FlowAccumulator> = HashMap::new();
    let mut last_flush = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        match capture.next_packet() {
            Ok(packet) => {
                packets.fetch_add(1, Ordering::Relaxed);
                if let Some((key, payload_len, dpi)) = dissect(packet.data) {
                    record(&mut flows, key, payload_len, dpi);
                }
            }
            Err(pcap::Error::TimeoutExpired) => {}
            Err(err) => {
                warn!(%err, "capture read error");
                break;
            }
        }

        if last_flush.elapsed() >= window {
            flush(&mut flows, &broker, window);
            last_flush = Instant::now();
        }
    }

    // Final drain on shutdown.
    flush_all(&mut flows, &broker);
    debug!("capture loop stopped");
}

struct DpiResult {
    ja3: Option<String>,
    metadata: HashMap<String, String>,
}

/// Parse one frame down to a flow key plus DPI enrichment. Returns `None`
/// for frames the source drops (non-IP, loopback, multicast).
fn dissect(data: &[u8]) -> Option<(FlowKey, u64, DpiResult)> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src, dst) = match &sliced.net {
        Some(NetSlice::Ipv4(v4)) => (
            IpAddr::V4(v4.header().source_addr()),
            IpAddr::V4(v4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(v6)) => (
            IpAddr::V6(v6.header().source_addr()),
            IpAddr::V6(v6.header().destination_addr()),
        ),
        _ => return None,
    };

    if src.is_loopback() || dst.is_loopback() || is_multicast_or_broadcast(&dst) {
        return None;
    }

    let mut metadata = HashMap::new();
    let mut ja3 = None;

    let (sport, dport, protocol, payload): (u16, u16, Protocol, &[u8]) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let payload = tcp.payload();
            let sport = tcp.source_port();
            let dport = tcp.destination_port();

            // Protocol is derived from either port so a reply packet maps
            // onto the same (reversed) flow key as its request.
            let protocol = if dport == 443 || sport == 443 {
                Protocol::Https
            } else if dport == 80 || sport == 80 {
                Protocol::Http
            } else {
                Protocol::Tcp
            };

            // DPI only on client-to-server payloads.
            if dport == 80 && !payload.is_empty() {
                if let Some(host) = parse_http_host(payload) {
                    metadata.insert("host".to_string(), host);
                }
                if let Some(ua) = parse_http_user_agent(payload) {
                    metadata.insert("user_agent".to_string(), ua);
                }
            } else if dport == 443 && !payload.is_empty() {
                if let Some(hello) = parse_client_hello(payload) {
                    if let Some(sni) = hello.sni {
                        metadata.insert("sni".to_string(), sni);
                    }
                    ja3 = hello.ja3;
                }
            }

            (sport, dport, protocol, payload)
        }
        Some(TransportSlice::Udp(udp)) => {
            let payload = udp.payload();
            let sport = udp.source_port();
            let dport = udp.destination_port();
            let mut protocol = Protocol::Udp;

            if dport == 53 || sport == 53 {
                if let Some(qname) = parse_qname(payload) {
                    metadata.insert("dns_query".to_string(), qname);
                }
                protocol = Protocol::Dns;
            }

            (sport, dport, protocol, payload)
        }
        _ => return None,
    };

    let key = FlowKey {
        src,
        dst,
        sport,
        dport,
        protocol,
    };
    Some((key, payload.len() as u64, DpiResult { ja3, metadata }))
}

fn record(
    flows: &mut HashMap<FlowKey, FlowAccumulator>,
    key: FlowKey,
    payload_len: u64,
    dpi: DpiResult,
) {
    // A packet matching an existing reverse flow is return traffic.
    if let Some(acc) = flows.get_mut(&key.reversed()) {
        acc.bytes_received += payload_len;
        return;
    }

    let acc = flows.entry(key).or_insert_with(FlowAccumulator::new);
    acc.bytes_sent += payload_len;
    if acc.ja3.is_none() {
        acc.ja3 = dpi.ja3;
    }
    for (k, v) in dpi.metadata {
        acc.metadata.entry(k).or_insert(v);
    }
}

fn flush(flows: &mut HashMap<FlowKey, FlowAccumulator>, broker: &Broker, window: Duration) {
    let ready: Vec<FlowKey> = flows
        .iter()
        .filter(|(_, acc)| acc.first_seen.elapsed() >= window)
        .map(|(key, _)| key.clone())
        .collect();

    for key in ready {
        if let Some(acc) = flows.remove(&key) {
            publish(broker, key, acc);
        }
    }
}

fn flush_all(flows: &mut HashMap<FlowKey, FlowAccumulator>, broker: &Broker) {
    for (key, acc) in flows.drain() {
        publish(broker, key, acc);
    }
}

fn publish(broker: &Broker, key: FlowKey, acc: FlowAccumulator) {
    let mut metadata = acc.metadata;
    metadata.insert(
        "duration_ms".to_string(),
        acc.first_seen.elapsed().as_millis().to_string(),
    );

    let event = FlowEvent {
        timestamp: Utc::now(),
        source_ip: key.src,
        destination_ip: key.dst,
        source_port: key.sport,
        destination_port: key.dport,
        protocol: key.protocol,
        bytes_sent: acc.bytes_sent,
        bytes_received: acc.bytes_received,
        ja3_hash: acc.ja3,
        metadata,
    };
    broker.publish(TOPIC_TRAFFIC, BusMessage::Flow(Box::new(event)));
}

fn parse_http_header(payload: &[u8], header: &str) -> Option<String> {
    let text = std::str::from_utf8(&payload[..payload.len().min(2048)]).ok()?;
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.eq_ignore_ascii_case(header) {
            return Some(value.trim().to_string());
        }
    }
    None
}

fn parse_http_host(payload: &[u8]) -> Option<String> {
    parse_http_header(payload, "host")
}

fn parse_http_user_agent(payload: &[u8]) -> Option<String> {
    parse_http_header(payload, "user-agent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_header_parsing() {
        let req = b"GET / HTTP/1.1\r\nHost: api.openai.com\r\nUser-Agent: curl/8.0\r\n\r\n";
        assert_eq!(parse_http_host(req).as_deref(), Some("api.openai.com"));
        assert_eq!(parse_http_user_agent(req).as_deref(), Some("curl/8.0"));
        assert!(parse_http_host(b"\x16\x03\x01").is_none());
    }

    #[test]
    fn reverse_packets_count_as_received() {
        let mut flows = HashMap::new();
        let key = FlowKey {
            src: "192.168.1.20".parse().unwrap(),
            dst: "203.0.113.5".parse().unwrap(),
            sport: 51000,
            dport: 443,
            protocol: Protocol::Https,
        };

        let dpi = || DpiResult {
            ja3: None,
            metadata: HashMap::new(),
        };
        record(&mut flows, key.clone(), 100, dpi());
        record(&mut flows, key.reversed(), 250, dpi());

        assert_eq!(flows.len(), 1);
        let acc = flows.get(&key).unwrap();
        assert_eq!(acc.bytes_sent, 100);
        assert_eq!(acc.bytes_received, 250);
    }
}
