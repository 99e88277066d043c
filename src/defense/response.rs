//! Auto-response blocklist
//!
//! In-memory TTL map of quarantined IPs with a hardcoded safe list, a
//! periodic sweeper, and expiry filtering on every read path. Blocklist
//! changes are announced on the response topic so the analyzer can track
//! quarantine state without holding a reference back into this module.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::broker::{Broker, BusMessage, ResponseEvent, TOPIC_RESPONSES};
use crate::config::DefenseConfig;
use crate::models::{is_multicast_or_broadcast, BlocklistEntry};

/// Infrastructure that must never be quarantined regardless of severity:
/// public resolvers and common default gateways. Loopback and multicast are
/// rejected structurally.
const SAFE_LIST: &[&str] = &[
    "8.8.8.8",
    "8.8.4.4",
    "1.1.1.1",
    "1.0.0.1",
    "192.168.1.1",
    "192.168.0.1",
    "10.0.0.1",
];

/// Result of a block attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Blocked,
    Refreshed,
    SafeListed,
    CapacityReached,
    Disabled,
}

/// TTL blocklist with audit counters.
pub struct ResponseManager {
    enabled: bool,
    default_ttl: Duration,
    max_blocked: usize,
    entries: Mutex<HashMap<IpAddr, BlocklistEntry>>,
    safe_list: Vec<IpAddr>,
    broker: Arc<Broker>,
    total_blocks: AtomicU64,
    total_unblocks: AtomicU64,
}

impl ResponseManager {
    pub fn new(config: &DefenseConfig, broker: Arc<Broker>) -> Arc<Self> {
        let safe_list = SAFE_LIST.iter().filter_map(|s| s.parse().ok()).collect();
        Arc::new(Self {
            enabled: config.auto_block_enabled,
            default_ttl: Duration::seconds(config.block_ttl_secs as i64),
            max_blocked: config.max_blocked,
            entries: Mutex::new(HashMap::new()),
            safe_list,
            broker,
            total_blocks: AtomicU64::new(0),
            total_unblocks: AtomicU64::new(0),
        })
    }

    fn is_safe_listed(&self, ip: &IpAddr) -> bool {
        if ip.is_loopback() || is_multicast_or_broadcast(ip) {
            return true;
        }
        self.safe_list.contains(ip)
    }

    /// Insert or refresh a quarantine entry. A `ttl` of `None` uses the
    /// configured default.
    pub fn block(
        &self,
        ip: IpAddr,
        ttl: Option<Duration>,
        reason: impl Into<String>,
        source_alert_id: Option<String>,
    ) -> BlockOutcome {
        if !self.enabled {
            return BlockOutcome::Disabled;
        }
        if self.is_safe_listed(&ip) {
            info!(%ip, "block refused: safe-listed address");
            return BlockOutcome::SafeListed;
        }

        let now = Utc::now();
        let reason = reason.into();
        let entry = BlocklistEntry {
            ip,
            inserted_at: now,
            expires_at: now + ttl.unwrap_or(self.default_ttl),
            reason: reason.clone(),
            source_alert_id,
        };

        let outcome = {
            let mut entries = self.entries.lock();
            entries.retain(|_, e| !e.is_expired(now));

            let refreshed = entries.contains_key(&ip);
            if !refreshed && entries.len() >= self.max_blocked {
                warn!(%ip, capacity = self.max_blocked, "blocklist capacity reached");
                return BlockOutcome::CapacityReached;
            }
            entries.insert(ip, entry.clone());
            if refreshed {
                BlockOutcome::Refreshed
            } else {
                BlockOutcome::Blocked
            }
        };

        if outcome == BlockOutcome::Blocked {
            self.total_blocks.fetch_add(1, Ordering::Relaxed);
            warn!(%ip, %reason, "IP quarantined");
        }
        self.broker.publish(
            TOPIC_RESPONSES,
            BusMessage::Response(ResponseEvent::Blocked(entry)),
        );
        outcome
    }

    pub fn unblock(&self, ip: &IpAddr) -> bool {
        let removed = self.entries.lock().remove(ip).is_some();
        if removed {
            self.total_unblocks.fetch_add(1, Ordering::Relaxed);
            info!(%ip, "IP released from quarantine");
            self.broker.publish(
                TOPIC_RESPONSES,
                BusMessage::Response(ResponseEvent::Unblocked(*ip)),
            );
        }
        removed
    }

    /// True iff a live (non-expired) entry exists.
    pub fn is_blocked(&self, ip: &IpAddr) -> bool {
        let now = Utc::now();
        self.entries
            .lock()
            .get(ip)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    /// Snapshot of live entries only.
    pub fn list_blocked(&self) -> Vec<BlocklistEntry> {
        let now = Utc::now();
        let mut entries: Vec<BlocklistEntry> = self
            .entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.inserted_at);
        entries
    }

    /// Remove expired entries and announce their release. Called by the
    /// background sweeper; read paths filter independently, so correctness
    /// does not depend on sweep timing.
    pub fn sweep(&self) {
        let now = Utc::now();
        let expired: Vec<IpAddr> = {
            let mut entries = self.entries.lock();
            let expired: Vec<IpAddr> = entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(ip, _)| *ip)
                .collect();
            for ip in &expired {
                entries.remove(ip);
            }
            expired
        };

        for ip in expired {
            self.total_unblocks.fetch_add(1, Ordering::Relaxed);
            info!(%ip, "quarantine expired");
            self.broker.publish(
                TOPIC_RESPONSES,
                BusMessage::Response(ResponseEvent::Unblocked(ip)),
            );
        }
    }

    /// Spawn the periodic sweeper.
    pub fn start_sweeper(self: &Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }

    pub fn stats(&self) -> (u64, u64, usize) {
        (
            self.total_blocks.load(Ordering::Relaxed),
            self.total_unblocks.load(Ordering::Relaxed),
            self.list_blocked().len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<ResponseManager> {
        ResponseManager::new(&DefenseConfig::default(), Arc::new(Broker::new()))
    }

    #[test]
    fn block_then_unblock_leaves_no_entry() {
        let mgr = manager();
        let ip: IpAddr = "198.51.100.9".parse().unwrap();

        assert_eq!(mgr.block(ip, None, "critical alert", None), BlockOutcome::Blocked);
        assert!(mgr.is_blocked(&ip));

        assert!(mgr.unblock(&ip));
        assert!(!mgr.is_blocked(&ip));
        assert!(mgr.list_blocked().is_empty());
    }

    #[test]
    fn safe_list_refuses_blocks() {
        let mgr = manager();
        assert_eq!(
            mgr.block("8.8.8.8".parse().unwrap(), None, "x", None),
            BlockOutcome::SafeListed
        );
        assert_eq!(
            mgr.block("127.0.0.1".parse().unwrap(), None, "x", None),
            BlockOutcome::SafeListed
        );
        assert_eq!(
            mgr.block("224.0.0.251".parse().unwrap(), None, "x", None),
            BlockOutcome::SafeListed
        );
        assert!(mgr.list_blocked().is_empty());
    }

    #[test]
    fn expired_entries_are_invisible_without_sweeping() {
        let mgr = manager();
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        mgr.block(ip, Some(Duration::seconds(-1)), "already expired", None);

        assert!(!mgr.is_blocked(&ip));
        assert!(mgr.list_blocked().is_empty());
    }

    #[test]
    fn sweep_announces_releases() {
        let broker = Arc::new(Broker::new());
        let mut sub = broker.subscribe(TOPIC_RESPONSES);
        let mgr = ResponseManager::new(&DefenseConfig::default(), broker);

        let ip: IpAddr = "203.0.113.8".parse().unwrap();
        mgr.block(ip, Some(Duration::seconds(-1)), "expired", None);
        mgr.sweep();

        // First message is the block, second the expiry release.
        let mut saw_unblock = false;
        while let Ok(msg) = sub.rx.try_recv() {
            if let BusMessage::Response(ResponseEvent::Unblocked(released)) = msg {
                assert_eq!(released, ip);
                saw_unblock = true;
            }
        }
        assert!(saw_unblock);
    }

    #[test]
    fn refresh_extends_ttl() {
        let mgr = manager();
        let ip: IpAddr = "198.51.100.10".parse().unwrap();
        assert_eq!(mgr.block(ip, None, "first", None), BlockOutcome::Blocked);
        assert_eq!(mgr.block(ip, None, "again", None), BlockOutcome::Refreshed);
        assert_eq!(mgr.list_blocked().len(), 1);
    }

    #[test]
    fn disabled_manager_blocks_nothing() {
        let config = DefenseConfig {
            auto_block_enabled: false,
            ..Default::default()
        };
        let mgr = ResponseManager::new(&config, Arc::new(Broker::new()));
        assert_eq!(
            mgr.block("198.51.100.9".parse().unwrap(), None, "x", None),
            BlockOutcome::Disabled
        );
    }
}
