//! Analyzer orchestrator
//!
//! The central pipeline. Flow events are consumed from the traffic topic,
//! partitioned by 5-tuple hash over a fixed set of workers (which preserves
//! per-flow ordering), then each event is enriched, written to the graph,
//! run through the rule detectors and the intelligence engine, and turned
//! into alerts. High-severity external destinations are handed to the
//! active-defense subsystem.
//!
//! Failure policy: store upserts retry with backoff and then give up
//! without surfacing anything to the producer; detector panics are
//! contained; alert publishing is best-effort.

pub mod ring;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::killchain;
use crate::broker::{Broker, BusMessage, ResponseEvent, TOPIC_ALERTS, TOPIC_GRAPH, TOPIC_RESPONSES, TOPIC_TRAFFIC};
use crate::config::EngineContext;
use crate::defense::{Interrogator, ResponseManager};
use crate::detect::{DetectContext, DetectorRegistry, RuleHit};
use crate::graph::{EdgePatch, GraphStore, NodePatch, StoreError};
use crate::ml::IntelligenceEngine;
use crate::models::{Alert, FlowEvent, MlClass, Node, NodeState, NodeType, Severity};

pub use ring::AlertRing;

/// Store retry backoff schedule
const RETRY_DELAYS_MS: [u64; 3] = [50, 200, 1000];

/// Node risk added per alert severity
fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::High => 20.0,
        Severity::Medium => 8.0,
        Severity::Low => 3.0,
    }
}

/// Long-lived analyzer state shared by all workers.
pub struct Analyzer {
    pub ctx: Arc<EngineContext>,
    pub broker: Arc<Broker>,
    pub store: GraphStore,
    pub ml: Arc<IntelligenceEngine>,
    pub interrogator: Arc<Interrogator>,
    pub response: Arc<ResponseManager>,
    pub alerts: Arc<AlertRing>,
    registry: DetectorRegistry,
}

/// Handle for shutting the pipeline down: stop intake, drain workers with a
/// grace period, then drop auxiliary tasks.
pub struct AnalyzerHandle {
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    aux: Vec<JoinHandle<()>>,
    drain_grace: Duration,
}

impl AnalyzerHandle {
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.dispatcher.await;

        let drain = async {
            for worker in &mut self.workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(self.drain_grace, drain).await.is_err() {
            warn!("drain grace expired; discarding queued events");
            for worker in &self.workers {
                worker.abort();
            }
        }

        for task in &self.aux {
            task.abort();
        }
        info!("analyzer stopped");
    }
}

impl Analyzer {
    pub fn new(
        ctx: Arc<EngineContext>,
        broker: Arc<Broker>,
        store: GraphStore,
        ml: Arc<IntelligenceEngine>,
        interrogator: Arc<Interrogator>,
        response: Arc<ResponseManager>,
    ) -> Arc<Self> {
        let alerts = Arc::new(AlertRing::new(ctx.config.analyzer.alert_ring_capacity));
        Arc::new(Self {
            ctx,
            broker,
            store,
            ml,
            interrogator,
            response,
            alerts,
            registry: DetectorRegistry::with_defaults(),
        })
    }

    /// Subscribe to the traffic topic and launch the worker fleet.
    pub fn start(self: &Arc<Self>) -> AnalyzerHandle {
        let worker_count = self.ctx.config.analyzer.workers.max(1);
        let queue_depth = self.ctx.config.analyzer.queue_depth.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let (tx, mut rx) = mpsc::channel::<FlowEvent>(queue_depth);
            senders.push(tx);
            let analyzer = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    analyzer.process_event(event).await;
                }
                debug!(worker_id, "analyzer worker drained");
            }));
        }

        // Subscribe before returning so no event published after start()
        // can be missed.
        let mut subscription = self.broker.subscribe_with_depth(TOPIC_TRAFFIC, queue_depth);

        let dispatcher = {
            let analyzer = Arc::clone(self);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        message = subscription.rx.recv() => {
                            match message {
                                Some(BusMessage::Flow(event)) => {
                                    let idx = (event.partition_hash() % senders.len() as u64) as usize;
                                    if senders[idx].send(*event).await.is_err() {
                                        break;
                                    }
                                }
                                Some(_) => {}
                                None => break,
                            }
                        }
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                analyzer.broker.unsubscribe(&subscription.token);
                // Dropping the senders lets workers finish their queues.
                drop(senders);
            })
        };

        let mut aux = Vec::new();
        aux.push(self.spawn_response_listener());
        aux.push(self.spawn_session_sweeper());

        AnalyzerHandle {
            shutdown_tx,
            dispatcher,
            workers,
            aux,
            drain_grace: Duration::from_secs(self.ctx.config.analyzer.drain_grace_secs),
        }
    }

    /// Track quarantine state fed back from the response manager over the
    /// bus instead of a direct reference.
    fn spawn_response_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let analyzer = Arc::clone(self);
        let mut subscription = self.broker.subscribe(TOPIC_RESPONSES);
        tokio::spawn(async move {
            while let Some(message) = subscription.rx.recv().await {
                let BusMessage::Response(event) = message else {
                    continue;
                };
                match event {
                    ResponseEvent::Blocked(entry) => {
                        analyzer.set_node_state(&entry.ip.to_string(), NodeState::Quarantined);
                    }
                    ResponseEvent::Unblocked(ip) => {
                        analyzer.release_quarantine(&ip.to_string());
                    }
                }
            }
        })
    }

    fn spawn_session_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let analyzer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                analyzer.ml.evict_stale_sessions(chrono::Utc::now());
            }
        })
    }

    fn set_node_state(&self, id: &str, state: NodeState) {
        if let Ok(Some(_)) = self.store.get_node(id) {
            let patch = NodePatch {
                state: Some(state),
                ..Default::default()
            };
            if let Err(err) = self.store.upsert_node(id, patch) {
                debug!(%err, id, "node state update failed");
            }
        }
    }

    fn release_quarantine(&self, id: &str) {
        if let Ok(Some(node)) = self.store.get_node(id) {
            if node.state == NodeState::Quarantined {
                self.set_node_state(id, NodeState::Flagged);
            }
        }
    }

    async fn upsert_with_retry<T, F>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let mut last_err = None;
        for (attempt, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(%err, attempt, "graph upsert failed, retrying");
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                }
            }
        }
        match op() {
            Ok(value) => Ok(value),
            Err(err) => Err(last_err.unwrap_or(err)),
        }
    }

    /// Full pipeline for one flow event.
    pub async fn process_event(self: &Arc<Self>, event: FlowEvent) {
        if event.source_ip.is_unspecified() || event.destination_ip.is_unspecified() {
            self.ctx.stats.input_malformed.fetch_add(1, Ordering::Relaxed);
            debug!("dropping malformed flow event");
            return;
        }
        self.ctx.stats.events_processed.fetch_add(1, Ordering::Relaxed);

        // 1. Classify endpoints.
        let host = event
            .metadata
            .get("host")
            .or_else(|| event.metadata.get("sni"))
            .cloned();
        let src_id = event.source_ip.to_string();
        let dst_id = event.destination_ip.to_string();
        let dst_label = host.clone().unwrap_or_else(|| dst_id.clone());

        let src_internal = self.ctx.is_internal(&event.source_ip);
        let dst_internal = self.ctx.is_internal(&event.destination_ip);
        let host_is_ai = host
            .as_deref()
            .map(|h| self.ctx.intel.ai_domains.is_ai_domain(h))
            .unwrap_or(false);

        let src_type = if src_internal {
            NodeType::Internal
        } else {
            NodeType::External
        };
        let dst_type = if host_is_ai {
            NodeType::Shadow
        } else if dst_internal {
            NodeType::Internal
        } else {
            NodeType::External
        };

        let department = self
            .ctx
            .department_of(&event.source_ip)
            .map(|d| d.to_string());

        // 2. Upsert the graph; detection still runs if this fails.
        let src_node = self.upsert_endpoints(&event, &src_id, src_type, &department, &dst_id, dst_type, &dst_label).await;

        // 3. Rules, then ML (the session tracker wants the rule outcome).
        let rules = self.ctx.policy.snapshot();
        let detect_ctx = DetectContext {
            engine: &self.ctx,
            rules,
            destination_label: &dst_label,
            source_department: department.as_deref(),
        };
        let hits = self.registry.run(&event, &detect_ctx);
        let rule_severity = hits.iter().map(|h| h.severity).max();
        let verdict = self.ml.analyze(&event, rule_severity);

        let ml_bucket = if verdict.risk < 30.0 {
            Severity::Low
        } else if verdict.risk < 70.0 {
            Severity::Medium
        } else {
            Severity::High
        };

        // 4. Emit an alert on any rule hit, or on a confident non-normal
        // ML call.
        let ml_triggered =
            verdict.classification != MlClass::Normal && verdict.confidence >= 0.7;
        if hits.is_empty() && !ml_triggered {
            self.decay_node_risk(&src_id, src_node).await;
            return;
        }

        let severity = rule_severity.unwrap_or(Severity::Low).max(ml_bucket);
        let alert = self.build_alert(&event, &hits, &verdict, severity, &src_id, &dst_label);
        let alert_id = alert.id.clone();
        let block_requested = hits.iter().any(|h| h.block_requested);

        self.alerts.push(alert.clone());
        self.ctx.stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        self.broker
            .publish(TOPIC_ALERTS, BusMessage::Alert(Box::new(alert)));

        // 5. Active defense gating.
        if severity == Severity::High && !dst_internal {
            self.dispatch_probe(&alert_id, host.as_deref().unwrap_or(&dst_id), &event, &dst_id);
        }
        let critical = severity == Severity::High
            && verdict.risk >= self.ctx.config.analyzer.critical_risk;
        if critical || block_requested {
            let target_ip = if dst_internal {
                event.source_ip
            } else {
                event.destination_ip
            };
            let reason = if block_requested {
                "policy block rule matched"
            } else {
                "critical ML risk"
            };
            self.response
                .block(target_ip, None, reason, Some(alert_id.clone()));
        }

        // 6. Update source node risk and lifecycle state.
        self.raise_node_risk(event.source_ip, &src_id, &dst_id, src_node, severity)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert_endpoints(
        &self,
        event: &FlowEvent,
        src_id: &str,
        src_type: NodeType,
        department: &Option<String>,
        dst_id: &str,
        dst_type: NodeType,
        dst_label: &str,
    ) -> Option<Node> {
        let timestamp = event.timestamp;

        let src_result = self
            .upsert_with_retry(|| {
                self.store.upsert_node(
                    src_id,
                    NodePatch {
                        node_type: Some(src_type),
                        label: Some(src_id.to_string()),
                        last_seen: Some(timestamp),
                        department: department.clone(),
                        ..Default::default()
                    },
                )
            })
            .await;

        let dst_result = self
            .upsert_with_retry(|| {
                self.store.upsert_node(
                    dst_id,
                    NodePatch {
                        node_type: Some(dst_type),
                        label: Some(dst_label.to_string()),
                        last_seen: Some(timestamp),
                        ..Default::default()
                    },
                )
            })
            .await;

        let edge_result = match (&src_result, &dst_result) {
            (Ok(_), Ok(_)) => {
                self.upsert_with_retry(|| {
                    self.store.upsert_edge(
                        src_id,
                        dst_id,
                        EdgePatch {
                            protocol: event.protocol,
                            dst_port: event.destination_port,
                            byte_delta: event.total_bytes(),
                            last_seen: timestamp,
                        },
                    )
                })
                .await
                .map(|_| ())
            }
            _ => Err(StoreError::MissingEndpoint(src_id.to_string())),
        };

        match (&src_result, &dst_result, &edge_result) {
            (Ok(_), Ok(_), Ok(())) => {
                self.broker.publish(TOPIC_GRAPH, BusMessage::GraphChanged);
            }
            _ => {
                self.ctx
                    .stats
                    .store_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                self.ctx
                    .stats
                    .dropped_analysis
                    .fetch_add(1, Ordering::Relaxed);
                warn!(src_id, dst_id, "graph upsert failed after retries");
            }
        }

        src_result.ok()
    }

    fn build_alert(
        &self,
        event: &FlowEvent,
        hits: &[RuleHit],
        verdict: &crate::models::Verdict,
        severity: Severity,
        src_id: &str,
        dst_label: &str,
    ) -> Alert {
        let description = if hits.is_empty() {
            format!(
                "ML classified traffic as {} ({:.0}% confidence)",
                verdict.classification,
                verdict.confidence * 100.0
            )
        } else {
            hits.iter()
                .map(|h| h.description.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };

        // Highest severity wins; first registered detector wins ties.
        let primary = hits.iter().rev().max_by_key(|h| h.severity);
        let ml_classification = if self.ml.models_loaded() {
            Some(verdict.classification)
        } else {
            None
        };
        let killchain_stage = killchain::stage_for(&description, ml_classification, severity);

        Alert {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: event.timestamp,
            severity,
            source: src_id.to_string(),
            target: dst_label.to_string(),
            protocol: event.protocol,
            destination_port: event.destination_port,
            source_port: event.source_port,
            destination_ip: event.destination_ip,
            bytes_sent: event.bytes_sent,
            bytes_received: event.bytes_received,
            description,
            matched_rule: primary.map(|h| h.matched_rule.clone()),
            category: primary.and_then(|h| h.category.clone()),
            ml_classification,
            ml_confidence: verdict.confidence,
            ml_risk_score: verdict.risk,
            killchain_stage,
        }
    }

    /// Probe a high-severity external destination in the background and
    /// fold the result back into the alert and the graph.
    fn dispatch_probe(self: &Arc<Self>, alert_id: &str, target: &str, event: &FlowEvent, dst_id: &str) {
        let analyzer = Arc::clone(self);
        let alert_id = alert_id.to_string();
        let target = target.to_string();
        let dst_id = dst_id.to_string();
        let dst_ip = event.destination_ip;

        tokio::spawn(async move {
            match analyzer
                .interrogator
                .interrogate(&target, &dst_ip, &analyzer.response)
                .await
            {
                Ok(report) => {
                    let annotation = if report.confirmed_ai {
                        " [Active probe: confirmed AI service]"
                    } else {
                        " [Active probe: unconfirmed]"
                    };
                    analyzer.alerts.annotate(&alert_id, annotation);
                    if report.confirmed_ai {
                        let patch = NodePatch {
                            node_type: Some(NodeType::Shadow),
                            ..Default::default()
                        };
                        if let Err(err) = analyzer.store.upsert_node(&dst_id, patch) {
                            debug!(%err, "shadow relabel after probe failed");
                        }
                    }
                }
                Err(err) => debug!(%err, probe_target = target, "probe did not complete"),
            }
        });
    }

    async fn raise_node_risk(
        &self,
        src_ip: std::net::IpAddr,
        src_id: &str,
        dst_id: &str,
        src_node: Option<Node>,
        severity: Severity,
    ) {
        let old_risk = src_node.map(|n| n.risk_score).unwrap_or(0.0);
        let new_risk = (0.9 * old_risk + severity_weight(severity)).min(100.0);
        let state = if self.response.is_blocked(&src_ip) {
            NodeState::Quarantined
        } else {
            NodeState::Flagged
        };

        let result = self
            .upsert_with_retry(|| {
                self.store.upsert_node(
                    src_id,
                    NodePatch {
                        risk_score: Some(new_risk),
                        alert_increment: 1,
                        state: Some(state),
                        ..Default::default()
                    },
                )
            })
            .await;
        if result.is_err() {
            self.ctx
                .stats
                .store_failures_total
                .fetch_add(1, Ordering::Relaxed);
        }

        let _ = self
            .upsert_with_retry(|| {
                self.store.upsert_node(
                    dst_id,
                    NodePatch {
                        alert_increment: 1,
                        ..Default::default()
                    },
                )
            })
            .await;
    }

    /// Quiet traffic lets a flagged node cool back down.
    async fn decay_node_risk(&self, src_id: &str, src_node: Option<Node>) {
        let Some(node) = src_node else {
            return;
        };
        if node.risk_score < 0.1 {
            return;
        }

        let new_risk = node.risk_score * 0.98;
        let state = if node.state == NodeState::Flagged && new_risk < 5.0 {
            Some(NodeState::Observed)
        } else {
            None
        };
        let _ = self.store.upsert_node(
            src_id,
            NodePatch {
                risk_score: Some(new_risk),
                state,
                ..Default::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DefenseConfig};
    use crate::ml::IntelligenceEngine;
    use crate::models::Protocol;
    use chrono::Utc;
    use std::collections::HashMap;

    fn analyzer_with(config: Config) -> Arc<Analyzer> {
        let ctx = EngineContext::new(config).unwrap();
        let broker = Arc::new(Broker::new());
        let store = GraphStore::open_memory().unwrap();
        let ml = Arc::new(IntelligenceEngine::cold());
        let interrogator = Interrogator::new(
            &DefenseConfig {
                probing_enabled: false,
                ..Default::default()
            },
            Arc::new(crate::config::PipelineStats::default()),
        )
        .unwrap();
        let response = ResponseManager::new(&ctx.config.defense, broker.clone());
        Analyzer::new(ctx, broker, store, ml, interrogator, response)
    }

    fn https_flow(src: &str, dst: &str, sni: Option<&str>) -> FlowEvent {
        let mut metadata = HashMap::new();
        if let Some(sni) = sni {
            metadata.insert("sni".to_string(), sni.to_string());
        }
        FlowEvent {
            timestamp: Utc::now(),
            source_ip: src.parse().unwrap(),
            destination_ip: dst.parse().unwrap(),
            source_port: 51000,
            destination_port: 443,
            protocol: Protocol::Https,
            bytes_sent: 2048,
            bytes_received: 8192,
            ja3_hash: None,
            metadata,
        }
    }

    #[tokio::test]
    async fn flow_creates_nodes_and_edge() {
        let analyzer = analyzer_with(Config::default());
        analyzer
            .process_event(https_flow("10.0.0.5", "203.0.113.9", None))
            .await;

        assert!(analyzer.store.get_node("10.0.0.5").unwrap().is_some());
        assert!(analyzer.store.get_node("203.0.113.9").unwrap().is_some());
        let edges = analyzer.store.list_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges[0].byte_count >= 2048);
    }

    #[tokio::test]
    async fn ai_domain_flow_raises_high_alert_and_shadow_node() {
        let analyzer = analyzer_with(Config::default());
        analyzer
            .process_event(https_flow("10.0.0.5", "104.18.32.7", Some("api.openai.com")))
            .await;

        let alerts = analyzer.alerts.snapshot();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.matched_rule.as_deref(), Some("ai_domain:openai.com"));
        assert_eq!(alert.category.as_deref(), Some("LLM"));
        assert_eq!(alert.target, "api.openai.com");

        let node = analyzer.store.get_node("104.18.32.7").unwrap().unwrap();
        assert_eq!(node.node_type, NodeType::Shadow);
        assert_eq!(node.label, "api.openai.com");

        let source = analyzer.store.get_node("10.0.0.5").unwrap().unwrap();
        assert_eq!(source.state, NodeState::Flagged);
        assert!(source.risk_score > 0.0);
        assert_eq!(source.alert_count, 1);
    }

    #[tokio::test]
    async fn replay_caps_risk_at_100() {
        let analyzer = analyzer_with(Config::default());
        for _ in 0..60 {
            analyzer
                .process_event(https_flow("10.0.0.5", "104.18.32.7", Some("api.openai.com")))
                .await;
        }
        let node = analyzer.store.get_node("10.0.0.5").unwrap().unwrap();
        assert!(node.risk_score <= 100.0);
    }

    #[tokio::test]
    async fn benign_flow_emits_no_alert() {
        let analyzer = analyzer_with(Config::default());
        analyzer
            .process_event(https_flow("10.0.0.5", "203.0.113.9", Some("example.com")))
            .await;
        assert!(analyzer.alerts.is_empty());
    }

    #[tokio::test]
    async fn abnormal_port_yields_medium_external_alert() {
        let analyzer = analyzer_with(Config::default());
        let mut event = https_flow("192.168.1.20", "203.0.113.5", None);
        event.protocol = Protocol::Tcp;
        event.destination_port = 6667;
        analyzer.process_event(event).await;

        let alerts = analyzer.alerts.snapshot();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(
            alerts[0].matched_rule.as_deref(),
            Some("abnormal_outbound_port")
        );

        let node = analyzer.store.get_node("203.0.113.5").unwrap().unwrap();
        assert_eq!(node.node_type, NodeType::External);
    }

    #[tokio::test]
    async fn block_rule_quarantines_destination() {
        let analyzer = analyzer_with(Config::default());
        // Finance workstation (192.168.1.12 by default mapping) hitting a
        // destination whose label matches the "chatgpt" block rule.
        analyzer
            .process_event(https_flow("192.168.1.12", "104.18.32.9", Some("chatgpt.com")))
            .await;

        assert!(analyzer
            .response
            .is_blocked(&"104.18.32.9".parse().unwrap()));
    }
}
