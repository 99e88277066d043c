//! Graph discovery endpoints

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::analytics::risk;
use crate::models::{Edge, Node, NodeType, Severity};

use super::{ApiError, AppState};

pub async fn nodes(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(state.store.list_nodes()?))
}

pub async fn edges(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Edge>>, ApiError> {
    Ok(Json(state.store.list_edges()?))
}

pub async fn risk_scores(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<risk::RiskScore>>, ApiError> {
    let alerts = state.alerts.snapshot();
    let edges = state.store.list_edges()?;
    Ok(Json(risk::risk_scores(&alerts, &edges)))
}

pub async fn traffic_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let nodes = state.store.list_nodes()?;
    let edges = state.store.list_edges()?;
    let alerts = state.alerts.snapshot();

    let mut protocol_counts: HashMap<String, usize> = HashMap::new();
    let mut dst_bytes: HashMap<&str, u64> = HashMap::new();
    for edge in &edges {
        *protocol_counts.entry(edge.protocol.to_string()).or_default() += 1;
        *dst_bytes.entry(edge.target.as_str()).or_default() += edge.byte_count;
    }
    let mut protocol_distribution: Vec<serde_json::Value> = protocol_counts
        .into_iter()
        .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
        .collect();
    protocol_distribution.sort_by_key(|v| std::cmp::Reverse(v["value"].as_u64().unwrap_or(0)));

    let mut top_destinations: Vec<(&str, u64)> = dst_bytes.into_iter().collect();
    top_destinations.sort_by_key(|(_, bytes)| std::cmp::Reverse(*bytes));
    top_destinations.truncate(10);
    let top_destinations: Vec<serde_json::Value> = top_destinations
        .into_iter()
        .map(|(destination, bytes)| serde_json::json!({ "destination": destination, "bytes": bytes }))
        .collect();

    let count_type =
        |t: NodeType| nodes.iter().filter(|n| n.node_type == t).count();
    let count_severity =
        |s: Severity| alerts.iter().filter(|a| a.severity == s).count();

    let stats = state.ctx.stats.snapshot();

    Ok(Json(serde_json::json!({
        "totals": {
            "total_nodes": nodes.len(),
            "total_connections": edges.len(),
            "total_alerts": alerts.len(),
            "events_processed": stats.get("events_processed"),
            "broker_dropped": state.broker.dropped_total(),
        },
        "node_types": {
            "internal": count_type(NodeType::Internal),
            "external": count_type(NodeType::External),
            "shadow_ai": count_type(NodeType::Shadow),
        },
        "protocol_distribution": protocol_distribution,
        "severity_distribution": {
            "HIGH": count_severity(Severity::High),
            "MEDIUM": count_severity(Severity::Medium),
            "LOW": count_severity(Severity::Low),
        },
        "top_destinations": top_destinations,
    })))
}
