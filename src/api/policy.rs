//! Policy, analytics and quarantine endpoints

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use crate::analytics::{briefing, compliance, dlp, is_shadow_alert, killchain, profiles, sessions, timeline};
use crate::config::PolicyStoreError;
use crate::models::{Alert, BlocklistEntry, PolicyRule, PolicyRuleDraft, Severity};

use super::{ApiError, AppState};

/// Last 1000 alerts, newest first.
pub async fn alerts(State(state): State<Arc<AppState>>) -> Json<Vec<Alert>> {
    Json(state.alerts.snapshot_newest_first())
}

pub async fn timeline(State(state): State<Arc<AppState>>) -> Json<timeline::TimelineReport> {
    Json(timeline::report(&state.alerts.snapshot(), Utc::now()))
}

pub async fn profiles(State(state): State<Arc<AppState>>) -> Json<Vec<profiles::UserProfile>> {
    Json(profiles::profiles(&state.alerts.snapshot()))
}

pub async fn sessions(State(state): State<Arc<AppState>>) -> Json<Vec<sessions::Session>> {
    Json(sessions::sessions(&state.alerts.snapshot()))
}

pub async fn dlp(State(state): State<Arc<AppState>>) -> Json<dlp::DlpReport> {
    Json(dlp::incidents(&state.alerts.snapshot()))
}

pub async fn killchain(State(state): State<Arc<AppState>>) -> Json<killchain::KillchainReport> {
    Json(killchain::summarize(&state.alerts.snapshot()))
}

pub async fn compliance(State(state): State<Arc<AppState>>) -> Json<compliance::ComplianceReport> {
    let alerts = state.alerts.snapshot();
    let rules = state.ctx.policy.snapshot();
    Json(compliance::report(&alerts, &rules))
}

pub async fn briefing(State(state): State<Arc<AppState>>) -> Json<briefing::Briefing> {
    let alerts = state.alerts.snapshot();
    let chain = killchain::summarize(&alerts);
    Json(briefing::briefing(&alerts, &chain, Utc::now()))
}

/// Aggregate report for export tooling.
pub async fn report(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let alerts = state.alerts.snapshot();

    let mut sources: HashMap<&str, usize> = HashMap::new();
    let mut targets: HashMap<&str, usize> = HashMap::new();
    for alert in &alerts {
        *sources.entry(alert.source.as_str()).or_default() += 1;
        *targets.entry(alert.target.as_str()).or_default() += 1;
    }

    let mut top_sources: Vec<(&str, usize)> = sources.iter().map(|(k, v)| (*k, *v)).collect();
    top_sources.sort_by_key(|(ip, count)| (std::cmp::Reverse(*count), *ip));
    top_sources.truncate(10);
    let mut top_targets: Vec<(&str, usize)> = targets.iter().map(|(k, v)| (*k, *v)).collect();
    top_targets.sort_by_key(|(t, count)| (std::cmp::Reverse(*count), *t));
    top_targets.truncate(10);

    let shadow_alerts: Vec<&Alert> = alerts.iter().rev().filter(|a| is_shadow_alert(a)).take(20).collect();
    let count_severity = |s: Severity| alerts.iter().filter(|a| a.severity == s).count();

    Json(serde_json::json!({
        "generated_at": Utc::now(),
        "summary": {
            "total_alerts": alerts.len(),
            "shadow_ai_alerts": alerts.iter().filter(|a| is_shadow_alert(a)).count(),
            "unique_sources": sources.len(),
            "unique_targets": targets.len(),
        },
        "severity_breakdown": {
            "HIGH": count_severity(Severity::High),
            "MEDIUM": count_severity(Severity::Medium),
            "LOW": count_severity(Severity::Low),
        },
        "top_sources": top_sources
            .into_iter()
            .map(|(ip, count)| serde_json::json!({ "ip": ip, "alert_count": count }))
            .collect::<Vec<_>>(),
        "top_targets": top_targets
            .into_iter()
            .map(|(target, count)| serde_json::json!({ "target": target, "alert_count": count }))
            .collect::<Vec<_>>(),
        "shadow_ai_details": shadow_alerts,
        "recommendations": [
            "Review high-severity alerts for unauthorized AI service usage",
            "Block or monitor flagged AI domains at the egress",
            "Investigate top offending sources for policy compliance",
            "Enable endpoint DLP for AI-bound data flows",
        ],
    }))
}

// ── Policy rules CRUD ──

pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<PolicyRule>> {
    Json(state.ctx.policy.snapshot().as_ref().clone())
}

pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<PolicyRule>, ApiError> {
    let draft: PolicyRuleDraft = serde_json::from_value(body)
        .map_err(|err| ApiError::BadRequest(format!("invalid rule body: {err}")))?;
    if draft.name.trim().is_empty() {
        return Err(ApiError::BadRequest("rule name must not be empty".to_string()));
    }
    match state.ctx.policy.create(draft) {
        Ok(rule) => Ok(Json(rule)),
        Err(PolicyStoreError::Conflict) => Err(ApiError::Conflict(
            "a rule with the same name and service already exists".to_string(),
        )),
        Err(PolicyStoreError::NotFound) => Err(ApiError::NotFound),
    }
}

pub async fn toggle_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PolicyRule>, ApiError> {
    match state.ctx.policy.toggle(&id) {
        Ok(rule) => Ok(Json(rule)),
        Err(_) => Err(ApiError::NotFound),
    }
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.ctx.policy.delete(&id) {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(_) => Err(ApiError::NotFound),
    }
}

// ── Quarantine ──

pub async fn blocked(State(state): State<Arc<AppState>>) -> Json<Vec<BlocklistEntry>> {
    Json(state.response.list_blocked())
}

pub async fn unblock(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid IP literal: {ip}")))?;
    if state.response.unblock(&ip) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}
