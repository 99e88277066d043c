//! Derived analytics
//!
//! Pure functions over snapshots of the graph, the alert ring and the
//! policy rules. Nothing here mutates pipeline state; the API layer calls
//! these on demand.

pub mod briefing;
pub mod compliance;
pub mod dlp;
pub mod killchain;
pub mod profiles;
pub mod risk;
pub mod sessions;
pub mod timeline;

use crate::models::{Alert, MlClass};

/// An alert attributable to Shadow AI usage: either the AI-domain rule
/// fired or the classifier called it shadow_ai.
pub fn is_shadow_alert(alert: &Alert) -> bool {
    alert
        .matched_rule
        .as_deref()
        .map(|r| r.starts_with("ai_domain:") || r.starts_with("cidr_intel:"))
        .unwrap_or(false)
        || alert.ml_classification == Some(MlClass::ShadowAi)
}
