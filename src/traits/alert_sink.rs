//! Alerting sink
//!
//! Fire-and-forget operator notifications. Persistent recovery/fence
//! failures and heartbeat-write exhaustion raise alerts here; delivery
//! (email, webhook, pager) is the surrounding system's concern.

use async_trait::async_trait;

use crate::domain::types::{Alert, AlertSeverity};

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert);
}

/// Sink that writes alerts to the tracing log. Default for stand-alone runs.
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn raise(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                resource_id = ?alert.resource_id,
                subject = %alert.subject,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                resource_id = ?alert.resource_id,
                subject = %alert.subject,
                "{}",
                alert.message
            ),
            AlertSeverity::Info => tracing::info!(
                resource_id = ?alert.resource_id,
                subject = %alert.subject,
                "{}",
                alert.message
            ),
        }
    }
}
