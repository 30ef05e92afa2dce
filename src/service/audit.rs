//! Audit trail for robot API access.
//!
//! Write-only: the engine records who asked what and whether the
//! request was admitted. Consumers pick the sink; the default one
//! writes a single structured log line per event.

use std::sync::{Mutex, PoisonError};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// 0 for anonymous callers.
    pub actor_id: i64,
    pub actor: String,
    pub owner: String,
    pub repo: String,
    pub endpoint: &'static str,
    pub ok: bool,
    /// Reason for denial when `ok` is false.
    pub reason: Option<String>,
    pub ts: OffsetDateTime,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Sink that emits one `tracing` line per event.
#[derive(Debug, Default)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        let status = if event.ok { "SUCCESS" } else { "DENIED" };
        let ts = event
            .ts
            .format(&Rfc3339)
            .unwrap_or_else(|_| event.ts.unix_timestamp().to_string());
        tracing::info!(
            target: "nextup::audit",
            status,
            actor = %event.actor,
            actor_id = event.actor_id,
            repo = %format_args!("{}/{}", event.owner, event.repo),
            endpoint = event.endpoint,
            reason = event.reason.as_deref().unwrap_or(""),
            %ts,
            "robot access"
        );
    }
}

/// Sink that keeps events in memory; for tests and embedders that ship
/// audit records elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
