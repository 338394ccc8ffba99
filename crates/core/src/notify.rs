//! Service notification coordination
//!
//! Executed actions can require a downstream service restart. The
//! coordinator tracks those requests with a deterministic contract:
//! one restart per service per convergence run, fired either
//! immediately (at the point the triggering action completes) or
//! deferred to end of run. An immediate restart suppresses any pending
//! deferred request for the same service.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// When a notification fires relative to its triggering action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timing {
    /// Fires the moment the triggering action completes, before any
    /// subsequent actions in the plan execute.
    Immediate,
    /// Batched and fired once at end of run.
    Deferred,
}

/// One recorded notification: triggering action identity, target
/// service, and timing mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    pub source: String,
    pub service: String,
    pub timing: Timing,
}

/// Per-run notification state. Discarded after the run.
#[derive(Debug, Default)]
pub struct NotificationCoordinator {
    fired: BTreeSet<String>,
    deferred: Vec<NotificationRecord>,
}

impl NotificationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an immediate restart of `service` triggered by `source`.
    ///
    /// Returns the record to act on now, or `None` when the service was
    /// already restarted earlier in this run.
    pub fn request_immediate(&mut self, source: &str, service: &str) -> Option<NotificationRecord> {
        if !self.fired.insert(service.to_string()) {
            debug!(service, source, "restart already fired this run, deduplicating");
            return None;
        }
        Some(NotificationRecord {
            source: source.to_string(),
            service: service.to_string(),
            timing: Timing::Immediate,
        })
    }

    /// Queue a deferred restart of `service` triggered by `source`.
    ///
    /// Duplicate requests for the same service collapse to one.
    pub fn request_deferred(&mut self, source: &str, service: &str) {
        if self.deferred.iter().any(|r| r.service == service) {
            debug!(service, source, "deferred restart already queued, deduplicating");
            return;
        }
        self.deferred.push(NotificationRecord {
            source: source.to_string(),
            service: service.to_string(),
            timing: Timing::Deferred,
        });
    }

    /// Drain deferred notifications, dropping any whose service already
    /// restarted immediately during this run.
    pub fn flush_deferred(&mut self) -> Vec<NotificationRecord> {
        let pending = std::mem::take(&mut self.deferred);
        pending
            .into_iter()
            .filter(|record| self.fired.insert(record.service.clone()))
            .collect()
    }
}
