//! Run record data model.
//!
//! A `RunRecord` is the runtime's view of one reminder lifecycle for one
//! subscription. The engine's own position is never stored here; it lives in
//! the step journal and is rebuilt by replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::retry::DeliveryOutcome;

// ---------------------------------------------------------------------------
// TerminationReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Subscription missing or inactive at start.
    Skipped,
    /// No milestones left before renewal.
    Complete,
    /// Subscription stopped being active while the run slept.
    Cancelled,
    /// Abort requested through the runtime.
    Aborted,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::Skipped => "skipped",
            TerminationReason::Complete => "complete",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a run.
///
/// Transitions: `Pending → Running → Sleeping ⇄ Running → Terminated | Failed`
///
/// The runtime writes `Running` before driving the engine. A record still in
/// `Running` after a restart is re-queued by `startup_recovery`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued for the next tick.
    Pending,
    /// Being driven (or crashed while being driven).
    Running,
    /// Durably suspended until `until`, waiting to send milestone `days`.
    Sleeping { until: DateTime<Utc>, days: u32 },
    Terminated { reason: TerminationReason },
    /// Stopped on an error that retrying cannot fix.
    Failed { reason: String },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Terminated { .. } | RunStatus::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Sleeping { .. } => "sleeping",
            RunStatus::Terminated { .. } => "terminated",
            RunStatus::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// FiredMilestone
// ---------------------------------------------------------------------------

/// A milestone the run has acted on, delivered or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiredMilestone {
    pub days: u32,
    pub fire_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub outcome: DeliveryOutcome,
}

// ---------------------------------------------------------------------------
// RunRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub subscription_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub fired: Vec<FiredMilestone>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// A fresh run in `Pending` state.
    pub fn new(subscription_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            subscription_id: subscription_id.into(),
            status: RunStatus::Pending,
            fired: Vec::new(),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}
