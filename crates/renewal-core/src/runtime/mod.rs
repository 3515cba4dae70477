//! Durable workflow runtime.
//!
//! Provides `RunRecord`, `RunStatus`, `RunDb`, the `DurableContext`
//! primitives and [`WorkflowRuntime`], which ties them to the reminder
//! engine. Callers start runs with [`WorkflowRuntime::trigger`] and advance
//! them with [`WorkflowRuntime::tick`]; the server calls `tick` on an interval.

pub mod context;
pub mod db;
pub mod run;

pub use context::{DurableContext, JournalContext, Wake};
pub use db::{RunDb, StartRun};
pub use run::{FiredMilestone, RunRecord, RunStatus, TerminationReason};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ReminderError, Result};
use crate::notify::Notifier;
use crate::paths;
use crate::render::Renderer;
use crate::retry::RetryPolicy;
use crate::store::{FileStore, SubscriptionStore};
use crate::workflow::{ReminderWorkflow, RunState};

// ---------------------------------------------------------------------------
// TriggerOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Accepted { run_id: Uuid, subscription_id: String },
    AlreadyRunning { run_id: Uuid, subscription_id: String },
}

impl TriggerOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Accepted { run_id, .. } | Self::AlreadyRunning { run_id, .. } => *run_id,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowRuntime
// ---------------------------------------------------------------------------

pub struct WorkflowRuntime {
    db: RunDb,
    store: Arc<dyn SubscriptionStore>,
    notifier: Arc<dyn Notifier>,
    renderer: Renderer,
    retry: RetryPolicy,
}

impl WorkflowRuntime {
    pub fn new(
        db: RunDb,
        store: Arc<dyn SubscriptionStore>,
        notifier: Arc<dyn Notifier>,
        renderer: Renderer,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            store,
            notifier,
            renderer,
            retry,
        }
    }

    /// Open the runtime for the project at `root`: run store at
    /// `.renewal/runs.redb`, file-backed subscriptions, notifier from config.
    pub fn open(root: &Path, config: &Config) -> Result<Self> {
        let db = RunDb::open(&paths::runs_db_path(root))?;
        Ok(Self::new(
            db,
            Arc::new(FileStore::new(root)),
            config.notifier.build(),
            Renderer::new(config.manage_url.clone()),
            config.retry.clone(),
        ))
    }

    /// Start a reminder run for `subscription_id`.
    ///
    /// Validates the id and that the subscription exists, then queues the run
    /// for the next tick and returns without driving it. At most one run per
    /// subscription is active; a repeat trigger reports the existing run.
    pub fn trigger(&self, subscription_id: &str, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        paths::validate_id(subscription_id)?;
        if self.store.get_subscription(subscription_id)?.is_none() {
            return Err(ReminderError::SubscriptionNotFound(
                subscription_id.to_string(),
            ));
        }

        match self
            .db
            .start_run(RunRecord::new(subscription_id, now), now)?
        {
            StartRun::Started(record) => {
                info!(subscription_id, run_id = %record.run_id, "workflow run started");
                Ok(TriggerOutcome::Accepted {
                    run_id: record.run_id,
                    subscription_id: record.subscription_id,
                })
            }
            StartRun::Existing(record) => {
                info!(
                    subscription_id,
                    run_id = %record.run_id,
                    status = record.status.label(),
                    "workflow run already active"
                );
                Ok(TriggerOutcome::AlreadyRunning {
                    run_id: record.run_id,
                    subscription_id: record.subscription_id,
                })
            }
        }
    }

    /// Subscription ids whose wakeup is due by `now`. Pass each to
    /// [`WorkflowRuntime::resume`]; distinct ids may be resumed concurrently.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.db.due(now)
    }

    /// Resume every run whose wakeup is due by `now`, one after another.
    ///
    /// A run that fails to drive is logged and marked failed; the other due
    /// runs still proceed. Returns the records as left by this tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<Vec<RunRecord>> {
        let due = self.due(now)?;
        let mut driven = Vec::with_capacity(due.len());
        for subscription_id in due {
            match self.resume(&subscription_id, now) {
                Ok(Some(record)) => driven.push(record),
                Ok(None) => {}
                Err(e) => {
                    error!(subscription_id = %subscription_id, error = %e, "failed to drive run")
                }
            }
        }
        Ok(driven)
    }

    /// Claim the due run of `subscription_id` and drive it from the top of the
    /// engine, replaying its journal.
    ///
    /// Returns `None` when the run is not claimable: nothing due, already
    /// finished, or being driven elsewhere.
    pub fn resume(&self, subscription_id: &str, now: DateTime<Utc>) -> Result<Option<RunRecord>> {
        let Some(record) = self.db.claim(subscription_id, now)? else {
            debug!(subscription_id, "run not claimable, skipping");
            return Ok(None);
        };

        let workflow = ReminderWorkflow {
            store: self.store.as_ref(),
            notifier: self.notifier.as_ref(),
            renderer: &self.renderer,
            retry: &self.retry,
        };
        let mut ctx = JournalContext::new(&self.db, record.run_id, subscription_id, now);
        let result = workflow.run(&mut ctx, subscription_id);
        let (replayed, executed) = (ctx.replayed(), ctx.executed());

        let mut next = record.clone();
        let saved = match result {
            Ok(progress) => {
                // An abort seen mid-replay stops with a shorter prefix of the
                // history; within one run `fired` only ever grows.
                if progress.fired.len() >= next.fired.len() {
                    next.fired = progress.fired;
                }
                match progress.state {
                    RunState::Suspended { until, days } => {
                        next.status = RunStatus::Sleeping { until, days };
                        self.db.save(&next, Some(until), now)?
                    }
                    RunState::Terminated(reason) => {
                        info!(
                            subscription_id,
                            run_id = %next.run_id,
                            %reason,
                            fired = next.fired.len(),
                            "workflow run terminated"
                        );
                        next.status = RunStatus::Terminated { reason };
                        self.db.save(&next, None, now)?
                    }
                }
            }
            Err(e) => {
                error!(subscription_id, run_id = %next.run_id, error = %e, "workflow run failed");
                next.status = RunStatus::Failed {
                    reason: e.to_string(),
                };
                self.db.save(&next, None, now)?
            }
        };
        info!(
            subscription_id,
            status = saved.status.label(),
            replayed,
            executed,
            "drove run"
        );
        Ok(Some(saved))
    }

    /// Request abort of the active run for `subscription_id`. The run stops at
    /// its next evaluation, which is queued immediately.
    pub fn cancel(&self, subscription_id: &str, now: DateTime<Utc>) -> Result<RunRecord> {
        paths::validate_id(subscription_id)?;
        let record = self.db.request_cancel(subscription_id, now)?;
        info!(subscription_id, run_id = %record.run_id, "abort requested");
        Ok(record)
    }

    pub fn status(&self, subscription_id: &str) -> Result<Option<RunRecord>> {
        paths::validate_id(subscription_id)?;
        self.db.get(subscription_id)
    }

    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        self.db.list_all()
    }

    /// Journaled step names of the current run for `subscription_id`.
    pub fn journal(&self, subscription_id: &str) -> Result<Vec<String>> {
        let record = self
            .status(subscription_id)?
            .ok_or_else(|| ReminderError::RunNotFound(subscription_id.to_string()))?;
        self.db.journal_steps(record.run_id)
    }

    /// Re-queue runs interrupted mid-drive by a crash. Call once at startup.
    pub fn startup_recovery(&self, max_age: Duration, now: DateTime<Utc>) -> Result<u32> {
        let n = self.db.startup_recovery(max_age, now)?;
        if n > 0 {
            warn!(recovered = n, "re-queued runs interrupted by restart");
        }
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
