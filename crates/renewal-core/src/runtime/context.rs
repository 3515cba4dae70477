//! Durable execution primitives.
//!
//! The engine is written against [`DurableContext`] and never persists
//! anything itself. [`JournalContext`] implements the primitives on top of the
//! redb journal: every step result is recorded under its name, and a re-driven
//! run replays recorded results instead of executing the step again.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

use super::db::RunDb;

/// Outcome of a durable sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The wake time has been reached; carry on.
    Ready,
    /// Not yet due. The caller must return and let the runtime resume the run
    /// at the given time.
    Pending(DateTime<Utc>),
}

pub trait DurableContext {
    /// Execute `f` at most once per run under `step` and return its result.
    /// On replay the recorded result is returned and `f` is not called.
    /// Errors are not recorded, so a failed step runs again on the next drive.
    fn run_step<T, F>(&mut self, step: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>;

    /// Suspend until `at`. Returns [`Wake::Ready`] once `at` has passed.
    fn sleep_until(&mut self, step: &str, at: DateTime<Utc>) -> Result<Wake>;

    /// Whether an abort has been requested for this run.
    fn is_cancelled(&self) -> Result<bool>;

    /// Current wall-clock time, recorded so replay sees the same value.
    fn now(&mut self, step: &str) -> Result<DateTime<Utc>>;
}

// ---------------------------------------------------------------------------
// JournalContext
// ---------------------------------------------------------------------------

pub struct JournalContext<'a> {
    db: &'a RunDb,
    run_id: Uuid,
    subscription_id: &'a str,
    clock: DateTime<Utc>,
    replayed: u32,
    executed: u32,
}

impl<'a> JournalContext<'a> {
    /// `clock` is the wall-clock time of the tick driving this run.
    pub fn new(
        db: &'a RunDb,
        run_id: Uuid,
        subscription_id: &'a str,
        clock: DateTime<Utc>,
    ) -> Self {
        Self {
            db,
            run_id,
            subscription_id,
            clock,
            replayed: 0,
            executed: 0,
        }
    }

    /// Steps answered from the journal during this drive.
    pub fn replayed(&self) -> u32 {
        self.replayed
    }

    /// Steps executed for the first time during this drive.
    pub fn executed(&self) -> u32 {
        self.executed
    }

    fn recorded<T: DeserializeOwned>(&mut self, step: &str) -> Result<Option<T>> {
        match self.db.journal_get(self.run_id, step)? {
            Some(bytes) => {
                self.replayed += 1;
                debug!(run_id = %self.run_id, step, "replayed step");
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn record<T: Serialize>(&mut self, step: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.journal_put(self.run_id, step, &bytes)?;
        self.executed += 1;
        debug!(run_id = %self.run_id, step, "recorded step");
        Ok(())
    }
}

impl DurableContext for JournalContext<'_> {
    fn run_step<T, F>(&mut self, step: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.recorded(step)? {
            return Ok(value);
        }
        let value = f()?;
        self.record(step, &value)?;
        Ok(value)
    }

    fn sleep_until(&mut self, step: &str, at: DateTime<Utc>) -> Result<Wake> {
        if self.recorded::<DateTime<Utc>>(step)?.is_some() {
            return Ok(Wake::Ready);
        }
        if at <= self.clock {
            self.record(step, &at)?;
            return Ok(Wake::Ready);
        }
        Ok(Wake::Pending(at))
    }

    fn is_cancelled(&self) -> Result<bool> {
        Ok(self
            .db
            .get(self.subscription_id)?
            .is_some_and(|r| r.run_id == self.run_id && r.cancel_requested))
    }

    fn now(&mut self, step: &str) -> Result<DateTime<Utc>> {
        let clock = self.clock;
        self.run_step(step, || Ok(clock))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
