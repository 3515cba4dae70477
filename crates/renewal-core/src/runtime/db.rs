//! Persistent run store using redb.
//!
//! # Table design
//!
//! `RUNS` maps subscription id → JSON `RunRecord`. Keying by subscription
//! makes "at most one active run per subscription" a single lookup.
//!
//! `WAKEUPS` holds durable timers under a 24-byte composite key:
//! ```text
//! [ wake_ms: u64 big-endian (8 bytes) | run uuid: 16 bytes ]  →  subscription id
//! ```
//! Big-endian timestamps make byte order equal time order, so one range scan
//! `..=due_upper_bound(now)` yields every due timer.
//!
//! `JOURNAL` maps `"{run_id}/{step}"` → JSON step result. Replay reads it
//! back instead of re-executing the step.

use std::{collections::HashSet, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, Table, TableDefinition};
use uuid::Uuid;

use crate::error::{ReminderError, Result};

use super::run::{RunRecord, RunStatus};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");
const WAKEUPS: TableDefinition<&[u8], &str> = TableDefinition::new("wakeups");
const JOURNAL: TableDefinition<&str, &[u8]> = TableDefinition::new("journal");

type StrTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn wakeup_key(ts: DateTime<Utc>, run_id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(run_id.as_bytes());
    key
}

/// Upper bound for a range scan returning all wakeups due by `now`.
///
/// The UUID suffix is `0xff` × 16, greater than any valid UUID, so every
/// wakeup with `wake_ms <= now_ms` is included.
fn due_upper_bound(now: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = now.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].fill(0xff);
    key
}

fn journal_key(run_id: Uuid, step: &str) -> String {
    format!("{run_id}/{step}")
}

/// `[lo, hi)` covering every journal key of `run_id`. `'0'` sorts right after `'/'`.
fn journal_prefix(run_id: Uuid) -> (String, String) {
    (format!("{run_id}/"), format!("{run_id}0"))
}

fn db_err(e: impl std::fmt::Display) -> ReminderError {
    ReminderError::RunDb(e.to_string())
}

fn decode(bytes: &[u8]) -> Result<RunRecord> {
    Ok(serde_json::from_slice(bytes)?)
}

fn read_record(runs: &StrTable<'_>, id: &str) -> Result<Option<RunRecord>> {
    runs.get(id)
        .map_err(db_err)?
        .map(|guard| decode(guard.value()))
        .transpose()
}

fn clear_journal(journal: &mut StrTable<'_>, run_id: Uuid) -> Result<()> {
    let (lo, hi) = journal_prefix(run_id);
    let keys: Vec<String> = journal
        .range(lo.as_str()..hi.as_str())
        .map_err(db_err)?
        .map(|entry| entry.map(|(k, _)| k.value().to_string()).map_err(db_err))
        .collect::<Result<_>>()?;
    for key in keys {
        journal.remove(key.as_str()).map_err(db_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// StartRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StartRun {
    /// The new record was stored and queued for the next tick.
    Started(RunRecord),
    /// A non-terminal run already exists for this subscription.
    Existing(RunRecord),
}

// ---------------------------------------------------------------------------
// RunDb
// ---------------------------------------------------------------------------

/// Persistent store for run records, durable timers and the step journal.
pub struct RunDb {
    db: Database,
}

impl RunDb {
    /// Open or create the redb database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(RUNS).map_err(db_err)?;
        wt.open_table(WAKEUPS).map_err(db_err)?;
        wt.open_table(JOURNAL).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    pub fn get(&self, subscription_id: &str) -> Result<Option<RunRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RUNS).map_err(db_err)?;
        let found = table
            .get(subscription_id)
            .map_err(db_err)?
            .map(|guard| decode(guard.value()))
            .transpose()?;
        Ok(found)
    }

    /// List all runs, newest first.
    pub fn list_all(&self) -> Result<Vec<RunRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(RUNS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(decode(v.value())?);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    /// Store `record` as the run for its subscription and queue it for `now`,
    /// unless a non-terminal run already exists. Check and insert happen in one
    /// write transaction, so concurrent triggers cannot both start a run.
    pub fn start_run(&self, record: RunRecord, now: DateTime<Utc>) -> Result<StartRun> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut runs = wt.open_table(RUNS).map_err(db_err)?;
            match read_record(&runs, &record.subscription_id)? {
                Some(existing) if !existing.status.is_terminal() => StartRun::Existing(existing),
                previous => {
                    if let Some(prev) = previous {
                        let mut journal = wt.open_table(JOURNAL).map_err(db_err)?;
                        clear_journal(&mut journal, prev.run_id)?;
                    }
                    let value = serde_json::to_vec(&record)?;
                    runs.insert(record.subscription_id.as_str(), value.as_slice())
                        .map_err(db_err)?;
                    let mut wakeups = wt.open_table(WAKEUPS).map_err(db_err)?;
                    wakeups
                        .insert(
                            wakeup_key(now, record.run_id).as_slice(),
                            record.subscription_id.as_str(),
                        )
                        .map_err(db_err)?;
                    StartRun::Started(record)
                }
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(outcome)
    }

    /// Persist `record`, optionally arming a wakeup at `wake_at`.
    ///
    /// A cancel flag already stored for the same run is preserved, and arms an
    /// immediate wakeup instead of `wake_at` so the abort is seen promptly.
    pub fn save(
        &self,
        record: &RunRecord,
        wake_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RunRecord> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let saved = {
            let mut runs = wt.open_table(RUNS).map_err(db_err)?;
            let mut merged = record.clone();
            if let Some(stored) = read_record(&runs, &record.subscription_id)? {
                if stored.run_id == record.run_id {
                    merged.cancel_requested |= stored.cancel_requested;
                }
            }
            merged.updated_at = now;

            let wake_at = match wake_at {
                Some(_) if merged.cancel_requested => Some(now),
                other => other,
            };
            if let Some(at) = wake_at {
                let mut wakeups = wt.open_table(WAKEUPS).map_err(db_err)?;
                wakeups
                    .insert(
                        wakeup_key(at, merged.run_id).as_slice(),
                        merged.subscription_id.as_str(),
                    )
                    .map_err(db_err)?;
            }

            let value = serde_json::to_vec(&merged)?;
            runs.insert(merged.subscription_id.as_str(), value.as_slice())
                .map_err(db_err)?;
            merged
        };
        wt.commit().map_err(db_err)?;
        Ok(saved)
    }

    /// Subscription ids with a wakeup due by `now`, in wake-time order.
    /// Read-only; a run leaves the queue only when [`RunDb::claim`] takes it.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let upper = due_upper_bound(now);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(WAKEUPS).map_err(db_err)?;
        let mut due: Vec<String> = Vec::new();
        for entry in table.range(..=upper.as_slice()).map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let subscription_id = v.value().to_string();
            if !due.contains(&subscription_id) {
                due.push(subscription_id);
            }
        }
        Ok(due)
    }

    /// Take the run of `subscription_id` off the wakeup queue and mark it
    /// `Running`, in one write transaction.
    ///
    /// Returns `None` when there is nothing to drive: no due wakeup (another
    /// drive claimed it first), no record, or a terminal record. A run that is
    /// already `Running` keeps its wakeups and is left to the drive in flight.
    pub fn claim(&self, subscription_id: &str, now: DateTime<Utc>) -> Result<Option<RunRecord>> {
        let upper = due_upper_bound(now);
        let wt = self.db.begin_write().map_err(db_err)?;
        let claimed = {
            let mut runs = wt.open_table(RUNS).map_err(db_err)?;
            let record = read_record(&runs, subscription_id)?;
            if matches!(&record, Some(r) if r.status == RunStatus::Running) {
                None
            } else {
                let mut wakeups = wt.open_table(WAKEUPS).map_err(db_err)?;
                let mut keys: Vec<Vec<u8>> = Vec::new();
                for entry in wakeups.range(..=upper.as_slice()).map_err(db_err)? {
                    let (k, v) = entry.map_err(db_err)?;
                    if v.value() == subscription_id {
                        keys.push(k.value().to_vec());
                    }
                }
                for key in &keys {
                    wakeups.remove(key.as_slice()).map_err(db_err)?;
                }

                match record {
                    Some(mut r) if !keys.is_empty() && !r.status.is_terminal() => {
                        r.status = RunStatus::Running;
                        r.updated_at = now;
                        let value = serde_json::to_vec(&r)?;
                        runs.insert(subscription_id, value.as_slice())
                            .map_err(db_err)?;
                        Some(r)
                    }
                    _ => None,
                }
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(claimed)
    }

    /// Flag the active run of `subscription_id` for abort and wake it now.
    pub fn request_cancel(&self, subscription_id: &str, now: DateTime<Utc>) -> Result<RunRecord> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let record = {
            let mut runs = wt.open_table(RUNS).map_err(db_err)?;
            let mut record = read_record(&runs, subscription_id)?
                .ok_or_else(|| ReminderError::RunNotFound(subscription_id.to_string()))?;
            if record.status.is_terminal() {
                return Err(ReminderError::RunAlreadyFinished(subscription_id.to_string()));
            }

            let mut wakeups = wt.open_table(WAKEUPS).map_err(db_err)?;
            if let RunStatus::Sleeping { until, .. } = record.status {
                wakeups
                    .remove(wakeup_key(until, record.run_id).as_slice())
                    .map_err(db_err)?;
                record.status = RunStatus::Pending;
            }
            wakeups
                .insert(
                    wakeup_key(now, record.run_id).as_slice(),
                    subscription_id,
                )
                .map_err(db_err)?;

            record.cancel_requested = true;
            record.updated_at = now;
            let value = serde_json::to_vec(&record)?;
            runs.insert(subscription_id, value.as_slice())
                .map_err(db_err)?;
            record
        };
        wt.commit().map_err(db_err)?;
        Ok(record)
    }

    /// On startup, put back on the queue every run that would otherwise never
    /// be driven again:
    ///
    /// - a `Running` run last touched more than `max_age` ago crashed
    ///   mid-drive; it is re-queued now and replay resumes it;
    /// - a `Pending` or `Sleeping` run with no wakeup row is re-armed at its
    ///   sleep deadline, or now if that has passed.
    ///
    /// Returns the number of runs recovered.
    pub fn startup_recovery(&self, max_age: Duration, now: DateTime<Utc>) -> Result<u32> {
        let cutoff = now - chrono::Duration::from_std(max_age).map_err(db_err)?;
        let queued = self.queued_subscriptions()?;

        let mut count = 0u32;
        for mut run in self.list_all()? {
            let wake_at = match run.status {
                RunStatus::Running if run.updated_at <= cutoff => {
                    run.status = RunStatus::Pending;
                    now
                }
                RunStatus::Pending if !queued.contains(&run.subscription_id) => now,
                RunStatus::Sleeping { until, .. } if !queued.contains(&run.subscription_id) => {
                    until.max(now)
                }
                _ => continue,
            };
            self.save(&run, Some(wake_at), now)?;
            count += 1;
        }
        Ok(count)
    }

    /// Subscription ids holding at least one wakeup row, due or not.
    fn queued_subscriptions(&self) -> Result<HashSet<String>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(WAKEUPS).map_err(db_err)?;
        let mut queued = HashSet::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            queued.insert(v.value().to_string());
        }
        Ok(queued)
    }

    // -----------------------------------------------------------------------
    // Journal
    // -----------------------------------------------------------------------

    pub fn journal_get(&self, run_id: Uuid, step: &str) -> Result<Option<Vec<u8>>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(JOURNAL).map_err(db_err)?;
        let key = journal_key(run_id, step);
        let found = table
            .get(key.as_str())
            .map_err(db_err)?
            .map(|guard| guard.value().to_vec());
        Ok(found)
    }

    pub fn journal_put(&self, run_id: Uuid, step: &str, value: &[u8]) -> Result<()> {
        let key = journal_key(run_id, step);
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(JOURNAL).map_err(db_err)?;
            table.insert(key.as_str(), value).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Names of the journaled steps of `run_id`, in key order.
    pub fn journal_steps(&self, run_id: Uuid) -> Result<Vec<String>> {
        let (lo, hi) = journal_prefix(run_id);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(JOURNAL).map_err(db_err)?;
        let mut steps = Vec::new();
        for entry in table.range(lo.as_str()..hi.as_str()).map_err(db_err)? {
            let (k, _) = entry.map_err(db_err)?;
            steps.push(k.value()[lo.len()..].to_string());
        }
        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
