//! Date-milestone calculator.
//!
//! Reminders fire at a fixed set of day counts before renewal. Given the
//! current time, the renewal time and the milestones already fired in this
//! run, [`next_milestone`] picks the one to wait for next.

use crate::error::{ReminderError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Days before renewal at which a reminder fires, furthest first.
pub const MILESTONES: [u32; 4] = [7, 5, 2, 1];

const DAY_MS: i64 = 86_400_000;

/// A milestone together with the wall-clock time it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextMilestone {
    pub days: u32,
    pub fire_at: DateTime<Utc>,
}

/// Whole days until renewal, rounded up. Negative once renewal has passed.
pub fn days_until_renewal(now: DateTime<Utc>, renewal: DateTime<Utc>) -> i64 {
    let ms = (renewal - now).num_milliseconds();
    let whole = ms.div_euclid(DAY_MS);
    if ms.rem_euclid(DAY_MS) > 0 {
        whole + 1
    } else {
        whole
    }
}

/// The instant milestone `days` is due for a subscription renewing at `renewal`.
pub fn fire_at(renewal: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    renewal
        .checked_sub_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| {
            ReminderError::DataIntegrity(format!(
                "renewal date {renewal} minus {days} days is out of range"
            ))
        })
}

/// Pick the next milestone to wait for.
///
/// Only milestones closer to renewal than every fired one are candidates, so
/// the sequence never moves backwards. Among candidates the furthest one still
/// due at or after `now` wins. When every candidate is already past, the
/// nearest past one is returned and the caller fires it immediately.
///
/// Returns `None` once renewal has passed or no candidate remains.
pub fn next_milestone(
    now: DateTime<Utc>,
    renewal: DateTime<Utc>,
    fired: &BTreeSet<u32>,
) -> Result<Option<NextMilestone>> {
    if renewal <= now {
        return Ok(None);
    }

    let floor = fired.iter().min().copied();
    let mut nearest_past = None;

    for days in MILESTONES {
        if fired.contains(&days) || floor.is_some_and(|f| days > f) {
            continue;
        }
        let at = fire_at(renewal, days)?;
        if at >= now {
            return Ok(Some(NextMilestone { days, fire_at: at }));
        }
        nearest_past = Some(NextMilestone { days, fire_at: at });
    }

    Ok(nearest_past)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
