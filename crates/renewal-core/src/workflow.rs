//! Reminder workflow engine.
//!
//! ```text
//! Start ──▶ Evaluate ──▶ Sleeping(fire_at) ──▶ Notify ──┐
//!   │          │  ▲                              │       │
//!   │          │  └──────────── fired ◀──────────┘       │
//!   ▼          ▼                                         ▼
//! Terminated(skipped)  Terminated(complete|aborted)  Terminated(cancelled|aborted|complete)
//! ```
//!
//! [`ReminderWorkflow::run`] is re-entered from the top every time the runtime
//! drives the run. Every side effect and every clock read goes through the
//! [`DurableContext`], so on replay the engine walks the same path up to the
//! point it last suspended, without re-sending anything.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{ReminderError, Result};
use crate::milestone::{self, days_until_renewal};
use crate::notify::Notifier;
use crate::render::Renderer;
use crate::retry::{deliver_with_retry, DeliveryOutcome, RetryPolicy};
use crate::runtime::context::{DurableContext, Wake};
use crate::runtime::run::{FiredMilestone, TerminationReason};
use crate::store::SubscriptionStore;

/// Where a drive of the engine stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Waiting for milestone `days`, due at `until`.
    Suspended { until: DateTime<Utc>, days: u32 },
    Terminated(TerminationReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub state: RunState,
    /// Milestones acted on so far in this run, oldest first.
    pub fired: Vec<FiredMilestone>,
}

impl Progress {
    fn terminated(reason: TerminationReason, fired: Vec<FiredMilestone>) -> Self {
        Self {
            state: RunState::Terminated(reason),
            fired,
        }
    }
}

/// The reminder engine. Borrowed collaborators only; it holds no state of its
/// own between drives.
pub struct ReminderWorkflow<'a> {
    pub store: &'a dyn SubscriptionStore,
    pub notifier: &'a dyn Notifier,
    pub renderer: &'a Renderer,
    pub retry: &'a RetryPolicy,
}

impl ReminderWorkflow<'_> {
    /// Drive the run for `subscription_id` as far as the clock allows.
    ///
    /// Store read failures and render failures are returned as errors and end
    /// the run. Delivery failures never are: they are recorded on the fired
    /// milestone and the run moves on.
    pub fn run<C: DurableContext>(&self, ctx: &mut C, subscription_id: &str) -> Result<Progress> {
        let mut fired: Vec<FiredMilestone> = Vec::new();
        let mut fired_days: BTreeSet<u32> = BTreeSet::new();

        // Start
        let sub = ctx.run_step("load", || self.store.get_subscription(subscription_id))?;
        let Some(mut sub) = sub else {
            info!(subscription_id, "subscription not found, skipping run");
            return Ok(Progress::terminated(TerminationReason::Skipped, fired));
        };
        if !sub.is_active() {
            info!(subscription_id, status = %sub.status, "subscription not active, skipping run");
            return Ok(Progress::terminated(TerminationReason::Skipped, fired));
        }

        loop {
            // Evaluate
            if ctx.is_cancelled()? {
                info!(subscription_id, "abort requested");
                return Ok(Progress::terminated(TerminationReason::Aborted, fired));
            }
            let now = ctx.now(&format!("evaluate-{}", fired.len()))?;
            let Some(next) = milestone::next_milestone(now, sub.renewal_date, &fired_days)? else {
                info!(
                    subscription_id,
                    fired = fired.len(),
                    days_until_renewal = days_until_renewal(now, sub.renewal_date),
                    "no milestones remaining"
                );
                return Ok(Progress::terminated(TerminationReason::Complete, fired));
            };
            let days = next.days;

            // Sleeping
            if let Wake::Pending(until) = ctx.sleep_until(&format!("sleep-{days}"), next.fire_at)? {
                info!(subscription_id, days, %until, "sleeping until milestone");
                return Ok(Progress {
                    state: RunState::Suspended { until, days },
                    fired,
                });
            }

            // Notify
            let current = ctx.run_step(&format!("reload-{days}"), || {
                self.store.get_subscription(subscription_id)
            })?;
            sub = match current {
                Some(s) if s.is_active() => s,
                Some(s) => {
                    info!(
                        subscription_id,
                        days,
                        status = %s.status,
                        "subscription no longer active"
                    );
                    return Ok(Progress::terminated(TerminationReason::Cancelled, fired));
                }
                None => {
                    info!(subscription_id, days, "subscription removed while sleeping");
                    return Ok(Progress::terminated(TerminationReason::Cancelled, fired));
                }
            };
            if ctx.is_cancelled()? {
                info!(subscription_id, days, "abort requested");
                return Ok(Progress::terminated(TerminationReason::Aborted, fired));
            }
            // The evaluate clock predates the sleep; judge renewal by the wake time.
            let now = ctx.now(&format!("notify-{days}"))?;
            if sub.renewal_date <= now {
                info!(subscription_id, days, "renewal passed while sleeping");
                return Ok(Progress::terminated(TerminationReason::Complete, fired));
            }
            let days_left = u32::try_from(days_until_renewal(now, sub.renewal_date))
                .unwrap_or(u32::MAX);

            let owner = ctx
                .run_step(&format!("owner-{days}"), || self.store.get_owner(&sub.user))?
                .ok_or_else(|| {
                    ReminderError::DataIntegrity(format!(
                        "owner {} of subscription {subscription_id} not found",
                        sub.user
                    ))
                })?;
            let message = self.renderer.render(&sub, &owner, days_left)?;

            let outcome = ctx.run_step(&format!("remind-{days}"), || {
                Ok(deliver_with_retry(self.retry, || {
                    self.notifier.send(&owner, &message)
                }))
            })?;
            match &outcome {
                DeliveryOutcome::Delivered { attempts } => {
                    info!(subscription_id, days, attempts, to = %owner.email, "reminder sent")
                }
                DeliveryOutcome::Missed { attempts, reason } => {
                    warn!(subscription_id, days, attempts, reason = %reason, "reminder missed")
                }
            }

            let fired_at = ctx.now(&format!("fired-{days}"))?;
            fired.push(FiredMilestone {
                days,
                fire_at: next.fire_at,
                fired_at,
                outcome,
            });
            fired_days.insert(days);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::DeliveryError;
    use crate::render::RenderedMessage;
    use crate::runtime::context::JournalContext;
    use crate::runtime::db::RunDb;
    use crate::store::FileStore;
    use crate::subscription::{
        Category, Currency, Frequency, Owner, Subscription, SubscriptionStatus,
    };
    use chrono::{Duration, TimeZone};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Replies from a script, then succeeds. Records every attempt.
    #[derive(Default)]
    struct ScriptedNotifier {
        script: Mutex<VecDeque<DeliveryError>>,
        attempts: Mutex<Vec<String>>,
    }

    impl ScriptedNotifier {
        fn failing(errors: Vec<DeliveryError>) -> Self {
            Self {
                script: Mutex::new(errors.into()),
                attempts: Mutex::default(),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Notifier for ScriptedNotifier {
        fn send(
            &self,
            _to: &Owner,
            message: &RenderedMessage,
        ) -> std::result::Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push(message.subject.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: FileStore,
        db: RunDb,
        renderer: Renderer,
        retry: RetryPolicy,
        run_id: Uuid,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn fixture(renewal: DateTime<Utc>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store
            .save_owner(&Owner {
                id: "u1".into(),
                name: "Ada".into(),
                email: "ada@example.com".into(),
            })
            .unwrap();
        store
            .save_subscription(&Subscription {
                id: "sub-1".into(),
                name: "Netflix".into(),
                price: 15.99,
                currency: Currency::Usd,
                frequency: Frequency::Monthly,
                category: Category::Entertainment,
                payment_method: "Visa".into(),
                status: SubscriptionStatus::Active,
                start_date: t0() - Duration::days(30),
                renewal_date: renewal,
                user: "u1".into(),
            })
            .unwrap();
        let db = RunDb::open(&dir.path().join("runs.redb")).unwrap();
        Fixture {
            _dir: dir,
            store,
            db,
            renderer: Renderer::new("https://example.com/account"),
            retry: RetryPolicy::immediate(3),
            run_id: Uuid::new_v4(),
        }
    }

    impl Fixture {
        fn drive(&self, notifier: &dyn Notifier, clock: DateTime<Utc>) -> Progress {
            let wf = ReminderWorkflow {
                store: &self.store,
                notifier,
                renderer: &self.renderer,
                retry: &self.retry,
            };
            let mut ctx = JournalContext::new(&self.db, self.run_id, "sub-1", clock);
            wf.run(&mut ctx, "sub-1").unwrap()
        }

        fn set_status(&self, status: SubscriptionStatus) {
            let mut sub = self.store.get_subscription("sub-1").unwrap().unwrap();
            sub.status = status;
            self.store.save_subscription(&sub).unwrap();
        }
    }

    fn suspended_days(p: &Progress) -> u32 {
        match p.state {
            RunState::Suspended { days, .. } => days,
            ref other => panic!("expected Suspended, got {other:?}"),
        }
    }

    #[test]
    fn ten_days_out_sleeps_for_seven_day_milestone() {
        let renewal = t0() + Duration::days(10);
        let f = fixture(renewal);
        let n = ScriptedNotifier::default();

        let p = f.drive(&n, t0());
        assert_eq!(
            p.state,
            RunState::Suspended {
                until: renewal - Duration::days(7),
                days: 7
            }
        );
        assert!(n.attempts().is_empty());
    }

    #[test]
    fn full_lifecycle_sends_every_milestone_once() {
        let renewal = t0() + Duration::days(10);
        let f = fixture(renewal);
        let n = ScriptedNotifier::default();

        let mut clock = t0();
        let mut wakes = Vec::new();
        let p = loop {
            let p = f.drive(&n, clock);
            match p.state {
                RunState::Suspended { until, days } => {
                    wakes.push(days);
                    clock = until;
                }
                RunState::Terminated(_) => break p,
            }
        };

        assert_eq!(wakes, vec![7, 5, 2, 1]);
        assert_eq!(p.state, RunState::Terminated(TerminationReason::Complete));
        let days: Vec<u32> = p.fired.iter().map(|m| m.days).collect();
        assert_eq!(days, vec![7, 5, 2, 1]);
        assert_eq!(n.attempts().len(), 4, "no resend on replay");
        assert!(p.fired.iter().all(|m| m.outcome.is_delivered()));
    }

    #[test]
    fn due_milestone_fires_without_waiting() {
        // Exactly two days out: the 2-day milestone is due now.
        let renewal = t0() + Duration::days(2);
        let f = fixture(renewal);
        let n = ScriptedNotifier::default();

        let p = f.drive(&n, t0());
        assert_eq!(suspended_days(&p), 1);
        assert_eq!(p.fired.len(), 1);
        assert_eq!(p.fired[0].days, 2);
        assert_eq!(n.attempts().len(), 1);
    }

    #[test]
    fn cancelled_while_sleeping_terminates_without_sending() {
        let renewal = t0() + Duration::days(3);
        let f = fixture(renewal);
        let n = ScriptedNotifier::default();

        let p = f.drive(&n, t0());
        assert_eq!(suspended_days(&p), 2);

        f.set_status(SubscriptionStatus::Cancelled);
        let p = f.drive(&n, renewal - Duration::days(2));
        assert_eq!(p.state, RunState::Terminated(TerminationReason::Cancelled));
        assert!(n.attempts().is_empty());
    }

    #[test]
    fn exhausted_retries_record_missed_and_continue() {
        let renewal = t0() + Duration::days(3);
        let f = fixture(renewal);
        let n = ScriptedNotifier::failing(vec![
            DeliveryError::Transient("421 try later".into()),
            DeliveryError::Transient("421 try later".into()),
            DeliveryError::Transient("421 try later".into()),
        ]);

        f.drive(&n, t0());
        let p = f.drive(&n, renewal - Duration::days(2));

        assert_eq!(n.attempts().len(), 3);
        assert_eq!(p.fired.len(), 1);
        assert!(matches!(
            p.fired[0].outcome,
            DeliveryOutcome::Missed { attempts: 3, .. }
        ));
        // Moved on to the 1-day milestone rather than aborting.
        assert_eq!(suspended_days(&p), 1);
    }

    #[test]
    fn renewal_in_the_past_completes_with_no_sends() {
        let f = fixture(t0() - Duration::days(1));
        let n = ScriptedNotifier::default();

        let p = f.drive(&n, t0());
        assert_eq!(p.state, RunState::Terminated(TerminationReason::Complete));
        assert!(p.fired.is_empty());
        assert!(n.attempts().is_empty());
    }

    #[test]
    fn inactive_subscription_is_skipped() {
        let f = fixture(t0() + Duration::days(10));
        f.set_status(SubscriptionStatus::Expired);
        let p = f.drive(&ScriptedNotifier::default(), t0());
        assert_eq!(p.state, RunState::Terminated(TerminationReason::Skipped));
    }

    #[test]
    fn missing_subscription_is_skipped() {
        let f = fixture(t0() + Duration::days(10));
        let wf = ReminderWorkflow {
            store: &f.store,
            notifier: &ScriptedNotifier::default(),
            renderer: &f.renderer,
            retry: &f.retry,
        };
        let mut ctx = JournalContext::new(&f.db, f.run_id, "ghost", t0());
        let p = wf.run(&mut ctx, "ghost").unwrap();
        assert_eq!(p.state, RunState::Terminated(TerminationReason::Skipped));
    }

    #[test]
    fn missing_owner_is_a_data_integrity_error() {
        let renewal = t0() + Duration::days(1);
        let f = fixture(renewal);
        std::fs::remove_file(crate::paths::user_path(f._dir.path(), "u1")).unwrap();

        let wf = ReminderWorkflow {
            store: &f.store,
            notifier: &ScriptedNotifier::default(),
            renderer: &f.renderer,
            retry: &f.retry,
        };
        let mut ctx = JournalContext::new(&f.db, f.run_id, "sub-1", t0());
        let err = wf.run(&mut ctx, "sub-1").unwrap_err();
        assert!(matches!(err, ReminderError::DataIntegrity(_)), "{err}");
    }

    #[test]
    fn downtime_past_renewal_completes_without_stale_reminder() {
        let renewal = t0() + Duration::days(10);
        let f = fixture(renewal);
        let n = ScriptedNotifier::default();

        assert_eq!(suspended_days(&f.drive(&n, t0())), 7);
        let p = f.drive(&n, renewal + Duration::days(1));

        assert_eq!(p.state, RunState::Terminated(TerminationReason::Complete));
        assert!(p.fired.is_empty());
        assert!(n.attempts().is_empty());
    }

    #[test]
    fn late_reminder_names_the_days_actually_left() {
        let renewal = t0() + Duration::days(10);
        let f = fixture(renewal);
        let n = ScriptedNotifier::default();

        f.drive(&n, t0());
        let p = f.drive(&n, renewal - Duration::days(3));

        assert_eq!(
            n.attempts(),
            vec!["Reminder: your Netflix subscription renews in 3 days".to_string()]
        );
        assert_eq!(p.fired[0].days, 7);
        assert_eq!(suspended_days(&p), 2);
    }

    #[test]
    fn replay_after_delivery_does_not_resend() {
        let renewal = t0() + Duration::days(2);
        let f = fixture(renewal);
        let n = ScriptedNotifier::default();

        let first = f.drive(&n, t0());
        let again = f.drive(&n, t0());
        assert_eq!(first, again);
        assert_eq!(n.attempts().len(), 1);
    }
}
