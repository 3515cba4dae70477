use crate::output::{print_json, print_table};
use anyhow::Context;
use chrono::{DateTime, Utc};
use renewal_core::runtime::{RunRecord, RunStatus, TriggerOutcome};
use renewal_core::ReminderError;
use std::path::Path;
use std::time::Duration;

use super::open_runtime;

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn status_detail(status: &RunStatus) -> String {
    match status {
        RunStatus::Pending | RunStatus::Running => String::new(),
        RunStatus::Sleeping { until, days } => {
            format!("{days}-day reminder at {}", until.format("%Y-%m-%d %H:%M"))
        }
        RunStatus::Terminated { reason } => reason.to_string(),
        RunStatus::Failed { reason } => reason.clone(),
    }
}

fn fired_summary(record: &RunRecord) -> String {
    record
        .fired
        .iter()
        .map(|f| {
            if f.outcome.is_delivered() {
                format!("{}d", f.days)
            } else {
                format!("{}d(missed)", f.days)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn print_records(records: &[RunRecord]) {
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.subscription_id.clone(),
                r.status.label().to_string(),
                status_detail(&r.status),
                fired_summary(r),
                r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(&["SUBSCRIPTION", "STATUS", "DETAIL", "FIRED", "UPDATED"], rows);
}

fn parse_at(at: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match at {
        None => Ok(Utc::now()),
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --at '{s}', expected RFC 3339"))?
            .with_timezone(&Utc)),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub fn trigger(root: &Path, subscription_id: &str, json: bool) -> anyhow::Result<()> {
    let runtime = open_runtime(root)?;
    let outcome = runtime.trigger(subscription_id, Utc::now())?;
    if json {
        return print_json(&outcome);
    }
    match outcome {
        TriggerOutcome::Accepted { run_id, .. } => {
            println!("Started run {run_id} for '{subscription_id}'.");
        }
        TriggerOutcome::AlreadyRunning { run_id, .. } => {
            println!("Run {run_id} for '{subscription_id}' is already running.");
        }
    }
    Ok(())
}

pub fn tick(root: &Path, at: Option<&str>, json: bool) -> anyhow::Result<()> {
    let now = parse_at(at)?;
    let runtime = open_runtime(root)?;
    // The run store is exclusive to this process; nothing else is mid-drive.
    runtime.startup_recovery(Duration::ZERO, now)?;
    let driven = runtime.tick(now)?;
    if json {
        return print_json(&driven);
    }
    if driven.is_empty() {
        println!("No runs due.");
    } else {
        print_records(&driven);
    }
    Ok(())
}

pub fn status(root: &Path, subscription_id: &str, json: bool) -> anyhow::Result<()> {
    let runtime = open_runtime(root)?;
    let record = runtime
        .status(subscription_id)?
        .ok_or_else(|| ReminderError::RunNotFound(subscription_id.to_string()))?;
    let steps = runtime.journal(subscription_id)?;

    if json {
        let mut value = serde_json::to_value(&record)?;
        value["steps"] = serde_json::json!(steps);
        return print_json(&value);
    }

    println!("Subscription: {}", record.subscription_id);
    println!("Run:          {}", record.run_id);
    println!("Status:       {}", record.status.label());
    let detail = status_detail(&record.status);
    if !detail.is_empty() {
        println!("Detail:       {detail}");
    }
    if record.cancel_requested {
        println!("Abort:        requested");
    }
    println!("Started:      {}", record.created_at.to_rfc3339());
    println!("Updated:      {}", record.updated_at.to_rfc3339());
    if !record.fired.is_empty() {
        println!("\nReminders:");
        for f in &record.fired {
            let outcome = serde_json::to_value(&f.outcome)?;
            println!(
                "  {}-day  due {}  sent {}  {}",
                f.days,
                f.fire_at.format("%Y-%m-%d %H:%M"),
                f.fired_at.format("%Y-%m-%d %H:%M"),
                outcome["type"].as_str().unwrap_or("?")
            );
        }
    }
    println!("\nJournal: {} step(s)", steps.len());
    Ok(())
}

pub fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let runtime = open_runtime(root)?;
    let records = runtime.runs()?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No workflow runs.");
    } else {
        print_records(&records);
    }
    Ok(())
}

pub fn cancel(root: &Path, subscription_id: &str, json: bool) -> anyhow::Result<()> {
    let runtime = open_runtime(root)?;
    let record = runtime.cancel(subscription_id, Utc::now())?;
    if json {
        return print_json(&record);
    }
    println!(
        "Abort requested for run {} of '{subscription_id}'; it stops on the next tick.",
        record.run_id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_at_accepts_rfc3339() {
        let at = parse_at(Some("2031-01-03T00:00:00Z")).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2031, 1, 3, 0, 0, 0).unwrap());
        assert!(parse_at(Some("tomorrow")).is_err());
    }

    #[test]
    fn sleeping_detail_names_the_milestone() {
        let until = Utc.with_ymd_and_hms(2031, 1, 3, 9, 30, 0).unwrap();
        let detail = status_detail(&RunStatus::Sleeping { until, days: 7 });
        assert_eq!(detail, "7-day reminder at 2031-01-03 09:30");
    }
}
