use crate::output::print_json;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Subcommand;
use renewal_core::store::{FileStore, SubscriptionStore};
use renewal_core::subscription::{Owner, Subscription, SubscriptionStatus};
use serde::de::DeserializeOwned;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum SubscriptionSubcommand {
    /// Create or replace a subscription record
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: f64,
        /// USD, EUR or GBP
        #[arg(long, default_value = "USD")]
        currency: String,
        /// daily, weekly, monthly or yearly
        #[arg(long, default_value = "monthly")]
        frequency: String,
        #[arg(long, default_value = "other")]
        category: String,
        #[arg(long, default_value = "")]
        payment_method: String,
        /// Renewal time: RFC 3339, YYYY-MM-DD, or +Nd for N days from now
        #[arg(long)]
        renews: String,
        /// active, cancelled or expired
        #[arg(long, default_value = "active")]
        status: String,
        /// Owner id
        #[arg(long)]
        user: String,
        /// Also write the owner record with this display name
        #[arg(long, requires = "owner_email")]
        owner_name: Option<String>,
        #[arg(long, requires = "owner_name")]
        owner_email: Option<String>,
    },

    /// Show a subscription and its owner
    Show { id: String },

    /// Change a subscription's status
    SetStatus {
        id: String,
        /// active, cancelled or expired
        status: String,
    },
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse a wire-format enum value (`monthly`, `EUR`, ...) through serde.
fn parse_wire<T: DeserializeOwned>(field: &str, value: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| anyhow!("invalid {field} '{value}'"))
}

fn parse_renewal(value: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    if let Some(days) = value.strip_prefix('+').and_then(|v| v.strip_suffix('d')) {
        let days: i64 = days
            .parse()
            .with_context(|| format!("invalid relative renewal '{value}'"))?;
        return Ok(now + Duration::days(days));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        anyhow!("invalid --renews '{value}': expected RFC 3339, YYYY-MM-DD or +Nd")
    })?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| anyhow!("invalid --renews '{value}'"))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: SubscriptionSubcommand, json: bool) -> anyhow::Result<()> {
    let store = FileStore::new(root);
    match subcmd {
        SubscriptionSubcommand::Add {
            id,
            name,
            price,
            currency,
            frequency,
            category,
            payment_method,
            renews,
            status,
            user,
            owner_name,
            owner_email,
        } => {
            let now = Utc::now();
            let sub = Subscription {
                id,
                name,
                price,
                currency: parse_wire("currency", &currency.to_ascii_uppercase())?,
                frequency: parse_wire("frequency", &frequency.to_ascii_lowercase())?,
                category: parse_wire("category", &category.to_ascii_lowercase())?,
                payment_method,
                status: parse_wire("status", &status.to_ascii_lowercase())?,
                start_date: now,
                renewal_date: parse_renewal(&renews, now)?,
                user,
            };
            if let (Some(owner_name), Some(email)) = (owner_name, owner_email) {
                store.save_owner(&Owner {
                    id: sub.user.clone(),
                    name: owner_name,
                    email,
                })?;
            }
            store.save_subscription(&sub)?;
            if json {
                return print_json(&sub);
            }
            println!(
                "Saved subscription '{}' renewing {}.",
                sub.id,
                sub.renewal_date.to_rfc3339()
            );
            Ok(())
        }
        SubscriptionSubcommand::Show { id } => {
            let sub = store
                .get_subscription(&id)?
                .ok_or_else(|| anyhow!("subscription not found: {id}"))?;
            let owner = store.get_owner(&sub.user)?;
            if json {
                return print_json(&serde_json::json!({
                    "subscription": sub,
                    "owner": owner,
                }));
            }
            println!("Subscription: {} ({})", sub.name, sub.id);
            println!("Status:       {}", sub.status);
            println!(
                "Price:        {}{:.2} {} ({})",
                sub.currency.symbol(),
                sub.price,
                sub.currency,
                sub.frequency
            );
            println!("Renews:       {}", sub.renewal_date.to_rfc3339());
            match owner {
                Some(o) => println!("Owner:        {} <{}>", o.name, o.email),
                None => println!("Owner:        {} (no record)", sub.user),
            }
            Ok(())
        }
        SubscriptionSubcommand::SetStatus { id, status } => {
            let mut sub = store
                .get_subscription(&id)?
                .ok_or_else(|| anyhow!("subscription not found: {id}"))?;
            sub.status = parse_wire::<SubscriptionStatus>("status", &status.to_ascii_lowercase())?;
            store.save_subscription(&sub)?;
            if json {
                return print_json(&sub);
            }
            println!("Subscription '{id}' is now {}.", sub.status);
            Ok(())
        }
    }
}
