use crate::error::{ReminderError, Result};
use crate::subscription::{Owner, Subscription};
use serde::{Deserialize, Serialize};

/// A reminder ready to hand to a [`crate::notify::Notifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Expands the reminder template. Holds only the management link, which comes
/// from configuration.
#[derive(Debug, Clone)]
pub struct Renderer {
    manage_url: String,
}

impl Renderer {
    pub fn new(manage_url: impl Into<String>) -> Self {
        Self {
            manage_url: manage_url.into(),
        }
    }

    pub fn manage_url(&self) -> &str {
        &self.manage_url
    }

    /// Render the reminder for `sub`, renewing `days` days from now.
    ///
    /// Fails with [`ReminderError::DataIntegrity`] when a field the template
    /// cannot do without is missing.
    pub fn render(&self, sub: &Subscription, owner: &Owner, days: u32) -> Result<RenderedMessage> {
        if sub.name.trim().is_empty() {
            return Err(ReminderError::DataIntegrity(format!(
                "subscription {} has no name",
                sub.id
            )));
        }
        if owner.email.trim().is_empty() {
            return Err(ReminderError::DataIntegrity(format!(
                "owner {} of subscription {} has no email",
                owner.id, sub.id
            )));
        }
        if !sub.price.is_finite() || sub.price < 0.0 {
            return Err(ReminderError::DataIntegrity(format!(
                "subscription {} has invalid price {}",
                sub.id, sub.price
            )));
        }

        let when = days_phrase(days);
        let price = format!(
            "{}{:.2} {}",
            sub.currency.symbol(),
            sub.price,
            sub.currency.code()
        );
        let date = sub.renewal_date.format("%B %-d, %Y").to_string();
        let payment = if sub.payment_method.trim().is_empty() {
            "not on file"
        } else {
            sub.payment_method.as_str()
        };
        let greeting = if owner.name.trim().is_empty() {
            "Hello,".to_string()
        } else {
            format!("Hello {},", owner.name)
        };

        let subject = if days == 1 {
            format!("Final reminder: your {} subscription renews tomorrow", sub.name)
        } else {
            format!("Reminder: your {} subscription renews {when}", sub.name)
        };

        let body = format!(
            "{greeting}\n\n\
             Your {name} subscription renews {when}, on {date}.\n\n\
             \x20 Plan:           {name}\n\
             \x20 Price:          {price} ({frequency})\n\
             \x20 Payment method: {payment}\n\n\
             Manage or cancel your subscription: {url}\n",
            name = sub.name,
            frequency = sub.frequency,
            url = self.manage_url,
        );

        Ok(RenderedMessage { subject, body })
    }
}

fn days_phrase(days: u32) -> String {
    match days {
        0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        n => format!("in {n} days"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
