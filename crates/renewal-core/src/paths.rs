use crate::error::{ReminderError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const RENEWAL_DIR: &str = ".renewal";
pub const SUBSCRIPTIONS_DIR: &str = ".renewal/subscriptions";
pub const USERS_DIR: &str = ".renewal/users";

pub const CONFIG_FILE: &str = ".renewal/config.yaml";
pub const RUNS_DB_FILE: &str = ".renewal/runs.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn renewal_dir(root: &Path) -> PathBuf {
    root.join(RENEWAL_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn runs_db_path(root: &Path) -> PathBuf {
    root.join(RUNS_DB_FILE)
}

pub fn subscription_path(root: &Path, id: &str) -> PathBuf {
    root.join(SUBSCRIPTIONS_DIR).join(format!("{id}.yaml"))
}

pub fn user_path(root: &Path, id: &str) -> PathBuf {
    root.join(USERS_DIR).join(format!("{id}.yaml"))
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

/// Subscription and user identifiers double as file names and redb keys, so
/// they are restricted to a filesystem-safe alphabet.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id.len() > 64
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ReminderError::InvalidSubscriptionId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["65f1c0ffee0123456789abcd", "sub-1", "a", "Netflix_Premium"] {
            validate_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        let too_long = "x".repeat(65);
        for id in ["", "has spaces", "../etc/passwd", "a/b", "emoji✓", too_long.as_str()] {
            assert!(validate_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.renewal/config.yaml")
        );
        assert_eq!(
            subscription_path(root, "sub-1"),
            PathBuf::from("/tmp/proj/.renewal/subscriptions/sub-1.yaml")
        );
        assert_eq!(
            user_path(root, "u1"),
            PathBuf::from("/tmp/proj/.renewal/users/u1.yaml")
        );
    }
}
