//! Subscription record store.
//!
//! The workflow only reads through [`SubscriptionStore`]. [`FileStore`] keeps
//! one YAML document per record under `.renewal/`; writes exist for seeding
//! and for tests.

use crate::error::{ReminderError, Result};
use crate::io::atomic_write;
use crate::paths;
use crate::subscription::{Owner, Subscription};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

pub trait SubscriptionStore: Send + Sync {
    fn get_subscription(&self, id: &str) -> Result<Option<Subscription>>;

    fn get_owner(&self, user_id: &str) -> Result<Option<Owner>>;
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn save_subscription(&self, sub: &Subscription) -> Result<()> {
        paths::validate_id(&sub.id)?;
        let data = serde_yaml::to_string(sub)?;
        atomic_write(
            &paths::subscription_path(&self.root, &sub.id),
            data.as_bytes(),
        )
    }

    pub fn save_owner(&self, owner: &Owner) -> Result<()> {
        paths::validate_id(&owner.id)?;
        let data = serde_yaml::to_string(owner)?;
        atomic_write(&paths::user_path(&self.root, &owner.id), data.as_bytes())
    }
}

/// A record that exists but does not parse is bad data, not an I/O fault.
fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&data)
        .map(Some)
        .map_err(|e| ReminderError::DataIntegrity(format!("{}: {e}", path.display())))
}

impl SubscriptionStore for FileStore {
    fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        paths::validate_id(id)?;
        load_yaml(&paths::subscription_path(&self.root, id))
    }

    fn get_owner(&self, user_id: &str) -> Result<Option<Owner>> {
        paths::validate_id(user_id)?;
        load_yaml(&paths::user_path(&self.root, user_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
