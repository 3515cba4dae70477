use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error(
        "invalid subscription id '{0}': must be 1-64 letters, digits, hyphens, or underscores"
    )]
    InvalidSubscriptionId(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("no workflow run for subscription: {0}")]
    RunNotFound(String),

    #[error("workflow run for '{0}' has already finished")]
    RunAlreadyFinished(String),

    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("run store error: {0}")]
    RunDb(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReminderError>;
