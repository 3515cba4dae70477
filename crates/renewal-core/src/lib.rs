pub mod config;
pub mod error;
pub mod io;
pub mod milestone;
pub mod notify;
pub mod paths;
pub mod render;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod subscription;
pub mod workflow;

pub use error::{ReminderError, Result};
