pub mod health;
pub mod workflows;
