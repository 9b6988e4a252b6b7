// Re-export internal modules for integration tests and external crate use.
pub mod actions;
pub mod commands;
pub mod config;
pub mod gcloud;
pub mod github;
pub mod readiness;
pub mod startup;
