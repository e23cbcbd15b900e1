//! Error types for the Meadow control stack

use thiserror::Error;

/// Top-level error for meadow-nav
#[derive(Error, Debug)]
pub enum NavError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hardware port error: {0}")]
    Port(#[from] meadow_io::Error),

    #[error("Localization error: {0}")]
    Localization(String),

    #[error("Planning error: {0}")]
    Planning(#[from] crate::planning::PlanningError),

    #[error("Persistence error: {0}")]
    Persist(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl From<toml::de::Error> for NavError {
    fn from(e: toml::de::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for NavError {
    fn from(e: serde_json::Error) -> Self {
        NavError::Persist(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NavError>;
