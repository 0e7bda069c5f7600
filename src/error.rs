// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Error types shared by the gateway, polling and tracking layers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Relay returned {status}: {error} ({detail})")]
    Relay {
        status: u16,
        error: String,
        detail: String,
    },
    #[error("Upstream returned unexpected status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Environment variable {key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
