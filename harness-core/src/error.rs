use std::time::Duration;
use thiserror::Error;

pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Provisioning of '{resource}' failed: {message}")]
    Provision { resource: String, message: String },

    #[error("Timed out after {}s waiting for '{resource}', last status: {last_status}", .waited.as_secs())]
    Timeout {
        resource: String,
        waited: Duration,
        last_status: String,
    },

    #[error("Transport error: {0}")]
    Transport(anyhow::Error),

    #[error("Authorization failed with HTTP {status}: {body}")]
    Auth { status: u16, body: String },

    #[error("Could not parse {context}: {message}")]
    Parse { context: String, message: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn provision(resource: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::Provision {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn parse(context: impl Into<String>, message: impl ToString) -> Self {
        HarnessError::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        HarnessError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for `Auth` errors the control plane raises on a stale bearer token.
    pub fn is_stale_bearer(&self) -> bool {
        matches!(self, HarnessError::Auth { status, .. } if *status == 401 || *status == 403)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HarnessError::NotFound { .. })
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        HarnessError::Transport(anyhow::Error::new(err))
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        HarnessError::Config(anyhow::Error::new(err))
    }
}
