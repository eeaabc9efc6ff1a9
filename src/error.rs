//! Error taxonomy and the status/body pair returned to callers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// HTTP-style status codes used in command results
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const INTERNAL: u16 = 500;
    pub const UNAVAILABLE: u16 = 503;
}

/// Failures raised while dispatching a command
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("unable to load {entity}: {cause}")]
    MetadataFetch { entity: &'static str, cause: String },

    #[error("unable to marshal input: {0}")]
    Marshal(String),

    #[error("unable to unmarshal output: {0}")]
    Unmarshal(String),

    #[error("unable to produce message")]
    TransportSend,

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Validation(String),

    #[error("unable to query last value: {0}")]
    LastValue(String),

    #[error("shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Internal(String),
}

impl CommandError {
    pub fn metadata(entity: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::MetadataFetch {
            entity,
            cause: cause.to_string(),
        }
    }

    /// Status code reported for this failure
    pub fn status(&self) -> u16 {
        match self {
            CommandError::Timeout => status::REQUEST_TIMEOUT,
            CommandError::Validation(_) => status::BAD_REQUEST,
            CommandError::ShuttingDown => status::UNAVAILABLE,
            _ => status::INTERNAL,
        }
    }
}

/// Outcome of a command: a status code and a JSON body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: u16,
    pub body: Value,
}

impl CommandResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(status::OK, body)
    }

    pub fn is_ok(&self) -> bool {
        self.status == status::OK
    }
}

impl From<CommandError> for CommandResponse {
    fn from(err: CommandError) -> Self {
        Self::new(err.status(), Value::String(err.to_string()))
    }
}
