//! Device Command Shared Wire Types
//!
//! This crate provides the transport envelope and codec exchanged between the
//! command dispatcher and device connectors.

pub mod codec;
pub mod proto;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Dispatch defaults shared by the dispatcher and connectors
pub mod defaults {
    /// Wait for a task response when the caller gives no usable timeout
    pub const COMMAND_TIMEOUT_MS: u64 = 10_000;

    /// Number of workers consuming task responses
    pub const RESPONSE_WORKERS: usize = 4;

    /// Connector port used by the device simulator
    pub const CONNECTOR_ADDR: &str = "127.0.0.1:8080";

    /// Capacity of the outbound command queue
    pub const OUTBOUND_QUEUE: usize = 100;
}

/// Builder helpers for creating messages
impl Header {
    /// Create a new header with the given source and message type
    pub fn new(
        source: impl Into<String>,
        msg_type: MessageType,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            correlation_id: correlation_id.into(),
            timestamp_ms: now_ms(),
            msg_type: msg_type.into(),
        }
    }
}

impl Envelope {
    /// Wrap a task request into a command envelope
    pub fn command(source: &str, request: TaskRequest) -> Self {
        let correlation_id = request.correlation_id.clone();
        Self {
            header: Some(Header::new(source, MessageType::MsgCommand, correlation_id)),
            payload: Some(envelope::Payload::Command(request)),
        }
    }

    /// Answer a task request with its output segments
    pub fn response(source: &str, request: TaskRequest, output: HashMap<String, String>) -> Self {
        let correlation_id = request.correlation_id.clone();
        Self {
            header: Some(Header::new(source, MessageType::MsgResponse, correlation_id)),
            payload: Some(envelope::Payload::Response(TaskResponse {
                request: Some(request),
                output,
            })),
        }
    }

    /// Report a task failure back to the dispatcher
    pub fn error(source: &str, correlation_id: &str, message: impl Into<String>) -> Self {
        Self {
            header: Some(Header::new(source, MessageType::MsgError, correlation_id)),
            payload: Some(envelope::Payload::Error(TaskError {
                correlation_id: correlation_id.to_string(),
                message: message.into(),
            })),
        }
    }

    /// Correlation id carried by the header, falling back to the payload
    pub fn correlation_id(&self) -> Option<&str> {
        if let Some(header) = &self.header {
            if !header.correlation_id.is_empty() {
                return Some(&header.correlation_id);
            }
        }
        match &self.payload {
            Some(envelope::Payload::Command(req)) => Some(&req.correlation_id),
            Some(envelope::Payload::Response(resp)) => {
                resp.request.as_ref().map(|r| r.correlation_id.as_str())
            }
            Some(envelope::Payload::Error(err)) => Some(&err.correlation_id),
            None => None,
        }
    }
}
