//! Protobuf wire types for the command/response transport
//!
//! Hand-maintained prost definitions. Tags are stable and must not be reused.

use std::collections::HashMap;

/// Kind of message carried by an [`Envelope`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    MsgUnknown = 0,
    MsgCommand = 1,
    MsgResponse = 2,
    MsgError = 3,
}

/// Routing and tracing metadata attached to every message
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    /// Component that produced the message
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(string, tag = "2")]
    pub correlation_id: String,
    #[prost(uint64, tag = "3")]
    pub timestamp_ms: u64,
    #[prost(enumeration = "MessageType", tag = "4")]
    pub msg_type: i32,
}

/// A command addressed to one service of one device
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskRequest {
    #[prost(string, tag = "1")]
    pub correlation_id: String,
    #[prost(string, tag = "2")]
    pub device_id: String,
    #[prost(string, tag = "3")]
    pub device_local_id: String,
    #[prost(string, tag = "4")]
    pub service_id: String,
    #[prost(string, tag = "5")]
    pub service_local_id: String,
    #[prost(string, tag = "6")]
    pub protocol_id: String,
    /// Protocol handler (topic) the connector listens on
    #[prost(string, tag = "7")]
    pub protocol_handler: String,
    /// Marshalled input keyed by protocol segment name
    #[prost(map = "string, string", tag = "8")]
    pub input: HashMap<String, String>,
    #[prost(string, tag = "9")]
    pub output_characteristic_id: String,
    #[prost(string, tag = "10")]
    pub function_id: String,
    #[prost(string, tag = "11")]
    pub aspect_id: String,
    /// Service metadata as JSON, needed to unmarshal the response
    #[prost(string, tag = "12")]
    pub service_json: String,
    /// Protocol metadata as JSON, needed to unmarshal the response
    #[prost(string, tag = "13")]
    pub protocol_json: String,
    /// Resolved aspect node as JSON, empty when no aspect was requested
    #[prost(string, tag = "14")]
    pub aspect_node_json: String,
}

/// Successful answer to a [`TaskRequest`]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskResponse {
    #[prost(message, optional, tag = "1")]
    pub request: Option<TaskRequest>,
    /// Raw output keyed by protocol segment name
    #[prost(map = "string, string", tag = "2")]
    pub output: HashMap<String, String>,
}

/// Failure report for a [`TaskRequest`]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskError {
    #[prost(string, tag = "1")]
    pub correlation_id: String,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Top-level transport message
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(oneof = "envelope::Payload", tags = "2, 3, 4")]
    pub payload: Option<envelope::Payload>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Command(super::TaskRequest),
        #[prost(message, tag = "3")]
        Response(super::TaskResponse),
        #[prost(message, tag = "4")]
        Error(super::TaskError),
    }
}
