//! Payload marshalling interface
//!
//! Converts between characteristic-typed values and the per-segment wire
//! strings a protocol expects.

mod json;

pub use json::JsonMarshaller;

use crate::metadata::{AspectNode, Protocol, Service};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Wire payload keyed by protocol segment name
pub type Segments = HashMap<String, String>;

/// One typed input to place into a service's request payload
#[derive(Debug, Clone, PartialEq)]
pub struct MarshalInput {
    pub characteristic_id: String,
    pub function_id: String,
    pub aspect_node: Option<AspectNode>,
    pub value: Value,
}

/// Context used to locate the requested value in a response payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnmarshalHints {
    pub function_id: String,
    pub aspect_node: Option<AspectNode>,
}

#[async_trait]
pub trait Marshaller: Send + Sync {
    async fn marshal(
        &self,
        service: &Service,
        protocol: &Protocol,
        inputs: &[MarshalInput],
    ) -> Result<Segments>;

    async fn unmarshal(
        &self,
        characteristic_id: &str,
        service: &Service,
        protocol: &Protocol,
        segments: &Segments,
        hints: &UnmarshalHints,
    ) -> Result<Value>;
}
