//! Device metadata repository interface
//!
//! This module provides:
//! - The entity types the dispatcher resolves before sending a command
//! - The repository trait the dispatcher consumes
//! - An in-memory repository loaded from a JSON document

mod model;
mod repository;

pub use model::{
    AspectNode, Concept, Content, ContentVariable, Device, DeviceGroup, DeviceType, Function,
    FunctionKind, Interaction, Protocol, ProtocolSegment, Service,
};
pub use repository::{MetadataDocument, StaticRepository};

use anyhow::Result;
use async_trait::async_trait;

/// Read access to device metadata
///
/// Calls are idempotent and may be cached by the implementation.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    async fn get_device(&self, token: &str, id: &str) -> Result<Device>;
    async fn get_service(&self, token: &str, id: &str) -> Result<Service>;
    async fn get_function(&self, token: &str, id: &str) -> Result<Function>;
    async fn get_concept(&self, token: &str, id: &str) -> Result<Concept>;
    async fn get_protocol(&self, token: &str, id: &str) -> Result<Protocol>;
    async fn get_device_type(&self, token: &str, id: &str) -> Result<DeviceType>;
    async fn get_device_group(&self, token: &str, id: &str) -> Result<DeviceGroup>;
    async fn get_aspect_node(&self, token: &str, id: &str) -> Result<AspectNode>;
}
