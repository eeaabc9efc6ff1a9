//! In-memory metadata repository

use super::model::*;
use super::MetadataRepository;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Serialized form of a metadata snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataDocument {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub device_types: Vec<DeviceType>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub protocols: Vec<Protocol>,
    #[serde(default)]
    pub device_groups: Vec<DeviceGroup>,
    #[serde(default)]
    pub aspect_nodes: Vec<AspectNode>,
}

/// Repository serving a fixed snapshot; the token is not checked
#[derive(Debug, Default)]
pub struct StaticRepository {
    devices: HashMap<String, Device>,
    device_types: HashMap<String, DeviceType>,
    services: HashMap<String, Service>,
    functions: HashMap<String, Function>,
    concepts: HashMap<String, Concept>,
    protocols: HashMap<String, Protocol>,
    device_groups: HashMap<String, DeviceGroup>,
    aspect_nodes: HashMap<String, AspectNode>,
}

impl StaticRepository {
    /// Build a repository, rejecting dangling device type references
    pub fn new(doc: MetadataDocument) -> Result<Self> {
        let mut repo = Self::default();

        for device_type in doc.device_types {
            for service in &device_type.services {
                repo.services.insert(service.id.clone(), service.clone());
            }
            repo.device_types.insert(device_type.id.clone(), device_type);
        }
        for device in doc.devices {
            if !repo.device_types.contains_key(&device.device_type_id) {
                bail!(
                    "device {} references unknown device type {}",
                    device.id,
                    device.device_type_id
                );
            }
            repo.devices.insert(device.id.clone(), device);
        }
        repo.functions = index(doc.functions, |f| &f.id);
        repo.concepts = index(doc.concepts, |c| &c.id);
        repo.protocols = index(doc.protocols, |p| &p.id);
        repo.device_groups = index(doc.device_groups, |g| &g.id);
        repo.aspect_nodes = index(doc.aspect_nodes, |a| &a.id);

        Ok(repo)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: MetadataDocument = serde_json::from_str(json).context("invalid metadata document")?;
        Self::new(doc)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read metadata from {}", path.display()))?;
        Self::from_json(&json)
    }
}

fn index<T>(items: Vec<T>, key: impl Fn(&T) -> &String) -> HashMap<String, T> {
    items.into_iter().map(|item| (key(&item).clone(), item)).collect()
}

fn lookup<T: Clone>(map: &HashMap<String, T>, kind: &str, id: &str) -> Result<T> {
    map.get(id)
        .cloned()
        .ok_or_else(|| anyhow!("{} {} not found", kind, id))
}

#[async_trait]
impl MetadataRepository for StaticRepository {
    async fn get_device(&self, _token: &str, id: &str) -> Result<Device> {
        lookup(&self.devices, "device", id)
    }

    async fn get_service(&self, _token: &str, id: &str) -> Result<Service> {
        lookup(&self.services, "service", id)
    }

    async fn get_function(&self, _token: &str, id: &str) -> Result<Function> {
        lookup(&self.functions, "function", id)
    }

    async fn get_concept(&self, _token: &str, id: &str) -> Result<Concept> {
        lookup(&self.concepts, "concept", id)
    }

    async fn get_protocol(&self, _token: &str, id: &str) -> Result<Protocol> {
        lookup(&self.protocols, "protocol", id)
    }

    async fn get_device_type(&self, _token: &str, id: &str) -> Result<DeviceType> {
        lookup(&self.device_types, "device type", id)
    }

    async fn get_device_group(&self, _token: &str, id: &str) -> Result<DeviceGroup> {
        lookup(&self.device_groups, "device group", id)
    }

    async fn get_aspect_node(&self, _token: &str, id: &str) -> Result<AspectNode> {
        lookup(&self.aspect_nodes, "aspect node", id)
    }
}
