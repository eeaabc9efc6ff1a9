//! Deduplicating batch execution
//!
//! Structurally identical commands in one batch run once; their result is
//! copied to every position that asked for it.

use super::coalescer::{EventBatch, Participant};
use super::device::{DeviceCommandRequest, LastValueSource};
use super::group::GroupCommandRequest;
use super::service::CommandService;
use crate::error::{CommandError, CommandResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// One entry of a batch request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub function_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class_id: Option<String>,
}

/// What a command message addresses
enum Target {
    Device(DeviceCommandRequest),
    Group(GroupCommandRequest),
}

impl CommandMessage {
    fn target(&self) -> Result<Target, CommandError> {
        if self.function_id.is_empty() {
            return Err(CommandError::Validation("missing function_id".into()));
        }
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.is_empty());

        match (present(&self.device_id), present(&self.service_id), present(&self.group_id)) {
            (true, true, false) => Ok(Target::Device(DeviceCommandRequest {
                device_id: self.device_id.clone().unwrap_or_default(),
                service_id: self.service_id.clone().unwrap_or_default(),
                function_id: self.function_id.clone(),
                aspect_id: self.aspect_id.clone(),
                input: self.input.clone(),
            })),
            (false, false, true) => Ok(Target::Group(GroupCommandRequest {
                group_id: self.group_id.clone().unwrap_or_default(),
                function_id: self.function_id.clone(),
                aspect_id: self.aspect_id.clone(),
                device_class_id: self.device_class_id.clone(),
                input: self.input.clone(),
            })),
            _ => Err(CommandError::Validation(
                "expected either device_id and service_id or group_id".into(),
            )),
        }
    }
}

/// Canonical identity of a command message
///
/// Equality compares the canonical form as well as the digest, so a digest
/// collision never merges distinct commands.
#[derive(Debug, Clone)]
pub struct DedupKey {
    digest: [u8; 32],
    canonical: String,
}

impl DedupKey {
    pub fn of(command: &CommandMessage) -> Self {
        // serde_json maps are ordered, nested input objects included
        let canonical = serde_json::to_value(command)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| format!("{:?}", command));
        let digest = Sha256::digest(canonical.as_bytes()).into();
        Self { digest, canonical }
    }

    pub fn hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl PartialEq for DedupKey {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.canonical == other.canonical
    }
}

impl Eq for DedupKey {}

impl Hash for DedupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

/// Result for one position of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResultElement {
    pub status_code: u16,
    pub message: Value,
}

impl From<CommandResponse> for BatchResultElement {
    fn from(response: CommandResponse) -> Self {
        Self {
            status_code: response.status,
            message: response.body,
        }
    }
}

impl CommandService {
    /// Execute `commands`, one result per command in request order
    pub async fn batch(
        &self,
        token: &str,
        commands: Vec<CommandMessage>,
        timeout: Option<&str>,
    ) -> Vec<BatchResultElement> {
        if commands.is_empty() {
            return Vec::new();
        }
        let timeout = self.config.parse_timeout(timeout);

        let mut order: Vec<DedupKey> = Vec::new();
        let mut positions: HashMap<DedupKey, Vec<usize>> = HashMap::new();
        for (i, command) in commands.iter().enumerate() {
            let key = DedupKey::of(command);
            positions
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(i);
        }
        debug!(
            "batch of {} commands, {} distinct",
            commands.len(),
            order.len()
        );

        // one participant per distinct command
        let events = EventBatch::new(token, self.timeseries.clone(), order.len());
        let slots: Arc<Mutex<Vec<Option<BatchResultElement>>>> =
            Arc::new(Mutex::new(vec![None; commands.len()]));

        let mut tasks = JoinSet::new();
        for key in order {
            let indices = positions.remove(&key).unwrap_or_default();
            let Some(&first) = indices.first() else { continue };
            let command = commands[first].clone();
            let participant = events.participant();
            let service = self.clone();
            let token = token.to_string();
            let slots = slots.clone();
            debug!("command {} serves positions {:?}", key.hex(), indices);

            tasks.spawn(async move {
                let element = BatchResultElement::from(
                    service.execute_message(&token, &command, timeout, participant).await,
                );
                let mut slots = slots.lock().await;
                for &i in &indices {
                    slots[i] = Some(element.clone());
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("batch task failed: {}", e);
            }
        }

        let slots = slots.lock().await;
        slots
            .iter()
            .map(|slot| {
                slot.clone().unwrap_or_else(|| {
                    CommandResponse::from(CommandError::Internal("batch task failed".into())).into()
                })
            })
            .collect()
    }

    async fn execute_message(
        &self,
        token: &str,
        command: &CommandMessage,
        timeout: Duration,
        participant: Participant,
    ) -> CommandResponse {
        match command.target() {
            Ok(Target::Device(request)) => {
                self.execute_device(token, &request, timeout, LastValueSource::Batch(participant))
                    .await
            }
            Ok(Target::Group(request)) => {
                self.execute_group(token, &request, timeout, Some(participant))
                    .await
            }
            Err(e) => e.into(),
        }
    }
}
