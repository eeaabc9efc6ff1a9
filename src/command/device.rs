//! Single-device command orchestration
//!
//! Resolves metadata, then either answers from the last known value (event
//! services asked for a measurement) or dispatches the command over the
//! transport and waits for the correlated response.

use super::coalescer::Participant;
use super::service::CommandService;
use crate::error::{status, CommandError, CommandResponse};
use crate::marshal::{MarshalInput, Segments, UnmarshalHints};
use crate::metadata::{AspectNode, Content, Device, Function, FunctionKind, Interaction, Protocol, Service};
use crate::timeseries::{QueryRequest, QueryResponse};
use device_command_shared::{Envelope, TaskRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Invoke one function on one service of one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommandRequest {
    pub device_id: String,
    pub service_id: String,
    pub function_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Where a last-value lookup is answered from
pub(crate) enum LastValueSource {
    /// Query the time-series store for this command alone
    Direct,
    /// Join the coalesced query of the surrounding batch or group
    Batch(Participant),
}

/// Metadata needed to execute a device command
struct Resolved {
    device: Device,
    service: Service,
    function: Function,
    characteristic_id: String,
    protocol: Protocol,
    aspect_node: Option<AspectNode>,
}

impl Resolved {
    fn takes_last_value_path(&self) -> bool {
        self.service.interaction == Interaction::Event && self.function.is_measuring()
    }

    fn hints(&self) -> UnmarshalHints {
        UnmarshalHints {
            function_id: self.function.id.clone(),
            aspect_node: self.aspect_node.clone(),
        }
    }
}

impl CommandService {
    /// Run a device command; `timeout` like `"5s"`, empty for the default
    pub async fn device_command(
        &self,
        token: &str,
        request: &DeviceCommandRequest,
        timeout: Option<&str>,
    ) -> CommandResponse {
        let timeout = self.config.parse_timeout(timeout);
        self.execute_device(token, request, timeout, LastValueSource::Direct)
            .await
    }

    pub(crate) async fn execute_device(
        &self,
        token: &str,
        request: &DeviceCommandRequest,
        timeout: Duration,
        last_value: LastValueSource,
    ) -> CommandResponse {
        match self.try_execute_device(token, request, timeout, last_value).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "command {} on {}/{} failed: {}",
                    request.function_id, request.device_id, request.service_id, e
                );
                e.into()
            }
        }
    }

    async fn try_execute_device(
        &self,
        token: &str,
        request: &DeviceCommandRequest,
        timeout: Duration,
        last_value: LastValueSource,
    ) -> Result<CommandResponse, CommandError> {
        let resolved = self.resolve(token, request).await?;

        if resolved.takes_last_value_path() {
            let value = self.last_value(token, &resolved, last_value).await?;
            return Ok(CommandResponse::ok(json!([value])));
        }

        // routing is decided, release the coalescer before waiting on the device
        drop(last_value);
        self.dispatch(request, resolved, timeout).await
    }

    async fn resolve(&self, token: &str, request: &DeviceCommandRequest) -> Result<Resolved, CommandError> {
        let repo = &self.repository;

        let device = repo
            .get_device(token, &request.device_id)
            .await
            .map_err(|e| CommandError::metadata("device", e))?;
        let service = repo
            .get_service(token, &request.service_id)
            .await
            .map_err(|e| CommandError::metadata("service", e))?;
        let function = repo
            .get_function(token, &request.function_id)
            .await
            .map_err(|e| CommandError::metadata("function", e))?;

        let characteristic_id = if function.concept_id.is_empty() {
            String::new()
        } else {
            repo.get_concept(token, &function.concept_id)
                .await
                .map_err(|e| CommandError::metadata("concept", e))?
                .base_characteristic_id
        };

        let protocol = repo
            .get_protocol(token, &service.protocol_id)
            .await
            .map_err(|e| CommandError::metadata("protocol", e))?;

        let aspect_node = match request.aspect_id.as_deref().filter(|id| !id.is_empty()) {
            Some(aspect_id) => Some(
                repo.get_aspect_node(token, aspect_id)
                    .await
                    .map_err(|e| CommandError::metadata("aspect node", e))?,
            ),
            None => None,
        };

        Ok(Resolved {
            device,
            service,
            function,
            characteristic_id,
            protocol,
            aspect_node,
        })
    }

    /// Answer a measurement from the most recent stored values
    async fn last_value(
        &self,
        token: &str,
        resolved: &Resolved,
        source: LastValueSource,
    ) -> Result<Value, CommandError> {
        let device_id = &resolved.device.id;
        let service_id = &resolved.service.id;
        let columns: Vec<String> = resolved
            .service
            .outputs
            .iter()
            .flat_map(|content| content.content_variable.leaf_paths())
            .collect();

        debug!(
            "last value for {}/{} over {} columns",
            device_id,
            service_id,
            columns.len()
        );

        let rows = match source {
            LastValueSource::Direct => {
                let requests: Vec<QueryRequest> = columns
                    .iter()
                    .map(|column| QueryRequest::new(device_id, service_id, column.clone()))
                    .collect();
                self.timeseries
                    .query(token, &requests)
                    .await
                    .map_err(|e| CommandError::LastValue(e.to_string()))?
            }
            LastValueSource::Batch(participant) => participant.query(device_id, service_id, &columns).await?,
        };

        if rows.len() < columns.len() {
            return Err(CommandError::LastValue(format!(
                "time-series returned {} rows for {} columns",
                rows.len(),
                columns.len()
            )));
        }

        let segments = fold_rows(&resolved.service.outputs, &resolved.protocol, &rows)?;
        self.marshaller
            .unmarshal(
                &resolved.characteristic_id,
                &resolved.service,
                &resolved.protocol,
                &segments,
                &resolved.hints(),
            )
            .await
            .map_err(|e| CommandError::Unmarshal(e.to_string()))
    }

    /// Send the command over the transport and wait for its response
    async fn dispatch(
        &self,
        request: &DeviceCommandRequest,
        resolved: Resolved,
        timeout: Duration,
    ) -> Result<CommandResponse, CommandError> {
        let input = match resolved.function.kind {
            FunctionKind::Controlling => {
                let inputs = [MarshalInput {
                    characteristic_id: resolved.characteristic_id.clone(),
                    function_id: resolved.function.id.clone(),
                    aspect_node: resolved.aspect_node.clone(),
                    value: request.input.clone().unwrap_or(Value::Null),
                }];
                self.marshaller
                    .marshal(&resolved.service, &resolved.protocol, &inputs)
                    .await
                    .map_err(|e| CommandError::Marshal(e.to_string()))?
            }
            FunctionKind::Measuring => Segments::new(),
        };

        let output_characteristic_id = match resolved.function.kind {
            FunctionKind::Measuring => resolved.characteristic_id.clone(),
            FunctionKind::Controlling => String::new(),
        };

        let correlation_id = Uuid::new_v4().to_string();
        let task = TaskRequest {
            correlation_id: correlation_id.clone(),
            device_id: resolved.device.id.clone(),
            device_local_id: resolved.device.local_id.clone(),
            service_id: resolved.service.id.clone(),
            service_local_id: resolved.service.local_id.clone(),
            protocol_id: resolved.protocol.id.clone(),
            protocol_handler: resolved.protocol.handler.clone(),
            input,
            output_characteristic_id,
            function_id: resolved.function.id.clone(),
            aspect_id: request.aspect_id.clone().unwrap_or_default(),
            service_json: to_json(&resolved.service)?,
            protocol_json: to_json(&resolved.protocol)?,
            aspect_node_json: match &resolved.aspect_node {
                Some(node) => to_json(node)?,
                None => String::new(),
            },
        };

        self.register.register(&correlation_id).await;

        info!(
            "dispatching {} to {}/{} (correlation {})",
            resolved.function.id, resolved.device.id, resolved.service.id, correlation_id
        );

        let envelope = Envelope::command(&self.config.source, task);
        if let Err(e) = self.producer.send_command(envelope).await {
            error!("unable to produce message for {}: {}", correlation_id, e);
            self.register
                .complete(
                    &correlation_id,
                    status::INTERNAL,
                    Value::String(CommandError::TransportSend.to_string()),
                )
                .await;
        }

        let result = self.register.wait_with_timeout(&correlation_id, timeout).await;
        if result.is_ok() {
            Ok(CommandResponse::ok(json!([result.body])))
        } else {
            Ok(result)
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CommandError> {
    serde_json::to_string(value).map_err(|e| CommandError::Internal(e.to_string()))
}

/// Rebuild per-segment payloads from rows ordered like the outputs' leaf paths
fn fold_rows(outputs: &[Content], protocol: &Protocol, rows: &[QueryResponse]) -> Result<Segments, CommandError> {
    let mut segments = Segments::new();
    let mut rows = rows.iter();

    for content in outputs {
        let mut root = Value::Null;
        for path in content.content_variable.leaf_paths() {
            let Some(row) = rows.next() else { break };
            // leaf paths start with the root variable's own name
            let keys: Vec<&str> = path.split('.').skip(1).collect();
            set_path(&mut root, &keys, row.value.clone());
        }

        let segment = protocol
            .segment_name(&content.protocol_segment_id)
            .ok_or_else(|| {
                CommandError::Unmarshal(format!("unknown protocol segment {}", content.protocol_segment_id))
            })?;
        let raw = match (&root, content.serialization.as_str()) {
            (Value::String(s), ser) if ser != "json" => s.clone(),
            _ => to_json(&root)?,
        };
        segments.insert(segment.to_string(), raw);
    }

    Ok(segments)
}

fn set_path(target: &mut Value, keys: &[&str], value: Value) {
    let Some((first, rest)) = keys.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let slot = map.entry(first.to_string()).or_insert(Value::Null);
        set_path(slot, rest, value);
    }
}
