//! Device group fan-out with partial-failure aggregation

use super::coalescer::{EventBatch, Participant};
use super::device::{DeviceCommandRequest, LastValueSource};
use super::service::CommandService;
use crate::error::{CommandError, CommandResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Invoke one function on every matching service of a group's devices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupCommandRequest {
    pub group_id: String,
    pub function_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// A (device, service) pair a group command resolved to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubCommand {
    pub device_id: String,
    pub service_id: String,
}

/// Members that resolved to sub-commands, and members that failed to resolve
#[derive(Debug, Default)]
struct FanOut {
    sub_commands: Vec<SubCommand>,
    failures: Vec<CommandResponse>,
}

impl CommandService {
    pub async fn group_command(
        &self,
        token: &str,
        request: &GroupCommandRequest,
        timeout: Option<&str>,
    ) -> CommandResponse {
        let timeout = self.config.parse_timeout(timeout);
        self.execute_group(token, request, timeout, None).await
    }

    /// `participant` is set when the group runs inside a batch
    pub(crate) async fn execute_group(
        &self,
        token: &str,
        request: &GroupCommandRequest,
        timeout: Duration,
        participant: Option<Participant>,
    ) -> CommandResponse {
        let fan_out = match self.resolve_sub_commands(token, request).await {
            Ok(fan_out) => fan_out,
            Err(e) => {
                warn!("group {} could not be resolved: {}", request.group_id, e);
                return e.into();
            }
        };

        let FanOut {
            sub_commands,
            mut failures,
        } = fan_out;
        debug!(
            "group {} resolved to {} sub-commands",
            request.group_id,
            sub_commands.len()
        );

        let n = sub_commands.len();
        let participants = match participant {
            Some(participant) => participant.fork(n),
            None if n == 0 => Vec::new(),
            None => {
                let batch = EventBatch::new(token, self.timeseries.clone(), n);
                (0..n).map(|_| batch.participant()).collect()
            }
        };

        let mut tasks = JoinSet::new();
        for (sub, participant) in sub_commands.into_iter().zip(participants) {
            let service = self.clone();
            let token = token.to_string();
            let device_request = DeviceCommandRequest {
                device_id: sub.device_id,
                service_id: sub.service_id,
                function_id: request.function_id.clone(),
                aspect_id: request.aspect_id.clone(),
                input: request.input.clone(),
            };
            tasks.spawn(async move {
                service
                    .execute_device(&token, &device_request, timeout, LastValueSource::Batch(participant))
                    .await
            });
        }

        // completion order, not submission order
        let mut values = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(response) if response.is_ok() => match response.body {
                    Value::Array(items) => values.extend(items),
                    other => values.push(other),
                },
                Ok(response) => failures.push(response),
                Err(e) => failures.push(CommandError::Internal(format!("sub-command failed: {}", e)).into()),
            }
        }

        if values.is_empty() {
            if let Some(last) = failures.pop() {
                return last;
            }
        }
        CommandResponse::ok(Value::Array(values))
    }

    async fn resolve_sub_commands(
        &self,
        token: &str,
        request: &GroupCommandRequest,
    ) -> Result<FanOut, CommandError> {
        let group = self
            .repository
            .get_device_group(token, &request.group_id)
            .await
            .map_err(|e| CommandError::metadata("device group", e))?;

        let aspect = request.aspect_id.as_deref().filter(|a| !a.is_empty());
        let device_class = request.device_class_id.as_deref().filter(|c| !c.is_empty());

        let mut fan_out = FanOut::default();
        for device_id in &group.device_ids {
            let device_type = match self.member_device_type(token, device_id).await {
                Ok(device_type) => device_type,
                Err(e) => {
                    warn!("group {} member {}: {}", group.id, device_id, e);
                    fan_out.failures.push(e.into());
                    continue;
                }
            };

            if let Some(class) = device_class {
                if device_type.device_class_id != class {
                    continue;
                }
            }

            let mut seen = HashSet::new();
            for service in &device_type.services {
                if !service.offers_function(&request.function_id) {
                    continue;
                }
                if let Some(aspect) = aspect {
                    if !service.covers_aspect(aspect) {
                        continue;
                    }
                }
                if seen.insert(service.id.clone()) {
                    fan_out.sub_commands.push(SubCommand {
                        device_id: device_id.clone(),
                        service_id: service.id.clone(),
                    });
                }
            }
        }

        Ok(fan_out)
    }

    async fn member_device_type(
        &self,
        token: &str,
        device_id: &str,
    ) -> Result<crate::metadata::DeviceType, CommandError> {
        let device = self
            .repository
            .get_device(token, device_id)
            .await
            .map_err(|e| CommandError::metadata("device", e))?;
        self.repository
            .get_device_type(token, &device.device_type_id)
            .await
            .map_err(|e| CommandError::metadata("device type", e))
    }
}
