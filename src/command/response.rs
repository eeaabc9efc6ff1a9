//! Transport callbacks completing correlated tasks

use super::register::CorrelationRegister;
use crate::error::{status, CommandError};
use crate::marshal::{Marshaller, UnmarshalHints};
use crate::metadata::{AspectNode, Protocol, Service};
use device_command_shared::{envelope, Envelope, TaskError, TaskResponse};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Completes register entries from response and error messages
#[derive(Clone)]
pub struct ResponseHandler {
    register: Arc<CorrelationRegister>,
    marshaller: Arc<dyn Marshaller>,
}

impl ResponseHandler {
    pub fn new(register: Arc<CorrelationRegister>, marshaller: Arc<dyn Marshaller>) -> Self {
        Self {
            register,
            marshaller,
        }
    }

    /// Route an inbound envelope to the matching callback
    pub async fn handle(&self, envelope: Envelope) {
        match envelope.payload {
            Some(envelope::Payload::Response(response)) => self.handle_task_response(response).await,
            Some(envelope::Payload::Error(error)) => self.handle_error_message(error).await,
            Some(envelope::Payload::Command(cmd)) => {
                warn!("ignoring inbound command {}", cmd.correlation_id);
            }
            None => warn!("received envelope without payload"),
        }
    }

    pub async fn handle_task_response(&self, response: TaskResponse) {
        let Some(request) = response.request.as_ref() else {
            warn!("task response without request");
            return;
        };

        match self.unmarshal(request, &response).await {
            Ok(value) => {
                debug!("task {} completed", request.correlation_id);
                self.register
                    .complete(&request.correlation_id, status::OK, value)
                    .await;
            }
            Err(e) => {
                warn!("task {} response: {}", request.correlation_id, e);
                self.register
                    .complete(&request.correlation_id, status::INTERNAL, Value::String(e.to_string()))
                    .await;
            }
        }
    }

    pub async fn handle_error_message(&self, error: TaskError) {
        debug!("task {} failed: {}", error.correlation_id, error.message);
        self.register
            .complete(&error.correlation_id, status::INTERNAL, Value::String(error.message))
            .await;
    }

    async fn unmarshal(
        &self,
        request: &device_command_shared::TaskRequest,
        response: &TaskResponse,
    ) -> Result<Value, CommandError> {
        let malformed = |e: serde_json::Error| CommandError::Unmarshal(e.to_string());
        let service: Service = serde_json::from_str(&request.service_json).map_err(malformed)?;
        let protocol: Protocol = serde_json::from_str(&request.protocol_json).map_err(malformed)?;
        let aspect_node: Option<AspectNode> = if request.aspect_node_json.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&request.aspect_node_json).map_err(malformed)?)
        };

        let hints = UnmarshalHints {
            function_id: request.function_id.clone(),
            aspect_node,
        };
        self.marshaller
            .unmarshal(
                &request.output_characteristic_id,
                &service,
                &protocol,
                &response.output,
                &hints,
            )
            .await
            .map_err(|e| CommandError::Unmarshal(e.to_string()))
    }
}

/// Start `workers` tasks draining `inbound` into `handler`
///
/// Workers stop when `shutdown` is cancelled or the channel closes.
pub fn spawn_response_workers(
    handler: ResponseHandler,
    workers: usize,
    inbound: mpsc::Receiver<Envelope>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let inbound = Arc::new(Mutex::new(inbound));

    (0..workers.max(1))
        .map(|worker| {
            let handler = handler.clone();
            let inbound = inbound.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = async { inbound.lock().await.recv().await } => next,
                    };
                    match next {
                        Some(envelope) => handler.handle(envelope).await,
                        None => break,
                    }
                }
                info!("response worker {} stopped", worker);
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::JsonMarshaller;
    use crate::testing;
    use device_command_shared::TaskRequest;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn handler() -> (ResponseHandler, Arc<CorrelationRegister>) {
        let register = Arc::new(CorrelationRegister::default());
        (ResponseHandler::new(register.clone(), Arc::new(JsonMarshaller)), register)
    }

    fn measuring_request(id: &str) -> TaskRequest {
        TaskRequest {
            correlation_id: id.into(),
            device_id: "d1".into(),
            service_id: testing::GET_SERVICE.into(),
            output_characteristic_id: testing::CELSIUS.into(),
            service_json: serde_json::to_string(&testing::request_measuring_service()).unwrap(),
            protocol_json: serde_json::to_string(&testing::protocol()).unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_response_completes_with_unmarshalled_value() {
        let (handler, register) = handler();
        register.register("c1").await;

        let output = HashMap::from([("data".to_string(), r#"{"level": 22}"#.to_string())]);
        handler
            .handle(Envelope::response("sim", measuring_request("c1"), output))
            .await;

        let result = register.wait_with_timeout("c1", Duration::from_secs(1)).await;
        assert_eq!(result.status, 200);
        assert_eq!(result.body, json!(22));
    }

    #[tokio::test]
    async fn test_unmarshal_failure_completes_with_500() {
        let (handler, register) = handler();
        register.register("c1").await;

        let output = HashMap::from([("data".to_string(), "{broken".to_string())]);
        handler
            .handle(Envelope::response("sim", measuring_request("c1"), output))
            .await;

        let result = register.wait_with_timeout("c1", Duration::from_secs(1)).await;
        assert_eq!(result.status, 500);
    }

    #[tokio::test]
    async fn test_response_without_request_is_dropped() {
        let (handler, register) = handler();
        register.register("c1").await;

        handler
            .handle_task_response(TaskResponse {
                request: None,
                output: HashMap::new(),
            })
            .await;
        assert_eq!(register.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_error_message_completes_with_payload() {
        let (handler, register) = handler();
        register.register("c1").await;

        handler.handle(Envelope::error("sim", "c1", "device offline")).await;

        let result = register.wait_with_timeout("c1", Duration::from_secs(1)).await;
        assert_eq!(result.status, 500);
        assert_eq!(result.body, json!("device offline"));
    }

    #[tokio::test]
    async fn test_workers_drain_channel_and_stop() {
        let (handler, register) = handler();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let workers = spawn_response_workers(handler, 2, rx, shutdown.clone());

        for id in ["a", "b", "c"] {
            register.register(id).await;
            tx.send(Envelope::error("sim", id, "nope")).await.unwrap();
        }
        for id in ["a", "b", "c"] {
            let result = register.wait_with_timeout(id, Duration::from_secs(1)).await;
            assert_eq!(result.body, json!("nope"));
        }

        shutdown.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
    }
}
