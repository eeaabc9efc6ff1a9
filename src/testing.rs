//! Fixtures and fakes shared by the unit tests

use crate::command::{CommandService, CorrelationRegister, ResponseHandler};
use crate::config::DispatchConfig;
use crate::marshal::{JsonMarshaller, Segments};
use crate::metadata::*;
use crate::timeseries::{QueryRequest, QueryResponse, TimeSeries};
use crate::transport::CommandProducer;
use anyhow::{bail, Result};
use async_trait::async_trait;
use device_command_shared::{Envelope, TaskRequest};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CELSIUS: &str = "urn:char:celsius";
pub const TEMPERATURE: &str = "urn:concept:temperature";
pub const SET_TEMPERATURE: &str = "urn:fn:set-temperature";
pub const GET_TEMPERATURE: &str = "urn:fn:get-temperature";
pub const SET_SERVICE: &str = "svc-set";
pub const EVENT_SERVICE: &str = "svc-event";
pub const GET_SERVICE: &str = "svc-get";
pub const GROUP: &str = "g1";
pub const AIR: &str = "urn:aspect:air";
pub const THERMOSTAT_CLASS: &str = "urn:class:thermostat";

fn variable(name: &str, characteristic: &str, subs: Vec<ContentVariable>) -> ContentVariable {
    ContentVariable {
        id: format!("var-{}", name),
        name: name.into(),
        characteristic_id: characteristic.into(),
        function_id: String::new(),
        aspect_id: String::new(),
        sub_content_variables: subs,
        value: None,
    }
}

fn content(variable: ContentVariable) -> Content {
    Content {
        id: format!("content-{}", variable.name),
        content_variable: variable,
        serialization: "json".into(),
        protocol_segment_id: "seg-data".into(),
    }
}

fn temperature_output() -> Content {
    content(variable(
        "payload",
        "",
        vec![variable("level", CELSIUS, vec![]), variable("unit", "", vec![])],
    ))
}

fn base_service(id: &str, interaction: Interaction, function: &str) -> Service {
    Service {
        id: id.into(),
        local_id: format!("{}-local", id),
        name: id.into(),
        protocol_id: "p1".into(),
        interaction,
        function_ids: vec![function.into()],
        aspect_ids: vec![AIR.into()],
        inputs: Vec::new(),
        outputs: Vec::new(),
    }
}

pub fn protocol() -> Protocol {
    Protocol {
        id: "p1".into(),
        name: "standard".into(),
        handler: "connector".into(),
        protocol_segments: vec![
            ProtocolSegment {
                id: "seg-data".into(),
                name: "data".into(),
            },
            ProtocolSegment {
                id: "seg-meta".into(),
                name: "metadata".into(),
            },
        ],
    }
}

/// Takes a temperature setpoint in the "data" segment
pub fn controlling_service() -> Service {
    Service {
        inputs: vec![content(variable("value", CELSIUS, vec![]))],
        ..base_service(SET_SERVICE, Interaction::Request, SET_TEMPERATURE)
    }
}

/// Publishes temperature events; answered from the time-series store
pub fn event_service() -> Service {
    Service {
        outputs: vec![temperature_output()],
        ..base_service(EVENT_SERVICE, Interaction::Event, GET_TEMPERATURE)
    }
}

/// Reports the temperature on request
pub fn request_measuring_service() -> Service {
    Service {
        outputs: vec![temperature_output()],
        ..base_service(GET_SERVICE, Interaction::Request, GET_TEMPERATURE)
    }
}

pub fn metadata_document() -> MetadataDocument {
    let device = |id: &str| Device {
        id: id.into(),
        local_id: format!("{}-local", id),
        name: id.into(),
        device_type_id: "t-thermostat".into(),
    };

    MetadataDocument {
        devices: vec![device("d1"), device("d2"), device("d3")],
        device_types: vec![DeviceType {
            id: "t-thermostat".into(),
            name: "thermostat".into(),
            device_class_id: THERMOSTAT_CLASS.into(),
            services: vec![controlling_service(), event_service(), request_measuring_service()],
        }],
        functions: vec![
            Function {
                id: SET_TEMPERATURE.into(),
                name: "set temperature".into(),
                kind: FunctionKind::Controlling,
                concept_id: TEMPERATURE.into(),
            },
            Function {
                id: GET_TEMPERATURE.into(),
                name: "get temperature".into(),
                kind: FunctionKind::Measuring,
                concept_id: TEMPERATURE.into(),
            },
        ],
        concepts: vec![Concept {
            id: TEMPERATURE.into(),
            name: "temperature".into(),
            base_characteristic_id: CELSIUS.into(),
            characteristic_ids: vec![CELSIUS.into()],
        }],
        protocols: vec![protocol()],
        device_groups: vec![DeviceGroup {
            id: GROUP.into(),
            name: "living room".into(),
            device_ids: vec!["d1".into(), "d2".into(), "d3".into()],
        }],
        aspect_nodes: vec![AspectNode {
            id: AIR.into(),
            name: "air".into(),
            descendent_ids: Vec::new(),
        }],
    }
}

/// Command service over the fixture metadata and the given fakes
pub fn service(producer: Arc<MockProducer>, timeseries: Arc<CountingTimeSeries>) -> CommandService {
    service_with(metadata_document(), producer, timeseries)
}

/// Command service over `document` and the given fakes
pub fn service_with(
    document: MetadataDocument,
    producer: Arc<MockProducer>,
    timeseries: Arc<CountingTimeSeries>,
) -> CommandService {
    let repository = StaticRepository::new(document).expect("fixture metadata is consistent");
    let service = CommandService::new(
        DispatchConfig::default(),
        Arc::new(repository),
        Arc::new(JsonMarshaller),
        timeseries,
        producer.clone(),
        Arc::new(CorrelationRegister::default()),
    );
    producer.attach(service.response_handler());
    service
}

/// How the fake connector answers a command
pub enum Reply {
    Output(Segments),
    Error(String),
    Silent,
}

type ReplyFn = Box<dyn Fn(&TaskRequest) -> Reply + Send + Sync>;

/// Producer that records commands and answers them through the response handler
pub struct MockProducer {
    reply: ReplyFn,
    fail_send: bool,
    handler: Mutex<Option<ResponseHandler>>,
    sent: Mutex<Vec<TaskRequest>>,
}

impl MockProducer {
    pub fn replying(reply: impl Fn(&TaskRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            fail_send: false,
            handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_send() -> Self {
        Self {
            fail_send: true,
            ..Self::replying(|_| Reply::Silent)
        }
    }

    pub fn attach(&self, handler: ResponseHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    pub fn sent(&self) -> Vec<TaskRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandProducer for MockProducer {
    async fn send_command(&self, envelope: Envelope) -> Result<()> {
        let Some(device_command_shared::envelope::Payload::Command(request)) = envelope.payload else {
            bail!("not a command");
        };
        self.sent.lock().unwrap().push(request.clone());
        if self.fail_send {
            bail!("broker unavailable");
        }

        let handler = self.handler.lock().unwrap().clone().expect("handler attached");
        let reply = match (self.reply)(&request) {
            Reply::Output(output) => Envelope::response("mock", request, output),
            Reply::Error(message) => Envelope::error("mock", &request.correlation_id, message),
            Reply::Silent => return Ok(()),
        };
        tokio::spawn(async move { handler.handle(reply).await });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Time-series fake counting queries
///
/// Columns without a configured value answer `"device/service/column"`.
#[derive(Default)]
pub struct CountingTimeSeries {
    values: HashMap<String, Value>,
    truncate_to: Option<usize>,
    fail: bool,
    calls: AtomicUsize,
    last_request_len: AtomicUsize,
}

impl CountingTimeSeries {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Self {
            values: values.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Answer with at most `n` rows
    pub fn truncated(self, n: usize) -> Self {
        Self {
            truncate_to: Some(n),
            ..self
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request_len(&self) -> usize {
        self.last_request_len.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSeries for CountingTimeSeries {
    async fn query(&self, _token: &str, requests: &[QueryRequest]) -> Result<Vec<QueryResponse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_request_len.store(requests.len(), Ordering::SeqCst);
        if self.fail {
            bail!("store unavailable");
        }

        let mut rows: Vec<QueryResponse> = requests
            .iter()
            .map(|r| {
                let key = format!("{}/{}/{}", r.device_id, r.service_id, r.column);
                let value = self.values.get(&key).cloned().unwrap_or_else(|| json!(key));
                QueryResponse {
                    time: Some("2026-01-01T00:00:00Z".into()),
                    value,
                }
            })
            .collect();
        if let Some(n) = self.truncate_to {
            rows.truncate(n);
        }
        Ok(rows)
    }
}
