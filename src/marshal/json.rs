//! JSON pass-through marshaller
//!
//! Values are carried as-is: no unit conversion between characteristics, only
//! placement into (and extraction from) the service's content structure.

use super::{MarshalInput, Marshaller, Segments, UnmarshalHints};
use crate::metadata::{AspectNode, Content, ContentVariable, Protocol, Service};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

fn aspect_matches(variable: &ContentVariable, node: Option<&AspectNode>) -> bool {
    match node {
        _ if variable.aspect_id.is_empty() => true,
        None => true,
        Some(node) => {
            node.id == variable.aspect_id || node.descendent_ids.iter().any(|d| *d == variable.aspect_id)
        }
    }
}

fn input_for<'a>(variable: &ContentVariable, inputs: &'a [MarshalInput]) -> Option<&'a MarshalInput> {
    if variable.characteristic_id.is_empty() {
        return None;
    }
    inputs.iter().find(|input| {
        input.characteristic_id == variable.characteristic_id
            && (variable.function_id.is_empty() || variable.function_id == input.function_id)
            && aspect_matches(variable, input.aspect_node.as_ref())
    })
}

/// Build the value for `variable`, or `None` if nothing feeds it
fn build(variable: &ContentVariable, inputs: &[MarshalInput]) -> Option<Value> {
    if let Some(fixed) = &variable.value {
        return Some(fixed.clone());
    }
    if let Some(input) = input_for(variable, inputs) {
        return Some(input.value.clone());
    }
    if variable.sub_content_variables.is_empty() {
        return None;
    }

    let fields: Map<String, Value> = variable
        .sub_content_variables
        .iter()
        .filter_map(|sub| build(sub, inputs).map(|v| (sub.name.clone(), v)))
        .collect();
    if fields.is_empty() {
        None
    } else {
        Some(Value::Object(fields))
    }
}

fn decode_segment(content: &Content, raw: &str) -> Result<Value> {
    match content.serialization.as_str() {
        "json" => serde_json::from_str(raw).with_context(|| format!("invalid json in segment: {}", raw)),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn encode_segment(content: &Content, value: &Value) -> Result<String> {
    match (content.serialization.as_str(), value) {
        ("json", _) => Ok(serde_json::to_string(value)?),
        (_, Value::String(s)) => Ok(s.clone()),
        (_, other) => Ok(other.to_string()),
    }
}

fn value_at<'a>(mut value: &'a Value, path: &[String]) -> Option<&'a Value> {
    for key in path {
        value = value.get(key)?;
    }
    Some(value)
}

#[async_trait]
impl Marshaller for JsonMarshaller {
    async fn marshal(
        &self,
        service: &Service,
        protocol: &Protocol,
        inputs: &[MarshalInput],
    ) -> Result<Segments> {
        let mut segments = Segments::new();
        for content in &service.inputs {
            let Some(value) = build(&content.content_variable, inputs) else {
                continue;
            };
            let segment = protocol
                .segment_name(&content.protocol_segment_id)
                .ok_or_else(|| anyhow!("unknown protocol segment {}", content.protocol_segment_id))?;
            segments.insert(segment.to_string(), encode_segment(content, &value)?);
        }
        Ok(segments)
    }

    async fn unmarshal(
        &self,
        characteristic_id: &str,
        service: &Service,
        protocol: &Protocol,
        segments: &Segments,
        hints: &UnmarshalHints,
    ) -> Result<Value> {
        let mut fallback = None;
        let mut with_data = 0;

        for content in &service.outputs {
            let Some(segment) = protocol.segment_name(&content.protocol_segment_id) else {
                continue;
            };
            let Some(raw) = segments.get(segment).filter(|raw| !raw.is_empty()) else {
                continue;
            };
            let parsed = decode_segment(content, raw)?;
            with_data += 1;

            let variable = &content.content_variable;
            if !characteristic_id.is_empty() && aspect_matches(variable, hints.aspect_node.as_ref()) {
                if let Some(path) = variable.find_characteristic(characteristic_id) {
                    return Ok(value_at(&parsed, &path).cloned().unwrap_or(Value::Null));
                }
            }
            fallback.get_or_insert(parsed);
        }

        // Without a characteristic match, a single populated output is unambiguous
        match (with_data, fallback) {
            (1, Some(value)) => Ok(value),
            _ => Ok(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use serde_json::json;

    fn input(characteristic: &str, value: Value) -> MarshalInput {
        MarshalInput {
            characteristic_id: characteristic.into(),
            function_id: testing::SET_TEMPERATURE.into(),
            aspect_node: None,
            value,
        }
    }

    #[tokio::test]
    async fn test_marshal_places_value_in_segment() {
        let service = testing::controlling_service();
        let protocol = testing::protocol();
        let segments = JsonMarshaller
            .marshal(&service, &protocol, &[input(testing::CELSIUS, json!(21))])
            .await
            .unwrap();
        assert_eq!(segments.get("data").map(String::as_str), Some("21"));
    }

    #[tokio::test]
    async fn test_marshal_skips_unfed_content() {
        let service = testing::controlling_service();
        let protocol = testing::protocol();
        let segments = JsonMarshaller
            .marshal(&service, &protocol, &[input("urn:kelvin", json!(294))])
            .await
            .unwrap();
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_unmarshal_extracts_characteristic_path() {
        let service = testing::event_service();
        let protocol = testing::protocol();
        let mut segments = Segments::new();
        segments.insert("data".into(), r#"{"level": 13, "unit": "C"}"#.into());

        let value = JsonMarshaller
            .unmarshal(testing::CELSIUS, &service, &protocol, &segments, &UnmarshalHints::default())
            .await
            .unwrap();
        assert_eq!(value, json!(13));
    }

    #[tokio::test]
    async fn test_unmarshal_empty_output_is_null() {
        let service = testing::controlling_service();
        let protocol = testing::protocol();
        let value = JsonMarshaller
            .unmarshal("", &service, &protocol, &Segments::new(), &UnmarshalHints::default())
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_unmarshal_rejects_invalid_json() {
        let service = testing::event_service();
        let protocol = testing::protocol();
        let mut segments = Segments::new();
        segments.insert("data".into(), "{not json".into());

        let result = JsonMarshaller
            .unmarshal(testing::CELSIUS, &service, &protocol, &segments, &UnmarshalHints::default())
            .await;
        assert!(result.is_err());
    }
}
