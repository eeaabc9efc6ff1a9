//! Device metadata entities resolved from the repository

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub name: String,
    pub device_type_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceType {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_class_id: String,
    #[serde(default)]
    pub services: Vec<Service>,
}

/// How a service delivers data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interaction {
    /// Device publishes values on its own; they land in the time-series store
    #[serde(rename = "event")]
    Event,
    #[default]
    #[serde(rename = "request")]
    Request,
    #[serde(rename = "event+request")]
    EventAndRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub local_id: String,
    #[serde(default)]
    pub name: String,
    pub protocol_id: String,
    #[serde(default)]
    pub interaction: Interaction,
    #[serde(default)]
    pub function_ids: Vec<String>,
    #[serde(default)]
    pub aspect_ids: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<Content>,
    #[serde(default)]
    pub outputs: Vec<Content>,
}

impl Service {
    pub fn offers_function(&self, function_id: &str) -> bool {
        self.function_ids.iter().any(|f| f == function_id)
    }

    pub fn covers_aspect(&self, aspect_id: &str) -> bool {
        self.aspect_ids.iter().any(|a| a == aspect_id)
    }
}

/// Payload description bound to one protocol segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub id: String,
    pub content_variable: ContentVariable,
    #[serde(default = "default_serialization")]
    pub serialization: String,
    pub protocol_segment_id: String,
}

fn default_serialization() -> String {
    "json".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentVariable {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub characteristic_id: String,
    #[serde(default)]
    pub function_id: String,
    #[serde(default)]
    pub aspect_id: String,
    #[serde(default)]
    pub sub_content_variables: Vec<ContentVariable>,
    /// Fixed value sent regardless of user input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ContentVariable {
    /// Dotted paths of all leaf variables, rooted at this variable's name
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_leaf_paths(&self.name, &mut paths);
        paths
    }

    fn collect_leaf_paths(&self, prefix: &str, out: &mut Vec<String>) {
        if self.sub_content_variables.is_empty() {
            out.push(prefix.to_string());
            return;
        }
        for sub in &self.sub_content_variables {
            sub.collect_leaf_paths(&format!("{}.{}", prefix, sub.name), out);
        }
    }

    /// Path (relative to this variable) of the first variable with `characteristic_id`
    pub fn find_characteristic(&self, characteristic_id: &str) -> Option<Vec<String>> {
        if self.characteristic_id == characteristic_id {
            return Some(Vec::new());
        }
        self.sub_content_variables.iter().find_map(|sub| {
            sub.find_characteristic(characteristic_id).map(|mut path| {
                path.insert(0, sub.name.clone());
                path
            })
        })
    }
}

/// Semantic kind of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Sends user input to the device
    Controlling,
    /// Reads a value from the device
    Measuring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: FunctionKind,
    #[serde(default)]
    pub concept_id: String,
}

impl Function {
    pub fn is_measuring(&self) -> bool {
        self.kind == FunctionKind::Measuring
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_characteristic_id: String,
    #[serde(default)]
    pub characteristic_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSegment {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Transport topic or queue connectors subscribe to
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub protocol_segments: Vec<ProtocolSegment>,
}

impl Protocol {
    pub fn segment_name(&self, segment_id: &str) -> Option<&str> {
        self.protocol_segments
            .iter()
            .find(|s| s.id == segment_id)
            .map(|s| s.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub descendent_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(name: &str, characteristic: &str, subs: Vec<ContentVariable>) -> ContentVariable {
        ContentVariable {
            id: String::new(),
            name: name.into(),
            characteristic_id: characteristic.into(),
            function_id: String::new(),
            aspect_id: String::new(),
            sub_content_variables: subs,
            value: None,
        }
    }

    #[test]
    fn test_leaf_paths() {
        let root = variable(
            "payload",
            "",
            vec![
                variable("level", "urn:celsius", vec![]),
                variable("meta", "", vec![variable("unit", "", vec![])]),
            ],
        );
        assert_eq!(root.leaf_paths(), vec!["payload.level", "payload.meta.unit"]);
    }

    #[test]
    fn test_find_characteristic() {
        let root = variable("payload", "", vec![variable("level", "urn:celsius", vec![])]);
        assert_eq!(root.find_characteristic("urn:celsius"), Some(vec!["level".to_string()]));
        assert_eq!(root.find_characteristic("urn:kelvin"), None);
    }

    #[test]
    fn test_interaction_serde_names() {
        let parsed: Interaction = serde_json::from_str("\"event+request\"").unwrap();
        assert_eq!(parsed, Interaction::EventAndRequest);
        assert_eq!(serde_json::to_string(&Interaction::Event).unwrap(), "\"event\"");
    }
}
