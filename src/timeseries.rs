//! Time-series store interface for last-known-value lookups

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One column of one service's event stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryRequest {
    pub device_id: String,
    pub service_id: String,
    pub column: String,
}

impl QueryRequest {
    pub fn new(device_id: &str, service_id: &str, column: impl Into<String>) -> Self {
        Self {
            device_id: device_id.to_string(),
            service_id: service_id.to_string(),
            column: column.into(),
        }
    }
}

/// Most recent value of a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// RFC 3339 timestamp of the value, if known
    pub time: Option<String>,
    pub value: Value,
}

#[async_trait]
pub trait TimeSeries: Send + Sync {
    /// Latest value per request, same length and order as `requests`
    async fn query(&self, token: &str, requests: &[QueryRequest]) -> Result<Vec<QueryResponse>>;
}

/// Fixed last values keyed by `device/service/column`
///
/// Unknown columns answer `null` with no timestamp.
#[derive(Debug, Clone, Default)]
pub struct StaticTimeSeries {
    values: std::collections::HashMap<String, QueryResponse>,
}

impl StaticTimeSeries {
    pub fn new(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(key, value)| (key, QueryResponse { time: None, value }))
                .collect(),
        }
    }

    /// Load a JSON object mapping `device/service/column` to a value
    pub fn from_json(json: &str) -> Result<Self> {
        let values: std::collections::HashMap<String, Value> = serde_json::from_str(json)?;
        Ok(Self::new(values))
    }

    fn key(request: &QueryRequest) -> String {
        format!("{}/{}/{}", request.device_id, request.service_id, request.column)
    }
}

#[async_trait]
impl TimeSeries for StaticTimeSeries {
    async fn query(&self, _token: &str, requests: &[QueryRequest]) -> Result<Vec<QueryResponse>> {
        Ok(requests
            .iter()
            .map(|request| {
                self.values.get(&Self::key(request)).cloned().unwrap_or(QueryResponse {
                    time: None,
                    value: Value::Null,
                })
            })
            .collect())
    }
}
