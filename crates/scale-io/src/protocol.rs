use scale_core::ExchangeOutcome;
use serde::{Deserialize, Serialize};

pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// JSON body returned for every weight request. Failures are reported here,
/// never through the HTTP status.
///
/// The `weigth` spelling is part of the wire format existing clients parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightResponse {
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "weigth")]
    pub weight: f64,
    pub unstable: bool,
}

impl WeightResponse {
    pub fn from_outcome(outcome: &ExchangeOutcome) -> Self {
        match outcome {
            Ok(reading) => Self {
                error: false,
                description: None,
                weight: reading.weight,
                unstable: reading.unstable,
            },
            Err(e) => Self {
                error: true,
                description: Some(e.to_string()),
                weight: 0.0,
                unstable: false,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
