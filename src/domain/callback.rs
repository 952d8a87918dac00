use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome reported by the gateway in a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Ok,
    Fail,
    Unrecognized(String),
}

impl CallbackResult {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ok" => CallbackResult::Ok,
            "fail" => CallbackResult::Fail,
            _ => CallbackResult::Unrecognized(raw.to_string()),
        }
    }
}

/// Inbound gateway notification.
///
/// `external_ref` is either a correlation id issued at redirect or 3-D Secure
/// dispatch, the gateway's transaction id, or the host's own `ref_no`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(alias = "ref_no")]
    pub external_ref: String,
    #[serde(alias = "returnResult")]
    pub result: String,
    #[serde(default)]
    pub txn_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub public_name: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default, alias = "Enrolled")]
    pub enrolled: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl CallbackPayload {
    pub fn new(external_ref: &str, result: &str) -> Self {
        Self {
            external_ref: external_ref.to_string(),
            result: result.to_string(),
            ..Default::default()
        }
    }

    pub fn result(&self) -> CallbackResult {
        CallbackResult::parse(&self.result)
    }

    /// Only an explicit `Y` counts as a completed 3-D Secure enrollment.
    pub fn is_enrolled(&self) -> bool {
        matches!(self.enrolled.as_deref(), Some(e) if e.trim().eq_ignore_ascii_case("y"))
    }
}
