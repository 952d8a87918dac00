use crate::config::{Environment, PluginConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The kind of operation a request or callback performs against a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Sell,
    Auth,
    Capture,
    Refund,
    Void,
    Callback,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Sell => "sell",
            OperationKind::Auth => "auth",
            OperationKind::Capture => "capture",
            OperationKind::Refund => "refund",
            OperationKind::Void => "void",
            OperationKind::Callback => "callback",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reported back to the billing host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Approved,
    Declined,
    Pending,
    Redirect,
    Error,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// Where and how the customer's browser is sent for a hosted page or a 3-D Secure step-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectDescriptor {
    pub url: String,
    pub http_method: HttpMethod,
    pub form_attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Messages {
    pub customer_message: Option<String>,
    pub vendor_message: Option<String>,
}

impl Messages {
    pub fn both(text: &str) -> Self {
        Self {
            customer_message: Some(text.to_string()),
            vendor_message: Some(text.to_string()),
        }
    }

    pub fn vendor(text: &str) -> Self {
        Self {
            customer_message: None,
            vendor_message: Some(text.to_string()),
        }
    }
}

/// A reusable payment method the host should register for the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentMethod {
    pub token: String,
    pub paymethod_name: String,
    pub exp_date: Option<String>,
}

/// A stored payment method passed in by the host on token-based operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub token: String,
    #[serde(default)]
    pub public_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub transaction_details: BTreeMap<String, String>,
    #[serde(default)]
    pub redirect: Option<RedirectDescriptor>,
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
    #[serde(default)]
    pub messages: Option<Messages>,
    #[serde(default)]
    pub new_payment_method: Option<NewPaymentMethod>,
}

impl OperationResult {
    pub fn new(status: ResultStatus) -> Self {
        Self {
            status,
            transaction_details: BTreeMap::new(),
            redirect: None,
            retry_after_seconds: None,
            messages: None,
            new_payment_method: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.transaction_details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.messages = Some(messages);
        self
    }
}

/// Raw operation request as received from the billing host.
///
/// Fields are kept loosely typed here and validated by the plug-in facade
/// before anything reaches the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationRequest {
    pub ref_no: String,
    #[serde(default, alias = "transaction_amount")]
    pub amount: Option<String>,
    #[serde(default, alias = "currency_iso")]
    pub currency: Option<String>,
    #[serde(default)]
    pub account_info: serde_json::Value,
    #[serde(default)]
    pub document_info: serde_json::Value,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub previous_transaction_data: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub config: PluginConfig,
    #[serde(default)]
    pub environment: Environment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_host_field_names() {
        let json = r#"{
            "ref_no": "R1",
            "transaction_amount": "100.00",
            "currency_iso": "USD",
            "previous_transaction_data": {"Enrolled": "Y", "PaRes": "abc"},
            "config": {"enable_tokens": false, "3dsecure": true}
        }"#;
        let req: OperationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.amount.as_deref(), Some("100.00"));
        assert_eq!(req.currency.as_deref(), Some("USD"));
        assert!(req.config.enable_3dsecure);
        assert!(!req.config.enable_tokens);
        assert_eq!(
            req.previous_transaction_data.unwrap().get("Enrolled").map(String::as_str),
            Some("Y")
        );
    }

    #[test]
    fn test_result_status_wire_names() {
        let json = serde_json::to_string(&ResultStatus::Approved).unwrap();
        assert_eq!(json, "\"APPROVED\"");
        let method = serde_json::to_string(&HttpMethod::Post).unwrap();
        assert_eq!(method, "\"POST\"");
    }
}
