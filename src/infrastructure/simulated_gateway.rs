use crate::domain::ports::{GatewayClient, GatewayRequest, GatewayResponse, GatewayStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// How the simulated gateway answers every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayBehavior {
    Approve,
    Decline,
    /// Fails with `GatewayRejected`.
    Reject,
    /// Answers with an unrecoverable error response.
    Error,
    /// Fails with `GatewayUnavailable`.
    Unavailable,
}

impl FromStr for GatewayBehavior {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "decline" => Ok(Self::Decline),
            "reject" => Ok(Self::Reject),
            "error" => Ok(Self::Error),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(format!("unknown gateway behavior '{}'", other)),
        }
    }
}

/// Deterministic stand-in for a remote gateway.
///
/// Issues sequential transaction ids (`sim-1`, `sim-2`, ...) and counts calls, so
/// the CLI and tests can drive the ledger without a network.
pub struct SimulatedGateway {
    behavior: GatewayBehavior,
    calls: AtomicU64,
}

impl SimulatedGateway {
    pub fn new(behavior: GatewayBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of operation calls received (pings excluded).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, operation: &str, request: GatewayRequest) -> Result<GatewayResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let raw = |status: &str, message: &str| {
            json!({
                "operation": operation,
                "ref_no": request.ref_no,
                "amount": request.amount.normalized(),
                "currency": request.currency.as_str(),
                "status": status,
                "message": message,
            })
        };

        match self.behavior {
            GatewayBehavior::Approve => Ok(GatewayResponse {
                status: GatewayStatus::Approved,
                gateway_transaction_id: Some(
                    request
                        .gateway_transaction_id
                        .clone()
                        .unwrap_or_else(|| format!("sim-{}", n)),
                ),
                raw_response: raw("approved", "Success"),
            }),
            GatewayBehavior::Decline => Ok(GatewayResponse {
                status: GatewayStatus::Declined,
                gateway_transaction_id: None,
                raw_response: raw("declined", "Declined"),
            }),
            GatewayBehavior::Error => Ok(GatewayResponse {
                status: GatewayStatus::Error,
                gateway_transaction_id: None,
                raw_response: raw("error", "Simulated gateway fault"),
            }),
            GatewayBehavior::Reject => Err(PaymentError::GatewayRejected(format!(
                "{} refused for {}",
                operation, request.ref_no
            ))),
            GatewayBehavior::Unavailable => Err(PaymentError::GatewayUnavailable(format!(
                "{} timed out for {}",
                operation, request.ref_no
            ))),
        }
    }
}

#[async_trait]
impl GatewayClient for SimulatedGateway {
    async fn authorize(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.respond("authorize", request)
    }

    async fn capture(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.respond("capture", request)
    }

    async fn refund(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.respond("refund", request)
    }

    async fn void(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.respond("void", request)
    }

    async fn ping(&self) -> Result<()> {
        match self.behavior {
            GatewayBehavior::Unavailable => Err(PaymentError::GatewayUnavailable(
                "ping timed out".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
