use super::currency::Currency;
use super::money::Amount;
use super::operation::OperationResult;
use super::transaction::{PaymentFlow, TransactionRecord};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Durable keyed storage of transaction records.
///
/// Has no locking of its own: `update` is a compare-and-swap on `version`, and
/// callers that lose the race re-read and retry.
#[async_trait]
pub trait TransactionRecordStore: Send + Sync {
    async fn get(&self, ref_no: &str) -> Result<Option<TransactionRecord>>;

    /// Fails with `DuplicateRef` if `ref_no` already exists.
    async fn create(
        &self,
        ref_no: &str,
        flow: PaymentFlow,
        amount: Amount,
        currency: Currency,
    ) -> Result<TransactionRecord>;

    /// Stores `record` if the current version equals `expected_version` and returns
    /// it with the version bumped.
    async fn update(
        &self,
        record: TransactionRecord,
        expected_version: u64,
    ) -> Result<TransactionRecord>;

    async fn link_external_ref(&self, external_ref: &str, ref_no: &str) -> Result<()>;

    async fn resolve_external_ref(&self, external_ref: &str) -> Result<Option<String>>;

    async fn all(&self) -> Result<Vec<TransactionRecord>>;
}

/// State of one idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IdempotencyEntry {
    InFlight,
    Completed(OperationResult),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically inserts `InFlight` for `key` unless an entry exists, in which
    /// case the existing entry is returned and nothing is written.
    async fn reserve(&self, key: &str) -> Result<Option<IdempotencyEntry>>;
    async fn complete(&self, key: &str, result: OperationResult) -> Result<()>;
    async fn release(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub ref_no: String,
    pub amount: Amount,
    pub currency: Currency,
    pub gateway_transaction_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayStatus {
    Approved,
    Declined,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: GatewayStatus,
    pub gateway_transaction_id: Option<String>,
    pub raw_response: serde_json::Value,
}

/// The remote payment gateway.
///
/// Implementations fail with `GatewayUnavailable` for transient faults (including
/// their own timeouts) and `GatewayRejected` when the gateway refuses the attempt.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn authorize(&self, request: GatewayRequest) -> Result<GatewayResponse>;
    async fn capture(&self, request: GatewayRequest) -> Result<GatewayResponse>;
    async fn refund(&self, request: GatewayRequest) -> Result<GatewayResponse>;
    async fn void(&self, request: GatewayRequest) -> Result<GatewayResponse>;
    async fn ping(&self) -> Result<()>;
}

pub type RecordStoreBox = Box<dyn TransactionRecordStore>;
pub type IdempotencyStoreBox = Box<dyn IdempotencyStore>;
pub type GatewayClientBox = Box<dyn GatewayClient>;
