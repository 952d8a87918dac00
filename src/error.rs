use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Transaction {0} already exists")]
    DuplicateRef(String),

    #[error("Version conflict on {ref_no}: expected {expected}, found {actual}")]
    VersionConflict {
        ref_no: String,
        expected: u64,
        actual: u64,
    },

    #[error("Transaction {0} not found")]
    NotFound(String),

    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Invalid amount {requested}: only {remaining} remaining")]
    InvalidAmount {
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Transaction {0} has an operation in flight")]
    OperationInFlight(String),

    #[error("Identical request for {0} is still being processed")]
    DuplicateRequest(String),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Gateway rejected request: {0}")]
    GatewayRejected(String),

    #[error("Stale callback for {ref_no} in state {state}")]
    StaleCallback { ref_no: String, state: String },

    #[error("Unknown callback reference {0}")]
    UnknownCallback(String),

    #[error("Storage error: {0}")]
    StorageError(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PaymentError {
    /// Whether the whole operation may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::VersionConflict { .. }
                | PaymentError::OperationInFlight(_)
                | PaymentError::GatewayUnavailable(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(e: rocksdb::Error) -> Self {
        PaymentError::StorageError(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PaymentError::GatewayUnavailable("timeout".into()).is_retryable());
        assert!(PaymentError::OperationInFlight("R1".into()).is_retryable());
        assert!(
            PaymentError::VersionConflict {
                ref_no: "R1".into(),
                expected: 1,
                actual: 2
            }
            .is_retryable()
        );
        assert!(!PaymentError::GatewayRejected("card".into()).is_retryable());
        assert!(!PaymentError::ValidationError("missing".into()).is_retryable());
    }
}
