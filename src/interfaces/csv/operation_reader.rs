use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::io::Read;

/// Operation requested by one CSV row.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RowType {
    Sell,
    Auth,
    Capture,
    Refund,
    Void,
    Callback,
    Status,
}

/// A single row of the operations file.
///
/// Only `type` and `ref` are always required; the remaining columns apply to
/// some operations and may be empty or missing.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct OperationRow {
    pub r#type: RowType,
    #[serde(rename = "ref")]
    pub ref_no: String,
    pub amount: Option<String>,
    pub currency: Option<String>,
    /// Stored payment-method token for sell/auth.
    pub method: Option<String>,
    /// 3-D Secure enrollment (`Y`/`N`) for auth step-up and callbacks.
    pub enrolled: Option<String>,
    /// Callback result (`ok`/`fail`/anything else).
    pub result: Option<String>,
    /// Display name the gateway sent with a callback token.
    pub public_name: Option<String>,
}

/// Reads operations from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<OperationRow>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    /// Creates a new `OperationReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes rows.
    pub fn operations(self) -> impl Iterator<Item = Result<OperationRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
