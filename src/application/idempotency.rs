use crate::domain::operation::{OperationKind, OperationResult};
use crate::domain::ports::{IdempotencyEntry, IdempotencyStoreBox};
use crate::error::Result;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Result of checking a request against the guard.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// First time this request is seen; the caller now holds the reservation.
    FirstSeen,
    /// An identical request already completed with this result.
    Duplicate(OperationResult),
    /// An identical request is still executing.
    InFlight,
}

/// Deterministic SHA-256 digest over the meaningful fields of a request.
///
/// Each field is written as a length-prefixed `name=value` pair so that
/// different field splits never collide. Absent fields are written as `-`.
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new(kind: OperationKind, ref_no: &str) -> Self {
        let mut fp = Self {
            hasher: Sha256::new(),
        };
        fp.write("kind", kind.as_str());
        fp.write("ref_no", ref_no);
        fp
    }

    pub fn field(mut self, name: &str, value: Option<&str>) -> Self {
        self.write(name, value.unwrap_or("-"));
        self
    }

    /// Adds a map of fields in key order.
    pub fn fields<'a, I>(mut self, name: &str, entries: Option<I>) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        match entries {
            Some(entries) => {
                for (key, value) in entries {
                    self.write(&format!("{}.{}", name, key), value);
                }
            }
            None => self.write(name, "-"),
        }
        self
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    fn write(&mut self, name: &str, value: &str) {
        let pair = format!("{}={}", name, value);
        self.hasher.update((pair.len() as u64).to_be_bytes());
        self.hasher.update(pair.as_bytes());
    }
}

/// At-most-once execution primitive.
///
/// Identical requests (same `ref_no`, operation and fingerprint) reach the gateway
/// once. Later copies get the cached result back unchanged.
pub struct IdempotencyGuard {
    store: IdempotencyStoreBox,
}

impl IdempotencyGuard {
    pub fn new(store: IdempotencyStoreBox) -> Self {
        Self { store }
    }

    pub fn key(ref_no: &str, kind: OperationKind, fingerprint: &str) -> String {
        format!("{}:{}:{}", ref_no, kind, fingerprint)
    }

    pub async fn check_and_record(
        &self,
        ref_no: &str,
        kind: OperationKind,
        fingerprint: &str,
    ) -> Result<Outcome> {
        let key = Self::key(ref_no, kind, fingerprint);
        match self.store.reserve(&key).await? {
            None => Ok(Outcome::FirstSeen),
            Some(IdempotencyEntry::InFlight) => {
                debug!(ref_no, %kind, "identical request still in flight");
                Ok(Outcome::InFlight)
            }
            Some(IdempotencyEntry::Completed(result)) => {
                debug!(ref_no, %kind, "replaying cached result");
                Ok(Outcome::Duplicate(result))
            }
        }
    }

    pub async fn complete(
        &self,
        ref_no: &str,
        kind: OperationKind,
        fingerprint: &str,
        result: &OperationResult,
    ) -> Result<()> {
        self.store
            .complete(&Self::key(ref_no, kind, fingerprint), result.clone())
            .await
    }

    /// Drops a reservation so an identical retry is evaluated again.
    pub async fn release(&self, ref_no: &str, kind: OperationKind, fingerprint: &str) -> Result<()> {
        self.store
            .release(&Self::key(ref_no, kind, fingerprint))
            .await
    }
}
