use crate::domain::currency::Currency;
use crate::domain::money::Amount;
use crate::domain::operation::OperationResult;
use crate::domain::ports::{IdempotencyEntry, IdempotencyStore, TransactionRecordStore};
use crate::domain::transaction::{PaymentFlow, TransactionRecord};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct RecordTables {
    records: HashMap<String, TransactionRecord>,
    correlations: HashMap<String, String>,
}

/// A thread-safe in-memory store for transaction records.
///
/// Uses `Arc<RwLock<..>>` so clones share the same tables. The write lock is only
/// held for the duration of a single compare-and-swap, never across a gateway call.
#[derive(Default, Clone)]
pub struct InMemoryRecordStore {
    tables: Arc<RwLock<RecordTables>>,
}

impl InMemoryRecordStore {
    /// Creates a new, empty in-memory record store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRecordStore for InMemoryRecordStore {
    async fn get(&self, ref_no: &str) -> Result<Option<TransactionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.records.get(ref_no).cloned())
    }

    async fn create(
        &self,
        ref_no: &str,
        flow: PaymentFlow,
        amount: Amount,
        currency: Currency,
    ) -> Result<TransactionRecord> {
        let mut tables = self.tables.write().await;
        match tables.records.entry(ref_no.to_string()) {
            Entry::Occupied(_) => Err(PaymentError::DuplicateRef(ref_no.to_string())),
            Entry::Vacant(slot) => {
                let record = TransactionRecord::new(ref_no, flow, amount, currency);
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(
        &self,
        mut record: TransactionRecord,
        expected_version: u64,
    ) -> Result<TransactionRecord> {
        let mut tables = self.tables.write().await;
        let current = tables
            .records
            .get_mut(&record.ref_no)
            .ok_or_else(|| PaymentError::NotFound(record.ref_no.clone()))?;
        if current.version != expected_version {
            return Err(PaymentError::VersionConflict {
                ref_no: record.ref_no.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }
        record.version = expected_version + 1;
        *current = record.clone();
        Ok(record)
    }

    async fn link_external_ref(&self, external_ref: &str, ref_no: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .correlations
            .insert(external_ref.to_string(), ref_no.to_string());
        Ok(())
    }

    async fn resolve_external_ref(&self, external_ref: &str) -> Result<Option<String>> {
        let tables = self.tables.read().await;
        Ok(tables.correlations.get(external_ref).cloned())
    }

    async fn all(&self) -> Result<Vec<TransactionRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables.records.values().cloned().collect();
        records.sort_by(|a, b| a.ref_no.cmp(&b.ref_no));
        Ok(records)
    }
}

/// A thread-safe in-memory idempotency key table.
#[derive(Default, Clone)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<RwLock<HashMap<String, IdempotencyEntry>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve(&self, key: &str) -> Result<Option<IdempotencyEntry>> {
        let mut entries = self.entries.write().await;
        match entries.entry(key.to_string()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(IdempotencyEntry::InFlight);
                Ok(None)
            }
        }
    }

    async fn complete(&self, key: &str, result: OperationResult) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), IdempotencyEntry::Completed(result));
        Ok(())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::ResultStatus;
    use crate::domain::transaction::TransactionState;
    use rust_decimal_macros::dec;

    async fn seeded() -> (InMemoryRecordStore, TransactionRecord) {
        let store = InMemoryRecordStore::new();
        let record = store
            .create(
                "R1",
                PaymentFlow::TwoPhase,
                Amount::new(dec!(100)).unwrap(),
                Currency::parse("USD").unwrap(),
            )
            .await
            .unwrap();
        (store, record)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (store, record) = seeded().await;
        assert_eq!(record.version, 0);
        assert_eq!(store.get("R1").await.unwrap().unwrap(), record);
        assert!(store.get("R2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_ref() {
        let (store, _) = seeded().await;
        let err = store
            .create(
                "R1",
                PaymentFlow::OnePhase,
                Amount::new(dec!(1)).unwrap(),
                Currency::parse("EUR").unwrap(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateRef(_)));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let (store, mut record) = seeded().await;
        record.state = TransactionState::Authorized;
        let saved = store.update(record, 0).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(store.get("R1").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let (store, record) = seeded().await;
        store.update(record.clone(), 0).await.unwrap();

        let err = store.update(record, 0).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = InMemoryRecordStore::new();
        let record = TransactionRecord::new(
            "ghost",
            PaymentFlow::OnePhase,
            Amount::new(dec!(1)).unwrap(),
            Currency::parse("USD").unwrap(),
        );
        assert!(matches!(
            store.update(record, 0).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_correlations() {
        let (store, _) = seeded().await;
        store.link_external_ref("ext-1", "R1").await.unwrap();
        assert_eq!(
            store.resolve_external_ref("ext-1").await.unwrap().as_deref(),
            Some("R1")
        );
        assert!(store.resolve_external_ref("ext-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_idempotency_reserve_is_exclusive() {
        let store = InMemoryIdempotencyStore::new();
        assert_eq!(store.reserve("k").await.unwrap(), None);
        assert_eq!(
            store.reserve("k").await.unwrap(),
            Some(IdempotencyEntry::InFlight)
        );

        let result = OperationResult::new(ResultStatus::Approved);
        store.complete("k", result.clone()).await.unwrap();
        assert_eq!(
            store.reserve("k").await.unwrap(),
            Some(IdempotencyEntry::Completed(result))
        );

        store.release("k").await.unwrap();
        assert_eq!(store.reserve("k").await.unwrap(), None);
    }
}
