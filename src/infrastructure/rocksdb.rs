use crate::domain::currency::Currency;
use crate::domain::money::Amount;
use crate::domain::operation::OperationResult;
use crate::domain::ports::{IdempotencyEntry, IdempotencyStore, TransactionRecordStore};
use crate::domain::transaction::{PaymentFlow, TransactionRecord};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for transaction records, keyed by `ref_no`.
pub const CF_RECORDS: &str = "records";
/// Column Family mapping external correlation ids to `ref_no`.
pub const CF_CORRELATIONS: &str = "correlations";
/// Column Family for idempotency entries.
pub const CF_IDEMPOTENCY: &str = "idempotency";

/// A persistent store implementation using RocksDB.
///
/// Records, correlations and idempotency entries live in separate Column Families
/// and are encoded as JSON. RocksDB has no compare-and-swap, so read-modify-write
/// sequences are serialized by a process-wide write mutex.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_RECORDS, CF_CORRELATIONS, CF_IDEMPOTENCY]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::StorageError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key.as_bytes(), bytes)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionRecordStore for RocksDBStore {
    async fn get(&self, ref_no: &str) -> Result<Option<TransactionRecord>> {
        self.read(CF_RECORDS, ref_no)
    }

    async fn create(
        &self,
        ref_no: &str,
        flow: PaymentFlow,
        amount: Amount,
        currency: Currency,
    ) -> Result<TransactionRecord> {
        let _guard = self.write_lock.lock().await;
        if self.read::<TransactionRecord>(CF_RECORDS, ref_no)?.is_some() {
            return Err(PaymentError::DuplicateRef(ref_no.to_string()));
        }
        let record = TransactionRecord::new(ref_no, flow, amount, currency);
        self.write(CF_RECORDS, ref_no, &record)?;
        Ok(record)
    }

    async fn update(
        &self,
        mut record: TransactionRecord,
        expected_version: u64,
    ) -> Result<TransactionRecord> {
        let _guard = self.write_lock.lock().await;
        let current: TransactionRecord = self
            .read(CF_RECORDS, &record.ref_no)?
            .ok_or_else(|| PaymentError::NotFound(record.ref_no.clone()))?;
        if current.version != expected_version {
            return Err(PaymentError::VersionConflict {
                ref_no: record.ref_no.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }
        record.version = expected_version + 1;
        self.write(CF_RECORDS, &record.ref_no, &record)?;
        Ok(record)
    }

    async fn link_external_ref(&self, external_ref: &str, ref_no: &str) -> Result<()> {
        self.write(CF_CORRELATIONS, external_ref, &ref_no)
    }

    async fn resolve_external_ref(&self, external_ref: &str) -> Result<Option<String>> {
        self.read(CF_CORRELATIONS, external_ref)
    }

    async fn all(&self) -> Result<Vec<TransactionRecord>> {
        let cf = self.cf(CF_RECORDS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl IdempotencyStore for RocksDBStore {
    async fn reserve(&self, key: &str) -> Result<Option<IdempotencyEntry>> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read::<IdempotencyEntry>(CF_IDEMPOTENCY, key)? {
            return Ok(Some(existing));
        }
        self.write(CF_IDEMPOTENCY, key, &IdempotencyEntry::InFlight)?;
        Ok(None)
    }

    async fn complete(&self, key: &str, result: OperationResult) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(CF_IDEMPOTENCY, key, &IdempotencyEntry::Completed(result))
    }

    async fn release(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let cf = self.cf(CF_IDEMPOTENCY)?;
        self.db.delete_cf(cf, key.as_bytes())?;
        Ok(())
    }
}
