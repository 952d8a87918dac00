#![allow(dead_code)]

use async_trait::async_trait;
use gateway_ledger::application::idempotency::IdempotencyGuard;
use gateway_ledger::application::ledger::{PaymentCommand, TransactionLedger};
use gateway_ledger::config::{Environment, LedgerSettings, PluginConfig};
use gateway_ledger::domain::currency::Currency;
use gateway_ledger::domain::money::Amount;
use gateway_ledger::domain::operation::PaymentMethod;
use gateway_ledger::domain::ports::{GatewayClient, GatewayRequest, GatewayResponse};
use gateway_ledger::error::Result;
use gateway_ledger::infrastructure::in_memory::{InMemoryIdempotencyStore, InMemoryRecordStore};
use gateway_ledger::infrastructure::simulated_gateway::{GatewayBehavior, SimulatedGateway};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Wraps the simulated gateway, counting every operation call and optionally
/// stalling before answering so tests can overlap requests.
pub struct CountingGateway {
    inner: SimulatedGateway,
    calls: Arc<AtomicU64>,
    delay: Duration,
}

impl CountingGateway {
    pub fn new(behavior: GatewayBehavior, delay: Duration) -> (Self, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let gateway = Self {
            inner: SimulatedGateway::new(behavior),
            calls: calls.clone(),
            delay,
        };
        (gateway, calls)
    }

    async fn before_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl GatewayClient for CountingGateway {
    async fn authorize(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.before_call().await;
        self.inner.authorize(request).await
    }

    async fn capture(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.before_call().await;
        self.inner.capture(request).await
    }

    async fn refund(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.before_call().await;
        self.inner.refund(request).await
    }

    async fn void(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        self.before_call().await;
        self.inner.void(request).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

pub struct Harness {
    pub ledger: Arc<TransactionLedger>,
    pub calls: Arc<AtomicU64>,
}

impl Harness {
    pub fn gateway_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn harness(behavior: GatewayBehavior) -> Harness {
    slow_harness(behavior, Duration::ZERO)
}

pub fn slow_harness(behavior: GatewayBehavior, delay: Duration) -> Harness {
    let (gateway, calls) = CountingGateway::new(behavior, delay);
    let ledger = TransactionLedger::new(
        Box::new(InMemoryRecordStore::new()),
        IdempotencyGuard::new(Box::new(InMemoryIdempotencyStore::new())),
        Box::new(gateway),
        LedgerSettings::default(),
    );
    Harness {
        ledger: Arc::new(ledger),
        calls,
    }
}

pub fn amount(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// A token-based payment command for `ref_no` in USD.
pub fn command(ref_no: &str, value: Decimal, enable_3dsecure: bool) -> PaymentCommand {
    PaymentCommand {
        ref_no: ref_no.to_string(),
        amount: amount(value),
        currency: Currency::parse("USD").unwrap(),
        payment_method: Some(PaymentMethod {
            token: "tok_visa".to_string(),
            public_name: Some("Visa ending 4242".to_string()),
        }),
        previous_transaction_data: None,
        config: PluginConfig {
            enable_tokens: true,
            enable_3dsecure,
        },
        environment: Environment {
            return_url_ok: "https://host/ok".to_string(),
            return_url_failed: "https://host/failed".to_string(),
            return_url_3dsecure: "https://host/3ds".to_string(),
            lang: None,
        },
    }
}

pub fn step_up(mut cmd: PaymentCommand, enrolled: &str) -> PaymentCommand {
    let mut previous = BTreeMap::new();
    previous.insert("Enrolled".to_string(), enrolled.to_string());
    previous.insert("PaRes".to_string(), "pares-blob".to_string());
    cmd.previous_transaction_data = Some(previous);
    cmd
}

pub fn write_operations(path: &Path, rows: &[&[&str]]) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(file);

    wtr.write_record([
        "type",
        "ref",
        "amount",
        "currency",
        "method",
        "enrolled",
        "result",
        "public_name",
    ])?;
    for row in rows {
        wtr.write_record(*row)?;
    }

    wtr.flush()?;
    Ok(())
}
