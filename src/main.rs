use clap::Parser;
use gateway_ledger::application::idempotency::IdempotencyGuard;
use gateway_ledger::application::ledger::TransactionLedger;
use gateway_ledger::application::plugin::GatewayPlugin;
use gateway_ledger::application::reconciler::CallbackAck;
use gateway_ledger::config::AppConfig;
use gateway_ledger::domain::callback::CallbackPayload;
use gateway_ledger::domain::operation::{OperationRequest, OperationResult, PaymentMethod};
use gateway_ledger::domain::ports::{IdempotencyStoreBox, RecordStoreBox};
use gateway_ledger::error::PaymentError;
use gateway_ledger::infrastructure::in_memory::{InMemoryIdempotencyStore, InMemoryRecordStore};
use gateway_ledger::infrastructure::simulated_gateway::{GatewayBehavior, SimulatedGateway};
use gateway_ledger::interfaces::csv::operation_reader::{OperationReader, OperationRow, RowType};
use gateway_ledger::interfaces::csv::record_writer::RecordWriter;
use miette::{IntoDiagnostic, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON file with plug-in options, host environment and ledger settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Require 3-D Secure on auth, overriding the config file.
    #[arg(long)]
    enable_3dsecure: bool,

    /// Do not register payment-method tokens from callbacks.
    #[arg(long)]
    disable_tokens: bool,

    /// How the simulated gateway answers.
    #[arg(long, default_value = "approve")]
    gateway: GatewayBehavior,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(RecordStoreBox, IdempotencyStoreBox)> {
    use gateway_ledger::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok((Box::new(store.clone()), Box::new(store)))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(RecordStoreBox, IdempotencyStoreBox)> {
    if let Some(path) = db_path {
        warn!(
            path = %path.display(),
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (RecordStoreBox, IdempotencyStoreBox) {
    (
        Box::new(InMemoryRecordStore::new()),
        Box::new(InMemoryIdempotencyStore::new()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path).into_diagnostic()?,
        None => AppConfig::default(),
    };
    if cli.enable_3dsecure {
        config.plugin.enable_3dsecure = true;
    }
    if cli.disable_tokens {
        config.plugin.enable_tokens = false;
    }

    let (records, idempotency) = open_stores(cli.db_path)?;
    let ledger = TransactionLedger::new(
        records,
        IdempotencyGuard::new(idempotency),
        Box::new(SimulatedGateway::new(cli.gateway)),
        config.ledger.clone(),
    );
    let plugin = GatewayPlugin::new(Arc::new(ledger));

    // Process operations
    let file = File::open(cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for row_result in reader.operations() {
        match row_result {
            Ok(row) => {
                let ref_no = row.ref_no.clone();
                match process_row(&plugin, &config, row).await {
                    Ok(result) => info!(ref_no = %ref_no, status = ?result.status, "operation completed"),
                    Err(e) => warn!(ref_no = %ref_no, error = %e, "Error processing operation"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Error reading operation");
            }
        }
    }

    let records = plugin.ledger().all_records().await.into_diagnostic()?;

    // Output final state
    let stdout = io::stdout();
    let mut writer = RecordWriter::new(stdout.lock());
    writer.write_records(&records).into_diagnostic()?;

    Ok(())
}

async fn process_row(
    plugin: &GatewayPlugin,
    config: &AppConfig,
    row: OperationRow,
) -> gateway_ledger::error::Result<OperationResult> {
    match row.r#type {
        RowType::Sell => plugin.sell(request(config, row)).await,
        RowType::Auth => plugin.auth(request(config, row)).await,
        RowType::Capture => plugin.capture(request(config, row)).await,
        RowType::Refund if row.amount.is_some() => {
            plugin.refund_partial(request(config, row)).await
        }
        RowType::Refund => plugin.refund(request(config, row)).await,
        RowType::Void => plugin.void(request(config, row)).await,
        RowType::Status => plugin.check_status(&row.ref_no).await,
        RowType::Callback => {
            let mut payload =
                CallbackPayload::new(&row.ref_no, row.result.as_deref().unwrap_or_default());
            payload.enrolled = row.enrolled;
            payload.token = row.method;
            payload.public_name = row.public_name;
            match plugin.callback(payload, config.plugin).await {
                CallbackAck::Applied(result) => {
                    if let Some(method) = &result.new_payment_method {
                        info!(
                            ref_no = %row.ref_no,
                            token = %method.token,
                            name = %method.paymethod_name,
                            "payment method registered"
                        );
                    }
                    Ok(result)
                }
                CallbackAck::Duplicate(result) => Ok(result),
                CallbackAck::Ignored(reason) | CallbackAck::Retry(reason) => {
                    Err(PaymentError::ValidationError(format!("callback not applied: {}", reason)))
                }
            }
        }
    }
}

fn request(config: &AppConfig, row: OperationRow) -> OperationRequest {
    let previous_transaction_data = row.enrolled.map(|enrolled| {
        let mut previous = BTreeMap::new();
        previous.insert("Enrolled".to_string(), enrolled);
        previous
    });
    OperationRequest {
        ref_no: row.ref_no,
        amount: row.amount,
        currency: row.currency,
        payment_method: row.method.map(|token| PaymentMethod {
            token,
            public_name: None,
        }),
        previous_transaction_data,
        config: config.plugin,
        environment: config.environment.clone(),
        ..Default::default()
    }
}
