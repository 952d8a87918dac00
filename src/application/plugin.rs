//! Host-facing plug-in surface.
//!
//! The billing host calls these operations with loosely typed requests. Each one
//! is validated here and turned into a typed ledger command, so a
//! `ValidationError` never reaches the ledger or the gateway.

use crate::application::ledger::{PaymentCommand, TransactionLedger};
use crate::application::reconciler::{CallbackAck, CallbackReconciler};
use crate::config::{ConfigDescriptor, PluginConfig};
use crate::domain::callback::CallbackPayload;
use crate::domain::currency::{Currency, SUPPORTED_CURRENCIES};
use crate::domain::money::Amount;
use crate::domain::operation::{OperationRequest, OperationResult, ResultStatus};
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tracing::warn;

pub struct GatewayPlugin {
    ledger: Arc<TransactionLedger>,
    reconciler: CallbackReconciler,
}

impl GatewayPlugin {
    pub fn new(ledger: Arc<TransactionLedger>) -> Self {
        let reconciler = CallbackReconciler::new(ledger.clone());
        Self { ledger, reconciler }
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn get_config(&self) -> ConfigDescriptor {
        ConfigDescriptor::describe()
    }

    pub fn is_3dsecure_active(&self, config: &PluginConfig) -> ResultStatus {
        if config.enable_3dsecure {
            ResultStatus::Approved
        } else {
            ResultStatus::Declined
        }
    }

    /// Sends the customer to the hosted payment page.
    pub async fn redirect(&self, request: OperationRequest) -> Result<OperationResult> {
        let mut cmd = payment_command(request)?;
        cmd.payment_method = None;
        self.ledger.sell(cmd).await
    }

    pub async fn sell(&self, request: OperationRequest) -> Result<OperationResult> {
        self.ledger.sell(payment_command(request)?).await
    }

    pub async fn auth(&self, request: OperationRequest) -> Result<OperationResult> {
        self.ledger.auth(payment_command(request)?).await
    }

    pub async fn capture(&self, request: OperationRequest) -> Result<OperationResult> {
        let ref_no = require_ref(&request)?;
        let amount = require_amount(&request)?;
        self.check_currency(&ref_no, &request).await?;
        self.ledger.capture(&ref_no, amount).await
    }

    /// Refunds whatever is still refundable.
    pub async fn refund(&self, request: OperationRequest) -> Result<OperationResult> {
        let ref_no = require_ref(&request)?;
        self.check_currency(&ref_no, &request).await?;
        self.ledger.refund_full(&ref_no).await
    }

    pub async fn refund_partial(&self, request: OperationRequest) -> Result<OperationResult> {
        let ref_no = require_ref(&request)?;
        let amount = require_amount(&request)?;
        self.check_currency(&ref_no, &request).await?;
        self.ledger.refund(&ref_no, Some(amount)).await
    }

    pub async fn void(&self, request: OperationRequest) -> Result<OperationResult> {
        let ref_no = require_ref(&request)?;
        self.ledger.void(&ref_no).await
    }

    pub async fn callback(&self, payload: CallbackPayload, config: PluginConfig) -> CallbackAck {
        self.reconciler.handle_callback(payload, config).await
    }

    pub async fn check_status(&self, ref_no: &str) -> Result<OperationResult> {
        self.ledger.check_status(ref_no).await
    }

    pub async fn test_connection(&self) -> ResultStatus {
        match self.ledger.gateway().ping().await {
            Ok(()) => ResultStatus::Approved,
            Err(e) => {
                warn!(error = %e, "gateway connection test failed");
                ResultStatus::Error
            }
        }
    }

    pub fn validate_config(&self, raw: &serde_json::Value) -> Result<PluginConfig> {
        PluginConfig::validate(raw)
    }

    pub fn supported_currencies(&self) -> &'static [&'static str] {
        SUPPORTED_CURRENCIES
    }

    /// A currency on a follow-up operation must be valid and match the original.
    async fn check_currency(&self, ref_no: &str, request: &OperationRequest) -> Result<()> {
        let Some(code) = request.currency.as_deref() else {
            return Ok(());
        };
        let currency = Currency::parse(code)?;
        if let Some(record) = self.ledger.get(ref_no).await?
            && record.currency != currency
        {
            return Err(PaymentError::ValidationError(format!(
                "Currency {} does not match {} for {}",
                currency, record.currency, ref_no
            )));
        }
        Ok(())
    }
}

fn require_ref(request: &OperationRequest) -> Result<String> {
    let ref_no = request.ref_no.trim();
    if ref_no.is_empty() {
        return Err(PaymentError::ValidationError(
            "No ref_no is set".to_string(),
        ));
    }
    Ok(ref_no.to_string())
}

fn require_amount(request: &OperationRequest) -> Result<Amount> {
    request
        .amount
        .as_deref()
        .ok_or_else(|| PaymentError::ValidationError("No transaction amount is set".to_string()))?
        .parse()
}

fn require_currency(request: &OperationRequest) -> Result<Currency> {
    let code = request
        .currency
        .as_deref()
        .ok_or_else(|| PaymentError::ValidationError("No currency is set".to_string()))?;
    Currency::parse(code)
}

fn payment_command(request: OperationRequest) -> Result<PaymentCommand> {
    let ref_no = require_ref(&request)?;
    let amount = require_amount(&request)?;
    let currency = require_currency(&request)?;
    Ok(PaymentCommand {
        ref_no,
        amount,
        currency,
        payment_method: request.payment_method,
        previous_transaction_data: request.previous_transaction_data,
        config: request.config,
        environment: request.environment,
    })
}
