use crate::application::idempotency::{Fingerprint, Outcome};
use crate::application::ledger::{TransactionLedger, describe};
use crate::config::PluginConfig;
use crate::domain::callback::{CallbackPayload, CallbackResult};
use crate::domain::operation::{
    Messages, NewPaymentMethod, OperationKind, OperationResult, ResultStatus,
};
use crate::domain::transaction::{LedgerEvent, TransactionRecord, TransactionState};
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the webhook endpoint should tell the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAck {
    Applied(OperationResult),
    Duplicate(OperationResult),
    /// Logged and dropped. The gateway should not redeliver.
    Ignored(String),
    /// The record is busy. The gateway should redeliver later.
    Retry(String),
}

/// Maps inbound gateway notifications onto ledger transitions.
pub struct CallbackReconciler {
    ledger: Arc<TransactionLedger>,
}

impl CallbackReconciler {
    pub fn new(ledger: Arc<TransactionLedger>) -> Self {
        Self { ledger }
    }

    /// Webhook-facing entry point. Never fails for stale or unknown callbacks.
    pub async fn handle_callback(&self, payload: CallbackPayload, config: PluginConfig) -> CallbackAck {
        match self.reconcile(payload, config).await {
            Ok((result, true)) => CallbackAck::Applied(result),
            Ok((result, false)) => CallbackAck::Duplicate(result),
            Err(e @ (PaymentError::StaleCallback { .. } | PaymentError::UnknownCallback(_))) => {
                warn!(error = %e, "callback dropped");
                CallbackAck::Ignored(e.to_string())
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "callback deferred");
                CallbackAck::Retry(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "callback failed");
                CallbackAck::Ignored(e.to_string())
            }
        }
    }

    /// Applies a callback and returns its result.
    ///
    /// The flag is `false` when the callback was a replay and the cached result was
    /// returned unchanged.
    pub async fn reconcile(
        &self,
        payload: CallbackPayload,
        config: PluginConfig,
    ) -> Result<(OperationResult, bool)> {
        let ref_no = self.resolve(&payload.external_ref).await?;
        let fingerprint = fingerprint(&ref_no, &payload);
        let guard = self.ledger.guard();

        match guard
            .check_and_record(&ref_no, OperationKind::Callback, &fingerprint)
            .await?
        {
            Outcome::Duplicate(result) => return Ok((result, false)),
            Outcome::InFlight => return Err(PaymentError::DuplicateRequest(ref_no)),
            Outcome::FirstSeen => {}
        }

        match self.apply(&ref_no, &payload, config, &fingerprint).await {
            Ok(result) => {
                guard
                    .complete(&ref_no, OperationKind::Callback, &fingerprint, &result)
                    .await?;
                Ok((result, true))
            }
            Err(e) => {
                guard
                    .release(&ref_no, OperationKind::Callback, &fingerprint)
                    .await?;
                Err(e)
            }
        }
    }

    async fn resolve(&self, external_ref: &str) -> Result<String> {
        let records = self.ledger.records();
        if let Some(ref_no) = records.resolve_external_ref(external_ref).await? {
            return Ok(ref_no);
        }
        if records.get(external_ref).await?.is_some() {
            return Ok(external_ref.to_string());
        }
        Err(PaymentError::UnknownCallback(external_ref.to_string()))
    }

    async fn apply(
        &self,
        ref_no: &str,
        payload: &CallbackPayload,
        config: PluginConfig,
        fingerprint: &str,
    ) -> Result<OperationResult> {
        let attempts = self.ledger.settings().callback_retries.max(1);
        let mut last_conflict = None;

        for _ in 0..attempts {
            let record = self.ledger.load(ref_no).await?;
            if record.idempotency_keys.contains(fingerprint) {
                debug!(ref_no, "callback already applied to record");
                return Ok(record.last_result.clone().unwrap_or_else(|| describe(&record)));
            }
            if record.in_flight.is_some() {
                return Err(PaymentError::OperationInFlight(ref_no.to_string()));
            }

            let outcome = payload.result();
            let events = match plan(&record, payload, &outcome) {
                Some(events)
                    if !record.state.is_terminal() && record.clone().apply_all(&events).is_ok() =>
                {
                    events
                }
                _ => {
                    return Err(PaymentError::StaleCallback {
                        ref_no: ref_no.to_string(),
                        state: record.state.to_string(),
                    });
                }
            };

            let new_method = match outcome {
                CallbackResult::Ok if config.enable_tokens => stored_method(payload),
                _ => None,
            };

            let mut staged = record;
            if let Some(method) = &new_method {
                staged.stored_method = Some(method.clone());
            }
            let txn_id = payload.txn_id.clone();
            let committed = self
                .ledger
                .commit(staged, events, fingerprint, |rec| {
                    let mut result = describe(rec);
                    if let Some(id) = &txn_id {
                        result.transaction_details.insert("trans_id".to_string(), id.clone());
                    }
                    result.new_payment_method = new_method.clone();
                    match &outcome {
                        CallbackResult::Ok if rec.state == TransactionState::Declined => {
                            result.with_messages(Messages::both("Rejected by 3D Secure"))
                        }
                        CallbackResult::Ok => result.with_messages(Messages::vendor("Success")),
                        CallbackResult::Fail => {
                            result.status = ResultStatus::Declined;
                            result.with_messages(Messages::vendor("Declined"))
                        }
                        CallbackResult::Unrecognized(raw) => {
                            result.status = ResultStatus::Error;
                            result.with_messages(Messages::vendor(&format!(
                                "Unknown status '{}'",
                                raw
                            )))
                        }
                    }
                })
                .await;

            match committed {
                Ok((_, result)) => return Ok(result),
                Err(e @ PaymentError::VersionConflict { .. }) => {
                    debug!(ref_no, error = %e, "callback lost version race, re-reading");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| PaymentError::OperationInFlight(ref_no.to_string())))
    }
}

/// Chooses the ledger events a callback implies for the record's current state.
///
/// `None` means the notice has no meaning for that state. An unrecognized result
/// only fails a transaction that is still waiting on the gateway.
fn plan(
    record: &TransactionRecord,
    payload: &CallbackPayload,
    outcome: &CallbackResult,
) -> Option<Vec<LedgerEvent>> {
    let gateway_transaction_id = payload.txn_id.clone();
    let events = match (outcome, record.state) {
        (CallbackResult::Ok, TransactionState::Pending3ds) => vec![LedgerEvent::StepUp {
            enrolled: payload.is_enrolled(),
            gateway_transaction_id,
        }],
        (CallbackResult::Ok, _) => vec![LedgerEvent::Approve {
            gateway_transaction_id,
        }],
        (CallbackResult::Fail, _) => vec![LedgerEvent::Decline],
        (
            CallbackResult::Unrecognized(_),
            TransactionState::Initiated
            | TransactionState::PendingRedirect
            | TransactionState::Pending3ds,
        ) => vec![LedgerEvent::Fail],
        (CallbackResult::Unrecognized(_), _) => return None,
    };
    Some(events)
}

fn stored_method(payload: &CallbackPayload) -> Option<NewPaymentMethod> {
    let token = payload.token.clone()?;
    let paymethod_name = payload.public_name.clone()?;
    Some(NewPaymentMethod {
        token,
        paymethod_name,
        exp_date: payload.expires.clone(),
    })
}

fn fingerprint(ref_no: &str, payload: &CallbackPayload) -> String {
    Fingerprint::new(OperationKind::Callback, ref_no)
        .field("result", Some(payload.result.trim()))
        .field("txn_id", payload.txn_id.as_deref())
        .field("token", payload.token.as_deref())
        .field("public_name", payload.public_name.as_deref())
        .field("expires", payload.expires.as_deref())
        .field("enrolled", payload.enrolled.as_deref())
        .finish()
}
