use crate::application::idempotency::{Fingerprint, IdempotencyGuard, Outcome};
use crate::config::{Environment, LedgerSettings, PluginConfig};
use crate::domain::currency::Currency;
use crate::domain::money::Amount;
use crate::domain::operation::{
    HttpMethod, Messages, OperationKind, OperationResult, PaymentMethod, RedirectDescriptor,
    ResultStatus,
};
use crate::domain::ports::{
    GatewayClientBox, GatewayRequest, GatewayResponse, GatewayStatus, RecordStoreBox,
};
use crate::domain::transaction::{LedgerEvent, PaymentFlow, TransactionRecord, TransactionState};
use crate::error::{PaymentError, Result};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{error, info, warn};

const THREE_DS_REJECTED: &str = "Rejected by 3D Secure";

/// A validated sell or auth request.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCommand {
    pub ref_no: String,
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: Option<PaymentMethod>,
    pub previous_transaction_data: Option<BTreeMap<String, String>>,
    pub config: PluginConfig,
    pub environment: Environment,
}

impl PaymentCommand {
    fn fingerprint(&self, kind: OperationKind) -> String {
        let amount = self.amount.normalized();
        Fingerprint::new(kind, &self.ref_no)
            .field("amount", Some(&amount))
            .field("currency", Some(self.currency.as_str()))
            .field(
                "payment_method",
                self.payment_method.as_ref().map(|m| m.token.as_str()),
            )
            .fields("previous", self.previous_transaction_data.as_ref())
            .field("3dsecure", Some(bool_str(self.config.enable_3dsecure)))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum GatewayCall {
    Authorize,
    /// Capture without a prior authorization settles a sale in one step.
    Sale,
    Capture,
    Refund,
    Void,
}

/// Drives transactions through their lifecycle.
///
/// Every mutation goes through the versioned store update. Operations that call
/// the gateway first reserve the record by setting `in_flight`, await the gateway
/// without holding any lock, and then commit at the reserved version.
pub struct TransactionLedger {
    records: RecordStoreBox,
    guard: IdempotencyGuard,
    gateway: GatewayClientBox,
    settings: LedgerSettings,
}

impl TransactionLedger {
    pub fn new(
        records: RecordStoreBox,
        guard: IdempotencyGuard,
        gateway: GatewayClientBox,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            records,
            guard,
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub(crate) fn records(&self) -> &RecordStoreBox {
        &self.records
    }

    pub(crate) fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn gateway(&self) -> &GatewayClientBox {
        &self.gateway
    }

    pub async fn get(&self, ref_no: &str) -> Result<Option<TransactionRecord>> {
        self.records.get(ref_no).await
    }

    pub async fn all_records(&self) -> Result<Vec<TransactionRecord>> {
        self.records.all().await
    }

    /// One-phase payment. Redirects to the hosted page when no stored method is given.
    pub async fn sell(&self, cmd: PaymentCommand) -> Result<OperationResult> {
        let fingerprint = cmd.fingerprint(OperationKind::Sell);
        let ref_no = cmd.ref_no.clone();
        self.guarded(
            &ref_no,
            OperationKind::Sell,
            &fingerprint,
            self.sell_inner(cmd, &fingerprint),
        )
        .await
    }

    async fn sell_inner(&self, cmd: PaymentCommand, fingerprint: &str) -> Result<OperationResult> {
        let record = self.open_record(&cmd, PaymentFlow::OnePhase).await?;

        if cmd.payment_method.is_none() {
            return self
                .dispatch_redirect(record, OperationKind::Sell, &cmd, fingerprint)
                .await;
        }

        record.validate(&approve(None))?;
        self.execute(
            record,
            OperationKind::Sell,
            fingerprint,
            GatewayCall::Sale,
            cmd.amount,
            |id| vec![approve(id)],
            describe,
        )
        .await
    }

    /// Two-phase authorization, including the 3-D Secure step-up when enabled.
    ///
    /// A second call carrying `previous_transaction_data` completes the step-up on
    /// a record left in `PENDING_3DS` by the first call.
    pub async fn auth(&self, cmd: PaymentCommand) -> Result<OperationResult> {
        let fingerprint = cmd.fingerprint(OperationKind::Auth);
        let ref_no = cmd.ref_no.clone();
        self.guarded(
            &ref_no,
            OperationKind::Auth,
            &fingerprint,
            self.auth_inner(cmd, &fingerprint),
        )
        .await
    }

    async fn auth_inner(&self, cmd: PaymentCommand, fingerprint: &str) -> Result<OperationResult> {
        let record = self.open_record(&cmd, PaymentFlow::TwoPhase).await?;

        if cmd.payment_method.is_none() {
            return self
                .dispatch_redirect(record, OperationKind::Auth, &cmd, fingerprint)
                .await;
        }

        if !cmd.config.enable_3dsecure {
            record.validate(&approve(None))?;
            return self
                .execute(
                    record,
                    OperationKind::Auth,
                    fingerprint,
                    GatewayCall::Authorize,
                    cmd.amount,
                    |id| vec![approve(id)],
                    describe,
                )
                .await;
        }

        let Some(previous) = cmd.previous_transaction_data.clone() else {
            return self.dispatch_3ds(record, &cmd, fingerprint).await;
        };

        // A step-up result may arrive on the very first call; pass through PENDING_3DS.
        let mut lead_in = Vec::new();
        if record.state == TransactionState::Initiated {
            lead_in.push(LedgerEvent::Require3ds {
                next_check_after: self.settings.pending_check_after_secs,
            });
        }

        let enrolled = previous.get("Enrolled").map(String::as_str) == Some("Y");
        if !enrolled {
            ensure_idle(&record)?;
            let mut events = lead_in;
            events.push(LedgerEvent::StepUp {
                enrolled: false,
                gateway_transaction_id: None,
            });
            let (_, result) = self
                .commit(record, events, fingerprint, |rec| {
                    with_step_up_details(describe(rec), &previous)
                        .with_messages(Messages::both(THREE_DS_REJECTED))
                })
                .await?;
            return Ok(result);
        }

        let mut probe = record.clone();
        probe.apply_all(&lead_in)?;
        probe.validate(&LedgerEvent::StepUp {
            enrolled: true,
            gateway_transaction_id: None,
        })?;

        self.execute(
            record,
            OperationKind::Auth,
            fingerprint,
            GatewayCall::Authorize,
            cmd.amount,
            move |id| {
                let mut events = lead_in;
                events.push(LedgerEvent::StepUp {
                    enrolled: true,
                    gateway_transaction_id: id,
                });
                events
            },
            |rec| with_step_up_details(describe(rec), &previous),
        )
        .await
    }

    /// Captures `amount` of an authorized transaction. Partial capture is allowed.
    pub async fn capture(&self, ref_no: &str, amount: Amount) -> Result<OperationResult> {
        let normalized = amount.normalized();
        let fingerprint = Fingerprint::new(OperationKind::Capture, ref_no)
            .field("amount", Some(&normalized))
            .finish();
        self.guarded(ref_no, OperationKind::Capture, &fingerprint, async {
            let record = self.load(ref_no).await?;
            ensure_idle(&record)?;
            record.validate(&LedgerEvent::Capture {
                amount,
                gateway_transaction_id: None,
            })?;
            self.execute(
                record,
                OperationKind::Capture,
                &fingerprint,
                GatewayCall::Capture,
                amount,
                |id| {
                    vec![LedgerEvent::Capture {
                        amount,
                        gateway_transaction_id: id,
                    }]
                },
                describe,
            )
            .await
        })
        .await
    }

    /// Refunds `amount`, or everything still refundable when `amount` is `None`.
    pub async fn refund(&self, ref_no: &str, amount: Option<Amount>) -> Result<OperationResult> {
        let requested = amount.map(|a| a.normalized());
        let fingerprint = Fingerprint::new(OperationKind::Refund, ref_no)
            .field("amount", Some(requested.as_deref().unwrap_or("full")))
            .finish();
        self.guarded(ref_no, OperationKind::Refund, &fingerprint, async {
            let record = self.load(ref_no).await?;
            ensure_idle(&record)?;
            let amount = match amount {
                Some(amount) => amount,
                None => Amount::new(record.refundable().value()).map_err(|_| {
                    PaymentError::InvalidAmount {
                        requested: record.refundable().value(),
                        remaining: record.refundable().value(),
                    }
                })?,
            };
            record.validate(&LedgerEvent::Refund { amount })?;
            self.execute(
                record,
                OperationKind::Refund,
                &fingerprint,
                GatewayCall::Refund,
                amount,
                |_| vec![LedgerEvent::Refund { amount }],
                describe,
            )
            .await
        })
        .await
    }

    pub async fn refund_full(&self, ref_no: &str) -> Result<OperationResult> {
        self.refund(ref_no, None).await
    }

    /// Cancels an authorization that has not been captured.
    pub async fn void(&self, ref_no: &str) -> Result<OperationResult> {
        let fingerprint = Fingerprint::new(OperationKind::Void, ref_no).finish();
        self.guarded(ref_no, OperationKind::Void, &fingerprint, async {
            let record = self.load(ref_no).await?;
            ensure_idle(&record)?;
            record.validate(&LedgerEvent::Void)?;
            let amount = record.amount;
            self.execute(
                record,
                OperationKind::Void,
                &fingerprint,
                GatewayCall::Void,
                amount,
                |_| vec![LedgerEvent::Void],
                describe,
            )
            .await
        })
        .await
    }

    /// Reports the current status without touching the gateway.
    pub async fn check_status(&self, ref_no: &str) -> Result<OperationResult> {
        let record = self.load(ref_no).await?;
        if record.state.is_pending() || record.in_flight.is_some() {
            let mut result = describe(&record);
            result.status = ResultStatus::Pending;
            result.retry_after_seconds = record
                .next_check_after
                .or(Some(self.settings.pending_check_after_secs));
            return Ok(result);
        }
        Ok(record.last_result.clone().unwrap_or_else(|| describe(&record)))
    }

    pub(crate) async fn load(&self, ref_no: &str) -> Result<TransactionRecord> {
        self.records
            .get(ref_no)
            .await?
            .ok_or_else(|| PaymentError::NotFound(ref_no.to_string()))
    }

    /// Runs `operation` at most once per identical request.
    pub(crate) async fn guarded<F>(
        &self,
        ref_no: &str,
        kind: OperationKind,
        fingerprint: &str,
        operation: F,
    ) -> Result<OperationResult>
    where
        F: Future<Output = Result<OperationResult>>,
    {
        match self.guard.check_and_record(ref_no, kind, fingerprint).await? {
            Outcome::Duplicate(result) => return Ok(result),
            Outcome::InFlight => return Err(PaymentError::DuplicateRequest(ref_no.to_string())),
            Outcome::FirstSeen => {}
        }

        match operation.await {
            Ok(result) => {
                self.guard
                    .complete(ref_no, kind, fingerprint, &result)
                    .await?;
                Ok(result)
            }
            Err(e) => {
                self.guard.release(ref_no, kind, fingerprint).await?;
                Err(e)
            }
        }
    }

    /// Applies `events`, clears the reservation, and stores the record at its
    /// current version.
    pub(crate) async fn commit<B>(
        &self,
        mut record: TransactionRecord,
        events: Vec<LedgerEvent>,
        fingerprint: &str,
        build: B,
    ) -> Result<(TransactionRecord, OperationResult)>
    where
        B: FnOnce(&TransactionRecord) -> OperationResult,
    {
        let expected = record.version;
        let from = record.state;
        let known_id = record.gateway_transaction_id.clone();
        for event in events {
            record.apply(event)?;
        }
        let result = build(&record);
        record.in_flight = None;
        record.idempotency_keys.insert(fingerprint.to_string());
        record.last_result = Some(result.clone());

        let saved = self.records.update(record, expected).await?;
        info!(
            ref_no = %saved.ref_no,
            from = %from,
            to = %saved.state,
            version = saved.version,
            "transaction committed"
        );

        // Callbacks may quote the gateway's id instead of a correlation id.
        if let Some(id) = &saved.gateway_transaction_id
            && saved.gateway_transaction_id != known_id
            && let Err(e) = self.records.link_external_ref(id, &saved.ref_no).await
        {
            warn!(ref_no = %saved.ref_no, error = %e, "failed to index gateway transaction id");
        }
        Ok((saved, result))
    }

    /// Creates the record for a new sell or auth.
    ///
    /// An idle `INITIATED` record left by an attempt that never got a gateway answer
    /// is picked up again, and so is a `PENDING_3DS` auth receiving its step-up data.
    async fn open_record(
        &self,
        cmd: &PaymentCommand,
        flow: PaymentFlow,
    ) -> Result<TransactionRecord> {
        let Some(existing) = self.records.get(&cmd.ref_no).await? else {
            return self
                .records
                .create(&cmd.ref_no, flow, cmd.amount, cmd.currency.clone())
                .await;
        };
        let same_terms = existing.amount == cmd.amount && existing.currency == cmd.currency;

        match existing.state {
            TransactionState::Initiated
                if existing.flow == flow && existing.in_flight.is_none() && same_terms =>
            {
                Ok(existing)
            }
            TransactionState::Pending3ds
                if flow == PaymentFlow::TwoPhase && cmd.previous_transaction_data.is_some() =>
            {
                if !same_terms {
                    return Err(PaymentError::ValidationError(format!(
                        "Step-up for {} does not match the original amount or currency",
                        cmd.ref_no
                    )));
                }
                Ok(existing)
            }
            _ => Err(PaymentError::DuplicateRef(cmd.ref_no.clone())),
        }
    }

    async fn dispatch_redirect(
        &self,
        mut record: TransactionRecord,
        kind: OperationKind,
        cmd: &PaymentCommand,
        fingerprint: &str,
    ) -> Result<OperationResult> {
        ensure_idle(&record)?;
        let event = LedgerEvent::RequireRedirect {
            next_check_after: self.settings.pending_check_after_secs,
        };
        record.validate(&event)?;

        let external_ref = correlation_id(&cmd.ref_no, kind, fingerprint);
        let mut attrs = BTreeMap::new();
        attrs.insert("ref_no".to_string(), cmd.ref_no.clone());
        attrs.insert("amount".to_string(), cmd.amount.normalized());
        attrs.insert("currency".to_string(), cmd.currency.to_string());
        attrs.insert(
            "accept_url".to_string(),
            cmd.environment.return_url_ok.clone(),
        );
        attrs.insert(
            "decline_url".to_string(),
            cmd.environment.return_url_failed.clone(),
        );
        attrs.insert(
            "enable_tokens".to_string(),
            bool_str(cmd.config.enable_tokens).to_string(),
        );
        attrs.insert("external_ref".to_string(), external_ref.clone());
        let redirect = RedirectDescriptor {
            url: self.settings.hosted_page_url.clone(),
            http_method: HttpMethod::Post,
            form_attributes: attrs,
        };

        self.records
            .link_external_ref(&external_ref, &cmd.ref_no)
            .await?;
        record.external_refs.push(external_ref);

        let (_, result) = self
            .commit(record, vec![event], fingerprint, |rec| {
                let mut result = describe(rec);
                result.status = ResultStatus::Redirect;
                result.redirect = Some(redirect);
                result
            })
            .await?;
        Ok(result)
    }

    async fn dispatch_3ds(
        &self,
        mut record: TransactionRecord,
        cmd: &PaymentCommand,
        fingerprint: &str,
    ) -> Result<OperationResult> {
        ensure_idle(&record)?;
        let event = LedgerEvent::Require3ds {
            next_check_after: self.settings.pending_check_after_secs,
        };
        record.validate(&event)?;

        let external_ref = correlation_id(&cmd.ref_no, OperationKind::Auth, fingerprint);
        let mut attrs = BTreeMap::new();
        attrs.insert(
            "PaReq".to_string(),
            Fingerprint::new(OperationKind::Auth, &cmd.ref_no)
                .field("pareq", Some(fingerprint))
                .finish(),
        );
        attrs.insert(
            "TermUrl".to_string(),
            cmd.environment.return_url_3dsecure.clone(),
        );
        attrs.insert("amount".to_string(), cmd.amount.normalized());
        attrs.insert("currency".to_string(), cmd.currency.to_string());
        attrs.insert("MD".to_string(), external_ref.clone());
        let redirect = RedirectDescriptor {
            url: self.settings.three_ds_url.clone(),
            http_method: HttpMethod::Post,
            form_attributes: attrs,
        };

        self.records
            .link_external_ref(&external_ref, &cmd.ref_no)
            .await?;
        record.external_refs.push(external_ref);

        let (_, result) = self
            .commit(record, vec![event], fingerprint, |rec| {
                let mut result = describe(rec);
                result.status = ResultStatus::Redirect;
                result.redirect = Some(redirect);
                result
            })
            .await?;
        Ok(result)
    }

    /// Reserves the record, calls the gateway, and commits the outcome.
    async fn execute<E, B>(
        &self,
        mut record: TransactionRecord,
        kind: OperationKind,
        fingerprint: &str,
        call: GatewayCall,
        amount: Amount,
        on_approved: E,
        build: B,
    ) -> Result<OperationResult>
    where
        E: FnOnce(Option<String>) -> Vec<LedgerEvent>,
        B: Fn(&TransactionRecord) -> OperationResult,
    {
        ensure_idle(&record)?;
        let expected = record.version;
        record.in_flight = Some(kind);
        let reserved = self.records.update(record, expected).await?;

        let request = GatewayRequest {
            ref_no: reserved.ref_no.clone(),
            amount,
            currency: reserved.currency.clone(),
            gateway_transaction_id: reserved.gateway_transaction_id.clone(),
        };
        let response = match call {
            GatewayCall::Authorize => self.gateway.authorize(request).await,
            GatewayCall::Sale | GatewayCall::Capture => self.gateway.capture(request).await,
            GatewayCall::Refund => self.gateway.refund(request).await,
            GatewayCall::Void => self.gateway.void(request).await,
        };

        let ref_no = reserved.ref_no.clone();
        let settled = match response {
            Ok(GatewayResponse {
                status: GatewayStatus::Approved,
                gateway_transaction_id,
                ..
            }) => {
                let events = on_approved(gateway_transaction_id);
                self.commit(reserved, events, fingerprint, build)
                    .await
                    .map(|(_, result)| result)
            }
            Ok(GatewayResponse {
                status: GatewayStatus::Declined,
                raw_response,
                ..
            }) => {
                let message = raw_message(&raw_response).unwrap_or_else(|| "Declined".to_string());
                self.commit_decline(reserved, fingerprint, &message, build).await
            }
            Err(PaymentError::GatewayRejected(message)) => {
                self.commit_decline(reserved, fingerprint, &message, build).await
            }
            Ok(GatewayResponse {
                status: GatewayStatus::Error,
                raw_response,
                ..
            }) => {
                let message =
                    raw_message(&raw_response).unwrap_or_else(|| "Gateway error".to_string());
                warn!(ref_no = %ref_no, %kind, %message, "unrecoverable gateway response");
                self.commit(reserved, vec![LedgerEvent::Fail], fingerprint, |rec| {
                    build(rec).with_messages(Messages::vendor(&message))
                })
                .await
                .map(|(_, result)| result)
            }
            Err(e) => {
                warn!(ref_no = %ref_no, %kind, error = %e, "gateway call failed, releasing reservation");
                if let Err(release_error) = self.release_reservation(reserved).await {
                    self.quarantine(&ref_no, kind, &release_error).await;
                    return Err(release_error);
                }
                return Err(e);
            }
        };

        if let Err(e) = &settled {
            self.quarantine(&ref_no, kind, e).await;
        }
        settled
    }

    /// Moves a record whose gateway outcome could not be stored to `ERROR`.
    ///
    /// Without this the reservation would outlive the operation and every later
    /// call on the record would fail with `OperationInFlight`.
    async fn quarantine(&self, ref_no: &str, kind: OperationKind, cause: &PaymentError) {
        error!(ref_no, %kind, error = %cause, "gateway outcome not stored, record needs manual reconciliation");
        let mut record = match self.records.get(ref_no).await {
            Ok(Some(record)) if record.in_flight.is_some() => record,
            Ok(_) => return,
            Err(e) => {
                error!(ref_no, error = %e, "could not reload record after failed commit");
                return;
            }
        };

        let expected = record.version;
        if let Err(e) = record.apply(LedgerEvent::Fail) {
            warn!(ref_no, error = %e, "record left in its current state");
        }
        record.in_flight = None;
        record.last_result = Some(
            describe(&record).with_messages(Messages::vendor("Requires manual reconciliation")),
        );
        if let Err(e) = self.records.update(record, expected).await {
            error!(ref_no, error = %e, "could not clear reservation");
        }
    }

    /// A declined attempt ends a pending or fresh transaction. On an already
    /// authorized or captured one it leaves the state as is.
    async fn commit_decline<B>(
        &self,
        record: TransactionRecord,
        fingerprint: &str,
        message: &str,
        build: B,
    ) -> Result<OperationResult>
    where
        B: Fn(&TransactionRecord) -> OperationResult,
    {
        let events = match record.state {
            TransactionState::Initiated
            | TransactionState::PendingRedirect
            | TransactionState::Pending3ds => vec![LedgerEvent::Decline],
            _ => Vec::new(),
        };
        let (_, result) = self
            .commit(record, events, fingerprint, |rec| {
                let mut result = build(rec).with_messages(Messages::both(message));
                result.status = ResultStatus::Declined;
                result
            })
            .await?;
        Ok(result)
    }

    async fn release_reservation(&self, mut record: TransactionRecord) -> Result<()> {
        let expected = record.version;
        record.in_flight = None;
        self.records.update(record, expected).await?;
        Ok(())
    }
}

fn approve(gateway_transaction_id: Option<String>) -> LedgerEvent {
    LedgerEvent::Approve {
        gateway_transaction_id,
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn ensure_idle(record: &TransactionRecord) -> Result<()> {
    if record.in_flight.is_some() {
        return Err(PaymentError::OperationInFlight(record.ref_no.clone()));
    }
    Ok(())
}

/// Correlation id handed to the gateway at redirect or 3-D Secure dispatch.
fn correlation_id(ref_no: &str, kind: OperationKind, fingerprint: &str) -> String {
    let digest = Fingerprint::new(kind, ref_no)
        .field("dispatch", Some(fingerprint))
        .finish();
    format!("ext-{}", &digest[..32])
}

fn raw_message(raw: &serde_json::Value) -> Option<String> {
    raw.get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

fn with_step_up_details(
    mut result: OperationResult,
    previous: &BTreeMap<String, String>,
) -> OperationResult {
    for key in ["PaRes", "Enrolled"] {
        if let Some(value) = previous.get(key) {
            result.transaction_details.insert(key.to_string(), value.clone());
        }
    }
    result
}

/// Host-facing summary of a record's current state.
pub(crate) fn describe(record: &TransactionRecord) -> OperationResult {
    let status = match record.state {
        TransactionState::Initiated
        | TransactionState::PendingRedirect
        | TransactionState::Pending3ds => ResultStatus::Pending,
        TransactionState::Authorized
        | TransactionState::Captured
        | TransactionState::PartiallyRefunded
        | TransactionState::Voided => ResultStatus::Approved,
        TransactionState::Refunded => ResultStatus::Refunded,
        TransactionState::Declined => ResultStatus::Declined,
        TransactionState::Error => ResultStatus::Error,
    };
    let mut result = OperationResult::new(status).with_detail("state", record.state.as_str());
    if let Some(id) = &record.gateway_transaction_id {
        result = result.with_detail("trans_id", id.clone());
    }
    if record.state.is_pending() {
        result.retry_after_seconds = record.next_check_after;
    }
    if let Some(method) = &record.stored_method {
        result.new_payment_method = Some(method.clone());
    }
    result
}
