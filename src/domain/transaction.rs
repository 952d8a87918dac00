use super::currency::Currency;
use super::money::{Amount, Balance};
use super::operation::{NewPaymentMethod, OperationKind, OperationResult};
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Initiated,
    PendingRedirect,
    #[serde(rename = "PENDING_3DS")]
    Pending3ds,
    Authorized,
    Captured,
    Declined,
    Refunded,
    PartiallyRefunded,
    Voided,
    Error,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Initiated => "INITIATED",
            TransactionState::PendingRedirect => "PENDING_REDIRECT",
            TransactionState::Pending3ds => "PENDING_3DS",
            TransactionState::Authorized => "AUTHORIZED",
            TransactionState::Captured => "CAPTURED",
            TransactionState::Declined => "DECLINED",
            TransactionState::Refunded => "REFUNDED",
            TransactionState::PartiallyRefunded => "PARTIALLY_REFUNDED",
            TransactionState::Voided => "VOIDED",
            TransactionState::Error => "ERROR",
        }
    }

    /// States no operation can leave. Kept for audit and idempotency lookups.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Declined
                | TransactionState::Refunded
                | TransactionState::Voided
                | TransactionState::Error
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TransactionState::PendingRedirect | TransactionState::Pending3ds
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether approval settles the funds immediately (sell) or only reserves them (auth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFlow {
    OnePhase,
    TwoPhase,
}

/// Something that happened to a transaction, either from a gateway response or a callback.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEvent {
    RequireRedirect { next_check_after: u64 },
    Require3ds { next_check_after: u64 },
    Approve { gateway_transaction_id: Option<String> },
    StepUp {
        enrolled: bool,
        gateway_transaction_id: Option<String>,
    },
    Capture {
        amount: Amount,
        gateway_transaction_id: Option<String>,
    },
    Refund { amount: Amount },
    Void,
    Decline,
    Fail,
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::RequireRedirect { .. } => "require_redirect",
            LedgerEvent::Require3ds { .. } => "require_3ds",
            LedgerEvent::Approve { .. } => "approve",
            LedgerEvent::StepUp { .. } => "step_up",
            LedgerEvent::Capture { .. } => "capture",
            LedgerEvent::Refund { .. } => "refund",
            LedgerEvent::Void => "void",
            LedgerEvent::Decline => "decline",
            LedgerEvent::Fail => "fail",
        }
    }
}

/// Durable state of one billing transaction, keyed by the host's `ref_no`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub ref_no: String,
    pub flow: PaymentFlow,
    pub state: TransactionState,
    pub gateway_transaction_id: Option<String>,
    pub amount: Amount,
    pub currency: Currency,
    /// Funds captured and not refunded.
    pub captured_amount: Balance,
    /// Funds refunded so far.
    pub refunded_amount: Balance,
    pub idempotency_keys: BTreeSet<String>,
    pub version: u64,
    pub in_flight: Option<OperationKind>,
    pub external_refs: Vec<String>,
    pub next_check_after: Option<u64>,
    pub stored_method: Option<NewPaymentMethod>,
    pub last_result: Option<OperationResult>,
}

impl TransactionRecord {
    pub fn new(ref_no: &str, flow: PaymentFlow, amount: Amount, currency: Currency) -> Self {
        Self {
            ref_no: ref_no.to_string(),
            flow,
            state: TransactionState::Initiated,
            gateway_transaction_id: None,
            amount,
            currency,
            captured_amount: Balance::ZERO,
            refunded_amount: Balance::ZERO,
            idempotency_keys: BTreeSet::new(),
            version: 0,
            in_flight: None,
            external_refs: Vec::new(),
            next_check_after: None,
            stored_method: None,
            last_result: None,
        }
    }

    /// Amount that may still be captured.
    pub fn capturable(&self) -> Balance {
        Balance::from(self.amount) - self.captured_amount - self.refunded_amount
    }

    /// Amount that may still be refunded.
    pub fn refundable(&self) -> Balance {
        self.captured_amount
    }

    /// Applies `event`, moving the record along one edge of the lifecycle.
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, event: LedgerEvent) -> Result<()> {
        use TransactionState::*;

        match (self.state, &event) {
            (Initiated, LedgerEvent::RequireRedirect { next_check_after }) => {
                self.next_check_after = Some(*next_check_after);
                self.state = PendingRedirect;
            }
            (Initiated, LedgerEvent::Require3ds { next_check_after }) => {
                self.next_check_after = Some(*next_check_after);
                self.state = Pending3ds;
            }
            (Initiated | PendingRedirect, LedgerEvent::Approve { gateway_transaction_id }) => {
                self.set_gateway_id(gateway_transaction_id);
                self.authorize();
            }
            (
                Pending3ds,
                LedgerEvent::StepUp {
                    enrolled,
                    gateway_transaction_id,
                },
            ) => {
                self.next_check_after = None;
                if *enrolled {
                    self.set_gateway_id(gateway_transaction_id);
                    self.authorize();
                } else {
                    self.state = Declined;
                }
            }
            (
                Authorized,
                LedgerEvent::Capture {
                    amount,
                    gateway_transaction_id,
                },
            ) => {
                let remaining = self.capturable();
                if Balance::from(*amount) > remaining {
                    return Err(PaymentError::InvalidAmount {
                        requested: amount.value(),
                        remaining: remaining.value(),
                    });
                }
                self.set_gateway_id(gateway_transaction_id);
                self.captured_amount += Balance::from(*amount);
                self.state = Captured;
            }
            (Captured | PartiallyRefunded | Refunded, LedgerEvent::Refund { amount }) => {
                let remaining = self.refundable();
                if Balance::from(*amount) > remaining {
                    return Err(PaymentError::InvalidAmount {
                        requested: amount.value(),
                        remaining: remaining.value(),
                    });
                }
                self.captured_amount -= Balance::from(*amount);
                self.refunded_amount += Balance::from(*amount);
                self.state = if self.captured_amount.is_zero() {
                    Refunded
                } else {
                    PartiallyRefunded
                };
            }
            (Authorized, LedgerEvent::Void) => {
                self.state = Voided;
            }
            (Initiated | PendingRedirect | Pending3ds, LedgerEvent::Decline) => {
                self.next_check_after = None;
                self.state = Declined;
            }
            (state, LedgerEvent::Fail) if !state.is_terminal() => {
                self.next_check_after = None;
                self.state = Error;
            }
            (state, event) => {
                return Err(PaymentError::InvalidTransition {
                    from: state.to_string(),
                    event: event.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks whether `event` would be accepted without mutating the record.
    pub fn validate(&self, event: &LedgerEvent) -> Result<()> {
        self.clone().apply(event.clone())
    }

    /// Applies `events` in order, stopping at the first rejected one.
    pub fn apply_all(&mut self, events: &[LedgerEvent]) -> Result<()> {
        for event in events {
            self.apply(event.clone())?;
        }
        Ok(())
    }

    fn authorize(&mut self) {
        self.next_check_after = None;
        self.state = TransactionState::Authorized;
        if self.flow == PaymentFlow::OnePhase {
            self.captured_amount = Balance::from(self.amount);
            self.state = TransactionState::Captured;
        }
    }

    fn set_gateway_id(&mut self, id: &Option<String>) {
        if let Some(id) = id {
            self.gateway_transaction_id = Some(id.clone());
        }
    }
}
