mod common;

use common::{amount, command, slow_harness};
use gateway_ledger::domain::money::Balance;
use gateway_ledger::domain::transaction::TransactionState;
use gateway_ledger::error::PaymentError;
use gateway_ledger::infrastructure::simulated_gateway::GatewayBehavior;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_captures_exceeding_amount_one_wins() {
    let h = slow_harness(GatewayBehavior::Approve, Duration::from_millis(50));
    h.ledger.auth(command("R1", dec!(100), false)).await.unwrap();
    let before = h.gateway_calls();

    let (first, second) = tokio::join!(
        h.ledger.capture("R1", amount(dec!(60))),
        h.ledger.capture("R1", amount(dec!(70))),
    );

    let outcomes = [&first, &second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let rejection = outcomes
        .iter()
        .find_map(|r| r.as_ref().err())
        .unwrap();
    assert!(
        matches!(
            rejection,
            PaymentError::OperationInFlight(_)
                | PaymentError::VersionConflict { .. }
                | PaymentError::InvalidTransition { .. }
                | PaymentError::InvalidAmount { .. }
        ),
        "unexpected rejection: {}",
        rejection
    );

    let record = h.ledger.get("R1").await.unwrap().unwrap();
    assert_eq!(record.state, TransactionState::Captured);
    assert!(record.captured_amount <= Balance::new(dec!(100)));
    assert_eq!(h.gateway_calls() - before, 1);
}

#[tokio::test]
async fn test_identical_concurrent_requests_reach_gateway_once() {
    let h = slow_harness(GatewayBehavior::Approve, Duration::from_millis(50));

    let (first, second) = tokio::join!(
        h.ledger.sell(command("R1", dec!(30), false)),
        h.ledger.sell(command("R1", dec!(30), false)),
    );

    assert_eq!(h.gateway_calls(), 1);
    let errors: Vec<_> = [first, second].into_iter().filter_map(|r| r.err()).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], PaymentError::DuplicateRequest(_)));

    // Once the first request finished, a replay gets its cached result.
    let replay = h.ledger.sell(command("R1", dec!(30), false)).await.unwrap();
    assert_eq!(
        replay,
        h.ledger.get("R1").await.unwrap().unwrap().last_result.unwrap()
    );
    assert_eq!(h.gateway_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_refs_run_in_parallel() {
    let h = slow_harness(GatewayBehavior::Approve, Duration::from_millis(20));

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = h.ledger.clone();
        handles.push(tokio::spawn(async move {
            let ref_no = format!("R{}", i);
            ledger.auth(command(&ref_no, dec!(10), false)).await?;
            ledger.capture(&ref_no, amount(dec!(10))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let records = h.ledger.all_records().await.unwrap();
    assert_eq!(records.len(), 20);
    assert!(records.iter().all(|r| r.state == TransactionState::Captured));
    assert_eq!(h.gateway_calls(), 40);
}
