mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::write_operations;
use predicates::prelude::*;
use std::process::Command;
use tempfile::tempdir;

const HEADER: &str = "ref_no,state,amount,currency,captured,refunded,gateway_transaction_id,version";

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("operations.csv");
    write_operations(
        &input,
        &[
            &["auth", "R1", "100.00", "USD", "tok_visa"],
            &["capture", "R1", "60"],
            &["refund", "R1", "60"],
            &["refund", "R1", "1"],
            &["sell", "R2", "25", "USD", "tok_visa"],
            &["status", "R1"],
        ],
    )?;

    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg(&input);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(HEADER))
        .stdout(predicate::str::contains("R1,REFUNDED,100,USD,0,60,sim-1,6"))
        .stdout(predicate::str::contains("R2,CAPTURED,25,USD,25,0,sim-4,2"))
        .stderr(predicate::str::contains("Error processing operation"));

    Ok(())
}

#[test]
fn test_cli_three_ds_step_up() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("operations.csv");
    write_operations(
        &input,
        &[
            &["auth", "R1", "100", "USD", "tok_visa"],
            &["auth", "R1", "100", "USD", "tok_visa", "Y"],
            &["auth", "R2", "50", "USD", "tok_visa"],
            &["auth", "R2", "50", "USD", "tok_visa", "N"],
        ],
    )?;

    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg(&input).arg("--enable-3dsecure");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("R1,AUTHORIZED,100,USD,0,0,sim-1,3"))
        .stdout(predicate::str::contains("R2,DECLINED,50,USD,0,0,,2"));

    Ok(())
}

#[test]
fn test_cli_redirect_then_callback() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("operations.csv");
    write_operations(
        &input,
        &[
            &["sell", "R1", "10", "eur"],
            &["callback", "R1", "", "", "tok_saved", "", "ok"],
            &["callback", "R1", "", "", "", "", "fail"],
            &["callback", "ext-unknown", "", "", "", "", "ok"],
        ],
    )?;

    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg(&input);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("R1,CAPTURED,10,EUR,10,0,,2"))
        .stdout(predicate::str::contains("ext-unknown").not())
        .stderr(predicate::str::contains("callback dropped"));

    Ok(())
}

#[test]
fn test_malformed_rows_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("operations.csv");
    write_operations(
        &input,
        &[
            &["sell", "R1", "5", "USD", "tok_visa"],
            &["chargeback", "R1", "5"],
            &["sell", "R2", "", "USD", "tok_visa"],
            &["sell", "R3", "not_a_number", "USD", "tok_visa"],
            &["sell", "R4", "5", "XYZ", "tok_visa"],
            &["sell", "R5", "7", "USD", "tok_visa"],
        ],
    )?;

    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg(&input);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading operation"))
        .stderr(predicate::str::contains("Error processing operation"))
        .stdout(predicate::str::contains("R1,CAPTURED,5,USD,5,0,sim-1,2"))
        .stdout(predicate::str::contains("R5,CAPTURED,7,USD,7,0,sim-2,2"))
        .stdout(predicate::str::contains("R2,").not())
        .stdout(predicate::str::contains("R4,").not());

    Ok(())
}

#[test]
fn test_cli_unavailable_gateway_leaves_initiated() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("operations.csv");
    write_operations(&input, &[&["sell", "R1", "10", "USD", "tok_visa"]])?;

    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg(&input).arg("--gateway").arg("unavailable");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("R1,INITIATED,10,USD,0,0,,2"))
        .stderr(predicate::str::contains("gateway call failed"));

    Ok(())
}

#[test]
fn test_cli_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("operations.csv");
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{"plugin": {"3dsecure": true}}"#)?;
    write_operations(&input, &[&["auth", "R1", "20", "USD", "tok_visa"]])?;

    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg(&input).arg("--config").arg(&config);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("R1,PENDING_3DS,20,USD,0,0,,1"));

    Ok(())
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg("does/not/exist.csv");

    cmd.assert().failure();
}

#[test]
fn test_cli_callback_registers_gateway_supplied_name() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("operations.csv");
    write_operations(
        &input,
        &[
            &["sell", "R1", "10", "EUR"],
            &["callback", "R1", "", "", "tok_saved", "", "ok", "Visa ending 4242"],
            &["sell", "R2", "10", "EUR"],
            &["callback", "R2", "", "", "tok_nameless", "", "ok"],
        ],
    )?;

    let mut cmd = Command::new(cargo_bin!("gateway-ledger"));
    cmd.arg(&input).env("RUST_LOG", "info");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("R1,CAPTURED,10,EUR,10,0,,2"))
        .stdout(predicate::str::contains("R2,CAPTURED,10,EUR,10,0,,2"))
        .stderr(predicate::str::contains("name=Visa ending 4242"))
        .stderr(predicate::str::contains("tok_nameless").not());

    Ok(())
}
