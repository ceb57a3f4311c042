use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn once() -> Command {
    let mut cmd = Command::new(cargo_bin!("accrual-ledger"));
    cmd.env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .env_remove("DATABASE_URI")
        .env_remove("DB_PATH")
        .args(["--once", "-r", "http://127.0.0.1:9"]);
    cmd
}

#[test]
fn test_cli_single_cycle() -> Result<(), Box<dyn std::error::Error>> {
    once()
        .assert()
        .success()
        .stderr(predicate::str::contains("using in-memory order store"))
        .stderr(predicate::str::contains("reconciliation cycle complete"));

    Ok(())
}

#[test]
fn test_cli_rejects_bad_flag_value() {
    Command::new(cargo_bin!("accrual-ledger"))
        .args(["--once", "--workers", "many"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--workers"));
}
