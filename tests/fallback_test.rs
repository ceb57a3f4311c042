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

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    once()
        .arg("--db-path")
        .arg("some_db")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage.",
        ));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    once()
        .arg("--db-path")
        .arg(&db_path)
        .assert()
        .success()
        .stderr(predicate::str::contains("Falling back").not())
        .stderr(predicate::str::contains("using rocksdb order store"));
}

#[cfg(not(feature = "storage-postgres"))]
#[test]
fn test_postgres_fallback_warning() {
    once()
        .args(["-d", "postgres://localhost/accrual"])
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "'storage-postgres' feature is not enabled. Falling back to in-memory storage.",
        ));
}
