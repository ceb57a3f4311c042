use crate::application::dispatcher::DispatcherConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line and environment settings. A flag always wins over its
/// environment variable.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Reconciles claimed orders with the accrual provider",
    long_about = None
)]
pub struct Settings {
    /// Base address of the accrual provider
    #[arg(
        short = 'r',
        long,
        env = "ACCRUAL_SYSTEM_ADDRESS",
        default_value = "http://localhost:8000"
    )]
    pub accrual_system_address: String,

    /// PostgreSQL connection string. Requires the `storage-postgres` feature.
    #[arg(short = 'd', long, env = "DATABASE_URI")]
    pub database_uri: Option<String>,

    /// Path to a RocksDB directory. Requires the `storage-rocksdb` feature.
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Number of accrual workers, also the queue capacity
    #[arg(long, env = "ACCRUAL_WORKERS", default_value_t = 3)]
    pub workers: usize,

    /// Maximum pending orders fetched per cycle
    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Pause between dispatcher cycles, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Time workers get to finish after shutdown, in seconds
    #[arg(long, default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Timeout of a single accrual provider request, in seconds
    #[arg(long, default_value_t = 5)]
    pub request_timeout_secs: u64,

    /// Run a single reconciliation cycle and exit
    #[arg(long)]
    pub once: bool,
}

impl Settings {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers.max(1),
            batch_size: self.batch_size.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::try_parse_from(["accrual-ledger"]).unwrap();
        assert_eq!(settings.accrual_system_address, "http://localhost:8000");
        assert_eq!(settings.batch_size, 100);
        assert!(!settings.once);

        let config = settings.dispatcher_config();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_flags_override() {
        let settings = Settings::try_parse_from([
            "accrual-ledger",
            "-r",
            "http://accrual:9000",
            "--workers",
            "0",
            "--poll-interval-ms",
            "250",
            "--once",
        ])
        .unwrap();
        assert_eq!(settings.accrual_system_address, "http://accrual:9000");
        assert!(settings.once);

        let config = settings.dispatcher_config();
        assert_eq!(config.workers, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }
}
