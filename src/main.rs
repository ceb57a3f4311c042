use accrual_ledger::application::dispatcher::Dispatcher;
use accrual_ledger::config::Settings;
use accrual_ledger::domain::ports::{AccrualProviderRef, OrderStoreRef};
use accrual_ledger::infrastructure::accrual_http::HttpAccrualClient;
use accrual_ledger::infrastructure::in_memory::InMemoryOrderStore;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,accrual_ledger=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn open_store(settings: &Settings) -> Result<OrderStoreRef> {
    if let Some(uri) = &settings.database_uri {
        #[cfg(feature = "storage-postgres")]
        {
            use accrual_ledger::infrastructure::postgres::PostgresOrderStore;
            let max_connections = u32::try_from(settings.workers + 2).unwrap_or(u32::MAX);
            let store = PostgresOrderStore::connect(uri, max_connections)
                .await
                .into_diagnostic()?;
            info!("using postgres order store");
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "storage-postgres"))]
        {
            let _ = uri;
            warn!(
                "Postgres storage requested via --database-uri, but 'storage-postgres' feature is not enabled. Falling back to in-memory storage."
            );
        }
    }

    if let Some(path) = &settings.db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            use accrual_ledger::infrastructure::rocksdb::RocksDBStore;
            let store = RocksDBStore::open(path).into_diagnostic()?;
            info!(path = %path.display(), "using rocksdb order store");
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        {
            let _ = path;
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
        }
    }

    info!("using in-memory order store");
    Ok(Arc::new(InMemoryOrderStore::new()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();
    init_logging();

    let store = open_store(&settings).await?;
    let provider: AccrualProviderRef = Arc::new(
        HttpAccrualClient::new(&settings.accrual_system_address, settings.request_timeout())
            .into_diagnostic()?,
    );
    info!(accrual = %settings.accrual_system_address, "accrual provider configured");

    let dispatcher = Dispatcher::new(store, provider, settings.dispatcher_config());

    if settings.once {
        dispatcher.run_once().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(shutdown_rx));

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    handle.await.into_diagnostic()?;
    info!("shutdown complete");
    Ok(())
}
