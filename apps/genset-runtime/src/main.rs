use anyhow::{anyhow, Result};
use clap::Parser;
use genset_runtime::{cli, config, db, routes, services, state, store};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn bind_listener(host: &str, port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::AddrInUse {
            anyhow!(
                "port {port} on {host} is already taken by another process; \
                 pass --port to run genset-runtime elsewhere"
            )
        } else {
            anyhow::Error::new(err).context(format!("cannot listen on {host}:{port}"))
        }
    })?;
    tracing::info!(addr = %listener.local_addr()?, "genset-runtime listening");
    Ok(listener)
}

async fn open_stores(config: &config::RuntimeConfig, memory_only: bool) -> Result<store::Stores> {
    match config.database_url.as_deref() {
        Some(url) if !memory_only => {
            let pool = db::connect_lazy(url)?;
            db::ensure_schema(&pool).await?;
            tracing::info!("using postgres store");
            Ok(store::Stores::from_adapter(Arc::new(store::PgStore::new(pool))))
        }
        _ => {
            tracing::warn!("no database configured; state is kept in memory only");
            Ok(store::Stores::from_adapter(Arc::new(store::MemoryStore::new())))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::RuntimeConfig::from_env()?;
    let stores = open_stores(&config, args.memory_store).await?;
    let state = state::AppState::new(config.clone(), stores.clone());

    let cancel = CancellationToken::new();
    services::scheduler::PredictionSchedulerService::new(
        state.engine.clone(),
        stores.devices.clone(),
        config.prediction_interval(),
        config.prediction_concurrency,
    )
    .start(cancel.clone());
    services::retention::RetentionService::new(
        stores,
        config.retention_interval(),
        config.prediction.reconcile_window_days,
        config.telemetry_retention_days,
    )
    .start(cancel.clone());

    let listener = bind_listener(&args.host, args.port).await?;
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    cancel.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::bind_listener;

    #[tokio::test]
    async fn ephemeral_port_is_resolved_after_binding() {
        let Ok(listener) = bind_listener("127.0.0.1", 0).await else {
            // Sandboxes can block binding.
            return;
        };
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn taken_port_suggests_the_port_flag() {
        let Ok(taken) = std::net::TcpListener::bind("127.0.0.1:0") else {
            return;
        };
        let port = taken.local_addr().unwrap().port();

        let err = bind_listener("127.0.0.1", port).await.unwrap_err();
        let message = format!("{err:#}");
        if message.to_lowercase().contains("operation not permitted") {
            return;
        }
        assert!(message.contains(&port.to_string()));
        assert!(message.contains("already taken"));
        assert!(message.contains("--port"));
    }
}
