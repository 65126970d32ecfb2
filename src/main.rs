use std::sync::Arc;

use anyhow::Context;
use tokio::sync::oneshot;

use taskflow::api::{AppState, task_routes};
use taskflow::config::AppConfig;
use taskflow::store::{LibSqlTaskStore, MemoryTaskStore, TaskStore};
use taskflow::worker::{Dispatcher, ExecutorRegistry, HttpFetchExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    eprintln!("taskflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}/tasks", config.listen_addr);
    eprintln!(
        "   Workers: {} (queue {}, deadline {:?})",
        config.dispatcher.workers, config.dispatcher.queue_capacity, config.dispatcher.execution_timeout
    );

    // ── Store ───────────────────────────────────────────────────────────
    let store: Arc<dyn TaskStore> = match &config.db_path {
        Some(path) => {
            let store = LibSqlTaskStore::new_local(path)
                .await
                .with_context(|| format!("failed to open database at {}", path.display()))?;
            eprintln!("   Database: {}", path.display());
            Arc::new(store)
        }
        None => {
            eprintln!("   Database: in-memory (TASKFLOW_DB_PATH not set)");
            Arc::new(MemoryTaskStore::new())
        }
    };

    // ── Executors + Dispatcher ──────────────────────────────────────────
    let executors = Arc::new(ExecutorRegistry::new());
    if !executors.register_sync(Arc::new(HttpFetchExecutor::new())) {
        anyhow::bail!("failed to register the http_fetch executor");
    }
    eprintln!("   Executors: {}", executors.list().await.join(", "));

    let dispatcher = Arc::new(Dispatcher::new(
        config.dispatcher.clone(),
        Arc::clone(&store),
        Arc::clone(&executors),
    ));
    dispatcher.start().await?;

    // ── HTTP server ─────────────────────────────────────────────────────
    let app = task_routes(AppState {
        store,
        dispatcher: Arc::clone(&dispatcher),
        executors,
    })
    .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "Server is starting");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutting down the server");
        }
        result = &mut server => {
            // Server stopped on its own; still drain the dispatcher below.
            match result {
                Ok(Ok(())) => tracing::warn!("Server exited unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "Server error"),
                Err(e) => tracing::error!(error = %e, "Server task failed"),
            }
            dispatcher.shutdown().await?;
            return Ok(());
        }
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(config.shutdown_grace, &mut server).await {
        Ok(Ok(Ok(()))) => tracing::info!("Server stopped"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Server error during shutdown"),
        Ok(Err(e)) => tracing::error!(error = %e, "Server task failed"),
        Err(_) => {
            tracing::warn!(grace = ?config.shutdown_grace, "Server forced to shutdown");
            server.abort();
        }
    }

    dispatcher.shutdown().await?;
    tracing::info!("Server and dispatcher shutdown gracefully");
    Ok(())
}
