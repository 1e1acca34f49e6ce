mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vagais_core::api::{self, ApiState};
use vagais_core::app::{AppBuilder, GCLoop};
use vagais_core::impls::{SqliteStore, WebhookSink};
use vagais_core::ports::SystemClock;

use crate::config::{Cli, Command, ServeArgs, retention};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    match cli.command {
        Command::Serve(args) => serve(&cli.database_url, args).await,
        Command::Migrate => {
            // connect がスキーマを作る
            SqliteStore::connect(&cli.database_url)
                .await
                .with_context(|| format!("failed to open {}", cli.database_url))?;
            println!("{}", serde_json::json!({"migrated": cli.database_url}));
            Ok(())
        }
        Command::Cleanup { retention_days } => {
            let store = Arc::new(
                SqliteStore::connect(&cli.database_url)
                    .await
                    .with_context(|| format!("failed to open {}", cli.database_url))?,
            );
            // interval は run() でしか使わない
            let gc = GCLoop::new(
                store,
                Arc::new(SystemClock),
                retention(retention_days),
                Duration::from_secs(60 * 60),
            );
            let deleted = gc.collect_once().await.context("cleanup failed")?;
            println!("{}", serde_json::json!({"deleted": deleted}));
            Ok(())
        }
    }
}

async fn serve(database_url: &str, args: ServeArgs) -> Result<()> {
    let store = Arc::new(
        SqliteStore::connect(database_url)
            .await
            .with_context(|| format!("failed to open {database_url}"))?,
    );

    let mut builder = AppBuilder::new(args.runtime_config())
        .with_store(store)
        .with_builtin_handlers(args.simulation());
    if !args.webhook_urls.is_empty() {
        let sink = WebhookSink::new(args.webhook_urls.clone(), args.webhook_timeout())
            .context("failed to build webhook client")?;
        info!(urls = ?sink.urls(), "webhook delivery enabled");
        builder = builder.with_event_sink(Arc::new(sink));
    }
    let app = builder.build().context("failed to build app")?;

    let router = api::router(ApiState::from_app(&app));
    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, workers = args.workers, "vagais listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("http server stopped, draining dispatcher");
    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        // シグナルが取れないならサーバは止めない
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
