use book_engine::config::Config;
use book_engine::server;
use book_engine::session::BookSession;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    dotenvy::dotenv().ok();

    info!("🚀 Starting book engine...");

    let config = Config::from_env();
    info!("📋 Configuration loaded");

    let session = Arc::new(
        BookSession::activate(config.session_context(), config.reconnect_policy()).await?,
    );

    // The view keeps running on live pushes if the first snapshot fails.
    match session.refresh().await {
        Ok(book) => info!(
            "✅ Initial snapshot applied ({} bids, {} asks)",
            book.bids().len(),
            book.asks().len()
        ),
        Err(e) => error!("❌ Initial snapshot failed: {}. Use POST /book/refresh to retry.", e),
    }

    let app = server::router(session.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("🌐 View server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = session.end().await {
        error!("Session ended with error: {}", e);
    }
    info!("Book engine exited");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
