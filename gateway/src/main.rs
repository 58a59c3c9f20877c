//! procapi gateway - accepts predictions over HTTP and dispatches them to backend workers.

use std::sync::Arc;

use axum::middleware;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use procapi_gateway::{
    logging, routes, AmqpBroker, AppState, Config, DispatchGateway, PredictionPipeline,
    RedisResultCache,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()
        .map_err(|e| format!("Failed to load configuration: {}", e))?;

    logging::init(&config.logging.level);

    tracing::info!("Starting procapi gateway {}", env!("CARGO_PKG_VERSION"));

    // Process-wide connections, released on shutdown
    let broker = Arc::new(AmqpBroker::connect(&config.broker).await?);
    let cache = Arc::new(RedisResultCache::connect(&config.cache.url).await?);

    let gateway = DispatchGateway::start(
        broker,
        cache,
        PredictionPipeline::default(),
        config.dispatch.reply_timeout(),
    )
    .await?;

    let state = Arc::new(AppState {
        config: config.clone(),
        gateway: gateway.clone(),
    });

    let app = routes::router(state)
        .layer(middleware::from_fn(logging::request_logger))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.api.host, config.api.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received, draining connections");
}
