/// Server implementation for the UART bridge
use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    handlers,
    protocol::{NetSession, StreamReceiver, StreamSender},
};

/// Build the diagnostics router
pub fn build_router(state: AppState) -> Router {
    // Create CORS layer to allow cross-origin requests
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "UART bridge" }))
        .route("/health", get(handlers::rest::health_check))
        .nest("/api", api_routes())
        .layer(cors)
        .with_state(state)
}

/// Build API routes for device diagnostics
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/uarts", get(handlers::rest::list_uarts))
        .route("/uarts/:device/close", post(handlers::rest::close_uart))
        .route("/mux", post(handlers::rest::set_mux))
        .route("/callbacks", get(handlers::rest::take_callbacks))
}

/// Accept command connections until `shutdown` is cancelled. Each
/// connection runs on its own task.
pub async fn run_command_listener(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!("Command listener running on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept command connection: {}", e);
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        let (read, write) = stream.into_split();
        let session = NetSession::new(
            Box::new(StreamReceiver::new(read)),
            Box::new(StreamSender::new(write)),
        );
        info!("Command connection {} from {}", session.id, peer);
        tokio::spawn(handlers::handle_connection(state.clone(), session));
    }

    info!("Command listener stopped");
    Ok(())
}

/// Serve the diagnostics router until `shutdown` is cancelled
pub async fn run_http_server(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!("HTTP diagnostics running on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP diagnostics stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown...");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
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

/// End every bridge: request disconnect of the owning sessions, give them
/// the teardown wait to finish, then abort whatever reader is left
pub async fn shutdown_bridges(state: &AppState) {
    let devices = state.devices();
    let requested = devices.disconnect_all().await;
    info!("Requested disconnect of {} active bridge(s)", requested);

    let wait = state.config.bridge.teardown_wait();
    for device in 0..devices.device_count() {
        if let Some(status) = devices.reader_status(device) {
            if !status.wait_idle(wait).await {
                warn!("Reader of UART {} still running after {:?}", device, wait);
            }
        }
    }

    let aborted = devices.abort_readers().await;
    if aborted > 0 {
        warn!("Aborted {} reader task(s)", aborted);
    }
}

/// Bind the listeners, serve until a shutdown signal and tear every bridge
/// down before returning
pub async fn run_with_graceful_shutdown(state: AppState) -> Result<(), std::io::Error> {
    let shutdown = CancellationToken::new();

    let command_listener = TcpListener::bind(state.config.server.command_addr.as_str()).await?;
    let command_task = tokio::spawn(run_command_listener(
        command_listener,
        state.clone(),
        shutdown.clone(),
    ));

    let http_task = if state.config.server.http_enabled {
        let listener = TcpListener::bind(state.config.server.http_addr.as_str()).await?;
        let router = build_router(state.clone());
        Some(tokio::spawn(run_http_server(listener, router, shutdown.clone())))
    } else {
        None
    };

    shutdown_signal().await;
    shutdown.cancel();
    shutdown_bridges(&state).await;

    match command_task.await {
        Ok(result) => result?,
        Err(e) => error!("Command listener task failed: {}", e),
    }
    if let Some(http_task) = http_task {
        match http_task.await {
            Ok(result) => result?,
            Err(e) => error!("HTTP server task failed: {}", e),
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
