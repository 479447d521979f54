//! The conductor controller binary.
//!
//! Exit codes: 0 on clean shutdown, 1 on fatal startup errors, 2 on
//! configuration errors.

mod app;
mod auth;
mod config;
mod controller;
mod error;
mod metrics;
mod routes;

use crate::app::build_router;
use crate::auth::AppState;
use crate::config::Config;
use crate::controller::Controller;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

fn config_path() -> Option<PathBuf> {
    if let Some(arg) = std::env::args().nth(1) {
        return Some(PathBuf::from(arg));
    }
    if let Ok(path) = std::env::var("CONDUCTOR_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from("conductor.yaml");
    default.exists().then_some(default)
}

fn init_tracing(config: &Config) {
    let fallback = config
        .observability
        .log_filter
        .clone()
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("terminate signal handler installs");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn run() -> i32 {
    let config = match Config::load(config_path().as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return 2;
        }
    };
    init_tracing(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "conductor starting");

    let controller = match Controller::build(config).await {
        Ok(controller) => controller,
        Err(e) => {
            tracing::error!(error = %e, "controller startup failed");
            return 1;
        }
    };
    controller.start().await;

    let accept = CancellationToken::new();
    let mut servers = Vec::new();

    let listen = controller.config.controller.listen.clone();
    let tcp = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %listen, "failed to bind listener");
            return 1;
        }
    };
    tracing::info!(addr = %listen, "control plane listening");
    let router = build_router(AppState {
        controller: Arc::clone(&controller),
        local: false,
    });
    servers.push(tokio::spawn({
        let accept = accept.clone();
        async move {
            let result = axum::serve(tcp, router)
                .with_graceful_shutdown(accept.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "tcp server error");
            }
        }
    }));

    if let Some(socket_path) = controller.config.controller.unix_socket.clone() {
        let _ = tokio::fs::remove_file(&socket_path).await;
        match tokio::net::UnixListener::bind(&socket_path) {
            Ok(listener) => {
                tracing::info!(path = %socket_path.display(), "unix socket listening");
                let router = build_router(AppState {
                    controller: Arc::clone(&controller),
                    local: true,
                });
                servers.push(tokio::spawn({
                    let accept = accept.clone();
                    async move {
                        let result = axum::serve(listener, router)
                            .with_graceful_shutdown(accept.cancelled_owned())
                            .await;
                        if let Err(e) = result {
                            tracing::error!(error = %e, "unix socket server error");
                        }
                    }
                }));
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %socket_path.display(),
                    "unix socket disabled"
                );
            }
        }
    }

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");

    // Draining starts before the listeners close so racing submits see a
    // clean 503 instead of a reset connection.
    controller.runner.start_draining();
    accept.cancel();
    controller.shutdown().await;
    for server in servers {
        let _ = server.await;
    }

    tracing::info!("conductor stopped");
    0
}
