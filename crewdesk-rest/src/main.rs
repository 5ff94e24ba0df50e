//! crewdesk server binary.
//!
//! Configuration is environment-driven (`CREWDESK_*`, see
//! `crewdesk_core::config`). The server starts with every dangerous
//! capability ceilinged off and the mock provider unless configured
//! otherwise.

use std::net::SocketAddr;

use crewdesk_core::config::Settings;
use crewdesk_rest::{router, AppState};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crewdesk_rest=info,crewdesk_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    if settings.provider_default == "native" && settings.native_api_key.is_none() {
        tracing::warn!(
            "native provider selected but OPENAI_API_KEY is not set - model calls will fail"
        );
    }

    let state = match AppState::new(settings) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize state");
            std::process::exit(1);
        }
    };
    tracing::info!(
        db = %state.settings.db_path.display(),
        outputs = %state.settings.outputs_dir.display(),
        provider = %state.settings.provider_default,
        "starting crewdesk server"
    );

    // Background artifact GC: hourly sweep of expired, unreferenced files.
    {
        let artifacts = state.artifacts.clone();
        let outputs_ttl = state.settings.outputs_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match artifacts.gc_sweep(outputs_ttl).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "artifact gc sweep"),
                    Err(err) => tracing::warn!(error = %err, "artifact gc sweep failed"),
                }
            }
        });
    }

    let host = state.settings.host.clone();
    let port = state.settings.port;
    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::error!(error = %err, "invalid host:port");
            std::process::exit(1);
        }
    };

    tracing::info!("listening on http://{addr}");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "bind failed");
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server error");
    }

    tracing::info!("server shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::warn!("failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
