//! SFU Controller
//!
//! # Servers
//!
//! - REST API for session administration (default: 0.0.0.0:4443)
//! - HTTP server for health and metrics endpoints (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing in the configured format
//! 3. Initialize Prometheus metrics recorder
//! 4. Connect to every configured media node
//! 5. Build the session manager with default collaborators
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Spawn node monitor and node event listener
//! 8. Serve the REST API until SIGINT/SIGTERM

use axum::Router;
use common::config::{LogFormat, LoggingConfig};
use common::types::NodeId;
use sfu_controller::cluster::{MediaNode, NodeCluster, SessionCountLoad};
use sfu_controller::collaborators::Collaborators;
use sfu_controller::config::{Config, DEFAULT_LOG_LEVEL};
use sfu_controller::media::rpc_client::JsonRpcMediaEngine;
use sfu_controller::observability::{health_router, metrics, HealthState};
use sfu_controller::routes::{self, AppState};
use sfu_controller::session::{ManagerSettings, SessionManager};
use sfu_controller::tasks;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is read before tracing is initialized so the log format
    // it names applies from the first line; a load error is logged with the
    // default format.
    let config = Config::from_env();
    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(|_| LoggingConfig {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Text,
        });
    let json = logging.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.log_level.clone().into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting SFU Controller");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        sfu_id = %config.sfu_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        media_nodes = config.media_node_uris.len(),
        node_capacity = config.node_capacity,
        endpoint_timeout_seconds = config.endpoint_timeout_seconds,
        recording_enabled = config.recording_enabled,
        cdr_enabled = config.cdr_enabled,
        "Configuration loaded successfully"
    );

    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = metrics::init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let cluster = connect_media_nodes(&config).await;
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&cluster),
        Collaborators::from_config(&config),
        ManagerSettings::from_config(&config),
    ));

    let health_state = Arc::new(HealthState::new());
    health_state.set_running_nodes(cluster.running_count());
    let shutdown_token = CancellationToken::new();

    // Health server (liveness, readiness, metrics)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        e
    })?;
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            e
        })?;
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Background tasks
    tokio::spawn(tasks::start_node_monitor(
        Arc::clone(&cluster),
        Arc::clone(&health_state),
        config.node_check_interval(),
        shutdown_token.child_token(),
    ));
    tokio::spawn(tasks::start_node_event_listener(
        Arc::clone(&manager),
        shutdown_token.child_token(),
    ));

    // REST API
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain = Duration::from_secs(config.drain_seconds);
    let state = Arc::new(AppState {
        manager,
        config,
    });
    let app = routes::build_routes(state);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind REST API");
        e
    })?;
    info!(addr = %addr, "SFU Controller listening");

    let api_shutdown_token = shutdown_token.clone();
    let shutdown_health = Arc::clone(&health_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop receiving new traffic before the drain period
            shutdown_health.begin_draining();
            tokio::time::sleep(drain).await;
            api_shutdown_token.cancel();
        })
        .await
        .map_err(|e| {
            error!("Server error: {}", e);
            e
        })?;

    info!("SFU Controller shutdown complete");
    Ok(())
}

/// Build the cluster and try each configured node once. Unreachable nodes
/// are kept disconnected; the node monitor keeps retrying them.
async fn connect_media_nodes(config: &Config) -> Arc<NodeCluster> {
    let cluster = Arc::new(NodeCluster::new(Arc::new(SessionCountLoad::new(
        config.node_capacity,
    ))));

    for (index, uri) in config.media_node_uris.iter().enumerate() {
        if cluster.node_with_uri_exists(uri) {
            warn!(index, "Duplicate media node URI ignored");
            continue;
        }
        let engine = Arc::new(JsonRpcMediaEngine::new(
            uri.clone(),
            config.media_rpc_timeout(),
        ));
        let id = NodeId::new(format!("kms_{}", index + 1));
        cluster.add_node(Arc::new(MediaNode::new(
            id.clone(),
            uri.clone(),
            Arc::clone(&engine) as Arc<dyn sfu_controller::media::MediaEngine>,
        )));

        match engine.connect().await {
            Ok(()) => cluster.handle_connected(&id),
            Err(e) => {
                warn!(node_id = %id, error = %e, "Media node unreachable at startup");
                cluster.handle_connection_failed(&id);
            }
        }
    }

    info!(
        nodes = config.media_node_uris.len(),
        running = cluster.running_count(),
        "Media node cluster initialized"
    );
    cluster
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
