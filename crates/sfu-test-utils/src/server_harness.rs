//! Test server harness for REST tests.
//!
//! Provides `TestSfuServer` for spawning a real REST server in tests.

use crate::control_plane::{ControlPlaneOptions, TestControlPlane};
use crate::fixtures::test_config_vars;
use sfu_controller::config::Config;
use sfu_controller::observability::{health_router, HealthState};
use sfu_controller::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A REST server bound to a random local port, backed by a
/// [`TestControlPlane`].
///
/// The health router is merged into the same listener so probes can be
/// exercised alongside the API.
pub struct TestSfuServer {
    addr: SocketAddr,
    config: Config,
    control_plane: TestControlPlane,
    health: Arc<HealthState>,
    _handle: JoinHandle<()>,
}

impl TestSfuServer {
    /// Spawn with one connected mock node and default options.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(ControlPlaneOptions::default()).await
    }

    pub async fn spawn_with(options: ControlPlaneOptions) -> Result<Self, anyhow::Error> {
        let mut vars = test_config_vars();
        vars.insert(
            "SFU_RECORDING_ENABLED".to_string(),
            options.recording_enabled.to_string(),
        );
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let control_plane = TestControlPlane::with_options(options);
        let health = Arc::new(HealthState::new());
        health.set_running_nodes(control_plane.cluster.running_count());

        let state = Arc::new(AppState {
            manager: Arc::clone(&control_plane.manager),
            config: config.clone(),
        });
        let app = routes::build_routes(state).merge(health_router(Arc::clone(&health)));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            control_plane,
            health,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn control_plane(&self) -> &TestControlPlane {
        &self.control_plane
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }
}

impl Drop for TestSfuServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
