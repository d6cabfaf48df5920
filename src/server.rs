//! Reusable OCPP Central System server runtime.
//!
//! Provides [`ServerHandle`] that encapsulates the full server lifecycle:
//! database init, migrations, restart reconciliation of pending calls,
//! the OCPP WebSocket server, housekeeping, metrics and graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::application::{CentralSystem, SharedCentralSystem};
use crate::config::{AppConfig, DatabaseConfig};
use crate::domain::{AccountService, RepositoryProvider};
use crate::infrastructure::{init_database, InMemoryAccountService, SeaOrmRepositoryProvider};
use crate::interfaces::ws::OcppServer;
use crate::shared::shutdown::{ShutdownCoordinator, ShutdownSignal};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

// ── Options ────────────────────────────────────────────────────────

/// Options for starting the OCPP Central System.
pub struct ServerOptions {
    /// Application configuration.
    pub config: AppConfig,
    /// Run database migrations on startup (default: true).
    pub auto_migrate: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            auto_migrate: true,
        }
    }
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running OCPP Central System.
///
/// # Examples
///
/// ```rust,no_run
/// use ocpp_csms::server::{ServerHandle, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let handle = ServerHandle::start(ServerOptions::default()).await?;
///     // ... wait for shutdown signal ...
///     handle.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ServerHandle {
    /// Engine facade: submit pending calls, read status and session logs.
    pub system: SharedCentralSystem,
    /// Repository provider for data access.
    pub repos: Arc<dyn RepositoryProvider>,
    /// The configuration the server was started with.
    pub config: AppConfig,
    /// WebSocket port the server is listening on.
    pub ws_port: u16,

    db: DatabaseConnection,
    shutdown: ShutdownCoordinator,
    ws_task: tokio::task::JoinHandle<()>,
    sweeper_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Start the OCPP Central System with the given options.
    ///
    /// This will:
    /// 1. Install the Prometheus exporter (when enabled)
    /// 2. Connect to the database and run migrations
    /// 3. Reconcile pending calls left over from a previous run
    /// 4. Start the OCPP WebSocket server
    /// 5. Start the pending-call sweeper
    pub async fn start(opts: ServerOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let app_cfg = opts.config;
        app_cfg.validate()?;

        info!("Starting OCPP CSMS...");

        if app_cfg.metrics.enabled {
            install_metrics_exporter(&app_cfg)?;
        }

        // ── Database ───────────────────────────────────────────
        let db_config = DatabaseConfig {
            url: app_cfg.database.url.clone(),
            auto_migrate: opts.auto_migrate && app_cfg.database.auto_migrate,
        };
        let db = init_database(&db_config).await?;

        // ── Repositories & engine ──────────────────────────────
        let repos: Arc<dyn RepositoryProvider> =
            Arc::new(SeaOrmRepositoryProvider::new(db.clone()));
        let accounts: Arc<dyn AccountService> =
            Arc::new(InMemoryAccountService::new(app_cfg.seed_accounts()));
        info!(accounts = app_cfg.accounts.len(), "Account resolver seeded");

        let system = CentralSystem::new(app_cfg.engine_settings(), repos.as_ref(), accounts);

        let report = system.recover().await?;
        info!(
            timed_out = report.timed_out,
            rearmed = report.rearmed,
            "Pending calls reconciled"
        );

        // ── Shutdown coordinator ───────────────────────────────
        let shutdown = ShutdownCoordinator::new(app_cfg.server.shutdown_timeout);
        let shutdown_signal = shutdown.signal();

        // ── OCPP WebSocket server ──────────────────────────────
        let ws_addr = app_cfg.server.ws_address();
        let listener = TcpListener::bind(&ws_addr).await?;
        let ws_port = listener.local_addr()?.port();

        let server = OcppServer::new(ws_addr, system.clone()).with_shutdown(shutdown_signal.clone());
        let ws_task = tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                error!("WebSocket server error: {}", e);
            }
        });

        // ── Background tasks ───────────────────────────────────
        let sweeper_task = spawn_sweeper(system.clone(), app_cfg.retention(), shutdown_signal);

        info!("All servers started.");

        Ok(Self {
            system,
            repos,
            config: app_cfg,
            ws_port,
            db,
            shutdown,
            ws_task,
            sweeper_task,
        })
    }

    /// Get a cloneable shutdown signal.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install OS signal listeners (SIGTERM, SIGINT) that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    /// Trigger graceful shutdown (non-blocking).
    ///
    /// Sends the shutdown signal to all server components. Call [`wait`] to
    /// block until everything has stopped.
    ///
    /// [`wait`]: ServerHandle::wait
    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for the server to fully stop after shutdown has been triggered.
    pub async fn wait(self) {
        info!("Waiting for server tasks to complete...");

        let Self {
            system,
            db,
            shutdown,
            ws_task,
            sweeper_task,
            ..
        } = self;

        let finished = shutdown
            .shutdown_with_cleanup(|| async move {
                match ws_task.await {
                    Ok(()) => info!("WebSocket server stopped"),
                    Err(e) => error!("WebSocket server task panicked: {}", e),
                }
                if let Err(e) = sweeper_task.await {
                    error!("Sweeper task panicked: {}", e);
                }
            })
            .await;
        if !finished {
            warn!("Server tasks did not stop in time");
        }

        system.transactions.cancel_all_broadcasts();

        // Close database connection
        if let Err(e) = db.close().await {
            warn!("Error closing database connection: {}", e);
        } else {
            info!("Database connection closed");
        }

        info!("OCPP CSMS shutdown complete");
    }

    /// Trigger shutdown and wait for completion.
    pub async fn shutdown(self) {
        info!("Shutting down OCPP Central System...");
        self.trigger_shutdown();
        self.wait().await;
    }

    /// Check if the server is still running.
    pub fn is_running(&self) -> bool {
        !self.ws_task.is_finished()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// The global metrics recorder can only be installed once per process, so a
/// restart within the same process keeps the first exporter.
fn install_metrics_exporter(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    static INSTALLED: AtomicBool = AtomicBool::new(false);
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let addr = config.metrics_address()?;
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        INSTALLED.store(false, Ordering::SeqCst);
        return Err(e.into());
    }
    info!("Prometheus metrics exporter listening on http://{}/metrics", addr);
    Ok(())
}

fn spawn_sweeper(
    system: SharedCentralSystem,
    retention: Duration,
    shutdown: ShutdownSignal,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => system.sweep(retention),
                _ = shutdown.wait() => break,
            }
        }
    })
}

/// Initialize tracing (logging) from the application config.
///
/// Call this once at process startup (before [`ServerHandle::start`]).
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
