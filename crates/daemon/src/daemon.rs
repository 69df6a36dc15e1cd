//! Daemon startup and serve loop for the WebP optimizer
//!
//! Provides the entry point that turns a [`Config`] into a running HTTP server.

use crate::config::{Config, ConfigError};
use crate::http::{create_router, AppState};
use crate::metrics::{new_shared_metrics, SharedMetrics};
use crate::pipeline::Pipeline;
use crate::startup::{run_startup_checks, StartupError, WorkDirs};
use crate::upload::UploadLimits;
use axum::Router;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Failed to bind the listener
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Working directories derived from the configuration
    pub dirs: WorkDirs,
    /// Shared metrics state
    pub metrics: SharedMetrics,
    /// Pipeline shared by every request
    pub pipeline: Pipeline,
}

impl Daemon {
    /// Initialize the daemon with an existing configuration
    ///
    /// This performs the full startup sequence:
    /// 1. Validate the configuration
    /// 2. Provision the working directories
    /// 3. Sweep leftovers of a previous process (if enabled)
    /// 4. Initialize shared metrics and the pipeline
    pub async fn new(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;
        let dirs = WorkDirs::from_config(&config);
        run_startup_checks(&config, &dirs).await?;
        Ok(Self::new_without_checks(config))
    }

    /// Initialize the daemon without touching the filesystem
    pub fn new_without_checks(config: Config) -> Self {
        let dirs = WorkDirs::from_config(&config);
        let metrics = new_shared_metrics();
        let timeout = match config.transform.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let pipeline = Pipeline::new(dirs.clone(), metrics.clone(), timeout);

        Self {
            config,
            dirs,
            metrics,
            pipeline,
        }
    }

    /// Get the shared metrics
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Address the server listens on, `host:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }

    /// Build the router serving this daemon's state
    pub fn router(&self) -> Router {
        create_router(AppState {
            pipeline: self.pipeline.clone(),
            limits: UploadLimits {
                max_file_bytes: self.config.upload.max_file_bytes,
            },
            metrics: self.metrics.clone(),
        })
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM
    pub async fn run(&self) -> Result<(), DaemonError> {
        let addr = self.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| DaemonError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(addr = %addr, "Listening");

        self.serve(listener, shutdown_signal()).await?;
        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
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
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StorageConfig, TransformConfig};
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn create_test_config(root: &TempDir) -> Config {
        Config {
            storage: StorageConfig {
                incoming_dir: root.path().join("uploads"),
                output_dir: root.path().join("public").join("uploads"),
                sweep_on_startup: true,
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_daemon_initialization_provisions_directories() {
        let root = TempDir::new().unwrap();
        let config = create_test_config(&root);

        let daemon = Daemon::new(config.clone()).await.unwrap();

        assert_eq!(daemon.config, config);
        assert!(daemon.dirs.incoming.is_dir());
        assert!(daemon.dirs.outputs.is_dir());
    }

    #[tokio::test]
    async fn test_daemon_sweeps_leftovers() {
        let root = TempDir::new().unwrap();
        let config = create_test_config(&root);
        fs::create_dir_all(&config.storage.incoming_dir).unwrap();
        let orphan = config.storage.incoming_dir.join("image-orphan.jpg");
        fs::write(&orphan, b"left behind").unwrap();

        Daemon::new(config).await.unwrap();

        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_daemon_rejects_invalid_config() {
        let root = TempDir::new().unwrap();
        let mut config = create_test_config(&root);
        config.server.port = 0;

        let result = Daemon::new(config).await;
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[tokio::test]
    async fn test_daemon_fails_when_directory_blocked() {
        let root = TempDir::new().unwrap();
        let config = create_test_config(&root);
        fs::write(&config.storage.incoming_dir, b"a file, not a directory").unwrap();

        let result = Daemon::new(config).await;
        assert!(matches!(result, Err(DaemonError::Startup(_))));
    }

    #[test]
    fn test_bind_addr() {
        let root = TempDir::new().unwrap();
        let mut config = create_test_config(&root);
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 8080;

        let daemon = Daemon::new_without_checks(config);
        assert_eq!(daemon.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        let root = TempDir::new().unwrap();
        let config = Config {
            transform: TransformConfig { timeout_secs: 0 },
            ..create_test_config(&root)
        };
        // Construction must not touch the filesystem.
        let daemon = Daemon::new_without_checks(config);
        assert!(!daemon.dirs.incoming.exists());
    }

    #[tokio::test]
    async fn test_daemon_metrics_initialized() {
        let root = TempDir::new().unwrap();
        let daemon = Daemon::new_without_checks(create_test_config(&root));

        let metrics = daemon.metrics();
        let snapshot = metrics.read().await;
        assert_eq!(snapshot.recent_runs.len(), 0);
        assert_eq!(snapshot.active_runs, 0);
        assert_eq!(snapshot.completed_runs, 0);
        assert_eq!(snapshot.failed_runs, 0);
    }

    #[tokio::test]
    async fn test_serve_answers_and_shuts_down() {
        let root = TempDir::new().unwrap();
        let daemon = Daemon::new(create_test_config(&root)).await.unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            daemon
                .serve(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains("completed_runs"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
