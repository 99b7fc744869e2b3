#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # kube-relay
//!
//! Streams live Kubernetes state to browser clients.
//!
//! kube-relay holds one kubeconfig and exposes a small REST surface plus
//! three WebSocket stream modes: resource watches, pod log tails and
//! interactive exec sessions. Each WebSocket connection owns the remote
//! stream it opened; closing the socket tears that stream down.
//!
//! ## API surface
//!
//! | Method | Path                                  | Description                          |
//! |--------|---------------------------------------|--------------------------------------|
//! | GET    | `/health`                             | Plain-text liveness check            |
//! | GET    | `/api/health`                         | Status, uptime, cluster connectivity |
//! | GET    | `/api/cluster-info`                   | Version, context, cluster and user   |
//! | GET    | `/api/namespaces`                     | Namespace names                      |
//! | GET    | `/api/discovery`                      | Resource types the server offers     |
//! | GET    | `/api/resources/{kind}`               | List objects of a kind               |
//! | GET    | `/api/resources/{kind}/{name}`        | One object as JSON                   |
//! | GET    | `/api/resources/{kind}/{name}/yaml`   | One object as YAML                   |
//! | PUT    | `/api/resources/{kind}/{name}/yaml`   | Replace an object from YAML          |
//! | GET    | `/api/resources/{kind}/{name}/events` | Events about one object              |
//! | DELETE | `/api/resources/{kind}/{name}`        | Delete an object                     |
//! | GET    | `/ws/resources`                       | WebSocket: watch a kind              |
//! | GET    | `/ws/logs`                            | WebSocket: tail pod logs             |
//! | GET    | `/ws/exec`                            | WebSocket: interactive exec          |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, graceful shutdown
//! lib.rs           — router
//! config.rs        — TOML + env-var configuration
//! error.rs         — error type, HTTP status mapping
//! cluster/
//!   kinds.rs       — supported kinds, aliases, scope
//!   kube_client.rs — ClusterClient over kube::Client
//! stream/
//!   outbox.rs      — bounded per-connection outbound queue
//!   input.rs       — message stream as AsyncRead (residual buffer)
//!   watch.rs       — list-then-watch session
//!   relay.rs       — watch session → client frames
//!   logs.rs        — log tailer
//!   exec.rs        — exec bridge
//! ws/
//!   mod.rs         — upgrade handlers, connection loop
//!   scope.rs       — per-connection cancellation scope
//! routes/
//!   health.rs      — /health, /api/health, /api/cluster-info
//!   cluster.rs     — /api/namespaces, /api/discovery
//!   resources.rs   — /api/resources/...
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kube_relay::cluster::kube_client::KubeCluster;
use kube_relay::cluster::ClusterClient;
use kube_relay::{AppState, Config};

#[derive(Parser)]
#[command(name = "kube-relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (defaults to `kube-relay.toml` in CWD).
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket server (default).
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve) | None => run_server(cli.config.as_deref()).await,
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("kube-relay v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    let cluster: Option<Arc<dyn ClusterClient>> = match KubeCluster::connect(&config.cluster).await
    {
        Ok(cluster) => {
            info!(
                context = cluster.context().map_or("<inferred>", |c| c.name.as_str()),
                "Cluster client ready"
            );
            Some(Arc::new(cluster))
        }
        Err(e) => {
            warn!("No cluster connection, resource and stream endpoints will return 412: {e}");
            None
        }
    };

    let state = AppState::new(config, cluster);

    let app = kube_relay::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    // Stop every open stream connection on the signal.
    let token = state.shutdown.clone();
    let shutdown = async move {
        shutdown.await;
        token.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Goodbye");
}
