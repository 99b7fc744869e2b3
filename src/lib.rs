#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! kube-relay library — the HTTP/WebSocket bridge between browser clients
//! and a Kubernetes API server.
//!
//! - `cluster` — kind registry and the [`cluster::ClusterClient`] seam over kube
//! - `stream` — watch relay, log tailer and exec bridge, transport-agnostic
//! - `ws` — WebSocket upgrade handlers and the per-connection loop
//! - `routes` — REST handlers (health, cluster info, namespaces, discovery, resources)
//! - `config` — configuration loading
//! - `error` — crate error type and its HTTP mapping

pub mod cluster;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod stream;
pub mod ws;

#[cfg(test)]
pub mod testing;

use axum::{routing::get, Router};

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;

/// Build the application router. Layers (tracing, CORS) are added by the
/// binary so tests can drive the bare router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::liveness))
        .route("/api/health", get(routes::health::health))
        .route("/api/cluster-info", get(routes::health::cluster_info))
        .route("/api/namespaces", get(routes::cluster::namespaces))
        .route("/api/discovery", get(routes::cluster::discovery))
        .route("/api/resources/{kind}", get(routes::resources::list))
        .route(
            "/api/resources/{kind}/{name}",
            get(routes::resources::get).delete(routes::resources::delete),
        )
        .route(
            "/api/resources/{kind}/{name}/yaml",
            get(routes::resources::get_yaml).put(routes::resources::put_yaml),
        )
        .route(
            "/api/resources/{kind}/{name}/events",
            get(routes::resources::events),
        )
        .route("/ws/resources", get(ws::watch_upgrade))
        .route("/ws/logs", get(ws::logs_upgrade))
        .route("/ws/exec", get(ws::exec_upgrade))
        .with_state(state)
}
