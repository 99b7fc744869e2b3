//! Health and cluster-info endpoints.

use std::sync::atomic::Ordering;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::Result;
use crate::AppState;

/// `GET /health` — plain-text liveness check.
pub async fn liveness() -> &'static str {
    "OK"
}

/// `GET /api/health` — status, uptime, version, cluster connectivity and
/// the number of open stream connections. Never touches the cluster.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let context = state
        .cluster
        .as_ref()
        .and_then(|c| c.context().map(|ctx| ctx.name.clone()));

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "cluster": {
            "connected": state.cluster.is_some(),
            "context": context,
        },
        "active_streams": state.active_streams.load(Ordering::Relaxed),
    }))
}

/// `GET /api/cluster-info` — API server version plus the context, cluster and
/// user names from the kubeconfig. The names are empty for an inferred config.
pub async fn cluster_info(State(state): State<AppState>) -> Result<Json<Value>> {
    let cluster = state.cluster()?;
    let version = cluster.server_version().await?;
    let context = cluster.context().cloned().unwrap_or_default();
    Ok(Json(json!({
        "context": context.name,
        "version": version.git_version,
        "cluster": context.cluster,
        "user": context.user,
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::cluster::ClusterClient;
    use crate::config::Config;
    use crate::testing::FakeCluster;
    use crate::AppState;

    async fn get(state: AppState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = crate::router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_liveness() {
        let (status, body) = get(AppState::new(Config::default(), None), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_health_reports_disconnected_cluster() {
        let (status, body) = get(AppState::new(Config::default(), None), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["cluster"]["connected"], false);
        assert_eq!(value["active_streams"], 0);
    }

    #[tokio::test]
    async fn test_cluster_info() {
        let client: Arc<dyn ClusterClient> = Arc::new(FakeCluster::new());
        let state = AppState::new(Config::default(), Some(client));
        let (status, body) = get(state, "/api/cluster-info").await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["version"], "v1.28.3");
        assert_eq!(value["context"], "fake");
        assert_eq!(value["cluster"], "fake-cluster");
        assert_eq!(value["user"], "fake-admin");
    }

    #[tokio::test]
    async fn test_health_names_context() {
        let client: Arc<dyn ClusterClient> = Arc::new(FakeCluster::new());
        let state = AppState::new(Config::default(), Some(client));
        let (_, body) = get(state, "/api/health").await;
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["cluster"]["connected"], true);
        assert_eq!(value["cluster"]["context"], "fake");
    }

    #[tokio::test]
    async fn test_cluster_info_without_kubeconfig() {
        let (status, body) = get(AppState::new(Config::default(), None), "/api/cluster-info").await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "kubeconfig not loaded");
    }
}
