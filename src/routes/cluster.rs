//! Cluster-wide lookups: namespace names and API discovery.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::cluster::Selectors;
use crate::error::{Error, Result};
use crate::AppState;

/// `GET /api/namespaces` — `{"namespaces": [name, ...]}` in listing order.
pub async fn namespaces(State(state): State<AppState>) -> Result<Json<Value>> {
    let cluster = state.cluster()?;
    let kind = state.kinds.resolve("namespaces")?;
    let listing = cluster.list(kind, "", &Selectors::default()).await?;
    let names: Vec<String> = listing
        .items
        .into_iter()
        .filter_map(|ns| ns.metadata.name)
        .collect();
    Ok(Json(json!({ "namespaces": names })))
}

/// `GET /api/discovery` — every top-level resource type the API server
/// offers, flagged with whether the relay can list and stream it.
pub async fn discovery(State(state): State<AppState>) -> Result<Json<Value>> {
    let cluster = state.cluster()?;
    let resources = cluster.discover().await?;
    let items = resources
        .into_iter()
        .map(|resource| {
            let supported = state.kinds.resolve(&resource.name).is_ok();
            let mut item = serde_json::to_value(resource)?;
            item["supported"] = Value::Bool(supported);
            Ok(item)
        })
        .collect::<serde_json::Result<Vec<Value>>>()
        .map_err(|e| Error::Remote(e.to_string()))?;
    Ok(Json(json!({ "resources": items })))
}
