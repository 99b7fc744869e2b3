//! Pass-through resource endpoints, one handler per verb for every kind in
//! the registry, plus the events that reference an object.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cluster::{Listing, ResourceKind, Scope, Selectors};
use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    pub namespace: Option<String>,
    #[serde(default)]
    pub label_selector: String,
    #[serde(default)]
    pub field_selector: String,
}

impl ResourceQuery {
    fn namespace<'a>(&'a self, state: &'a AppState) -> &'a str {
        self.namespace
            .as_deref()
            .unwrap_or(&state.config.streams.default_namespace)
    }
}

/// `GET /api/resources/{kind}` — list objects of a kind.
pub async fn list(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Value>> {
    let cluster = state.cluster()?;
    let kind = state.kinds.resolve(&kind)?;
    let selectors = Selectors {
        label: query.label_selector.clone(),
        field: query.field_selector.clone(),
    };
    let listing = cluster
        .list(kind, query.namespace(&state), &selectors)
        .await?;
    Ok(Json(list_body(kind, listing)))
}

fn list_body(kind: &ResourceKind, listing: Listing) -> Value {
    json!({
        "apiVersion": kind.resource.api_version,
        "kind": format!("{}List", kind.resource.kind),
        "metadata": { "resourceVersion": listing.resource_version },
        "items": listing.items,
    })
}

/// Field selector matching events whose `involvedObject` is the named object.
/// Cluster-scoped objects carry no namespace on their events.
fn involved_object_selector(kind: &ResourceKind, name: &str, namespace: &str) -> String {
    let mut selector = format!(
        "involvedObject.kind={},involvedObject.name={name}",
        kind.resource.kind
    );
    if kind.scope == Scope::Namespaced {
        selector.push_str(&format!(",involvedObject.namespace={namespace}"));
    }
    selector
}

/// `GET /api/resources/{kind}/{name}` — one object as JSON.
pub async fn get(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Value>> {
    let cluster = state.cluster()?;
    let kind = state.kinds.resolve(&kind)?;
    let object = cluster.get(kind, query.namespace(&state), &name).await?;
    Ok(Json(serde_json::to_value(object).map_err(|e| Error::Remote(e.to_string()))?))
}

/// `GET /api/resources/{kind}/{name}/yaml` — one object as YAML text.
pub async fn get_yaml(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> Result<impl IntoResponse> {
    let cluster = state.cluster()?;
    let kind = state.kinds.resolve(&kind)?;
    let object = cluster.get(kind, query.namespace(&state), &name).await?;
    let yaml = serde_yaml::to_string(&object).map_err(|e| Error::Remote(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml))
}

/// `PUT /api/resources/{kind}/{name}/yaml` — replace an object with the YAML
/// document in the body. Returns the stored object as JSON.
pub async fn put_yaml(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
    body: String,
) -> Result<Json<DynamicObject>> {
    let cluster = state.cluster()?;
    let kind = state.kinds.resolve(&kind)?;
    let mut object: DynamicObject =
        serde_yaml::from_str(&body).map_err(|e| Error::InvalidBody(e.to_string()))?;

    if let Some(types) = &object.types {
        if types.kind != kind.resource.kind {
            return Err(Error::InvalidBody(format!(
                "kind {} does not match {}",
                types.kind, kind.resource.kind
            )));
        }
    }
    match object.metadata.name.as_deref() {
        Some(n) if n != name => {
            return Err(Error::InvalidBody(format!(
                "metadata.name {n} does not match {name}"
            )));
        }
        Some(_) => {}
        None => object.metadata.name = Some(name.clone()),
    }

    let stored = cluster
        .replace(kind, query.namespace(&state), &name, &object)
        .await?;
    tracing::info!(kind = kind.name, name = %name, "Resource replaced");
    Ok(Json(stored))
}

/// `GET /api/resources/{kind}/{name}/events` — events whose involved object
/// is the named resource.
pub async fn events(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Value>> {
    let cluster = state.cluster()?;
    let kind = state.kinds.resolve(&kind)?;
    let events = state.kinds.resolve("events")?;

    let (namespace, field) = match kind.scope {
        Scope::Namespaced => {
            let namespace = query.namespace(&state);
            (namespace, involved_object_selector(kind, &name, namespace))
        }
        Scope::Cluster => ("", involved_object_selector(kind, &name, "")),
    };
    let selectors = Selectors {
        label: String::new(),
        field,
    };
    let listing = cluster.list(events, namespace, &selectors).await?;
    Ok(Json(list_body(events, listing)))
}

/// `DELETE /api/resources/{kind}/{name}`.
pub async fn delete(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ResourceQuery>,
) -> Result<Json<Value>> {
    let cluster = state.cluster()?;
    let kind = state.kinds.resolve(&kind)?;
    cluster.delete(kind, query.namespace(&state), &name).await?;
    tracing::info!(kind = kind.name, name = %name, "Resource deleted");
    Ok(Json(json!({ "status": "deleted" })))
}
