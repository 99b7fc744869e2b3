//! Error type shared by the stream modes and the REST surface.
//!
//! Variants follow the failure taxonomy of the relay: precondition errors are
//! raised before any remote call, everything else wraps a cluster-side failure.
//! Nothing here is fatal to the process; every error is scoped to one request
//! or one connection.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required request parameter was missing or empty.
    #[error("{0} is required")]
    MissingParameter(&'static str),

    /// A request body could not be used as submitted.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The requested kind has no registry entry.
    #[error("unsupported resource type: {0}")]
    UnsupportedKind(String),

    /// No cluster client could be built at startup.
    #[error("kubeconfig not loaded")]
    NotConnected,

    /// Building the cluster client from the kubeconfig failed.
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// Remote failure reported outside of a `kube::Error` (watch error events,
    /// exec status, test doubles).
    #[error("{0}")]
    Remote(String),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) | Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedKind(_) => StatusCode::NOT_FOUND,
            Self::NotConnected => StatusCode::PRECONDITION_FAILED,
            Self::Kube(kube::Error::Api(resp)) => {
                StatusCode::from_u16(resp.code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Kubeconfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Kube(_) | Self::Remote(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
