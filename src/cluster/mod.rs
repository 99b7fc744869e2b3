//! Cluster access seam.
//!
//! Every remote operation the relay performs goes through [`ClusterClient`].
//! [`kube_client::KubeCluster`] implements it against a real API server; tests plug in
//! a double that counts calls and hands out scripted streams.

pub mod kinds;
pub mod kube_client;

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{DynamicObject, WatchEvent};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::stream::exec::ExecRequest;
use crate::stream::logs::LogRequest;
pub use kinds::{KindRegistry, ResourceKind, Scope};

/// Label and field selectors applied to list and watch calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub label: String,
    pub field: String,
}

/// Result of an initial list: the items plus the collection version a watch
/// resumes from.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub resource_version: String,
    pub items: Vec<DynamicObject>,
}

/// The kubeconfig context a client was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextInfo {
    pub name: String,
    pub cluster: String,
    pub user: String,
}

/// One top-level resource type served by the API server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredResource {
    pub name: String,
    pub kind: String,
    pub group_version: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
    pub short_names: Vec<String>,
}

/// Open-ended stream of raw watch notifications. Dropping it closes the
/// underlying watch connection.
pub type WatchStream = BoxStream<'static, Result<WatchEvent<DynamicObject>>>;

/// Raw byte stream of a container's log. Dropping it closes the connection.
pub type LogReader = Pin<Box<dyn futures::io::AsyncRead + Send>>;

/// Output half of a remote process: stdout, plus stderr when not in TTY mode.
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Input half of a remote process.
pub type ProcessInput = Box<dyn AsyncWrite + Send + Unpin>;

/// A running remote command. Dropping it releases the remote session.
#[async_trait]
pub trait RemoteProcess: Send {
    /// Take the stdin writer. Returns `None` on the second call.
    fn take_stdin(&mut self) -> Option<ProcessInput>;

    /// Take every output stream. In TTY mode this is a single combined stream.
    fn take_outputs(&mut self) -> Vec<ProcessOutput>;

    /// Request a terminal size change (TTY sessions only).
    async fn resize(&mut self, width: u16, height: u16);

    /// Wait for the process's final status. Returns the failure message when
    /// the remote side reports one.
    async fn finish(self: Box<Self>) -> Option<String>;
}

/// Connected, already-authenticated cluster API client.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selectors: &Selectors,
    ) -> Result<Listing>;

    /// Open a watch starting after `resource_version`.
    async fn watch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selectors: &Selectors,
        resource_version: &str,
    ) -> Result<WatchStream>;

    async fn get(&self, kind: &ResourceKind, namespace: &str, name: &str)
        -> Result<DynamicObject>;

    async fn delete(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<()>;

    /// Replace `name` with `object`, returning the stored version.
    async fn replace(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    async fn server_version(&self) -> Result<Info>;

    /// Preferred version of every top-level resource the server offers.
    async fn discover(&self) -> Result<Vec<DiscoveredResource>>;

    /// Kubeconfig context in use, if known.
    fn context(&self) -> Option<&ContextInfo>;

    async fn log_stream(&self, request: &LogRequest) -> Result<LogReader>;

    async fn exec(&self, request: &ExecRequest) -> Result<Box<dyn RemoteProcess>>;
}
