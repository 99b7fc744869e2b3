//! [`ClusterClient`] backed by a real API server via kube-rs.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResourceList, Status};
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{
    Api, AttachParams, AttachedProcess, DeleteParams, DynamicObject, ListParams, LogParams,
    PostParams, TerminalSize, WatchParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use super::{
    ClusterClient, ContextInfo, DiscoveredResource, Listing, LogReader, ProcessInput,
    ProcessOutput, RemoteProcess, ResourceKind, Selectors, WatchStream,
};
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::stream::exec::ExecRequest;
use crate::stream::logs::LogRequest;

/// Live cluster connection built from the `[cluster]` config section.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    context: Option<ContextInfo>,
}

impl KubeCluster {
    /// Build a client from an explicit kubeconfig path and/or context, or from
    /// kube's standard inference when neither is configured.
    pub async fn connect(config: &ClusterConfig) -> Result<Self> {
        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..KubeConfigOptions::default()
        };

        let (kube_config, kubeconfig) = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::Kubeconfig(format!("{path}: {e}")))?;
                let kube_config = Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
                    .await
                    .map_err(|e| Error::Kubeconfig(format!("{path}: {e}")))?;
                (kube_config, Some(kubeconfig))
            }
            None if config.context.is_some() => {
                let kube_config = Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| Error::Kubeconfig(e.to_string()))?;
                (kube_config, Kubeconfig::read().ok())
            }
            None => {
                let kube_config = Config::infer()
                    .await
                    .map_err(|e| Error::Kubeconfig(e.to_string()))?;
                (kube_config, Kubeconfig::read().ok())
            }
        };

        info!(cluster_url = %kube_config.cluster_url, "Cluster client configured");
        let client = Client::try_from(kube_config)?;
        Ok(Self {
            client,
            context: kubeconfig.and_then(|k| context_info(&k, config.context.as_deref())),
        })
    }

    fn dynamic(&self, kind: &ResourceKind, namespace: &str) -> Api<DynamicObject> {
        match kind.effective_namespace(namespace) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &kind.resource),
            None => Api::all_with(self.client.clone(), &kind.resource),
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// The named context, or the current one, with its cluster and user.
fn context_info(kubeconfig: &Kubeconfig, name: Option<&str>) -> Option<ContextInfo> {
    let name = name.or(kubeconfig.current_context.as_deref())?;
    let named = kubeconfig.contexts.iter().find(|c| c.name == name)?;
    let context = named.context.as_ref();
    Some(ContextInfo {
        name: name.to_string(),
        cluster: context.map(|c| c.cluster.clone()).unwrap_or_default(),
        user: context.map(|c| c.user.clone()).unwrap_or_default(),
    })
}

/// Top-level resources of one group version; subresources (`pods/log`) are
/// skipped.
fn top_level(list: APIResourceList) -> impl Iterator<Item = DiscoveredResource> {
    let group_version = list.group_version;
    list.resources
        .into_iter()
        .filter(|r| !r.name.contains('/'))
        .map(move |r| DiscoveredResource {
            name: r.name,
            kind: r.kind,
            group_version: group_version.clone(),
            namespaced: r.namespaced,
            verbs: r.verbs,
            short_names: r.short_names.unwrap_or_default(),
        })
}

fn list_params(selectors: &Selectors) -> ListParams {
    let mut params = ListParams::default();
    if !selectors.label.is_empty() {
        params = params.labels(&selectors.label);
    }
    if !selectors.field.is_empty() {
        params = params.fields(&selectors.field);
    }
    params
}

fn watch_params(selectors: &Selectors) -> WatchParams {
    let mut params = WatchParams::default();
    if !selectors.label.is_empty() {
        params = params.labels(&selectors.label);
    }
    if !selectors.field.is_empty() {
        params = params.fields(&selectors.field);
    }
    params
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selectors: &Selectors,
    ) -> Result<Listing> {
        let list = self
            .dynamic(kind, namespace)
            .list(&list_params(selectors))
            .await?;
        Ok(Listing {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        selectors: &Selectors,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let stream = self
            .dynamic(kind, namespace)
            .watch(&watch_params(selectors), resource_version)
            .await?;
        Ok(stream.map_err(Error::from).boxed())
    }

    async fn get(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        Ok(self.dynamic(kind, namespace).get(name).await?)
    }

    async fn delete(&self, kind: &ResourceKind, namespace: &str, name: &str) -> Result<()> {
        self.dynamic(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn replace(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        Ok(self
            .dynamic(kind, namespace)
            .replace(name, &PostParams::default(), object)
            .await?)
    }

    async fn server_version(&self) -> Result<Info> {
        Ok(self.client.apiserver_version().await?)
    }

    async fn discover(&self) -> Result<Vec<DiscoveredResource>> {
        let mut resources = Vec::new();
        for version in self.client.list_core_api_versions().await?.versions {
            let list = self.client.list_core_api_resources(&version).await?;
            resources.extend(top_level(list));
        }
        for group in self.client.list_api_groups().await?.groups {
            let preferred = group
                .preferred_version
                .or_else(|| group.versions.into_iter().next());
            let Some(preferred) = preferred else {
                continue;
            };
            let list = self
                .client
                .list_api_group_resources(&preferred.group_version)
                .await?;
            resources.extend(top_level(list));
        }
        debug!(count = resources.len(), "Discovery complete");
        Ok(resources)
    }

    fn context(&self) -> Option<&ContextInfo> {
        self.context.as_ref()
    }

    async fn log_stream(&self, request: &LogRequest) -> Result<LogReader> {
        let params = LogParams {
            container: request.container.clone(),
            follow: request.follow,
            tail_lines: Some(i64::from(request.tail_lines)),
            ..LogParams::default()
        };
        let reader = self
            .pods(&request.namespace)
            .log_stream(&request.pod, &params)
            .await?;
        Ok(Box::pin(reader))
    }

    async fn exec(&self, request: &ExecRequest) -> Result<Box<dyn RemoteProcess>> {
        // kube rejects stderr alongside a TTY: the terminal carries both streams.
        let mut params = AttachParams::default()
            .stdin(true)
            .stdout(true)
            .stderr(!request.tty)
            .tty(request.tty);
        if let Some(container) = &request.container {
            params = params.container(container.clone());
        }

        let mut attached = self
            .pods(&request.namespace)
            .exec(&request.pod, request.command.clone(), &params)
            .await?;
        let resize = attached.terminal_size();
        Ok(Box::new(KubeProcess { attached, resize }))
    }
}

/// Remote exec session. Aborted on drop so no exit path leaks the connection.
struct KubeProcess {
    attached: AttachedProcess,
    resize: Option<futures::channel::mpsc::Sender<TerminalSize>>,
}

#[async_trait]
impl RemoteProcess for KubeProcess {
    fn take_stdin(&mut self) -> Option<ProcessInput> {
        self.attached
            .stdin()
            .map(|writer| Box::new(writer) as ProcessInput)
    }

    fn take_outputs(&mut self) -> Vec<ProcessOutput> {
        let mut outputs: Vec<ProcessOutput> = Vec::with_capacity(2);
        if let Some(stdout) = self.attached.stdout() {
            outputs.push(Box::new(stdout));
        }
        if let Some(stderr) = self.attached.stderr() {
            outputs.push(Box::new(stderr));
        }
        outputs
    }

    async fn resize(&mut self, width: u16, height: u16) {
        if let Some(tx) = self.resize.as_mut() {
            if tx.send(TerminalSize { width, height }).await.is_err() {
                debug!("Terminal size channel closed");
            }
        }
    }

    async fn finish(mut self: Box<Self>) -> Option<String> {
        let status = self.attached.take_status()?.await?;
        failure_message(&status)
    }
}

impl Drop for KubeProcess {
    fn drop(&mut self) {
        self.attached.abort();
    }
}

/// Extract the message of a `Failure` status; `Success` yields `None`.
fn failure_message(status: &Status) -> Option<String> {
    if status.status.as_deref() != Some("Failure") {
        return None;
    }
    Some(
        status
            .message
            .clone()
            .or_else(|| status.reason.clone())
            .unwrap_or_else(|| "command failed".to_string()),
    )
}
