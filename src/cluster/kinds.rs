//! Resource kind registry.
//!
//! Maps a kind identifier (`pods`, `deploy`, `pvc`, ...) to the API coordinates
//! needed to list, watch, get and delete objects of that kind through the
//! dynamic client. The table is built once at startup and shared read-only;
//! supporting a new kind means adding one entry to [`KindRegistry::builtin`].

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
    Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::discovery::ApiResource;

use crate::error::{Error, Result};

/// Whether objects of a kind live inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Capability record for one kind: everything the dynamic client needs.
#[derive(Debug, Clone)]
pub struct ResourceKind {
    /// Canonical (plural) name, e.g. `persistentvolumeclaims`.
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub resource: ApiResource,
    pub scope: Scope,
}

impl ResourceKind {
    fn of<K>(name: &'static str, aliases: &'static [&'static str], scope: Scope) -> Self
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Self {
            name,
            aliases,
            resource: ApiResource::erase::<K>(&()),
            scope,
        }
    }

    /// Namespace to address for this kind: `None` means all namespaces (or a
    /// cluster-scoped kind, for which the requested namespace is ignored).
    pub fn effective_namespace<'a>(&self, namespace: &'a str) -> Option<&'a str> {
        match self.scope {
            Scope::Namespaced if !namespace.is_empty() => Some(namespace),
            _ => None,
        }
    }
}

/// Lookup table from identifier to [`ResourceKind`].
#[derive(Debug)]
pub struct KindRegistry {
    kinds: Vec<ResourceKind>,
    index: HashMap<String, usize>,
}

impl KindRegistry {
    /// Build a registry from explicit entries. Later entries never shadow
    /// earlier ones; the first claim on an identifier wins.
    pub fn new(kinds: Vec<ResourceKind>) -> Self {
        let mut index = HashMap::new();
        for (i, kind) in kinds.iter().enumerate() {
            for id in std::iter::once(&kind.name).chain(kind.aliases) {
                index.entry(id.to_ascii_lowercase()).or_insert(i);
            }
        }
        Self { kinds, index }
    }

    /// The kinds served by the relay.
    pub fn builtin() -> Self {
        use Scope::{Cluster, Namespaced};
        Self::new(vec![
            ResourceKind::of::<Pod>("pods", &["pod", "po"], Namespaced),
            ResourceKind::of::<Deployment>("deployments", &["deployment", "deploy"], Namespaced),
            ResourceKind::of::<Service>("services", &["service", "svc"], Namespaced),
            ResourceKind::of::<StatefulSet>("statefulsets", &["statefulset", "sts"], Namespaced),
            ResourceKind::of::<Namespace>("namespaces", &["namespace", "ns"], Cluster),
            ResourceKind::of::<Node>("nodes", &["node", "no"], Cluster),
            ResourceKind::of::<ConfigMap>("configmaps", &["configmap", "cm"], Namespaced),
            ResourceKind::of::<Secret>("secrets", &["secret", "sec"], Namespaced),
            ResourceKind::of::<Ingress>("ingresses", &["ingress", "ing"], Namespaced),
            ResourceKind::of::<PersistentVolume>(
                "persistentvolumes",
                &["persistentvolume", "pv"],
                Cluster,
            ),
            ResourceKind::of::<PersistentVolumeClaim>(
                "persistentvolumeclaims",
                &["persistentvolumeclaim", "pvc"],
                Namespaced,
            ),
            ResourceKind::of::<DaemonSet>("daemonsets", &["daemonset", "ds"], Namespaced),
            ResourceKind::of::<ReplicaSet>("replicasets", &["replicaset", "rs"], Namespaced),
            ResourceKind::of::<Job>("jobs", &["job"], Namespaced),
            ResourceKind::of::<CronJob>("cronjobs", &["cronjob", "cj"], Namespaced),
            ResourceKind::of::<Event>("events", &["event", "ev"], Namespaced),
        ])
    }

    /// Resolve an identifier (canonical name or alias, case-insensitive).
    pub fn resolve(&self, id: &str) -> Result<&ResourceKind> {
        self.index
            .get(&id.trim().to_ascii_lowercase())
            .map(|&i| &self.kinds[i])
            .ok_or_else(|| Error::UnsupportedKind(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_canonical_and_aliases() {
        let registry = KindRegistry::builtin();
        for (id, canonical) in [
            ("pods", "pods"),
            ("po", "pods"),
            ("deploy", "deployments"),
            ("svc", "services"),
            ("sts", "statefulsets"),
            ("ns", "namespaces"),
            ("no", "nodes"),
            ("cm", "configmaps"),
            ("sec", "secrets"),
            ("ing", "ingresses"),
            ("pv", "persistentvolumes"),
            ("pvc", "persistentvolumeclaims"),
        ] {
            assert_eq!(registry.resolve(id).unwrap().name, canonical, "{id}");
        }
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = KindRegistry::builtin();
        assert_eq!(registry.resolve("Pods").unwrap().name, "pods");
        assert_eq!(registry.resolve(" PVC ").unwrap().name, "persistentvolumeclaims");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let registry = KindRegistry::builtin();
        let err = registry.resolve("widgets").unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind(ref k) if k == "widgets"));
    }

    #[test]
    fn test_api_coordinates() {
        let registry = KindRegistry::builtin();
        let deploy = registry.resolve("deployments").unwrap();
        assert_eq!(deploy.resource.group, "apps");
        assert_eq!(deploy.resource.version, "v1");
        assert_eq!(deploy.resource.kind, "Deployment");
        assert_eq!(deploy.resource.plural, "deployments");

        let ing = registry.resolve("ingresses").unwrap();
        assert_eq!(ing.resource.api_version, "networking.k8s.io/v1");
    }

    #[test]
    fn test_effective_namespace() {
        let registry = KindRegistry::builtin();
        let pods = registry.resolve("pods").unwrap();
        assert_eq!(pods.effective_namespace("kube-system"), Some("kube-system"));
        assert_eq!(pods.effective_namespace(""), None);

        let nodes = registry.resolve("nodes").unwrap();
        assert_eq!(nodes.effective_namespace("default"), None);
    }

    #[test]
    fn test_first_claim_on_identifier_wins() {
        let registry = KindRegistry::new(vec![
            ResourceKind::of::<Pod>("pods", &["p"], Scope::Namespaced),
            ResourceKind::of::<PersistentVolume>("persistentvolumes", &["p"], Scope::Cluster),
        ]);
        assert_eq!(registry.resolve("p").unwrap().name, "pods");
        let pv = registry.resolve("persistentvolumes").unwrap();
        assert_eq!(pv.name, "persistentvolumes");
    }
}
