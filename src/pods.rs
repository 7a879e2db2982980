//! Pod discovery and instance labeling
//!
//! Turns raw pod listings into stable logical identities. Every pod carrying
//! an `app` label gets a sequential `instance` label per app value, and every
//! container of a release's pods is indexed by the instance key
//! `"<app>:<instance>"`.
//!
//! Instance numbers follow the order the API server lists pods in, which is
//! not stable across runs: callers must not assume a given pod keeps its
//! number after a re-deploy.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::chart::ConnectionInfo;
use crate::{Error, Result};

/// Label carrying the logical application name
pub const APP_LABEL: &str = "app";
/// Label carrying the per-app instance number
pub const INSTANCE_LABEL: &str = "instance";
/// Label helm charts put on every pod of a release
pub const RELEASE_LABEL: &str = "release";

/// Pod listing and labeling against the API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodDirectory: Send + Sync {
    /// List pods in `namespace` matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    /// Apply a JSON patch to a pod
    async fn patch_pod(&self, namespace: &str, pod: &str, patch: &json_patch::Patch)
        -> Result<()>;
}

/// [`PodDirectory`] backed by the Kubernetes API
pub struct KubePodDirectory {
    client: Client,
}

impl KubePodDirectory {
    /// Create a new directory wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodDirectory for KubePodDirectory {
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::discovery(selector, format!("failed to list pods: {}", e)))?;
        Ok(pods.items)
    }

    async fn patch_pod(
        &self,
        namespace: &str,
        pod: &str,
        patch: &json_patch::Patch,
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.patch(pod, &PatchParams::default(), &Patch::<()>::Json(patch.clone()))
            .await?;
        Ok(())
    }
}

/// Logical identity of a pod derived from its `app` and `instance` labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstanceIdentity {
    /// Both labels are present
    Resolved {
        /// Value of the `app` label
        app: String,
        /// Value of the `instance` label
        instance: String,
    },
    /// At least one label is missing; missing parts key as empty strings
    Incomplete {
        /// Value of the `app` label, if any
        app: Option<String>,
        /// Value of the `instance` label, if any
        instance: Option<String>,
    },
}

impl InstanceIdentity {
    /// Resolve the identity of a pod from its labels
    pub fn from_labels(labels: Option<&BTreeMap<String, String>>) -> Self {
        let app = labels.and_then(|l| l.get(APP_LABEL)).cloned();
        let instance = labels.and_then(|l| l.get(INSTANCE_LABEL)).cloned();
        match (app, instance) {
            (Some(app), Some(instance)) => Self::Resolved { app, instance },
            (app, instance) => Self::Incomplete { app, instance },
        }
    }

    /// The instance key `"<app>:<instance>"`
    pub fn key(&self) -> String {
        match self {
            Self::Resolved { app, instance } => format!("{}:{}", app, instance),
            Self::Incomplete { app, instance } => format!(
                "{}:{}",
                app.as_deref().unwrap_or_default(),
                instance.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// Build the single-operation JSON patch setting the `instance` label
pub fn instance_label_patch(instance: usize) -> Result<json_patch::Patch> {
    let ops = serde_json::json!([{
        "op": "add",
        "path": format!("/metadata/labels/{}", INSTANCE_LABEL),
        "value": instance.to_string(),
    }]);
    serde_json::from_value(ops).map_err(|e| Error::serialization(e.to_string()))
}

/// List pods matching `selector` and return the distinct `app` label values
/// in first-seen order.
pub async fn unique_app_labels(
    directory: &dyn PodDirectory,
    namespace: &str,
    selector: &str,
) -> Result<Vec<String>> {
    let pods = directory.list_pods(namespace, selector).await.map_err(|e| {
        Error::discovery(
            selector,
            format!("no labels with selector {} found for enumeration: {}", selector, e),
        )
    })?;

    let mut seen = HashSet::new();
    let mut apps = Vec::new();
    for pod in &pods {
        let app = pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(APP_LABEL))
            .cloned()
            .unwrap_or_default();
        if seen.insert(app.clone()) {
            apps.push(app);
        }
    }
    info!(apps = ?apps, "Apps found");
    Ok(apps)
}

/// Label every pod with `app=<app>` with a sequential `instance` label in
/// list order.
pub async fn add_instance_labels(
    directory: &dyn PodDirectory,
    namespace: &str,
    app: &str,
) -> Result<()> {
    let selector = format!("{}={}", APP_LABEL, app);
    let pods = directory.list_pods(namespace, &selector).await?;
    for (i, pod) in pods.iter().enumerate() {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let patch = instance_label_patch(i)?;
        directory
            .patch_pod(namespace, &name, &patch)
            .await
            .map_err(|e| {
                let rendered = serde_json::to_string(&patch).unwrap_or_default();
                Error::discovery(
                    name.as_str(),
                    format!("failed to update labels {} for pod {}: {}", rendered, name, e),
                )
            })?;
        debug!(pod = %name, app, instance = i, "Labeled pod");
    }
    Ok(())
}

/// Label instances of every app found in the namespace
pub async fn enumerate_apps(directory: &dyn PodDirectory, namespace: &str) -> Result<()> {
    let apps = unique_app_labels(directory, namespace, APP_LABEL).await?;
    for app in &apps {
        add_instance_labels(directory, namespace, app).await?;
    }
    Ok(())
}

/// List the pods belonging to a release
pub async fn fetch_pods(
    directory: &dyn PodDirectory,
    namespace: &str,
    release: &str,
) -> Result<Vec<Pod>> {
    directory
        .list_pods(namespace, &format!("{}={}", RELEASE_LABEL, release))
        .await
}

/// Index every container of `pods` by instance key into `pods_info`.
///
/// A key that is already present means two containers resolved to the same
/// identity, which is a fatal inconsistency.
pub fn collect_connection_infos(
    pods: &[Pod],
    pods_info: &mut BTreeMap<String, ConnectionInfo>,
) -> Result<()> {
    for pod in pods {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let identity = InstanceIdentity::from_labels(pod.metadata.labels.as_ref());
        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or(&[]);

        for container in containers {
            if let InstanceIdentity::Incomplete { app, instance } = &identity {
                if app.is_none() {
                    warn!(pod = %pod_name, container = %container.name, "App label not found");
                }
                if instance.is_none() {
                    warn!(pod = %pod_name, container = %container.name, "Instance label not found");
                }
            }
            let ports = container_ports(&pod_name, container)?;
            info!(container = %container.name, ports = ?ports, "Container info");

            let key = identity.key();
            if pods_info.contains_key(&key) {
                return Err(Error::AmbiguousInstanceKey { key });
            }
            pods_info.insert(
                key,
                ConnectionInfo {
                    pod_name: pod_name.clone(),
                    pod_ip: pod
                        .status
                        .as_ref()
                        .and_then(|s| s.pod_ip.clone())
                        .unwrap_or_default(),
                    ports,
                    ..Default::default()
                },
            );
        }
    }
    Ok(())
}

/// Map port name to container port for one container.
///
/// Unnamed ports are kept under the empty name; connect rejects them.
fn container_ports(
    pod_name: &str,
    container: &k8s_openapi::api::core::v1::Container,
) -> Result<BTreeMap<String, u16>> {
    let mut ports = BTreeMap::new();
    for port in container.ports.iter().flatten() {
        let number = u16::try_from(port.container_port).map_err(|_| {
            Error::discovery(
                pod_name,
                format!("container port {} is out of range", port.container_port),
            )
        })?;
        ports.insert(port.name.clone().unwrap_or_default(), number);
    }
    Ok(ports)
}
