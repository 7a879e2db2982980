//! Pod log collection for test artifacts

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::{Error, Result};

/// Stores artifacts of one environment
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write the logs of every container in the namespace, returning the
    /// files written
    async fn collect_pod_logs(&self) -> Result<Vec<PathBuf>>;
}

/// [`ArtifactStore`] writing `<dir>/<namespace>/<pod>_<container>.log`
pub struct Artifacts {
    client: Client,
    namespace: String,
    dir: PathBuf,
}

impl Artifacts {
    /// Create a store for `namespace` rooted at `dir`
    pub fn new(client: Client, namespace: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            dir: dir.into(),
        }
    }

    /// Directory the logs of this namespace land in
    pub fn namespace_dir(&self) -> PathBuf {
        self.dir.join(&self.namespace)
    }
}

#[async_trait]
impl ArtifactStore for Artifacts {
    async fn collect_pod_logs(&self) -> Result<Vec<PathBuf>> {
        let out = self.namespace_dir();
        tokio::fs::create_dir_all(&out).await.map_err(|e| {
            Error::persistence(&out, format!("failed to create artifacts dir: {}", e))
        })?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = pods.list(&ListParams::default()).await?;

        let mut written = Vec::new();
        for pod in list.items {
            let Some(pod_name) = pod.metadata.name.clone() else {
                continue;
            };
            for container in container_names(&pod) {
                let params = LogParams {
                    container: Some(container.clone()),
                    ..Default::default()
                };
                let logs = match pods.logs(&pod_name, &params).await {
                    Ok(logs) => logs,
                    Err(e) => {
                        warn!(pod = %pod_name, container = %container, error = %e, "Failed to fetch logs");
                        continue;
                    }
                };
                let path = log_path(&out, &pod_name, &container);
                tokio::fs::write(&path, logs).await.map_err(|e| {
                    Error::persistence(&path, format!("failed to write logs: {}", e))
                })?;
                written.push(path);
            }
        }

        info!(namespace = %self.namespace, files = written.len(), "Collected pod logs");
        Ok(written)
    }
}

fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default()
}

fn log_path(dir: &Path, pod: &str, container: &str) -> PathBuf {
    dir.join(format!("{}_{}.log", pod, container))
}
