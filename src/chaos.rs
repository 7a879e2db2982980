//! Chaos experiments bound to the environment namespace
//!
//! An experiment is any namespaced custom resource (Chaos Mesh kinds in
//! practice) described by a YAML manifest. Running it server-side applies the
//! manifest into the environment namespace; stopping it deletes the object.

use std::path::Path;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

const FIELD_MANAGER: &str = "helmenv";

/// Identifies a running experiment so it can be stopped later
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentInfo {
    /// Object name
    pub name: String,
    /// apiVersion of the experiment kind
    pub api_version: String,
    /// Experiment kind
    pub kind: String,
    /// Template the experiment was rendered from, empty for inline manifests
    pub template_path: String,
}

/// Runs and stops chaos experiments in one namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChaosController: Send + Sync {
    /// Apply an experiment manifest
    async fn run(&self, manifest: &str) -> Result<ExperimentInfo>;

    /// Apply the experiment manifest stored at `path`
    async fn run_template(&self, path: &Path) -> Result<ExperimentInfo>;

    /// Delete a running experiment
    async fn stop(&self, info: &ExperimentInfo) -> Result<()>;
}

/// [`ChaosController`] using dynamic kube objects
pub struct KubeChaosController {
    client: Client,
    namespace: String,
}

impl KubeChaosController {
    /// Create a controller for `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self, info: &ExperimentInfo) -> Api<DynamicObject> {
        let (group, version) = parse_api_version(&info.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &info.kind);
        Api::namespaced_with(
            self.client.clone(),
            &self.namespace,
            &ApiResource::from_gvk(&gvk),
        )
    }
}

#[async_trait]
impl ChaosController for KubeChaosController {
    async fn run(&self, manifest: &str) -> Result<ExperimentInfo> {
        let (mut obj, info) = parse_experiment(manifest)?;
        if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.insert(
                "namespace".to_string(),
                serde_json::Value::String(self.namespace.clone()),
            );
        }

        self.api(&info)
            .patch(
                &info.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await
            .map_err(|e| {
                Error::chaos(format!("failed to apply {}/{}: {}", info.kind, info.name, e))
            })?;

        info!(
            kind = %info.kind,
            name = %info.name,
            namespace = %self.namespace,
            "Applied chaos experiment"
        );
        Ok(info)
    }

    async fn run_template(&self, path: &Path) -> Result<ExperimentInfo> {
        let manifest = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::chaos(format!("failed to read template {}: {}", path.display(), e))
        })?;
        let mut info = self.run(&manifest).await?;
        info.template_path = path.to_string_lossy().into_owned();
        Ok(info)
    }

    async fn stop(&self, info: &ExperimentInfo) -> Result<()> {
        self.api(info)
            .delete(&info.name, &DeleteParams::default())
            .await
            .map_err(|e| {
                Error::chaos(format!("failed to delete {}/{}: {}", info.kind, info.name, e))
            })?;
        debug!(kind = %info.kind, name = %info.name, "Stopped chaos experiment");
        Ok(())
    }
}

/// Split `group/version`; core resources have no group
fn parse_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Parse a manifest and pull out what is needed to find the object again
fn parse_experiment(manifest: &str) -> Result<(serde_json::Value, ExperimentInfo)> {
    let obj: serde_json::Value = serde_yaml::from_str(manifest)
        .map_err(|e| Error::chaos(format!("invalid experiment manifest: {}", e)))?;

    let field = |pointer: &str| {
        obj.pointer(pointer)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::chaos(format!("experiment manifest is missing {}", pointer)))
    };
    let info = ExperimentInfo {
        name: field("/metadata/name")?,
        api_version: field("/apiVersion")?,
        kind: field("/kind")?,
        template_path: String::new(),
    };
    Ok((obj, info))
}
