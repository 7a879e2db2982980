//! Chart units: one helm release inside an environment
//!
//! [`ChartSettings`] is the persisted side of a release (what to install and
//! what was discovered). [`Chart`] is the live side: it drives the release
//! through deploy, connect and disconnect and owns the forwarding sessions
//! that cannot be persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::forward::{allocate_local_port, ForwardHandle, ForwardRule, PortForwarder};
use crate::helm::ChartInstaller;
use crate::pods::{self, PodDirectory};
use crate::{Error, Result};

/// Connection details of one discovered pod instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionInfo {
    /// Pod name
    pub pod_name: String,
    /// Pid of the forwarder process; 0 when there is none
    pub forwarder_pid: u32,
    /// Pod IP inside the cluster
    pub pod_ip: String,
    /// Port name to container port
    pub ports: BTreeMap<String, u16>,
    /// Port name to local port, only populated while connected
    pub local_ports: BTreeMap<String, u16>,
}

/// Persisted settings of a chart
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartSettings {
    /// Helm release name, unique within the environment
    pub release_name: String,
    /// Chart source: local path, packaged archive or repo reference
    pub path: String,
    /// Override values coalesced over the chart's defaults
    pub values: serde_yaml::Value,
    /// Connection info keyed by instance key `"<app>:<instance>"`
    pub pods_info: BTreeMap<String, ConnectionInfo>,
}

impl ChartSettings {
    /// Settings for a release without overrides
    pub fn new(release_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set override values
    pub fn with_values(mut self, values: serde_yaml::Value) -> Self {
        self.values = values;
        self
    }
}

/// Collaborators a chart needs for one operation
#[derive(Clone, Copy)]
pub struct ChartContext<'a> {
    /// Namespace of the environment
    pub namespace: &'a str,
    /// Helm installer
    pub installer: &'a dyn ChartInstaller,
    /// Pod listing and labeling
    pub pods: &'a dyn PodDirectory,
    /// Forwarding strategy of the environment
    pub forwarder: &'a dyn PortForwarder,
}

/// Live state of one release
#[derive(Debug, Default)]
pub struct Chart {
    release: String,
    sessions: BTreeMap<String, ForwardHandle>,
}

impl Chart {
    /// Create the live side of a release
    pub fn new(release: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            sessions: BTreeMap::new(),
        }
    }

    /// Release name
    pub fn release(&self) -> &str {
        &self.release
    }

    /// Number of forwarding sessions started by this process
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Install the release, label its pods and record their connection info
    pub async fn deploy(&self, settings: &mut ChartSettings, ctx: ChartContext<'_>) -> Result<()> {
        ctx.installer.install(ctx.namespace, settings).await?;
        pods::enumerate_apps(ctx.pods, ctx.namespace).await?;
        let release_pods = pods::fetch_pods(ctx.pods, ctx.namespace, &self.release).await?;
        pods::collect_connection_infos(&release_pods, &mut settings.pods_info)?;
        info!(
            release = %self.release,
            instances = settings.pods_info.len(),
            "Chart deployed"
        );
        Ok(())
    }

    /// Forward every declared port of every instance to a random local port.
    ///
    /// A session still open for an instance is stopped before the instance
    /// is forwarded again.
    pub async fn connect(
        &mut self,
        settings: &mut ChartSettings,
        ctx: ChartContext<'_>,
    ) -> Result<()> {
        check_port_names(settings)?;

        for (key, info) in settings.pods_info.iter_mut() {
            let previous = self
                .sessions
                .remove(key)
                .or_else(|| ForwardHandle::from_pid(info.forwarder_pid));
            if let Some(previous) = previous {
                debug!(release = %self.release, instance = %key, "Stopping previous session");
                ctx.forwarder.stop(previous).await?;
                info.forwarder_pid = 0;
            }
            info.local_ports.clear();
            let mut rules = Vec::with_capacity(info.ports.len());
            for (name, container_port) in &info.ports {
                let local = allocate_local_port();
                info.local_ports.insert(name.clone(), local);
                rules.push(ForwardRule::new(local, *container_port));
            }
            if rules.is_empty() {
                continue;
            }

            let handle = ctx
                .forwarder
                .start(ctx.namespace, &info.pod_name, &rules)
                .await?;
            info.forwarder_pid = handle.pid();
            debug!(release = %self.release, instance = %key, pid = info.forwarder_pid, "Connected");
            self.sessions.insert(key.clone(), handle);
        }
        Ok(())
    }

    /// Stop every forwarding session and return all instances to the
    /// unconnected state
    pub async fn disconnect(
        &mut self,
        settings: &mut ChartSettings,
        ctx: ChartContext<'_>,
    ) -> Result<()> {
        info!(release = %self.release, "Disconnecting");
        for (key, info) in &settings.pods_info {
            let handle = self
                .sessions
                .remove(key)
                .or_else(|| ForwardHandle::from_pid(info.forwarder_pid));
            if let Some(handle) = handle {
                ctx.forwarder.stop(handle).await?;
            }
        }
        for info in settings.pods_info.values_mut() {
            info.forwarder_pid = 0;
            info.local_ports.clear();
        }
        Ok(())
    }

    /// Remove the release from the cluster
    pub async fn uninstall(&self, ctx: ChartContext<'_>) -> Result<()> {
        debug!(release = %self.release, "Uninstalling Helm release");
        ctx.installer.uninstall(ctx.namespace, &self.release).await
    }
}

/// Every declared port must be named before any rule is built
fn check_port_names(settings: &ChartSettings) -> Result<()> {
    for info in settings.pods_info.values() {
        if let Some(port) = info.ports.get("") {
            return Err(Error::UnnamedPort {
                pod: info.pod_name.clone(),
                container_port: *port,
            });
        }
    }
    Ok(())
}
