//! Helm release install and uninstall
//!
//! Shells out to the `helm` binary the same way cluster add-ons are rendered
//! elsewhere: override values are coalesced by helm itself from a YAML
//! document piped on stdin, and the namespace and kubeconfig are passed as
//! explicit flags on every call so no process environment is mutated.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::chart::ChartSettings;
use crate::{Error, Result};

/// Timeout for installing a helm chart, including the wait for readiness
pub const HELM_INSTALL_TIMEOUT: Duration = Duration::from_secs(200);

/// Installs and removes helm releases
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Install `settings` as a release in `namespace` and wait until its
    /// resources are ready
    async fn install(&self, namespace: &str, settings: &ChartSettings) -> Result<()>;

    /// Uninstall a release from `namespace`
    async fn uninstall(&self, namespace: &str, release: &str) -> Result<()>;
}

/// [`ChartInstaller`] using the `helm` CLI
#[derive(Clone, Debug)]
pub struct HelmCli {
    binary: String,
    kubeconfig: Option<PathBuf>,
    timeout: Duration,
}

impl HelmCli {
    /// Create an installer using `helm` from `PATH`
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            binary: "helm".to_string(),
            kubeconfig,
            timeout: HELM_INSTALL_TIMEOUT,
        }
    }

    /// Override the install wait timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn install_args(&self, namespace: &str, settings: &ChartSettings, with_values: bool) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            settings.release_name.clone(),
            settings.path.clone(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", self.timeout.as_secs()),
        ];
        if with_values {
            args.extend(["--values".to_string(), "-".to_string()]);
        }
        self.push_kubeconfig(&mut args);
        args
    }

    fn uninstall_args(&self, namespace: &str, release: &str) -> Vec<String> {
        let mut args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        self.push_kubeconfig(&mut args);
        args
    }

    fn push_kubeconfig(&self, args: &mut Vec<String>) {
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
    }
}

/// Render override values for helm, `None` when there is nothing to override
fn render_values(settings: &ChartSettings) -> Result<Option<String>> {
    if settings.values.is_null() {
        return Ok(None);
    }
    serde_yaml::to_string(&settings.values)
        .map(Some)
        .map_err(|e| {
            Error::chart(
                &settings.release_name,
                format!("failed to coalesce values: {}", e),
            )
        })
}

#[async_trait]
impl ChartInstaller for HelmCli {
    async fn install(&self, namespace: &str, settings: &ChartSettings) -> Result<()> {
        info!(
            path = %settings.path,
            release = %settings.release_name,
            namespace,
            "Installing Helm chart"
        );
        let values = render_values(settings)?;
        let args = self.install_args(namespace, settings, values.is_some());
        debug!(command = %format!("{} {}", self.binary, args.join(" ")), "Running helm");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::chart(&settings.release_name, format!("failed to run helm: {}", e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(values) = &values {
                stdin.write_all(values.as_bytes()).await?;
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::chart(
                &settings.release_name,
                format!(
                    "helm install failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        info!(
            namespace,
            release = %settings.release_name,
            chart = %settings.path,
            "Successfully installed helm chart"
        );
        Ok(())
    }

    async fn uninstall(&self, namespace: &str, release: &str) -> Result<()> {
        debug!(release, "Uninstalling Helm release");
        let output = Command::new(&self.binary)
            .args(self.uninstall_args(namespace, release))
            .output()
            .await
            .map_err(|e| Error::chart(release, format!("failed to run helm: {}", e)))?;

        if !output.status.success() {
            return Err(Error::chart(
                release,
                format!(
                    "helm uninstall failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}
