//! `kubectl port-forward` as a detached process
//!
//! The process is spawned with all rules on one invocation and left running:
//! its pid is the only handle, persisted so a later run can kill it. No
//! readiness confirmation is attempted.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ForwardHandle, ForwardRule, PortForwarder};
use crate::{Error, Result};

/// Default kubectl binary used for process forwarding
pub const DEFAULT_KUBECTL_PROCESS_NAME: &str = "kubectl";

/// [`PortForwarder`] spawning `kubectl port-forward`
#[derive(Clone, Debug)]
pub struct ProcessForwarder {
    kubectl: String,
    kubeconfig: Option<PathBuf>,
}

impl ProcessForwarder {
    /// Create a forwarder running `kubectl` (name or path)
    pub fn new(kubectl: impl Into<String>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubectl: kubectl.into(),
            kubeconfig,
        }
    }

    fn args(&self, namespace: &str, pod: &str, rules: &[ForwardRule]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        args.extend([
            "-n".to_string(),
            namespace.to_string(),
            "port-forward".to_string(),
            format!("pods/{}", pod),
        ]);
        args.extend(rules.iter().map(ToString::to_string));
        args
    }
}

#[async_trait]
impl PortForwarder for ProcessForwarder {
    async fn start(
        &self,
        namespace: &str,
        pod: &str,
        rules: &[ForwardRule],
    ) -> Result<ForwardHandle> {
        let args = self.args(namespace, pod, rules);
        let command = format!("{} {}", self.kubectl, args.join(" "));

        // Dropping a std Child neither kills nor reaps it; the pid outlives us
        let child = Command::new(&self.kubectl)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::forward(pod, format!("failed to forward using cmd: {}: {}", command, e))
            })?;

        let pid = child.id();
        debug!(command = %command, pid, "Forwarded ports");
        Ok(ForwardHandle::Process { pid })
    }

    async fn stop(&self, handle: ForwardHandle) -> Result<()> {
        match handle {
            ForwardHandle::Process { pid } => kill_forwarder(pid).await,
            ForwardHandle::Streamed { token } => {
                token.cancel();
                Ok(())
            }
        }
    }
}

/// Kill a forwarder process with SIGKILL.
///
/// A zero pid means there is no process and is never attempted. A process
/// that is already gone is logged, not reported as an error.
pub async fn kill_forwarder(pid: u32) -> Result<()> {
    if pid == 0 {
        return Ok(());
    }
    let output = tokio::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .output()
        .await
        .map_err(|e| {
            Error::forward(
                pid.to_string(),
                format!("failed to kill forwarder with pid {}: {}", pid, e),
            )
        })?;

    if output.status.success() {
        debug!(pid, "Killed forwarder");
    } else {
        warn!(
            pid,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Forwarder process was not running"
        );
    }
    Ok(())
}
