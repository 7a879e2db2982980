//! Local port forwarding to pods
//!
//! Two strategies share the [`PortForwarder`] contract ("make these container
//! ports reachable at these local ports for this pod"):
//!
//! - [`ProcessForwarder`] spawns `kubectl port-forward` and is identified by
//!   its pid, so it outlives this process. Used by persistent environments.
//! - [`NativeForwarder`] tunnels through the API server's portforward
//!   subresource from a background task owned by this process.
//!
//! The environment picks one strategy when it is built; chart code only ever
//! sees the trait.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::kube_utils::ClusterAccess;
use crate::Result;

mod native;
mod process;

pub use native::NativeForwarder;
pub use process::{kill_forwarder, ProcessForwarder, DEFAULT_KUBECTL_PROCESS_NAME};

/// Lowest local port handed out (inclusive)
pub const MIN_PORT: u16 = 20000;
/// Upper bound of local ports handed out (exclusive)
pub const MAX_PORT: u16 = 50000;

/// Pick a local port uniformly from `[MIN_PORT, MAX_PORT)`.
///
/// No check is made against ports already in use.
pub fn allocate_local_port() -> u16 {
    rand::thread_rng().gen_range(MIN_PORT..MAX_PORT)
}

/// One tunnel: a local port mapped to a container port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForwardRule {
    /// Port bound on the local machine
    pub local: u16,
    /// Port the container listens on
    pub container: u16,
}

impl ForwardRule {
    /// Create a rule
    pub fn new(local: u16, container: u16) -> Self {
        Self { local, container }
    }
}

impl fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.container)
    }
}

/// Handle to a running forwarding session
#[derive(Clone, Debug)]
pub enum ForwardHandle {
    /// External process, identified by pid
    Process {
        /// Process id of the forwarder
        pid: u32,
    },
    /// In-process background task, stopped through its token
    Streamed {
        /// Cancels the forwarding task and its tunnels
        token: CancellationToken,
    },
}

impl ForwardHandle {
    /// Pid to persist for this session; 0 when no OS process is involved
    pub fn pid(&self) -> u32 {
        match self {
            Self::Process { pid } => *pid,
            Self::Streamed { .. } => 0,
        }
    }

    /// Rebuild a handle from a persisted pid; 0 means there is nothing to stop
    pub fn from_pid(pid: u32) -> Option<Self> {
        (pid != 0).then_some(Self::Process { pid })
    }
}

/// Forwarding strategy
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Start forwarding `rules` for `pod` in `namespace`
    async fn start(&self, namespace: &str, pod: &str, rules: &[ForwardRule])
        -> Result<ForwardHandle>;

    /// Stop a session previously returned by [`PortForwarder::start`]
    async fn stop(&self, handle: ForwardHandle) -> Result<()>;
}

/// Forwarder for an environment: OS processes when the environment must
/// survive this process, in-process tunnels otherwise.
pub fn forwarder_for(
    persistent: bool,
    cluster: &ClusterAccess,
    kubectl: &str,
) -> Arc<dyn PortForwarder> {
    if persistent {
        Arc::new(ProcessForwarder::new(kubectl, cluster.kubeconfig().map(|p| p.to_path_buf())))
    } else {
        Arc::new(NativeForwarder::new(cluster.streaming_client().clone()))
    }
}
