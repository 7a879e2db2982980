//! Error types for helmenv
//!
//! Every variant carries the identifying key of the operation that failed
//! (release, selector, pod, preset file) so a failure can be traced back from
//! logs alone. No layer swallows errors: each component returns them to its
//! caller and the top-level environment operations stop at the first one.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for environment operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cluster connectivity error (credentials, namespace lifecycle)
    #[error("cluster error [{context}]: {message}")]
    Cluster {
        /// Operation that failed (e.g. "create_client", "create_namespace")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Chart install/uninstall error
    #[error("chart error for release {release}: {message}")]
    Chart {
        /// Release name of the chart
        release: String,
        /// Description of what failed
        message: String,
    },

    /// Pod listing or labeling error
    #[error("discovery error [{target}]: {message}")]
    Discovery {
        /// Selector or pod name that was being processed
        target: String,
        /// Description of what failed
        message: String,
    },

    /// Two pods of one chart resolved to the same instance key
    #[error("ambiguous instance key: {key}")]
    AmbiguousInstanceKey {
        /// The duplicated `<app>:<instance>` key
        key: String,
    },

    /// A declared container port has no name
    #[error("port {container_port} of pod {pod} must be named in helm chart")]
    UnnamedPort {
        /// Pod declaring the port
        pod: String,
        /// The unnamed container port
        container_port: u16,
    },

    /// Port forwarding error
    #[error("forwarding error for pod {pod}: {message}")]
    Forward {
        /// Pod being forwarded
        pod: String,
        /// Description of what failed
        message: String,
    },

    /// Config persistence error
    #[error("persistence error [{}]: {message}", path.display())]
    Persistence {
        /// Config file involved (empty when no file name could be derived)
        path: PathBuf,
        /// Description of what failed
        message: String,
    },

    /// Chaos experiment error
    #[error("chaos error: {0}")]
    Chaos(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a cluster connectivity error with operation context
    pub fn cluster(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cluster {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a chart error for a release
    pub fn chart(release: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Chart {
            release: release.into(),
            message: msg.into(),
        }
    }

    /// Create a discovery error for a selector or pod
    pub fn discovery(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Discovery {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a forwarding error for a pod
    pub fn forward(pod: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Forward {
            pod: pod.into(),
            message: msg.into(),
        }
    }

    /// Create a persistence error for a config file
    pub fn persistence(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a chaos controller error
    pub fn chaos(msg: impl Into<String>) -> Self {
        Self::Chaos(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
