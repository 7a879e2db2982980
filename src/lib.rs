//! helmenv - ephemeral and persistent Kubernetes test environments from Helm charts
//!
//! An environment is a freshly generated namespace into which a sequence of
//! helm releases is installed. Every pod gets a stable logical identity
//! (`<app>:<instance>`) and every named container port can be forwarded to a
//! random local port, either through in-process tunnels or through detached
//! `kubectl port-forward` processes that outlive the caller.
//!
//! # Modules
//!
//! - [`environment`] - Environment lifecycle: init, deploy, connect, teardown
//! - [`chart`] - One helm release: deploy, discovery, connect/disconnect
//! - [`pods`] - Pod listing, `instance` labeling and identity resolution
//! - [`helm`] - `helm install` / `helm uninstall`
//! - [`forward`] - Port forwarding strategies
//! - [`config`] - Persisted environment config (YAML)
//! - [`kube_utils`] - Cluster access and namespace/secret operations
//! - [`chaos`] - Chaos experiments in the environment namespace
//! - [`artifacts`] - Pod log collection
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod artifacts;
pub mod chaos;
pub mod chart;
pub mod config;
pub mod environment;
pub mod error;
pub mod forward;
pub mod helm;
pub mod kube_utils;
pub mod pods;

pub use chart::{ChartSettings, ConnectionInfo};
pub use config::{Config, Preset};
pub use environment::{Backends, Environment};
pub use error::Error;
pub use kube_utils::ClusterAccess;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
