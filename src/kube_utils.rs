//! Cluster access using kube-rs
//!
//! Resolves ambient cluster credentials into a shared [`ClusterAccess`]
//! handle and wraps the namespace and secret calls the environment needs
//! behind the [`ClusterClient`] trait so orchestration can be tested
//! without a cluster.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for regular API calls
///
/// The timeout wraps the underlying connection, which an upgraded
/// port-forward stream keeps using, so streaming clients are built without
/// one.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared, read-mostly handle to the cluster.
///
/// Cloning is cheap: the underlying `kube::Client`s are reference counted and
/// safe to use from background forwarding tasks and the main flow at once.
#[derive(Clone)]
pub struct ClusterAccess {
    client: Client,
    streaming: Client,
    kubeconfig: Option<PathBuf>,
}

impl ClusterAccess {
    /// Resolve credentials and build the clients.
    ///
    /// With an explicit kubeconfig path that file is used; otherwise the
    /// standard chain (`KUBECONFIG`, `~/.kube/config`, in-cluster) applies.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = resolve_config(kubeconfig).await?;
        Ok(Self {
            client: build_client(with_timeouts(config.clone(), Some(DEFAULT_READ_TIMEOUT)))?,
            streaming: build_client(with_timeouts(config, None))?,
            kubeconfig: kubeconfig.map(Path::to_path_buf),
        })
    }

    /// Wrap an existing client, used for both API calls and streams
    pub fn from_client(client: Client, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            streaming: client.clone(),
            client,
            kubeconfig,
        }
    }

    /// The kube client for regular API calls
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The kube client for long lived streams, without a read timeout
    pub fn streaming_client(&self) -> &Client {
        &self.streaming
    }

    /// Explicit kubeconfig path, passed on to `helm` and `kubectl`
    pub fn kubeconfig(&self) -> Option<&Path> {
        self.kubeconfig.as_deref()
    }
}

/// Install the process-wide rustls crypto provider (aws-lc-rs) unless one
/// is already installed
pub fn ensure_crypto_provider() -> Result<()> {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    // Losing an install race to another thread still leaves a provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err(Error::cluster(
            "create_client",
            "failed to install rustls crypto provider",
        ));
    }
    Ok(())
}

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = resolve_config(kubeconfig).await?;
    build_client(with_timeouts(config, Some(DEFAULT_READ_TIMEOUT)))
}

async fn resolve_config(kubeconfig: Option<&Path>) -> Result<Config> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::cluster(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::cluster("create_client", format!("failed to load kubeconfig: {}", e))
                })
        }
        None => Config::infer().await.map_err(|e| {
            Error::cluster("create_client", format!("failed to infer config: {}", e))
        }),
    }
}

fn with_timeouts(mut config: Config, read_timeout: Option<Duration>) -> Config {
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = read_timeout;
    config
}

fn build_client(config: Config) -> Result<Client> {
    ensure_crypto_provider()?;
    Client::try_from(config)
        .map_err(|e| Error::cluster("create_client", format!("failed to create client: {}", e)))
}

/// Namespace and secret operations used by the environment lifecycle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a namespace named `<base>-<generated suffix>` and return its name
    async fn create_namespace(&self, base: &str) -> Result<String>;

    /// Delete a namespace
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Read one field of a secret as a string
    async fn get_secret_field(&self, namespace: &str, secret: &str, field: &str)
        -> Result<String>;
}

/// [`ClusterClient`] backed by the Kubernetes API
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_namespace(&self, base: &str) -> Result<String> {
        info!(namespace = %base, "Creating environment");
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", base)),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = api.create(&PostParams::default(), &ns).await.map_err(|e| {
            Error::cluster(
                "create_namespace",
                format!("failed to create namespace {}-*: {}", base, e),
            )
        })?;
        let name = created.metadata.name.ok_or_else(|| {
            Error::cluster("create_namespace", "API server returned a namespace without name")
        })?;
        info!(namespace = %name, "Created namespace");
        Ok(name)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        info!(namespace = %name, "Shutting down environment");
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                Error::cluster(
                    "delete_namespace",
                    format!("failed to delete namespace {}: {}", name, e),
                )
            })?;
        Ok(())
    }

    async fn get_secret_field(
        &self,
        namespace: &str,
        secret: &str,
        field: &str,
    ) -> Result<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let res = secrets.get(secret).await.map_err(|e| {
            Error::cluster(
                "get_secret_field",
                format!("failed to get secret {}/{}: {}", namespace, secret, e),
            )
        })?;
        debug!(namespace, secret, keys = ?res.data.as_ref().map(|d| d.keys().collect::<Vec<_>>()), "Fetched secret");
        Ok(secret_field(&res, field))
    }
}

/// Decode one field of a secret, checking `data` then `stringData`.
///
/// A missing field yields an empty string.
fn secret_field(secret: &Secret, field: &str) -> String {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(field)) {
        return String::from_utf8_lossy(&value.0).into_owned();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(field))
        .cloned()
        .unwrap_or_default()
}
