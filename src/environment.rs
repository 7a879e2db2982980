//! Environment lifecycle
//!
//! An [`Environment`] is one namespace holding an ordered set of helm
//! releases. It is driven through
//! `init → add_chart* → deploy_all → connect ⇄ disconnect → teardown`, and
//! when persistent, every state change is written to `<preset.filename>.yaml`
//! so another process can pick it up with [`Environment::load_environment`].
//!
//! All cluster, helm and forwarding work goes through the collaborator traits
//! in [`Backends`], so the lifecycle can be exercised without a cluster.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::artifacts::{ArtifactStore, Artifacts};
use crate::chaos::{ChaosController, ExperimentInfo, KubeChaosController};
use crate::chart::{Chart, ChartContext, ChartSettings, ConnectionInfo};
use crate::config::{dump_config, load_config, Config};
use crate::forward::{forwarder_for, PortForwarder};
use crate::helm::{ChartInstaller, HelmCli};
use crate::kube_utils::{ClusterAccess, ClusterClient, KubeClusterClient};
use crate::pods::{KubePodDirectory, PodDirectory};
use crate::{Error, Result};

/// Directory pod logs are collected into, relative to the working directory
pub const DEFAULT_ARTIFACTS_DIR: &str = "logs";

/// Collaborators shared by every chart of an environment
#[derive(Clone)]
pub struct Backends {
    /// Namespace and secret operations
    pub cluster: Arc<dyn ClusterClient>,
    /// Pod listing and labeling
    pub pods: Arc<dyn PodDirectory>,
    /// Helm release install/uninstall
    pub installer: Arc<dyn ChartInstaller>,
    /// Port forwarding strategy
    pub forwarder: Arc<dyn PortForwarder>,
}

impl Backends {
    /// Kubernetes-backed collaborators for `config`.
    ///
    /// The forwarding strategy is fixed here from `config.persistent`.
    pub fn from_access(access: &ClusterAccess, config: &Config) -> Self {
        let kubeconfig = access.kubeconfig().map(Path::to_path_buf);
        Self {
            cluster: Arc::new(KubeClusterClient::new(access.client().clone())),
            pods: Arc::new(KubePodDirectory::new(access.client().clone())),
            installer: Arc::new(HelmCli::new(kubeconfig)),
            forwarder: forwarder_for(config.persistent, access, &config.kubectl_process_name),
        }
    }
}

fn chart_context<'a>(namespace: &'a str, backends: &'a Backends) -> ChartContext<'a> {
    ChartContext {
        namespace,
        installer: backends.installer.as_ref(),
        pods: backends.pods.as_ref(),
        forwarder: backends.forwarder.as_ref(),
    }
}

/// A namespace and the helm releases deployed into it
pub struct Environment {
    config: Config,
    charts: BTreeMap<String, Chart>,
    backends: Backends,
    access: Option<ClusterAccess>,
    artifacts_dir: PathBuf,
    chaos: Option<Arc<dyn ChaosController>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl Environment {
    /// Create an environment on the cluster behind `access`.
    ///
    /// Nothing is created in the cluster until [`Environment::init`].
    pub fn new(mut config: Config, access: ClusterAccess) -> Self {
        config.set_defaults();
        let backends = Backends::from_access(&access, &config);
        let mut env = Self::with_backends(config, backends);
        env.access = Some(access);
        env
    }

    /// Create an environment with explicit collaborators.
    ///
    /// Chart units are rebuilt for every release already in the config.
    pub fn with_backends(mut config: Config, backends: Backends) -> Self {
        config.set_defaults();
        let charts = config
            .charts_info
            .keys()
            .map(|release| (release.clone(), Chart::new(release.clone())))
            .collect();
        Self {
            config,
            charts,
            backends,
            access: None,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            chaos: None,
            artifacts: None,
        }
    }

    /// Reattach to a persisted environment without deploying or connecting.
    ///
    /// Forwarder processes stay reachable through their persisted pids;
    /// in-process sessions of the previous run are gone.
    pub fn load_environment(path: &Path, access: ClusterAccess) -> Result<Self> {
        let config = load_config(path)?;
        info!(path = %path.display(), namespace = %config.namespace_name, "Loading environment");
        let mut env = Self::new(config, access);
        env.bind_namespace();
        Ok(env)
    }

    /// Reattach to a persisted environment with explicit collaborators
    pub fn load_with_backends(path: &Path, backends: Backends) -> Result<Self> {
        let config = load_config(path)?;
        info!(path = %path.display(), namespace = %config.namespace_name, "Loading environment");
        Ok(Self::with_backends(config, backends))
    }

    /// Set the directory pod logs are collected into
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    /// Use a specific chaos controller
    pub fn with_chaos(mut self, chaos: Arc<dyn ChaosController>) -> Self {
        self.chaos = Some(chaos);
        self
    }

    /// Use a specific artifact store
    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Current config
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Namespace of the environment, empty before init
    pub fn namespace(&self) -> &str {
        &self.config.namespace_name
    }

    /// Settings of a release
    pub fn chart_settings(&self, release: &str) -> Option<&ChartSettings> {
        self.config.charts_info.get(release)
    }

    /// Connection info of one instance of a release
    pub fn connection_info(&self, release: &str, instance_key: &str) -> Option<&ConnectionInfo> {
        self.chart_settings(release)?.pods_info.get(instance_key)
    }

    /// Local port forwarded to a named port of one instance
    pub fn local_port(&self, release: &str, instance_key: &str, port_name: &str) -> Option<u16> {
        self.connection_info(release, instance_key)?
            .local_ports
            .get(port_name)
            .copied()
    }

    /// Create the namespace and bind namespaced collaborators to it
    pub async fn init(&mut self) -> Result<()> {
        let namespace = self.backends.cluster.create_namespace(&self.config.name).await?;
        self.config.namespace_name = namespace;
        self.bind_namespace();
        Ok(())
    }

    /// Build the chaos controller and artifact store for the current
    /// namespace unless already provided
    fn bind_namespace(&mut self) {
        let Some(access) = &self.access else {
            return;
        };
        let namespace = self.config.namespace_name.clone();
        if self.chaos.is_none() {
            self.chaos = Some(Arc::new(KubeChaosController::new(
                access.client().clone(),
                namespace.clone(),
            )));
        }
        if self.artifacts.is_none() {
            self.artifacts = Some(Arc::new(Artifacts::new(
                access.client().clone(),
                namespace,
                self.artifacts_dir.clone(),
            )));
        }
    }

    /// Register a chart for deployment.
    ///
    /// Re-adding a release replaces its settings and keeps its place in the
    /// deploy order.
    pub fn add_chart(&mut self, settings: ChartSettings) {
        let release = settings.release_name.clone();
        debug!(release = %release, path = %settings.path, "Adding chart");
        self.config.charts_info.insert(release.clone(), settings);
        self.charts
            .entry(release.clone())
            .or_insert_with(|| Chart::new(release.clone()));
        if !self.config.deploy_order.contains(&release) {
            self.config.deploy_order.push(release);
        }
    }

    /// Deploy every chart in the order added, stopping at the first failure
    pub async fn deploy_all(&mut self) -> Result<()> {
        for release in self.config.deploy_sequence() {
            let (Some(chart), Some(settings)) = (
                self.charts.get(&release),
                self.config.charts_info.get_mut(&release),
            ) else {
                continue;
            };
            chart
                .deploy(settings, chart_context(&self.config.namespace_name, &self.backends))
                .await?;
        }
        self.sync_config()
    }

    /// Forward every named port of every chart to a local port
    pub async fn connect(&mut self) -> Result<()> {
        for release in self.config.deploy_sequence() {
            let (Some(chart), Some(settings)) = (
                self.charts.get_mut(&release),
                self.config.charts_info.get_mut(&release),
            ) else {
                continue;
            };
            chart
                .connect(settings, chart_context(&self.config.namespace_name, &self.backends))
                .await?;
        }
        self.sync_config()
    }

    /// Stop every forwarding session of every chart
    pub async fn disconnect(&mut self) -> Result<()> {
        for release in self.config.deploy_sequence() {
            let (Some(chart), Some(settings)) = (
                self.charts.get_mut(&release),
                self.config.charts_info.get_mut(&release),
            ) else {
                continue;
            };
            chart
                .disconnect(settings, chart_context(&self.config.namespace_name, &self.backends))
                .await?;
        }
        self.sync_config()
    }

    /// Disconnect, uninstall every release, then delete the namespace.
    ///
    /// Any failure aborts the remaining steps.
    pub async fn teardown(&mut self) -> Result<()> {
        self.disconnect().await?;
        for release in self.config.deploy_sequence() {
            if let Some(chart) = self.charts.get(&release) {
                chart
                    .uninstall(chart_context(&self.config.namespace_name, &self.backends))
                    .await?;
            }
        }
        self.backends
            .cluster
            .delete_namespace(&self.config.namespace_name)
            .await
    }

    /// Write the config to `<preset.filename>.yaml` when persistent
    pub fn sync_config(&self) -> Result<()> {
        if !self.config.persistent {
            return Ok(());
        }
        let path = self.config.file_path()?;
        dump_config(&self.config, &path)
    }

    /// Forget the namespace and all releases, then write the config.
    ///
    /// Used once the environment has been removed from the cluster.
    pub fn remove_config_connection_info(&mut self) -> Result<()> {
        self.config.namespace_name.clear();
        self.config.charts_info.clear();
        self.config.deploy_order.clear();
        self.charts.clear();
        let path = self.config.file_path()?;
        dump_config(&self.config, &path)
    }

    /// Read one decoded field of a secret
    pub async fn get_secret_field(
        &self,
        namespace: &str,
        secret: &str,
        field: &str,
    ) -> Result<String> {
        self.backends
            .cluster
            .get_secret_field(namespace, secret, field)
            .await
    }

    fn chaos(&self) -> Result<Arc<dyn ChaosController>> {
        self.chaos
            .clone()
            .ok_or_else(|| Error::chaos("environment has no chaos controller, call init first"))
    }

    /// Run an experiment from a template and record it in the config
    pub async fn apply_experiment_standalone(&mut self, template: &Path) -> Result<ExperimentInfo> {
        let info = self.chaos()?.run_template(template).await?;
        self.config
            .experiments
            .insert(info.name.clone(), info.clone());
        self.sync_config()?;
        Ok(info)
    }

    /// Stop a recorded experiment and drop it from the config
    pub async fn stop_experiment_standalone(&mut self, info: &ExperimentInfo) -> Result<()> {
        self.chaos()?.stop(info).await?;
        self.config.experiments.remove(&info.name);
        self.sync_config()
    }

    /// Run an experiment manifest without recording it
    pub async fn apply_experiment(&self, manifest: &str) -> Result<ExperimentInfo> {
        self.chaos()?.run(manifest).await
    }

    /// Stop an experiment that was not recorded
    pub async fn stop_experiment(&self, info: &ExperimentInfo) -> Result<()> {
        self.chaos()?.stop(info).await
    }

    /// Dump the logs of every pod in the namespace into the artifacts dir
    pub async fn collect_logs(&self) -> Result<Vec<PathBuf>> {
        let artifacts = self.artifacts.clone().ok_or_else(|| {
            Error::persistence(
                &self.artifacts_dir,
                "environment has no artifact store, call init first",
            )
        })?;
        artifacts.collect_pod_logs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MockArtifactStore;
    use crate::chaos::MockChaosController;
    use crate::chart::tests::connection;
    use crate::config::Preset;
    use crate::forward::{ForwardHandle, MockPortForwarder};
    use crate::helm::MockChartInstaller;
    use crate::kube_utils::MockClusterClient;
    use crate::pods::MockPodDirectory;
    use mockall::predicate::eq;
    use std::sync::Mutex;

    fn backends(
        cluster: MockClusterClient,
        pods: MockPodDirectory,
        installer: MockChartInstaller,
        forwarder: MockPortForwarder,
    ) -> Backends {
        Backends {
            cluster: Arc::new(cluster),
            pods: Arc::new(pods),
            installer: Arc::new(installer),
            forwarder: Arc::new(forwarder),
        }
    }

    fn idle_backends() -> Backends {
        backends(
            MockClusterClient::new(),
            MockPodDirectory::new(),
            MockChartInstaller::new(),
            MockPortForwarder::new(),
        )
    }

    fn persistent_config(dir: &Path) -> Config {
        let mut config = Config::new("chainlink").persistent(true).with_preset(Preset {
            name: "chainlink".to_string(),
            filename: dir.join("chainlink").to_string_lossy().into_owned(),
            ..Default::default()
        });
        config.namespace_name = "chainlink-x7k2p".to_string();
        config
    }

    fn connected_chart(release: &str, pid: u32) -> ChartSettings {
        let mut settings = ChartSettings::new(release, format!("./charts/{release}"));
        let mut info = connection(&format!("{release}-0"), &[("http", 8080)]);
        info.forwarder_pid = pid;
        if pid != 0 {
            info.local_ports.insert("http".to_string(), 24000);
        }
        settings.pods_info.insert(format!("{release}:0"), info);
        settings
    }

    /// Story: charts deploy one after another, each fully before the next
    #[tokio::test]
    async fn story_charts_deploy_in_order_added() {
        let events = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut installer = MockChartInstaller::new();
        let log = events.clone();
        installer.expect_install().returning(move |_, s| {
            log.lock().unwrap().push(format!("install {}", s.release_name));
            Ok(())
        });
        let mut pods = MockPodDirectory::new();
        let log = events.clone();
        pods.expect_list_pods().returning(move |_, selector| {
            log.lock().unwrap().push(format!("list {}", selector));
            Ok(vec![])
        });

        let mut env = Environment::with_backends(
            Config::new("env"),
            backends(MockClusterClient::new(), pods, installer, MockPortForwarder::new()),
        );
        env.add_chart(ChartSettings::new("b-geth", "./charts/geth"));
        env.add_chart(ChartSettings::new("a-chainlink", "./charts/chainlink"));
        env.deploy_all().await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "install b-geth",
                "list app",
                "list release=b-geth",
                "install a-chainlink",
                "list app",
                "list release=a-chainlink",
            ]
        );
    }

    #[tokio::test]
    async fn deploy_stops_at_first_failure() {
        let mut installer = MockChartInstaller::new();
        installer
            .expect_install()
            .withf(|_, s| s.release_name == "geth")
            .times(1)
            .returning(|_, s| Err(Error::chart(&s.release_name, "helm install failed")));
        installer
            .expect_install()
            .withf(|_, s| s.release_name == "chainlink")
            .never();

        let mut env = Environment::with_backends(
            Config::new("env"),
            backends(
                MockClusterClient::new(),
                MockPodDirectory::new(),
                installer,
                MockPortForwarder::new(),
            ),
        );
        env.add_chart(ChartSettings::new("geth", "./charts/geth"));
        env.add_chart(ChartSettings::new("chainlink", "./charts/chainlink"));

        let err = env.deploy_all().await.unwrap_err();
        assert!(matches!(err, Error::Chart { ref release, .. } if release == "geth"));
    }

    #[test]
    fn re_adding_a_release_keeps_its_position() {
        let mut env = Environment::with_backends(Config::new("env"), idle_backends());
        env.add_chart(ChartSettings::new("geth", "./charts/geth"));
        env.add_chart(ChartSettings::new("chainlink", "./charts/chainlink"));
        env.add_chart(ChartSettings::new("geth", "./charts/geth-v2"));

        assert_eq!(env.config().deploy_sequence(), vec!["geth", "chainlink"]);
        assert_eq!(env.chart_settings("geth").unwrap().path, "./charts/geth-v2");
    }

    #[tokio::test]
    async fn init_records_generated_namespace() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_create_namespace()
            .with(eq("chainlink"))
            .times(1)
            .returning(|base| Ok(format!("{}-x7k2p", base)));

        let mut env = Environment::with_backends(
            Config::new("chainlink"),
            backends(
                cluster,
                MockPodDirectory::new(),
                MockChartInstaller::new(),
                MockPortForwarder::new(),
            ),
        );
        env.init().await.unwrap();
        assert_eq!(env.namespace(), "chainlink-x7k2p");
    }

    #[tokio::test]
    async fn init_failure_leaves_namespace_unset() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_create_namespace()
            .returning(|_| Err(Error::cluster("create_namespace", "forbidden")));

        let mut env = Environment::with_backends(
            Config::new("chainlink"),
            backends(
                cluster,
                MockPodDirectory::new(),
                MockChartInstaller::new(),
                MockPortForwarder::new(),
            ),
        );
        assert!(env.init().await.is_err());
        assert!(env.namespace().is_empty());
    }

    /// Story: an in-process environment disconnects without touching any
    /// process
    #[tokio::test]
    async fn story_non_persistent_disconnect_kills_nothing() {
        let mut forwarder = MockPortForwarder::new();
        forwarder.expect_stop().never();

        let mut config = Config::new("env");
        config
            .charts_info
            .insert("geth".to_string(), connected_chart("geth", 0));
        let mut env = Environment::with_backends(
            config,
            backends(
                MockClusterClient::new(),
                MockPodDirectory::new(),
                MockChartInstaller::new(),
                forwarder,
            ),
        );

        env.disconnect().await.unwrap();
        assert!(env.connection_info("geth", "geth:0").unwrap().local_ports.is_empty());
    }

    #[tokio::test]
    async fn connect_persists_local_ports() {
        let dir = tempfile::tempdir().unwrap();
        let mut forwarder = MockPortForwarder::new();
        forwarder
            .expect_start()
            .returning(|_, _, _| Ok(ForwardHandle::Process { pid: 5151 }));

        let mut config = persistent_config(dir.path());
        config
            .charts_info
            .insert("geth".to_string(), connected_chart("geth", 0));
        let mut env = Environment::with_backends(
            config,
            backends(
                MockClusterClient::new(),
                MockPodDirectory::new(),
                MockChartInstaller::new(),
                forwarder,
            ),
        );
        env.connect().await.unwrap();

        let local = env.local_port("geth", "geth:0", "http").unwrap();
        let saved = load_config(&dir.path().join("chainlink.yaml")).unwrap();
        let info = &saved.charts_info["geth"].pods_info["geth:0"];
        assert_eq!(info.forwarder_pid, 5151);
        assert_eq!(info.local_ports["http"], local);
    }

    /// Story: a second run reattaches to a persisted environment and can
    /// still kill the forwarders the first run started
    #[tokio::test]
    async fn story_reload_reaches_persisted_forwarders() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = persistent_config(dir.path());
        config
            .charts_info
            .insert("geth".to_string(), connected_chart("geth", 4242));
        config
            .charts_info
            .insert("chainlink".to_string(), connected_chart("chainlink", 4343));
        config.deploy_order = vec!["geth".to_string(), "chainlink".to_string()];
        let path = dir.path().join("chainlink.yaml");
        dump_config(&config, &path).unwrap();

        let stopped = Arc::new(Mutex::new(Vec::new()));
        let log = stopped.clone();
        let mut forwarder = MockPortForwarder::new();
        forwarder.expect_stop().times(2).returning(move |h| {
            log.lock().unwrap().push(h.pid());
            Ok(())
        });

        let mut env = Environment::load_with_backends(
            &path,
            backends(
                MockClusterClient::new(),
                MockPodDirectory::new(),
                MockChartInstaller::new(),
                forwarder,
            ),
        )
        .unwrap();
        assert_eq!(env.namespace(), "chainlink-x7k2p");
        assert_eq!(env.config().deploy_sequence(), vec!["geth", "chainlink"]);

        env.disconnect().await.unwrap();
        assert_eq!(*stopped.lock().unwrap(), vec![4242, 4343]);

        let saved = load_config(&path).unwrap();
        assert!(saved
            .charts_info
            .values()
            .flat_map(|c| c.pods_info.values())
            .all(|i| i.forwarder_pid == 0 && i.local_ports.is_empty()));
    }

    #[tokio::test]
    async fn teardown_runs_disconnect_uninstall_delete() {
        let events = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut forwarder = MockPortForwarder::new();
        let log = events.clone();
        forwarder.expect_stop().returning(move |h| {
            log.lock().unwrap().push(format!("stop {}", h.pid()));
            Ok(())
        });
        let mut installer = MockChartInstaller::new();
        let log = events.clone();
        installer.expect_uninstall().returning(move |_, release| {
            log.lock().unwrap().push(format!("uninstall {}", release));
            Ok(())
        });
        let mut cluster = MockClusterClient::new();
        let log = events.clone();
        cluster.expect_delete_namespace().returning(move |ns| {
            log.lock().unwrap().push(format!("delete {}", ns));
            Ok(())
        });

        let mut config = Config::new("env");
        config.namespace_name = "env-abc12".to_string();
        config
            .charts_info
            .insert("geth".to_string(), connected_chart("geth", 4242));
        let mut env = Environment::with_backends(
            config,
            backends(cluster, MockPodDirectory::new(), installer, forwarder),
        );
        env.teardown().await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["stop 4242", "uninstall geth", "delete env-abc12"]
        );
    }

    #[tokio::test]
    async fn teardown_aborts_when_uninstall_fails() {
        let mut installer = MockChartInstaller::new();
        installer
            .expect_uninstall()
            .returning(|_, release| Err(Error::chart(release, "helm uninstall failed")));
        let mut cluster = MockClusterClient::new();
        cluster.expect_delete_namespace().never();

        let mut config = Config::new("env");
        config
            .charts_info
            .insert("geth".to_string(), ChartSettings::new("geth", "./charts/geth"));
        let mut env = Environment::with_backends(
            config,
            backends(cluster, MockPodDirectory::new(), installer, MockPortForwarder::new()),
        );
        assert!(env.teardown().await.is_err());
    }

    #[test]
    fn sync_requires_preset_filename_when_persistent() {
        let env = Environment::with_backends(Config::new("env").persistent(true), idle_backends());
        assert!(matches!(env.sync_config(), Err(Error::Persistence { .. })));

        let env = Environment::with_backends(Config::new("env"), idle_backends());
        assert!(env.sync_config().is_ok());
    }

    #[test]
    fn removing_connection_info_forgets_namespace_and_charts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = persistent_config(dir.path()).persistent(false);
        config
            .charts_info
            .insert("geth".to_string(), connected_chart("geth", 0));
        let mut env = Environment::with_backends(config, idle_backends());

        env.remove_config_connection_info().unwrap();

        let saved = load_config(&dir.path().join("chainlink.yaml")).unwrap();
        assert!(saved.namespace_name.is_empty());
        assert!(saved.charts_info.is_empty());
        assert!(env.chart_settings("geth").is_none());
    }

    #[tokio::test]
    async fn standalone_experiments_are_recorded_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut chaos = MockChaosController::new();
        chaos.expect_run_template().returning(|path| {
            Ok(ExperimentInfo {
                name: "partition-geth".to_string(),
                api_version: "chaos-mesh.org/v1alpha1".to_string(),
                kind: "NetworkChaos".to_string(),
                template_path: path.to_string_lossy().into_owned(),
            })
        });
        chaos
            .expect_stop()
            .withf(|info| info.name == "partition-geth")
            .times(1)
            .returning(|_| Ok(()));

        let mut env = Environment::with_backends(persistent_config(dir.path()), idle_backends())
            .with_chaos(Arc::new(chaos));
        let path = dir.path().join("chainlink.yaml");

        let info = env
            .apply_experiment_standalone(Path::new("chaos/partition.yaml"))
            .await
            .unwrap();
        let saved = load_config(&path).unwrap();
        assert_eq!(saved.experiments["partition-geth"].template_path, "chaos/partition.yaml");

        env.stop_experiment_standalone(&info).await.unwrap();
        assert!(load_config(&path).unwrap().experiments.is_empty());
    }

    #[tokio::test]
    async fn ephemeral_experiments_leave_config_alone() {
        let mut chaos = MockChaosController::new();
        chaos.expect_run().returning(|_| {
            Ok(ExperimentInfo {
                name: "kill-geth".to_string(),
                ..Default::default()
            })
        });
        chaos.expect_stop().returning(|_| Ok(()));

        let env = Environment::with_backends(Config::new("env"), idle_backends())
            .with_chaos(Arc::new(chaos));
        let info = env.apply_experiment("kind: PodChaos").await.unwrap();
        env.stop_experiment(&info).await.unwrap();
        assert!(env.config().experiments.is_empty());
    }

    #[tokio::test]
    async fn experiments_need_a_chaos_controller() {
        let env = Environment::with_backends(Config::new("env"), idle_backends());
        let err = env.apply_experiment("kind: PodChaos").await.unwrap_err();
        assert!(matches!(err, Error::Chaos(_)));
    }

    #[tokio::test]
    async fn logs_are_collected_through_the_artifact_store() {
        let mut artifacts = MockArtifactStore::new();
        artifacts
            .expect_collect_pod_logs()
            .times(1)
            .returning(|| Ok(vec![PathBuf::from("logs/env-abc12/geth-0_geth.log")]));

        let env = Environment::with_backends(Config::new("env"), idle_backends())
            .with_artifacts(Arc::new(artifacts));
        assert_eq!(env.collect_logs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn secret_fields_come_from_the_cluster_client() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_get_secret_field()
            .with(eq("env-abc12"), eq("chainlink-creds"), eq("password"))
            .returning(|_, _, _| Ok("hunter2".to_string()));

        let env = Environment::with_backends(
            Config::new("env"),
            backends(
                cluster,
                MockPodDirectory::new(),
                MockChartInstaller::new(),
                MockPortForwarder::new(),
            ),
        );
        assert_eq!(
            env.get_secret_field("env-abc12", "chainlink-creds", "password")
                .await
                .unwrap(),
            "hunter2"
        );
    }
}
