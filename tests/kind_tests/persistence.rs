//! Story: a persistent environment outlives the process that created it

use helmenv::config::Preset;
use helmenv::{ChartSettings, Config, Environment};

use super::helpers::{cluster, echo_chart, echo_roundtrip};

/// Story: the first run deploys and connects, the second run reloads the
/// config and cleans up including the kubectl forwarders
#[tokio::test]
#[ignore]
async fn story_reloaded_environment_tears_down_forwarders() {
    let dir = tempfile::tempdir().expect("tempdir");
    let filename = dir.path().join("helmenv-persistent");

    let config = Config::new("helmenv-persistent")
        .persistent(true)
        .with_preset(Preset {
            name: "echo".to_string(),
            filename: filename.to_string_lossy().into_owned(),
            ..Default::default()
        });
    let mut env = Environment::new(config, cluster().await);
    env.init().await.expect("namespace should be created");
    env.add_chart(ChartSettings::new("echo", echo_chart()));
    env.deploy_all().await.expect("chart should deploy");
    env.connect().await.expect("ports should forward");

    let pid = env
        .connection_info("echo", "echo:0")
        .expect("echo:0 indexed")
        .forwarder_pid;
    assert_ne!(pid, 0, "persistent environments forward through processes");
    let port = env.local_port("echo", "echo:0", "echo").expect("local port");
    assert_eq!(echo_roundtrip(port, b"persist").await, b"persist");
    drop(env);

    let path = filename.with_extension("yaml");
    let mut reloaded = Environment::load_environment(&path, cluster().await)
        .expect("config should reload");
    assert_eq!(
        reloaded.connection_info("echo", "echo:0").map(|i| i.forwarder_pid),
        Some(pid)
    );

    reloaded.teardown().await.expect("teardown");
    reloaded
        .remove_config_connection_info()
        .expect("config should be cleared");
    let saved = helmenv::config::load_config(&path).expect("config still readable");
    assert!(saved.namespace_name.is_empty());
    assert!(saved.charts_info.is_empty());
}
