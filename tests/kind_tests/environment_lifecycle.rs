//! Story: a test suite spins up a throwaway environment, talks to its pods
//! through local ports and removes it again

use helmenv::{ChartSettings, Config, Environment};

use super::helpers::{cluster, echo_chart, echo_roundtrip};

/// Story: deploy labels every replica and connect makes each one reachable
#[tokio::test]
#[ignore]
async fn story_ephemeral_environment_lifecycle() {
    let access = cluster().await;
    let mut env = Environment::new(Config::new("helmenv-e2e"), access);

    env.init().await.expect("namespace should be created");
    assert!(env.namespace().starts_with("helmenv-e2e-"));

    env.add_chart(ChartSettings::new("echo", echo_chart()));
    env.deploy_all().await.expect("chart should deploy");

    // Two replicas resolve to two distinct instances
    let first = env.connection_info("echo", "echo:0").expect("echo:0 indexed");
    let second = env.connection_info("echo", "echo:1").expect("echo:1 indexed");
    assert_ne!(first.pod_name, second.pod_name);
    assert_eq!(first.ports.get("echo"), Some(&7000));

    env.connect().await.expect("ports should forward");
    for key in ["echo:0", "echo:1"] {
        let port = env.local_port("echo", key, "echo").expect("local port assigned");
        assert_eq!(echo_roundtrip(port, b"ping").await, b"ping");
    }

    env.disconnect().await.expect("disconnect");
    assert!(env.local_port("echo", "echo:0", "echo").is_none());

    env.teardown().await.expect("teardown");
}

/// Story: overriding values changes what gets deployed
#[tokio::test]
#[ignore]
async fn story_values_override_replicas() {
    let access = cluster().await;
    let mut env = Environment::new(Config::new("helmenv-values"), access);
    env.init().await.expect("namespace should be created");

    let values = serde_yaml::from_str("replicas: 1").expect("valid yaml");
    env.add_chart(ChartSettings::new("echo", echo_chart()).with_values(values));
    env.deploy_all().await.expect("chart should deploy");

    let info = &env.chart_settings("echo").expect("registered").pods_info;
    assert_eq!(info.len(), 1);
    assert!(info.contains_key("echo:0"));

    env.teardown().await.expect("teardown");
}
