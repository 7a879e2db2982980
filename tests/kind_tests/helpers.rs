//! Shared fixtures for the cluster tests

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use helmenv::ClusterAccess;

const KUBECONFIG_ENV: &str = "HELMENV_TEST_KUBECONFIG";

static TRACING: Once = Once::new();

/// Install a fmt subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "helmenv=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Connect to the test cluster
pub async fn cluster() -> ClusterAccess {
    init_tracing();
    let kubeconfig = std::env::var(KUBECONFIG_ENV).ok().map(PathBuf::from);
    ClusterAccess::connect(kubeconfig.as_deref())
        .await
        .expect("test cluster should be reachable")
}

/// Path of the echo chart shipped with the tests
pub fn echo_chart() -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/charts/echo")
        .to_string_lossy()
        .into_owned()
}

/// Send `payload` to a local port and return what comes back.
///
/// Retries the connect for a while: forwarders need a moment to bind.
pub async fn echo_roundtrip(port: u16, payload: &[u8]) -> Vec<u8> {
    let mut last_err = None;
    for _ in 0..30 {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(mut stream) => {
                stream.write_all(payload).await.expect("write to tunnel");
                let mut buf = vec![0u8; payload.len()];
                tokio::time::timeout(Duration::from_secs(10), stream.read_exact(&mut buf))
                    .await
                    .expect("echo should answer within 10s")
                    .expect("read from tunnel");
                return buf;
            }
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    panic!("local port {} never accepted: {:?}", port, last_err);
}
