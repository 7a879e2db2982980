//! In-process port forwarding through the API server
//!
//! A background task binds one local listener per rule, dials the pod once
//! through the API server, and reports back on a one-shot channel. The report
//! carries the same two streams a port-forward CLI prints: standard output
//! (`Forwarding from ...`) and error output (bind and dial failures). The
//! caller blocks on that report; any error output fails the connect.
//!
//! Each accepted connection opens its own portforward stream to the pod and
//! is copied in both directions until either side closes or the session
//! token is cancelled.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{kill_forwarder, ForwardHandle, ForwardRule, PortForwarder};
use crate::{Error, Result};

const LOCAL_ADDRESS: &str = "127.0.0.1";

/// Output captured while the listeners were being bound
#[derive(Debug, Default)]
struct ReadyReport {
    out: Vec<String>,
    err: Vec<String>,
}

/// [`PortForwarder`] tunneling through `pods/portforward`
#[derive(Clone)]
pub struct NativeForwarder {
    client: Client,
}

impl NativeForwarder {
    /// Create a forwarder sharing the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PortForwarder for NativeForwarder {
    async fn start(
        &self,
        namespace: &str,
        pod: &str,
        rules: &[ForwardRule],
    ) -> Result<ForwardHandle> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        debug!(pod, "Attempting to forward port");
        tokio::spawn(forward_ports(
            pods,
            pod.to_string(),
            rules.to_vec(),
            token.clone(),
            ready_tx,
        ));

        debug!(pod, "Waiting on forwarded ports to be ready");
        let report = ready_rx
            .await
            .map_err(|_| Error::forward(pod, "forwarder stopped before becoming ready"))?;
        settle(pod, token, report)
    }

    async fn stop(&self, handle: ForwardHandle) -> Result<()> {
        match handle {
            ForwardHandle::Streamed { token } => {
                token.cancel();
                Ok(())
            }
            ForwardHandle::Process { pid } => kill_forwarder(pid).await,
        }
    }
}

/// Turn a readiness report into a session, cancelling it on error output
fn settle(pod: &str, token: CancellationToken, report: ReadyReport) -> Result<ForwardHandle> {
    if !report.err.is_empty() {
        token.cancel();
        return Err(Error::forward(
            pod,
            format!("error on forwarding k8s port: {}", report.err.join("; ")),
        ));
    }
    if !report.out.is_empty() {
        debug!(pod, "{}", report.out.join(" "));
    }
    Ok(ForwardHandle::Streamed { token })
}

/// Bind listeners, dial the pod, report readiness, then serve until
/// cancelled
async fn forward_ports(
    pods: Api<Pod>,
    pod: String,
    rules: Vec<ForwardRule>,
    token: CancellationToken,
    ready_tx: oneshot::Sender<ReadyReport>,
) {
    let (listeners, mut report) = bind_listeners(&rules).await;
    if report.err.is_empty() {
        if let Some(err) = dial(&pods, &pod, &rules).await {
            report.err.push(err);
        }
    }
    let failed = !report.err.is_empty();
    if ready_tx.send(report).is_err() || failed {
        return;
    }

    for (listener, rule) in listeners {
        tokio::spawn(accept_loop(
            listener,
            pods.clone(),
            pod.clone(),
            rule.container,
            token.clone(),
        ));
    }
    token.cancelled().await;
    info!(pod = %pod, "Port forwarding stopped");
}

async fn bind_listeners(rules: &[ForwardRule]) -> (Vec<(TcpListener, ForwardRule)>, ReadyReport) {
    let mut listeners = Vec::with_capacity(rules.len());
    let mut report = ReadyReport::default();
    for rule in rules {
        match TcpListener::bind((LOCAL_ADDRESS, rule.local)).await {
            Ok(listener) => {
                report.out.push(format!(
                    "Forwarding from {}:{} -> {}",
                    LOCAL_ADDRESS, rule.local, rule.container
                ));
                listeners.push((listener, *rule));
            }
            Err(e) => report.err.push(format!(
                "unable to listen on {}:{}: {}",
                LOCAL_ADDRESS, rule.local, e
            )),
        }
    }
    (listeners, report)
}

/// Open and close one portforward stream for every container port, so an
/// unknown pod or a forbidden subresource fails the connect
async fn dial(pods: &Api<Pod>, pod: &str, rules: &[ForwardRule]) -> Option<String> {
    let ports: Vec<u16> = rules.iter().map(|r| r.container).collect();
    match pods.portforward(pod, &ports).await {
        Ok(pf) => {
            pf.abort();
            if let Err(e) = pf.join().await {
                debug!(pod, error = %e, "Readiness stream closed with error");
            }
            None
        }
        Err(e) => Some(format!("unable to dial pod {} on ports {:?}: {}", pod, ports, e)),
    }
}

async fn accept_loop(
    listener: TcpListener,
    pods: Api<Pod>,
    pod: String,
    port: u16,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((conn, peer)) => {
                    debug!(pod = %pod, port, peer = %peer, "Handling connection");
                    let pods = pods.clone();
                    let pod = pod.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = tunnel(conn, &pods, &pod, port, token).await {
                            warn!(pod = %pod, port, error = %e, "Port forward connection failed");
                        }
                    });
                }
                Err(e) => warn!(pod = %pod, port, error = %e, "Failed to accept connection"),
            }
        }
    }
}

/// Copy one local connection to the pod port and back
async fn tunnel(
    mut conn: TcpStream,
    pods: &Api<Pod>,
    pod: &str,
    port: u16,
    token: CancellationToken,
) -> Result<()> {
    let mut pf = pods.portforward(pod, &[port]).await?;
    let mut upstream = pf
        .take_stream(port)
        .ok_or_else(|| Error::forward(pod, format!("failed to get stream for port {}", port)))?;

    if let Some(errors) = pf.take_error(port) {
        let pod = pod.to_string();
        tokio::spawn(async move {
            if let Some(msg) = errors.await {
                warn!(pod = %pod, port, error = %msg, "Pod reported port forward error");
            }
        });
    }

    tokio::select! {
        _ = token.cancelled() => {
            pf.abort();
            return Ok(());
        }
        copied = tokio::io::copy_bidirectional(&mut conn, &mut upstream) => {
            copied?;
        }
    }
    drop(upstream);
    pf.join()
        .await
        .map_err(|e| Error::forward(pod, format!("port forward stream failed: {}", e)))
}
