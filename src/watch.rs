//! Kubernetes node watch plumbing.
//!
//! Bridges a `kube` watcher over `v1 Node` objects into the bounded
//! [`NodeEvent`] channel consumed by [`crate::sync::SyncController`]. The
//! watcher re-lists on desync; a re-list surfaces as
//! [`NodeEvent::Restarted`] followed by a replay that the sync loop
//! stages and swaps in whole, so the index keeps serving the previous
//! listing in the meantime.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config as KubeConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::KubernetesConfig;
use crate::error::Error;
use crate::index::{AddressKind, NodeAddress, NodeRecord};
use crate::sync::NodeEvent;

/// Build a Kubernetes client per configuration: explicit kubeconfig when
/// given, otherwise inferred (in-cluster or environment), with an optional
/// API endpoint override.
pub async fn make_client(config: &KubernetesConfig) -> Result<Client, Error> {
    let mut kube_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .map_err(|err| Error::Config(format!("kubeconfig: {err}")))?;
            let options = kube::config::KubeConfigOptions {
                context: config.context.clone(),
                ..Default::default()
            };
            KubeConfig::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|err| Error::Config(format!("kubeconfig: {err}")))?
        }
        None => KubeConfig::infer()
            .await
            .map_err(|err| Error::Config(format!("kubernetes config: {err}")))?,
    };

    if let Some(endpoint) = &config.endpoint {
        kube_config.cluster_url = endpoint
            .parse::<http::Uri>()
            .map_err(|err| Error::Config(format!("endpoint {endpoint:?}: {err}")))?;
    }

    Ok(Client::try_from(kube_config)?)
}

/// Spawn the watch task feeding `tx`.
///
/// The task ends when the channel's receiver is dropped. Transient watch
/// errors are retried with backoff inside the watcher; they never reach
/// the index.
pub fn spawn_node_watch(client: Client, tx: mpsc::Sender<NodeEvent>) -> JoinHandle<()> {
    let api: Api<Node> = Api::all(client);

    tokio::spawn(async move {
        info!("node watch started");
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    if let Some(event) = convert(event) {
                        if tx.send(event).await.is_err() {
                            debug!("node event channel closed; stopping watch");
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "node watch error; backing off");
                }
            }
        }
        info!("node watch stream ended");
    })
}

fn convert(event: watcher::Event<Node>) -> Option<NodeEvent> {
    match event {
        watcher::Event::Init => Some(NodeEvent::Restarted),
        watcher::Event::InitApply(node) | watcher::Event::Apply(node) => {
            to_record(&node).map(NodeEvent::Apply)
        }
        watcher::Event::InitDone => Some(NodeEvent::InitDone),
        watcher::Event::Delete(node) => node.metadata.name.clone().map(NodeEvent::Delete),
    }
}

/// Convert a Kubernetes node into the index record shape. Nodes with no
/// name are skipped; unknown address types (e.g. Hostname) are ignored.
fn to_record(node: &Node) -> Option<NodeRecord> {
    let name = node.metadata.name.clone()?;
    let addresses = node
        .status
        .iter()
        .flat_map(|status| status.addresses.iter().flatten())
        .filter_map(|addr| {
            let kind = match addr.type_.as_str() {
                "InternalIP" => AddressKind::InternalIp,
                "ExternalIP" => AddressKind::ExternalIp,
                "InternalDNS" => AddressKind::InternalDns,
                "ExternalDNS" => AddressKind::ExternalDns,
                _ => return None,
            };
            Some(NodeAddress::new(kind, addr.address.clone()))
        })
        .collect();

    Some(NodeRecord { name, addresses })
}
