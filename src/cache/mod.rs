//! C2: Pod Cache — a node-scoped, UID-indexed view of pods scheduled to
//! this node, synchronized with the orchestrator via a long-lived watch.
//! The detection path (reconciler lookups) never blocks on the network;
//! only the watch loop talks to the API server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::{Api, Client};
use slog::{debug, info, warn, Logger};
use tokio_util::sync::CancellationToken;

use crate::errors::CacheError;

/// The cache's record of a pod relevant to this node.
#[derive(Debug, Clone, PartialEq)]
pub struct PodView {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    /// Raw QoS class string as reported by the API (`Guaranteed`,
    /// `Burstable`, `BestEffort`), not yet lowercased/normalized.
    pub qos_class: Option<String>,
    pub deletion_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl PodView {
    fn from_pod(pod: &Pod) -> Option<Self> {
        let uid = pod.metadata.uid.clone()?;
        let namespace = pod.metadata.namespace.clone()?;
        let name = pod.metadata.name.clone()?;
        let qos_class = pod.status.as_ref().and_then(|s| s.qos_class.clone());
        let deletion_timestamp = pod
            .metadata
            .deletion_timestamp
            .as_ref()
            .map(|t| t.0);

        Some(PodView {
            uid,
            namespace,
            name,
            qos_class,
            deletion_timestamp,
        })
    }
}

struct Index {
    by_uid: HashMap<String, PodView>,
    /// uid for a given namespace/name, kept in lockstep with `by_uid` so
    /// deletes (which only carry a name) can find the right entry.
    uid_by_name: HashMap<(String, String), String>,
}

impl Index {
    fn new() -> Self {
        Self {
            by_uid: HashMap::new(),
            uid_by_name: HashMap::new(),
        }
    }

    fn apply(&mut self, view: PodView) {
        let key = (view.namespace.clone(), view.name.clone());
        self.uid_by_name.insert(key, view.uid.clone());
        self.by_uid.insert(view.uid.clone(), view);
    }

    fn remove(&mut self, pod: &Pod) {
        if let Some(uid) = &pod.metadata.uid {
            self.by_uid.remove(uid);
        }
        if let (Some(namespace), Some(name)) = (&pod.metadata.namespace, &pod.metadata.name) {
            self.uid_by_name
                .remove(&(namespace.clone(), name.clone()));
        }
    }
}

/// Node-scoped, UID-indexed pod cache fed by a `kube::runtime::watcher`
/// stream. Self-healing: watch disconnects trigger the underlying
/// watcher's relist+rewatch with bounded backoff automatically.
pub struct PodCache {
    api: Api<Pod>,
    node_name: String,
    resync_period: Duration,
    index: RwLock<Index>,
    synced: AtomicBool,
    logger: Logger,
}

impl PodCache {
    pub fn new(client: Client, node_name: String, resync_period: Duration, logger: Logger) -> Self {
        Self {
            api: Api::all(client),
            node_name,
            resync_period,
            index: RwLock::new(Index::new()),
            synced: AtomicBool::new(false),
            logger,
        }
    }

    /// Drives the watch loop and applies add/update/delete events to the
    /// index until `stop` is cancelled. Blocking in the sense that it does
    /// not return until cancellation or an unrecoverable stream error.
    pub async fn start(&self, stop: CancellationToken) -> Result<(), CacheError> {
        let config = watcher::Config {
            field_selector: Some(format!("spec.nodeName={}", self.node_name)),
            ..watcher::Config::default()
        };

        let stream = watcher::watcher(self.api.clone(), config);
        tokio::pin!(stream);

        // Independent of the watcher's own relist/backoff, periodically
        // surface how stale the cache looks so an operator watching logs
        // doesn't have to infer it from silence.
        let mut housekeeping = tokio::time::interval(self.resync_period);
        housekeeping.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!(self.logger, "pod cache watch loop cancelled");
                    return Ok(());
                }
                _ = housekeeping.tick() => {
                    debug!(self.logger, "pod cache status";
                        "synced" => self.synced.load(Ordering::SeqCst),
                        "pods" => self.index.read().unwrap().by_uid.len());
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(watcher::Event::Apply(pod) | watcher::Event::InitApply(pod))) => {
                            if let Some(view) = PodView::from_pod(&pod) {
                                self.index.write().unwrap().apply(view);
                            }
                        }
                        Some(Ok(watcher::Event::Delete(pod))) => {
                            self.index.write().unwrap().remove(&pod);
                        }
                        Some(Ok(watcher::Event::Init)) => {
                            debug!(self.logger, "pod cache relisting");
                        }
                        Some(Ok(watcher::Event::InitDone)) => {
                            self.synced.store(true, Ordering::SeqCst);
                            info!(self.logger, "pod cache initial sync complete";
                                "pods" => self.index.read().unwrap().by_uid.len());
                        }
                        Some(Err(err)) => {
                            warn!(self.logger, "pod cache watch error, will retry"; "error" => %err);
                        }
                        None => {
                            warn!(self.logger, "pod cache watch stream ended");
                            return Err(CacheError::StreamEnded);
                        }
                    }
                }
            }
        }
    }

    /// Blocks until the initial list has been applied, or `stop` fires.
    /// Returns `false` on cancellation. The reconciler must not run before
    /// this returns `true` — early ticks would otherwise see an empty
    /// cache and skip every candidate.
    pub async fn wait_for_initial_sync(&self, stop: CancellationToken) -> bool {
        loop {
            if self.synced.load(Ordering::SeqCst) {
                return true;
            }
            tokio::select! {
                _ = stop.cancelled() => return false,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// `O(1)` cache read, never blocks on the network. A pod may be found
    /// by one lookup and missing by the next; callers must not assume
    /// stability across calls.
    pub fn get_by_uid(&self, uid: &str) -> Option<PodView> {
        self.index.read().unwrap().by_uid.get(uid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pod(uid: &str, ns: &str, name: &str, deleting: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                deletion_timestamp: if deleting {
                    Some(Time(chrono::Utc::now()))
                } else {
                    None
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn index_apply_then_remove_round_trips() {
        let mut index = Index::new();
        let p = pod("uid-1", "default", "a", false);
        index.apply(PodView::from_pod(&p).unwrap());
        assert!(index.by_uid.contains_key("uid-1"));
        index.remove(&p);
        assert!(!index.by_uid.contains_key("uid-1"));
        assert!(!index.uid_by_name.contains_key(&("default".to_string(), "a".to_string())));
    }

    #[test]
    fn pod_view_carries_deletion_timestamp() {
        let p = pod("uid-2", "default", "b", true);
        let view = PodView::from_pod(&p).unwrap();
        assert!(view.deletion_timestamp.is_some());
    }

    #[test]
    fn pod_view_none_without_uid() {
        let mut p = pod("uid-3", "default", "c", false);
        p.metadata.uid = None;
        assert!(PodView::from_pod(&p).is_none());
    }
}
