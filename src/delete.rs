//! C4: Deletion Path — emits an observable `Soomkilled` event and issues a
//! graceful delete request through the orchestrator. Idempotent: a
//! `NotFound` response is treated as success because someone else may have
//! already deleted the pod, but it is never counted as a fresh kill —
//! otherwise a pod re-submitted on a later tick against a stale view would
//! double-count `pods_killed_total`.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use slog::{info, warn, Logger};

use crate::errors::DeleteError;
use crate::reconciler::{PodCandidate, PodLookup, Terminator};
use crate::telemetry::Counters;

const EVENT_REASON: &str = "Soomkilled";

/// The orchestrator calls this path actually issues, abstracted the same way
/// `PodLookup`/`Terminator` are in the reconciler so the dry-run
/// short-circuit and the NotFound handling can be exercised without a live
/// API server.
#[async_trait::async_trait]
trait DeleteBackend: Send + Sync {
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;
    async fn create_event(&self, namespace: &str, event: Event) -> Result<(), kube::Error>;
}

struct KubeBackend {
    client: Client,
}

#[async_trait::async_trait]
impl DeleteBackend for KubeBackend {
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_event(&self, namespace: &str, event: Event) -> Result<(), kube::Error> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        events.create(&PostParams::default(), &event).await?;
        Ok(())
    }
}

pub struct DeletionPath {
    backend: Box<dyn DeleteBackend>,
    cache: Arc<dyn PodLookup>,
    dry_run: bool,
    node_name: String,
    agent_name: String,
    logger: Logger,
    counters: Arc<Counters>,
}

impl DeletionPath {
    pub fn new(
        client: Client,
        cache: Arc<dyn PodLookup>,
        dry_run: bool,
        node_name: String,
        agent_name: String,
        logger: Logger,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            backend: Box::new(KubeBackend { client }),
            cache,
            dry_run,
            node_name,
            agent_name,
            logger,
            counters,
        }
    }

    async fn emit_event(&self, candidate: &PodCandidate) {
        let Some(view) = self.cache.get_by_uid(&candidate.uid) else {
            // The pod may be intermittently visible; proceed with deletion
            // regardless, we just can't attach an event to it.
            warn!(self.logger, "pod not found in cache while emitting event, skipping event";
                "uid" => %candidate.uid);
            return;
        };

        let message = format!(
            "Pod {} deleted by {} on node {}: swap usage {:.1}%",
            view.name, self.agent_name, self.node_name, candidate.swap_percent
        );

        let now = Time(chrono::Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-soomkilled-", view.name)),
                namespace: Some(view.namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                namespace: Some(view.namespace.clone()),
                name: Some(view.name.clone()),
                uid: Some(view.uid.clone()),
                ..Default::default()
            },
            reason: Some(EVENT_REASON.to_string()),
            message: Some(message),
            type_: Some("Warning".to_string()),
            source: Some(EventSource {
                component: Some(self.agent_name.clone()),
                host: Some(self.node_name.clone()),
            }),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now.clone()),
            event_time: None,
            count: Some(1),
            ..Default::default()
        };

        if let Err(source) = self.backend.create_event(&view.namespace, event).await {
            // Best-effort: failure to emit never blocks the delete.
            let err = DeleteError::EventFailed {
                namespace: view.namespace.clone(),
                name: view.name.clone(),
                source,
            };
            warn!(self.logger, "failed to emit Soomkilled event"; "error" => %err);
            self.counters.record_event_error();
        }
    }

    async fn delete(&self, candidate: &PodCandidate) {
        match self.backend.delete_pod(&candidate.namespace, &candidate.name).await {
            Ok(()) => {
                info!(self.logger, "deleted pod";
                    "namespace" => %candidate.namespace, "pod" => %candidate.name,
                    "swap_percent" => candidate.swap_percent);
                self.counters.record_kill(chrono::Utc::now().timestamp());
            }
            Err(err) if is_not_found(&err) => {
                // Someone else already deleted it (or we did, on a prior
                // tick against a now-stale cgroup view). Treated as success
                // but not as a fresh kill.
                info!(self.logger, "pod already gone, treating delete as success";
                    "namespace" => %candidate.namespace, "pod" => %candidate.name);
            }
            Err(source) => {
                // Not retried within this tick; the next tick re-observes
                // the same cgroup state and re-queues the candidate.
                let err = DeleteError::DeleteFailed {
                    namespace: candidate.namespace.clone(),
                    name: candidate.name.clone(),
                    source,
                };
                warn!(self.logger, "delete failed"; "error" => %err);
                self.counters.record_delete_error();
            }
        }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait::async_trait]
impl Terminator for DeletionPath {
    async fn terminate(&self, candidate: &PodCandidate) {
        if self.dry_run {
            info!(self.logger, "would delete";
                "namespace" => %candidate.namespace, "pod" => %candidate.name,
                "swap_percent" => candidate.swap_percent);
            return;
        }

        self.emit_event(candidate).await;
        self.delete(candidate).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PodView;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn candidate() -> PodCandidate {
        PodCandidate {
            uid: "uid-a".to_string(),
            namespace: "default".to_string(),
            name: "a".to_string(),
            swap_percent: 42.0,
        }
    }

    struct FakeCache(HashMap<String, PodView>);

    impl PodLookup for FakeCache {
        fn get_by_uid(&self, uid: &str) -> Option<PodView> {
            self.0.get(uid).cloned()
        }
    }

    fn cache_with(candidate: &PodCandidate) -> Arc<dyn PodLookup> {
        let mut map = HashMap::new();
        map.insert(
            candidate.uid.clone(),
            PodView {
                uid: candidate.uid.clone(),
                namespace: candidate.namespace.clone(),
                name: candidate.name.clone(),
                qos_class: Some("Burstable".to_string()),
                deletion_timestamp: None,
            },
        );
        Arc::new(FakeCache(map))
    }

    /// Records calls and, if configured, returns a canned error from
    /// `delete_pod` so the NotFound branch can be driven without a live
    /// API server.
    #[derive(Default)]
    struct RecordingBackend {
        delete_calls: Arc<AtomicUsize>,
        event_calls: Arc<AtomicUsize>,
        delete_result: Mutex<Option<kube::Error>>,
    }

    fn not_found_error() -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "pods \"a\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        })
    }

    fn conflict_error() -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "conflict".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        })
    }

    #[async_trait::async_trait]
    impl DeleteBackend for RecordingBackend {
        async fn delete_pod(&self, _namespace: &str, _name: &str) -> Result<(), kube::Error> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            match self.delete_result.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn create_event(&self, _namespace: &str, _event: Event) -> Result<(), kube::Error> {
            self.event_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn path_with_backend(
        backend: RecordingBackend,
        cache: Arc<dyn PodLookup>,
        dry_run: bool,
    ) -> (DeletionPath, Arc<Counters>) {
        let counters = Arc::new(Counters::new());
        let path = DeletionPath {
            backend: Box::new(backend),
            cache,
            dry_run,
            node_name: "node-a".to_string(),
            agent_name: "soomkiller".to_string(),
            logger: logger(),
            counters: counters.clone(),
        };
        (path, counters)
    }

    #[tokio::test]
    async fn dry_run_never_calls_the_backend_or_touches_counters() {
        let candidate = candidate();
        let backend = RecordingBackend::default();
        let delete_calls = backend.delete_calls.clone();
        let event_calls = backend.event_calls.clone();
        let (path, counters) = path_with_backend(backend, cache_with(&candidate), true);

        path.terminate(&candidate).await;

        assert_eq!(delete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(event_calls.load(Ordering::SeqCst), 0);
        assert_eq!(counters.pods_killed_total.load(Ordering::SeqCst), 0);
        assert_eq!(counters.delete_errors_total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_found_counts_as_success_without_incrementing_kills() {
        let candidate = candidate();
        let backend = RecordingBackend {
            delete_result: Mutex::new(Some(not_found_error())),
            ..Default::default()
        };
        let (path, counters) = path_with_backend(backend, cache_with(&candidate), false);

        path.terminate(&candidate).await;

        assert_eq!(counters.pods_killed_total.load(Ordering::SeqCst), 0);
        assert_eq!(counters.delete_errors_total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_delete_increments_kill_counter_once() {
        let candidate = candidate();
        let backend = RecordingBackend::default();
        let (path, counters) = path_with_backend(backend, cache_with(&candidate), false);

        path.terminate(&candidate).await;

        assert_eq!(counters.pods_killed_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_not_found_error_counts_as_delete_failure_not_a_kill() {
        let candidate = candidate();
        let backend = RecordingBackend {
            delete_result: Mutex::new(Some(conflict_error())),
            ..Default::default()
        };
        let (path, counters) = path_with_backend(backend, cache_with(&candidate), false);

        path.terminate(&candidate).await;

        assert_eq!(counters.pods_killed_total.load(Ordering::SeqCst), 0);
        assert_eq!(counters.delete_errors_total.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn is_not_found_matches_only_404() {
        assert!(is_not_found(&not_found_error()));
        assert!(!is_not_found(&conflict_error()));
    }
}
