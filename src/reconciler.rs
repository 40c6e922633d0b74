//! C3: Reconciler — the per-tick algorithm that turns scanner output into
//! deletion decisions. Stateless across ticks by design (see design notes):
//! the presence of resident swap pages is itself the breach signal, so
//! there is no hysteresis, cooldown, or sustained-duration window.

use std::collections::HashMap;
use std::sync::Arc;

use slog::{debug, info, warn, Logger};

use crate::cache::PodView;
use crate::cgroup::{Qos, Scanner};
use crate::config::ReconcilerConfig;

/// Abstraction over the pod cache's read path so the reconciler algorithm
/// can be exercised against a plain in-memory fake in tests, without a
/// live API server.
pub trait PodLookup: Send + Sync {
    fn get_by_uid(&self, uid: &str) -> Option<PodView>;
}

impl PodLookup for crate::cache::PodCache {
    fn get_by_uid(&self, uid: &str) -> Option<PodView> {
        crate::cache::PodCache::get_by_uid(self, uid)
    }
}

/// Abstraction over the deletion path (C4) so the reconciler can be tested
/// without issuing real API calls.
#[async_trait::async_trait]
pub trait Terminator: Send + Sync {
    async fn terminate(&self, candidate: &PodCandidate);
}

/// A reconciler-internal record. Created with only `uid` and `swap_percent`
/// from the scan; `namespace`/`name` are populated only after cache
/// resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PodCandidate {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub swap_percent: f64,
}

/// What happened during one tick, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickOutcome {
    pub acted_on: Vec<PodCandidate>,
    pub skipped_unknown: usize,
    pub skipped_terminating: usize,
    pub skipped_protected: usize,
}

pub struct Reconciler<C: PodLookup, T: Terminator> {
    scanner: Scanner,
    cache: Arc<C>,
    terminator: T,
    config: ReconcilerConfig,
    logger: Logger,
}

impl<C: PodLookup, T: Terminator> Reconciler<C, T> {
    pub fn new(
        scanner: Scanner,
        cache: Arc<C>,
        terminator: T,
        config: ReconcilerConfig,
        logger: Logger,
    ) -> Self {
        Self {
            scanner,
            cache,
            terminator,
            config,
            logger,
        }
    }

    /// Run one scan without acting on it, purely to log cgroup discovery
    /// results and surface unrecognized-runtime warnings before the loop
    /// starts taking action.
    pub fn startup_scan(&self) {
        match self.scanner.find_pod_cgroups() {
            Ok(scan) => {
                info!(self.logger, "startup cgroup discovery";
                    "recognized" => scan.recognized.len(),
                    "unrecognized" => scan.unrecognized.len());
            }
            Err(err) => {
                warn!(self.logger, "startup cgroup scan failed"; "error" => %err);
            }
        }
    }

    /// Step 1+2: scan cgroups, aggregate per-pod max swap ratio, and
    /// partition into over/under threshold. Pure given the filesystem
    /// state at call time.
    fn scan_and_filter(&self) -> HashMap<String, f64> {
        let scan = match self.scanner.find_pod_cgroups() {
            Ok(scan) => scan,
            Err(err) => {
                warn!(self.logger, "cgroup scan failed, skipping this tick"; "error" => %err);
                return HashMap::new();
            }
        };

        let mut ratios: HashMap<String, f64> = HashMap::new();
        for path in &scan.recognized {
            let path_str = path.to_string_lossy();

            if crate::cgroup::extract_qos(&path_str) != Some(Qos::Burstable) {
                continue;
            }

            let uid = match crate::cgroup::extract_pod_uid(&path_str) {
                Some(uid) => uid,
                None => {
                    warn!(self.logger, "could not extract pod uid, skipping"; "path" => %path_str);
                    continue;
                }
            };

            let metrics = match self.scanner.get_container_metrics(path) {
                Ok(metrics) => metrics,
                Err(err) => {
                    warn!(self.logger, "failed to read container metrics, skipping container";
                        "path" => %path_str, "error" => %err);
                    continue;
                }
            };

            if metrics.swap_current_bytes == 0 {
                continue;
            }

            let ratio = metrics.swap_percent();
            ratios
                .entry(uid)
                .and_modify(|max| {
                    if ratio > *max {
                        *max = ratio;
                    }
                })
                .or_insert(ratio);
        }

        let over_threshold: HashMap<String, f64> = ratios
            .into_iter()
            .filter(|(_, ratio)| *ratio > self.config.swap_threshold_percent)
            .collect();

        if over_threshold.is_empty() {
            debug!(self.logger, "no pods over swap threshold this tick");
        }

        over_threshold
    }

    /// Step 3: resolve each over-threshold UID against the cache, applying
    /// the protection and already-terminating filters.
    fn resolve(&self, over_threshold: HashMap<String, f64>) -> (Vec<PodCandidate>, TickOutcome) {
        let mut resolved = Vec::new();
        let mut outcome = TickOutcome::default();

        for (uid, swap_percent) in over_threshold {
            let view = match self.cache.get_by_uid(&uid) {
                Some(view) => view,
                None => {
                    debug!(self.logger, "pod unknown to cache, skipping"; "uid" => %uid);
                    outcome.skipped_unknown += 1;
                    continue;
                }
            };

            if view.deletion_timestamp.is_some() {
                debug!(self.logger, "pod already terminating, skipping";
                    "uid" => %uid, "namespace" => %view.namespace, "pod" => %view.name);
                outcome.skipped_terminating += 1;
                continue;
            }

            if self.config.protected_namespaces.contains(&view.namespace) {
                debug!(self.logger, "namespace protected, skipping";
                    "uid" => %uid, "namespace" => %view.namespace, "pod" => %view.name);
                outcome.skipped_protected += 1;
                continue;
            }

            resolved.push(PodCandidate {
                uid,
                namespace: view.namespace,
                name: view.name,
                swap_percent,
            });
        }

        (resolved, outcome)
    }

    /// Run one full tick: scan, filter, resolve, order, act.
    pub async fn tick(&self) -> TickOutcome {
        let over_threshold = self.scan_and_filter();
        let (mut resolved, mut outcome) = self.resolve(over_threshold);

        // Step 4: deterministic descending order by swap_percent, tie-break
        // lexicographically by UID.
        resolved.sort_by(|a, b| {
            b.swap_percent
                .partial_cmp(&a.swap_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.uid.cmp(&b.uid))
        });

        // Step 5: act. Per-candidate failures do not abort the tick.
        for candidate in &resolved {
            self.terminator.terminate(candidate).await;
        }

        outcome.acted_on = resolved;
        outcome
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    pub struct FakeCache(pub Map<String, PodView>);

    impl PodLookup for FakeCache {
        fn get_by_uid(&self, uid: &str) -> Option<PodView> {
            self.0.get(uid).cloned()
        }
    }

    #[derive(Default)]
    pub struct RecordingTerminator {
        pub calls: Mutex<Vec<PodCandidate>>,
    }

    #[async_trait::async_trait]
    impl Terminator for RecordingTerminator {
        async fn terminate(&self, candidate: &PodCandidate) {
            self.calls.lock().unwrap().push(candidate.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::cgroup::Scanner;
    use std::collections::HashMap as Map;
    use std::fs;
    use std::net::SocketAddr;
    use std::path::Path;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn base_config() -> ReconcilerConfig {
        ReconcilerConfig {
            node_name: "node-a".into(),
            poll_interval: std::time::Duration::from_secs(1),
            swap_threshold_percent: 10.0,
            cgroup_root: std::path::PathBuf::new(),
            dry_run: false,
            metrics_bind_address: "0.0.0.0:8080".parse::<SocketAddr>().unwrap(),
            protected_namespaces: ["kube-system".to_string()].into_iter().collect(),
            kubeconfig_path: None,
            resync_period: std::time::Duration::from_secs(600),
            agent_name: "soomkiller".into(),
        }
    }

    fn write_container(dir: &Path, swap: u64, mem_max: u64) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("memory.swap.current"), swap.to_string()).unwrap();
        fs::write(dir.join("memory.current"), "0").unwrap();
        fs::write(dir.join("memory.max"), mem_max.to_string()).unwrap();
        fs::write(
            dir.join("memory.pressure"),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=0\nfull avg10=0.00 avg60=0.00 avg300=0.00 total=0\n",
        )
        .unwrap();
    }

    fn pod_view(uid: &str, namespace: &str, name: &str, terminating: bool) -> PodView {
        PodView {
            uid: uid.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            qos_class: Some("Burstable".to_string()),
            deletion_timestamp: if terminating {
                Some(chrono::Utc::now())
            } else {
                None
            },
        }
    }

    async fn run_tick(
        root: &Path,
        config: ReconcilerConfig,
        cache: Map<String, PodView>,
    ) -> (TickOutcome, Vec<PodCandidate>) {
        let scanner = Scanner::new(root.to_path_buf(), logger());
        let cache = Arc::new(FakeCache(cache));
        let terminator = RecordingTerminator::default();
        let reconciler = Reconciler::new(scanner, cache, terminator, config, logger());
        let outcome = reconciler.tick().await;
        let calls = reconciler.terminator.calls.lock().unwrap().clone();
        (outcome, calls)
    }

    #[tokio::test]
    async fn s1_only_burstable_over_threshold_is_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let kubepods = tmp.path().join("kubepods.slice");

        let burstable = kubepods
            .join("kubepods-burstable.slice")
            .join("kubepods-burstable-poduid-a.slice");
        write_container(&burstable.join("cri-containerd-a1.scope"), 100 * 1024 * 1024, 512 * 1024 * 1024);

        let guaranteed = kubepods.join("kubepods-poduid-b.slice");
        write_container(&guaranteed.join("cri-containerd-b1.scope"), 100 * 1024 * 1024, 512 * 1024 * 1024);

        let besteffort = kubepods
            .join("kubepods-besteffort.slice")
            .join("kubepods-besteffort-poduid-c.slice");
        write_container(&besteffort.join("cri-containerd-c1.scope"), 100 * 1024 * 1024, 0);

        let mut cache = Map::new();
        cache.insert("uid-a".to_string(), pod_view("uid-a", "default", "a", false));
        cache.insert("uid-b".to_string(), pod_view("uid-b", "default", "b", false));
        cache.insert("uid-c".to_string(), pod_view("uid-c", "default", "c", false));

        let (outcome, calls) = run_tick(tmp.path(), base_config(), cache).await;
        assert_eq!(outcome.acted_on.len(), 1);
        assert_eq!(outcome.acted_on[0].name, "a");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "a");
    }

    #[tokio::test]
    async fn s2_only_pod_over_threshold_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let kubepods = tmp.path().join("kubepods.slice");
        let base = kubepods.join("kubepods-burstable.slice");

        write_container(
            &base.join("kubepods-burstable-poduid-a.slice").join("cri-containerd-a1.scope"),
            5 * 1024 * 1024,
            512 * 1024 * 1024,
        );
        write_container(
            &base.join("kubepods-burstable-poduid-d.slice").join("cri-containerd-d1.scope"),
            100 * 1024 * 1024,
            512 * 1024 * 1024,
        );

        let mut cache = Map::new();
        cache.insert("uid-a".to_string(), pod_view("uid-a", "default", "a", false));
        cache.insert("uid-d".to_string(), pod_view("uid-d", "default", "d", false));

        let (outcome, _) = run_tick(tmp.path(), base_config(), cache).await;
        assert_eq!(outcome.acted_on.len(), 1);
        assert_eq!(outcome.acted_on[0].name, "d");
    }

    #[tokio::test]
    async fn s3_multi_container_pod_uses_max_ratio() {
        let tmp = tempfile::tempdir().unwrap();
        let kubepods = tmp.path().join("kubepods.slice");
        let pod_dir = kubepods
            .join("kubepods-burstable.slice")
            .join("kubepods-burstable-poduid-a.slice");

        write_container(&pod_dir.join("cri-containerd-c1.scope"), 50 * 1024 * 1024, 256 * 1024 * 1024);
        write_container(&pod_dir.join("cri-containerd-c2.scope"), 100 * 1024 * 1024, 512 * 1024 * 1024);

        let mut cache = Map::new();
        cache.insert("uid-a".to_string(), pod_view("uid-a", "default", "a", false));

        let (outcome, _) = run_tick(tmp.path(), base_config(), cache).await;
        assert_eq!(outcome.acted_on.len(), 1);
        let pct = outcome.acted_on[0].swap_percent;
        assert!((pct - 19.53125).abs() < 0.01);
    }

    #[tokio::test]
    async fn s4_protected_namespace_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let kubepods = tmp.path().join("kubepods.slice");
        let pod_dir = kubepods
            .join("kubepods-burstable.slice")
            .join("kubepods-burstable-poduid-a.slice");
        write_container(&pod_dir.join("cri-containerd-a1.scope"), 200 * 1024 * 1024, 256 * 1024 * 1024);

        let mut cache = Map::new();
        cache.insert("uid-a".to_string(), pod_view("uid-a", "kube-system", "a", false));

        let mut config = base_config();
        config.swap_threshold_percent = 1.0;
        let (outcome, calls) = run_tick(tmp.path(), config, cache).await;
        assert_eq!(outcome.acted_on.len(), 0);
        assert_eq!(outcome.skipped_protected, 1);
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn s5_already_terminating_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let kubepods = tmp.path().join("kubepods.slice");
        let pod_dir = kubepods
            .join("kubepods-burstable.slice")
            .join("kubepods-burstable-poduid-a.slice");
        write_container(&pod_dir.join("cri-containerd-a1.scope"), 200 * 1024 * 1024, 256 * 1024 * 1024);

        let mut cache = Map::new();
        cache.insert("uid-a".to_string(), pod_view("uid-a", "default", "a", true));

        let mut config = base_config();
        config.swap_threshold_percent = 1.0;
        let (outcome, _) = run_tick(tmp.path(), config, cache).await;
        assert_eq!(outcome.acted_on.len(), 0);
        assert_eq!(outcome.skipped_terminating, 1);
    }

    #[tokio::test]
    async fn s7_unrecognized_runtime_yields_no_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        let kubepods = tmp.path().join("kubepods.slice");
        let pod_dir = kubepods
            .join("kubepods-burstable.slice")
            .join("kubepods-burstable-poduid-a.slice");
        write_container(&pod_dir.join("docker-a1.scope"), 200 * 1024 * 1024, 256 * 1024 * 1024);

        let cache = Map::new();
        let (outcome, _) = run_tick(tmp.path(), base_config(), cache).await;
        assert_eq!(outcome.acted_on.len(), 0);
    }

    #[tokio::test]
    async fn candidate_with_zero_swap_never_enumerated() {
        let tmp = tempfile::tempdir().unwrap();
        let kubepods = tmp.path().join("kubepods.slice");
        let pod_dir = kubepods
            .join("kubepods-burstable.slice")
            .join("kubepods-burstable-poduid-a.slice");
        write_container(&pod_dir.join("cri-containerd-a1.scope"), 0, 256 * 1024 * 1024);

        let mut cache = Map::new();
        cache.insert("uid-a".to_string(), pod_view("uid-a", "default", "a", false));
        let (outcome, _) = run_tick(tmp.path(), base_config(), cache).await;
        assert_eq!(outcome.acted_on.len(), 0);
    }
}
