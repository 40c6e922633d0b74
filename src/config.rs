//! CLI / environment configuration surface.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::errors::StartupError;

#[derive(Parser, Debug)]
pub struct LoggingOpts {
    /// A level of verbosity, and can be used multiple times
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Enable all logging
    #[clap(short, long)]
    pub debug: bool,

    /// Disable everything but error logging
    #[clap(short, long)]
    pub error: bool,
}

#[derive(Parser, Debug)]
#[clap(author, about, version)]
pub struct Opts {
    #[clap(flatten)]
    pub args: ReconcilerArgs,
    #[clap(flatten)]
    pub logging_opts: LoggingOpts,
}

#[derive(Parser, Debug, Clone)]
pub struct ReconcilerArgs {
    /// Node to watch; only pods scheduled here are considered.
    #[clap(long, env = "NODE_NAME")]
    pub node_name: String,

    /// Reconcile tick period. Rejected if below 1s.
    #[clap(long, default_value = "1s")]
    pub poll_interval: String,

    /// Per-pod swap percentage above which the pod becomes a deletion candidate.
    #[clap(long, default_value = "1.0")]
    pub swap_threshold_percent: f64,

    /// Root of the cgroup v2 filesystem.
    #[clap(long, default_value = "/sys/fs/cgroup")]
    pub cgroup_root: PathBuf,

    /// When true, log and emit events as if deleting but issue no delete calls.
    #[clap(long, default_value = "true")]
    pub dry_run: bool,

    /// Bind address for the /metrics and /healthz HTTP server.
    #[clap(long, default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: SocketAddr,

    /// Namespaces that are never deleted from, comma-separated.
    #[clap(long, default_value = "kube-system", value_delimiter = ',')]
    pub protected_namespaces: Vec<String>,

    /// Path to a kubeconfig file. Empty uses in-cluster credentials.
    #[clap(long, env = "KUBECONFIG", default_value = "")]
    pub kubeconfig_path: String,

    /// Pod cache relist period.
    #[clap(long, default_value = "10m")]
    pub resync_period: String,

    /// Name this agent identifies itself with in events and logs.
    #[clap(long, default_value = "soomkiller")]
    pub agent_name: String,
}

/// Validated, resolved configuration handed to the components.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub node_name: String,
    pub poll_interval: Duration,
    pub swap_threshold_percent: f64,
    pub cgroup_root: PathBuf,
    pub dry_run: bool,
    pub metrics_bind_address: SocketAddr,
    pub protected_namespaces: BTreeSet<String>,
    pub kubeconfig_path: Option<String>,
    pub resync_period: Duration,
    pub agent_name: String,
}

impl ReconcilerArgs {
    /// Validate and resolve into the config type components actually use.
    ///
    /// A bad value here is a fatal precondition: the process exits before
    /// any component is constructed.
    pub fn resolve(self) -> Result<ReconcilerConfig, StartupError> {
        if self.node_name.trim().is_empty() {
            return Err(StartupError::Config("node name must not be empty".into()));
        }

        let poll_interval = parse_duration::parse(&self.poll_interval)
            .map_err(|e| StartupError::Config(format!("invalid poll_interval: {e}")))?;
        if poll_interval < Duration::from_secs(1) {
            return Err(StartupError::Config(
                "poll_interval must be at least 1s".into(),
            ));
        }

        let resync_period = parse_duration::parse(&self.resync_period)
            .map_err(|e| StartupError::Config(format!("invalid resync_period: {e}")))?;

        if self.swap_threshold_percent < 0.0 {
            return Err(StartupError::Config(
                "swap_threshold_percent must be non-negative".into(),
            ));
        }

        let kubeconfig_path = if self.kubeconfig_path.trim().is_empty() {
            None
        } else {
            Some(self.kubeconfig_path)
        };

        Ok(ReconcilerConfig {
            node_name: self.node_name,
            poll_interval,
            swap_threshold_percent: self.swap_threshold_percent,
            cgroup_root: self.cgroup_root,
            dry_run: self.dry_run,
            metrics_bind_address: self.metrics_bind_address,
            protected_namespaces: self.protected_namespaces.into_iter().collect(),
            kubeconfig_path,
            resync_period,
            agent_name: self.agent_name,
        })
    }
}
