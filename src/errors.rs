//! Typed error hierarchy, one enum per component boundary.
//!
//! Matches the error taxonomy table in the design doc: fatal preconditions
//! abort startup, everything else is logged at the point it's handled and
//! the caller decides whether to skip a container, skip a candidate, or
//! just keep going.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur validating the environment or walking cgroups.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("cgroup v1 hierarchy detected at {root}: cgroup.controllers is missing, unified hierarchy required")]
    LegacyHierarchy { root: PathBuf },

    #[error("{path} does not exist: is the systemd cgroup driver in use?")]
    MissingSlice { path: PathBuf },

    #[error("{path} does not exist: swap accounting is not enabled for kubepods.slice")]
    SwapAccountingDisabled { path: PathBuf },

    #[error("failed to read cgroup root {path}: {source}")]
    RootReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} did not contain a parseable integer: {value:?}")]
    NotAnInteger { path: PathBuf, value: String },
}

/// Errors surfaced by the pod cache's watch loop.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to build Kubernetes client: {0}")]
    ClientBuild(#[source] kube::Error),

    #[error("watch stream ended unexpectedly")]
    StreamEnded,
}

/// Errors from issuing a delete or event-create call against the orchestrator.
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("delete failed for {namespace}/{name}: {source}")]
    DeleteFailed {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("event creation failed for {namespace}/{name}: {source}")]
    EventFailed {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Top-level error, only ever constructed for conditions that should abort
/// the process before the reconcile loop starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Scanner(#[from] ScannerError),

    #[error("failed to build Kubernetes client: {0}")]
    Client(#[source] kube::Error),
}
