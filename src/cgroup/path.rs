//! Pure string functions over `CgroupPath`s: QoS class, pod UID, and
//! runtime-prefixed container ID extraction. No filesystem access here —
//! these operate on whatever path string the scanner hands them.

/// QoS class inferred from a cgroup path. Only Burstable pods receive swap
/// under `LimitedSwap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    Guaranteed,
    Burstable,
    BestEffort,
}

impl Qos {
    pub fn as_str(self) -> &'static str {
        match self {
            Qos::Guaranteed => "guaranteed",
            Qos::Burstable => "burstable",
            Qos::BestEffort => "besteffort",
        }
    }
}

/// Container runtimes whose `.scope` prefix this agent recognizes. Anything
/// else is reported as unrecognized rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Containerd,
    Crio,
}

const RUNTIME_PREFIXES: &[(&str, Runtime)] = &[
    ("cri-containerd-", Runtime::Containerd),
    ("crio-", Runtime::Crio),
];

/// Extract the QoS class from a cgroup path. `kubepods-burstable` and
/// `kubepods-besteffort` are matched by substring; a bare `kubepods.slice`
/// with neither implies Guaranteed (no QoS subdirectory).
pub fn extract_qos(path: &str) -> Option<Qos> {
    if path.contains("kubepods-burstable") {
        Some(Qos::Burstable)
    } else if path.contains("kubepods-besteffort") {
        Some(Qos::BestEffort)
    } else if path.contains("kubepods.slice") {
        Some(Qos::Guaranteed)
    } else {
        None
    }
}

/// Extract the pod UID, normalizing underscores to dashes. Takes the
/// substring after the last `-pod` occurrence in the path, up to the next
/// `.` or `/`.
pub fn extract_pod_uid(path: &str) -> Option<String> {
    let idx = path.rfind("-pod")?;
    let rest = &path[idx + "-pod".len()..];
    let end = rest.find(['.', '/']).unwrap_or(rest.len());
    let uid = &rest[..end];
    if uid.is_empty() {
        None
    } else {
        Some(uid.replace('_', "-"))
    }
}

/// Extract the runtime and container ID from the final `.scope` path
/// component. Returns `None` for unrecognized runtime prefixes; callers
/// treat that as "unrecognized", not an error.
pub fn extract_container_id(path: &str) -> Option<(Runtime, String)> {
    let file_name = path.rsplit('/').next()?;
    let body = file_name.strip_suffix(".scope")?;
    for &(prefix, runtime) in RUNTIME_PREFIXES {
        if let Some(id) = body.strip_prefix(prefix) {
            if !id.is_empty() {
                return Some((runtime, id.to_string()));
            }
        }
    }
    None
}
