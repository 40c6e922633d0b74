//! C1: Cgroup Scanner — translates kernel cgroup v2 accounting state into
//! `(cgroup_path, ContainerMetrics)` pairs. Operates without orchestrator
//! API access; the only side effect is filesystem reads.

mod metrics;
mod path;
mod scanner;

pub use metrics::{ContainerMetrics, PressureStallInfo, PsiLine, SwapIoCounters};
pub use path::{extract_container_id, extract_pod_uid, extract_qos, Qos};
pub use scanner::{CgroupScan, Scanner};

/// Sentinel used for `memory.max == "max"` (unlimited). Chosen well above any
/// real memory.max value so ratio computation naturally yields ~0%.
pub const UNLIMITED_MEMORY_MAX: u64 = 1 << 62;
