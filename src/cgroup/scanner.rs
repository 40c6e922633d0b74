//! Filesystem walk and file reads that make up the Cgroup Scanner (C1).
//! Holds no state; safe to call concurrently from the reconciler tick and
//! the metrics scrape handler since both only perform reads.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use slog::{debug, warn, Logger};

use crate::errors::ScannerError;

use super::metrics::{parse_integer_file, parse_memory_max, parse_psi, parse_vmstat};
use super::{ContainerMetrics, SwapIoCounters};

/// Cap on how many unrecognized `.scope` example paths are kept per scan,
/// so a misconfigured node doesn't flood the log.
const UNRECOGNIZED_EXAMPLE_CAP: usize = 10;

/// Output of one `find_pod_cgroups` walk: container scopes classified by
/// runtime-prefix recognition.
#[derive(Debug, Default, Clone)]
pub struct CgroupScan {
    /// Absolute paths to recognized container `.scope` directories.
    pub recognized: Vec<PathBuf>,
    /// A capped sample of `.scope` directories with an unrecognized prefix.
    pub unrecognized: Vec<PathBuf>,
}

#[derive(Clone)]
pub struct Scanner {
    cgroup_root: PathBuf,
    logger: Logger,
}

impl Scanner {
    pub fn new(cgroup_root: PathBuf, logger: Logger) -> Self {
        Self {
            cgroup_root,
            logger,
        }
    }

    fn kubepods_root(&self) -> PathBuf {
        self.cgroup_root.join("kubepods.slice")
    }

    /// Checks the three startup preconditions: unified hierarchy, systemd
    /// cgroup driver, swap accounting enabled. Fails fast with a specific
    /// error identifying which one is missing.
    pub fn validate_environment(&self) -> Result<(), ScannerError> {
        let controllers = self.cgroup_root.join("cgroup.controllers");
        if !controllers.exists() {
            return Err(ScannerError::LegacyHierarchy {
                root: self.cgroup_root.clone(),
            });
        }

        let kubepods = self.kubepods_root();
        if !kubepods.exists() {
            return Err(ScannerError::MissingSlice { path: kubepods });
        }

        let swap_max = kubepods.join("memory.swap.max");
        if !swap_max.exists() {
            return Err(ScannerError::SwapAccountingDisabled { path: swap_max });
        }

        Ok(())
    }

    /// Walk the subtree rooted at `kubepods.slice`, classifying every
    /// directory ending in `.scope` by runtime prefix. Per-entry walk
    /// errors are swallowed (logged at debug); a read error on the root is
    /// fatal.
    pub fn find_pod_cgroups(&self) -> Result<CgroupScan, ScannerError> {
        let root = self.kubepods_root();
        let mut scan = CgroupScan::default();
        let mut stack: VecDeque<PathBuf> = VecDeque::new();
        stack.push_back(root.clone());

        let mut root_read = true;
        while let Some(dir) = stack.pop_back() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(source) => {
                    if root_read {
                        return Err(ScannerError::RootReadFailed { path: dir, source });
                    }
                    debug!(self.logger, "failed to walk cgroup subdirectory"; "path" => %dir.display(), "error" => %source);
                    continue;
                }
            };
            root_read = false;

            for entry in entries.flatten() {
                let path = entry.path();
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }

                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if file_name.ends_with(".scope") {
                    let path_str = path.to_string_lossy();
                    if super::extract_container_id(&path_str).is_some() {
                        scan.recognized.push(path);
                    } else if scan.unrecognized.len() < UNRECOGNIZED_EXAMPLE_CAP {
                        scan.unrecognized.push(path);
                    }
                    continue;
                }

                stack.push_back(path);
            }
        }

        if !scan.unrecognized.is_empty() {
            warn!(self.logger, "found cgroup scopes with an unrecognized runtime prefix";
                "count" => scan.unrecognized.len(),
                "examples" => format!("{:?}", scan.unrecognized.iter().take(UNRECOGNIZED_EXAMPLE_CAP).collect::<Vec<_>>()));
        }

        Ok(scan)
    }

    /// Read the four accounting files for one container cgroup. Any read
    /// error fails the whole call — the reconciler skips this container.
    pub fn get_container_metrics(&self, path: &Path) -> Result<ContainerMetrics, ScannerError> {
        let swap_current = self.read_integer_file(path, "memory.swap.current")?;
        let memory_current = self.read_integer_file(path, "memory.current")?;
        let memory_max_path = path.join("memory.max");
        let memory_max_contents = std::fs::read_to_string(&memory_max_path).map_err(|source| {
            ScannerError::FileReadFailed {
                path: memory_max_path.clone(),
                source,
            }
        })?;
        let memory_max = parse_memory_max(&memory_max_path, &memory_max_contents)?;

        let pressure_path = path.join("memory.pressure");
        let pressure_contents = std::fs::read_to_string(&pressure_path).map_err(|source| {
            ScannerError::FileReadFailed {
                path: pressure_path.clone(),
                source,
            }
        })?;
        let psi = parse_psi(&pressure_contents);

        Ok(ContainerMetrics {
            swap_current_bytes: swap_current,
            memory_current_bytes: memory_current,
            memory_max_bytes: memory_max,
            psi,
        })
    }

    fn read_integer_file(&self, path: &Path, file_name: &str) -> Result<u64, ScannerError> {
        let full = path.join(file_name);
        let contents =
            std::fs::read_to_string(&full).map_err(|source| ScannerError::FileReadFailed {
                path: full.clone(),
                source,
            })?;
        parse_integer_file(&full, &contents)
    }

    /// Parse `/proc/vmstat` for cumulative swap-in/swap-out page counters.
    /// Observability only; never participates in the eviction decision.
    pub fn get_swap_io_stats(&self) -> SwapIoCounters {
        match std::fs::read_to_string("/proc/vmstat") {
            Ok(contents) => parse_vmstat(&contents),
            Err(source) => {
                warn!(self.logger, "failed to read /proc/vmstat, reporting zero"; "error" => %source);
                SwapIoCounters::default()
            }
        }
    }
}
