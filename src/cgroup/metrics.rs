//! Parsing for cgroup v2 accounting files and `/proc/vmstat`.

use std::path::Path;

use crate::errors::ScannerError;

use super::UNLIMITED_MEMORY_MAX;

/// One line of PSI (`some` or `full`): fraction of time stalled over three
/// rolling windows plus a cumulative microsecond total.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PsiLine {
    pub avg10: f64,
    pub avg60: f64,
    pub avg300: f64,
    pub total: u64,
}

/// Parsed `memory.pressure`: `some` = at least one task stalled, `full` =
/// all tasks stalled.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PressureStallInfo {
    pub some: PsiLine,
    pub full: PsiLine,
}

/// A point-in-time snapshot for one container cgroup. Reads across the four
/// underlying files are not transactional, so a caller may observe a
/// momentarily inconsistent combination; the reconciler tolerates that.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerMetrics {
    pub swap_current_bytes: u64,
    pub memory_current_bytes: u64,
    /// Normalized to `UNLIMITED_MEMORY_MAX` when the file contains `max`.
    pub memory_max_bytes: u64,
    pub psi: PressureStallInfo,
}

impl ContainerMetrics {
    /// `swap_current / memory_max * 100`, guarding against a zero or
    /// sentinel-unlimited denominator.
    pub fn swap_percent(&self) -> f64 {
        if self.memory_max_bytes == 0 {
            return 0.0;
        }
        (self.swap_current_bytes as f64 / self.memory_max_bytes as f64) * 100.0
    }
}

/// Cumulative, monotone-non-decreasing page counters from `/proc/vmstat`.
/// Observability only — never a trigger for the reconcile loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapIoCounters {
    pub pswpin: u64,
    pub pswpout: u64,
}

/// Parse a cgroup integer-accounting file's contents (e.g.
/// `memory.swap.current`). Plain non-negative integers only.
pub fn parse_integer_file(path: &Path, contents: &str) -> Result<u64, ScannerError> {
    let trimmed = contents.trim();
    trimmed
        .parse::<u64>()
        .map_err(|_| ScannerError::NotAnInteger {
            path: path.to_path_buf(),
            value: trimmed.to_string(),
        })
}

/// Parse `memory.max`, which may be the literal `max` (unlimited).
pub fn parse_memory_max(path: &Path, contents: &str) -> Result<u64, ScannerError> {
    let trimmed = contents.trim();
    if trimmed == "max" {
        return Ok(UNLIMITED_MEMORY_MAX);
    }
    trimmed
        .parse::<u64>()
        .map_err(|_| ScannerError::NotAnInteger {
            path: path.to_path_buf(),
            value: trimmed.to_string(),
        })
}

/// Parse `memory.pressure`'s two-line PSI format:
/// `some avg10=0.00 avg60=0.00 avg300=0.00 total=0`
/// `full avg10=0.00 avg60=0.00 avg300=0.00 total=0`
///
/// Missing or malformed fields default to zero rather than failing the
/// whole read — PSI is secondary to the swap ratio that drives eviction.
pub fn parse_psi(contents: &str) -> PressureStallInfo {
    let mut psi = PressureStallInfo::default();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let kind = match fields.next() {
            Some(k) => k,
            None => continue,
        };
        let parsed = parse_psi_line(fields);
        match kind {
            "some" => psi.some = parsed,
            "full" => psi.full = parsed,
            _ => {}
        }
    }
    psi
}

fn parse_psi_line<'a>(fields: impl Iterator<Item = &'a str>) -> PsiLine {
    let mut line = PsiLine::default();
    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key {
            "avg10" => line.avg10 = value.parse().unwrap_or(0.0),
            "avg60" => line.avg60 = value.parse().unwrap_or(0.0),
            "avg300" => line.avg300 = value.parse().unwrap_or(0.0),
            "total" => line.total = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    line
}

/// Parse `/proc/vmstat` for `pswpin`/`pswpout`. Missing fields yield zero.
pub fn parse_vmstat(contents: &str) -> SwapIoCounters {
    let mut counters = SwapIoCounters::default();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        match key {
            "pswpin" => counters.pswpin = value.parse().unwrap_or(0),
            "pswpout" => counters.pswpout = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    counters
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_plain_integer() {
        let p = PathBuf::from("memory.swap.current");
        assert_eq!(parse_integer_file(&p, "1048576\n").unwrap(), 1_048_576);
    }

    #[test]
    fn rejects_negative_integer() {
        let p = PathBuf::from("memory.swap.current");
        assert!(parse_integer_file(&p, "-1").is_err());
    }

    #[test]
    fn memory_max_literal_is_sentinel() {
        let p = PathBuf::from("memory.max");
        assert_eq!(parse_memory_max(&p, "max\n").unwrap(), UNLIMITED_MEMORY_MAX);
    }

    #[test]
    fn memory_max_zero_is_zero() {
        let p = PathBuf::from("memory.max");
        assert_eq!(parse_memory_max(&p, "0").unwrap(), 0);
    }

    #[test]
    fn memory_max_rejects_negative() {
        let p = PathBuf::from("memory.max");
        assert!(parse_memory_max(&p, "-5").is_err());
    }

    #[test]
    fn swap_percent_guards_zero_denominator() {
        let metrics = ContainerMetrics {
            swap_current_bytes: 100,
            memory_current_bytes: 100,
            memory_max_bytes: 0,
            psi: PressureStallInfo::default(),
        };
        assert_eq!(metrics.swap_percent(), 0.0);
    }

    #[test]
    fn parses_psi_two_lines() {
        let contents = "some avg10=1.50 avg60=2.00 avg300=0.10 total=123\n\
                         full avg10=0.00 avg60=0.00 avg300=0.00 total=0\n";
        let psi = parse_psi(contents);
        assert_eq!(psi.some.avg10, 1.50);
        assert_eq!(psi.some.total, 123);
        assert_eq!(psi.full.avg10, 0.0);
    }

    #[test]
    fn parses_vmstat_fields() {
        let contents = "nr_free_pages 12345\npswpin 7\npswpout 3\nother 0\n";
        let counters = parse_vmstat(contents);
        assert_eq!(counters.pswpin, 7);
        assert_eq!(counters.pswpout, 3);
    }

    #[test]
    fn vmstat_missing_fields_yield_zero() {
        let counters = parse_vmstat("nr_free_pages 12345\n");
        assert_eq!(counters, SwapIoCounters::default());
    }
}
