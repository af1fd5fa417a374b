//! Process resource limits for runner processes.
//!
//! Limits are applied once, at process start, and are best-effort: a limit
//! the platform refuses is logged at `warn` and skipped. Limits are only ever
//! tightened; an existing hard limit lower than the requested one is kept.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Resource limits applied to a runner process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU time soft limit in seconds. The hard limit is one second more so
    /// `SIGXCPU` arrives before `SIGKILL`.
    pub cpu_seconds: u64,
    /// Maximum address space in bytes.
    pub address_space_bytes: u64,
    /// Maximum size of any file the process may write.
    pub file_size_bytes: u64,
    /// Maximum number of new processes.
    pub max_processes: u64,
    /// Maximum number of open file descriptors (stdio plus the program file).
    pub max_open_files: u64,
    /// Core dump size.
    pub core_bytes: u64,
    /// Live-heap budget checked by the interpreter, which raises
    /// `MemoryError` past it. Kept well under `address_space_bytes` so the
    /// error line is written before the allocator itself fails. Zero
    /// disables the check.
    pub heap_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_seconds: 1,
            address_space_bytes: 256 * 1024 * 1024,
            file_size_bytes: 0,
            max_processes: 0,
            max_open_files: 4,
            core_bytes: 0,
            heap_bytes: 96 * 1024 * 1024,
        }
    }
}

/// One resource limit in `(name, soft, hard)` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitEntry {
    pub name: &'static str,
    pub soft: u64,
    pub hard: u64,
}

impl ResourceLimits {
    /// The limits in application order.
    pub fn entries(&self) -> Vec<LimitEntry> {
        let same = |name, value| LimitEntry {
            name,
            soft: value,
            hard: value,
        };
        vec![
            LimitEntry {
                name: "RLIMIT_CPU",
                soft: self.cpu_seconds,
                hard: self.cpu_seconds.saturating_add(1),
            },
            same("RLIMIT_AS", self.address_space_bytes),
            same("RLIMIT_FSIZE", self.file_size_bytes),
            same("RLIMIT_NPROC", self.max_processes),
            same("RLIMIT_NOFILE", self.max_open_files),
            same("RLIMIT_CORE", self.core_bytes),
        ]
    }

    /// Apply every limit to the current process. Returns the names of the
    /// limits that could not be applied.
    pub fn apply(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for entry in self.entries() {
            match os::set_limit(entry) {
                Ok(()) => debug!(limit = entry.name, soft = entry.soft, hard = entry.hard, "limit applied"),
                Err(err) => {
                    warn!(limit = entry.name, soft = entry.soft, hard = entry.hard, error = %err, "failed to apply resource limit");
                    failed.push(entry.name);
                }
            }
        }
        failed
    }
}

// ---------------------------------------------------------------------------
// CPU limit notification
// ---------------------------------------------------------------------------

static CPU_LINE_PTR: AtomicPtr<u8> = AtomicPtr::new(std::ptr::null_mut());
static CPU_LINE_LEN: AtomicUsize = AtomicUsize::new(0);

/// Install a `SIGXCPU` handler that writes `line` to stdout and exits with
/// status 1. `line` must be a complete protocol line including the newline.
pub fn install_cpu_limit_handler(line: &'static [u8]) {
    CPU_LINE_LEN.store(line.len(), Ordering::SeqCst);
    CPU_LINE_PTR.store(line.as_ptr() as *mut u8, Ordering::SeqCst);
    os::install_sigxcpu();
}

#[cfg(unix)]
mod os {
    use super::{LimitEntry, CPU_LINE_LEN, CPU_LINE_PTR};
    use std::sync::atomic::Ordering;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    fn resource(name: &str) -> Option<Resource> {
        Some(match name {
            "RLIMIT_CPU" => libc::RLIMIT_CPU,
            "RLIMIT_AS" => libc::RLIMIT_AS,
            "RLIMIT_FSIZE" => libc::RLIMIT_FSIZE,
            "RLIMIT_NPROC" => libc::RLIMIT_NPROC,
            "RLIMIT_NOFILE" => libc::RLIMIT_NOFILE,
            "RLIMIT_CORE" => libc::RLIMIT_CORE,
            _ => return None,
        })
    }

    pub(super) fn set_limit(entry: LimitEntry) -> std::io::Result<()> {
        let Some(res) = resource(entry.name) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unknown resource",
            ));
        };

        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `current` is a valid, writable rlimit.
        if unsafe { libc::getrlimit(res, &mut current) } != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let cap = |v: u64| -> libc::rlim_t {
            let v = v as libc::rlim_t;
            if current.rlim_max == libc::RLIM_INFINITY {
                v
            } else {
                v.min(current.rlim_max)
            }
        };
        let hard = cap(entry.hard);
        let limit = libc::rlimit {
            rlim_cur: cap(entry.soft).min(hard),
            rlim_max: hard,
        };
        // SAFETY: `limit` is a valid rlimit.
        if unsafe { libc::setrlimit(res, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    extern "C" fn on_sigxcpu(_sig: libc::c_int) {
        // Only async-signal-safe calls here: write(2) and _exit(2).
        let ptr = CPU_LINE_PTR.load(Ordering::SeqCst);
        let len = CPU_LINE_LEN.load(Ordering::SeqCst);
        unsafe {
            if !ptr.is_null() {
                libc::write(1, ptr as *const libc::c_void, len);
            }
            libc::_exit(1);
        }
    }

    pub(super) fn install_sigxcpu() {
        let handler: extern "C" fn(libc::c_int) = on_sigxcpu;
        // SAFETY: the handler only performs async-signal-safe operations.
        unsafe {
            libc::signal(libc::SIGXCPU, handler as libc::sighandler_t);
        }
    }
}

#[cfg(not(unix))]
mod os {
    use super::LimitEntry;

    pub(super) fn set_limit(_entry: LimitEntry) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "resource limits are not supported on this platform",
        ))
    }

    pub(super) fn install_sigxcpu() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_limits_default() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_seconds, 1);
        assert_eq!(limits.address_space_bytes, 256 * 1024 * 1024);
        assert_eq!(limits.file_size_bytes, 0);
        assert_eq!(limits.max_processes, 0);
        assert_eq!(limits.max_open_files, 4);
        assert_eq!(limits.core_bytes, 0);
        assert_eq!(limits.heap_bytes, 96 * 1024 * 1024);
        assert!(limits.heap_bytes < limits.address_space_bytes);
    }

    #[test]
    fn test_resource_limits_serde_roundtrip() {
        let limits = ResourceLimits {
            cpu_seconds: 2,
            address_space_bytes: 1 << 30,
            ..ResourceLimits::default()
        };
        let json = serde_json::to_string(&limits).expect("serialize");
        let back: ResourceLimits = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(limits, back);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let limits: ResourceLimits = serde_json::from_str(r#"{"cpu_seconds": 5}"#).unwrap();
        assert_eq!(limits.cpu_seconds, 5);
        assert_eq!(limits.max_open_files, 4);
        assert_eq!(limits.heap_bytes, 96 * 1024 * 1024);
    }

    #[test]
    fn test_heap_budget_is_not_an_rlimit() {
        let entries = ResourceLimits::default().entries();
        assert_eq!(entries.len(), 6);
        assert!(entries.iter().all(|e| e.name.starts_with("RLIMIT_")));
    }

    #[test]
    fn test_cpu_hard_limit_is_one_above_soft() {
        let entries = ResourceLimits::default().entries();
        let cpu = entries.iter().find(|e| e.name == "RLIMIT_CPU").unwrap();
        assert_eq!((cpu.soft, cpu.hard), (1, 2));
        assert!(entries
            .iter()
            .filter(|e| e.name != "RLIMIT_CPU")
            .all(|e| e.soft == e.hard));
    }
}
