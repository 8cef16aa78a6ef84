//! POSIX resource limits applied in the child between fork and exec

use std::io;

use crate::types::ResourceLimits;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Resource = libc::c_int;

/// Extra CPU second between the SIGXCPU soft limit and the SIGKILL hard limit
const CPU_GRACE_SECS: u64 = 1;

/// Resource limits in the units `setrlimit` expects
///
/// Plain integers only, so it can be moved into a `pre_exec` closure and
/// applied without allocating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Rlimits {
    cpu_secs: Option<u64>,
    address_space_bytes: Option<u64>,
    data_bytes: Option<u64>,
    stack_bytes: Option<u64>,
    processes: Option<u64>,
    file_size_bytes: Option<u64>,
    open_files: Option<u64>,
}

impl Rlimits {
    pub(crate) fn from_limits(limits: &ResourceLimits) -> Self {
        let kb = |v: u64| v.saturating_mul(1024);
        Self {
            // RLIMIT_CPU has whole-second granularity; round up so a 0.5s
            // limit does not become "no CPU at all"
            cpu_secs: limits
                .time_limit
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(|secs| secs.ceil() as u64),
            address_space_bytes: limits.memory_limit.map(kb),
            data_bytes: limits.data_limit.map(kb),
            stack_bytes: limits.stack_limit.map(kb),
            processes: limits.max_processes.map(u64::from),
            file_size_bytes: limits.max_file_size.map(kb),
            open_files: limits.max_open_files.map(u64::from),
        }
    }

    /// Apply every configured limit to the calling process
    ///
    /// Runs in the forked child, so it must stay async-signal-safe: no
    /// allocation, no locks, only raw syscalls.
    pub(crate) fn apply(&self) -> io::Result<()> {
        if let Some(secs) = self.cpu_secs {
            set(libc::RLIMIT_CPU, secs, secs.saturating_add(CPU_GRACE_SECS))?;
        }
        if let Some(bytes) = self.address_space_bytes {
            set(libc::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(bytes) = self.data_bytes {
            set(libc::RLIMIT_DATA, bytes, bytes)?;
        }
        if let Some(bytes) = self.stack_bytes {
            set(libc::RLIMIT_STACK, bytes, bytes)?;
        }
        if let Some(count) = self.processes {
            set(libc::RLIMIT_NPROC, count, count)?;
        }
        if let Some(bytes) = self.file_size_bytes {
            set(libc::RLIMIT_FSIZE, bytes, bytes)?;
        }
        if let Some(count) = self.open_files {
            set(libc::RLIMIT_NOFILE, count, count)?;
        }
        set(libc::RLIMIT_CORE, 0, 0)
    }
}

fn set(resource: Resource, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit only reads the struct we pass by reference
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_kilobytes_to_bytes() {
        let limits = ResourceLimits::unset()
            .with_memory_limit(256 * ResourceLimits::MB)
            .with_stack_limit(8 * ResourceLimits::MB);
        let rlimits = Rlimits::from_limits(&limits);
        assert_eq!(rlimits.address_space_bytes, Some(256 * 1024 * 1024));
        assert_eq!(rlimits.stack_bytes, Some(8 * 1024 * 1024));
    }

    #[test]
    fn data_limit_is_independent_of_address_space() {
        let limits = ResourceLimits::unset().with_data_limit(512 * ResourceLimits::MB);
        let rlimits = Rlimits::from_limits(&limits);
        assert_eq!(rlimits.data_bytes, Some(512 * 1024 * 1024));
        assert_eq!(rlimits.address_space_bytes, None);
    }

    #[test]
    fn cpu_time_rounds_up() {
        let rlimits = Rlimits::from_limits(&ResourceLimits::unset().with_time_limit(0.5));
        assert_eq!(rlimits.cpu_secs, Some(1));
        let rlimits = Rlimits::from_limits(&ResourceLimits::unset().with_time_limit(2.0));
        assert_eq!(rlimits.cpu_secs, Some(2));
    }

    #[test]
    fn invalid_cpu_time_is_ignored() {
        let rlimits = Rlimits::from_limits(&ResourceLimits::unset().with_time_limit(-3.0));
        assert_eq!(rlimits.cpu_secs, None);
    }

    #[test]
    fn unset_limits_leave_everything_alone() {
        assert_eq!(
            Rlimits::from_limits(&ResourceLimits::unset()),
            Rlimits::default()
        );
    }
}
