//! Filesystem confinement for tool child processes
//!
//! Children are restricted with Landlock before `exec`: the project root is
//! fully accessible, a fixed set of system directories plus the absolute
//! `PATH` entries are read/execute only, `/dev/null` is writable, and every
//! other path is denied. The ruleset is built in the parent; between fork
//! and exec the child only issues `prctl` and `landlock_restrict_self`.
//!
//! Each child also leads its own process group so the whole tree it spawns
//! can be killed at once.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("filesystem sandbox unavailable: Landlock is not supported by this kernel")]
    Unsupported,

    #[error("failed to build sandbox ruleset for {path}: {source}")]
    Rule { path: PathBuf, source: io::Error },

    #[error("failed to create sandbox ruleset: {0}")]
    Ruleset(io::Error),
}

/// System locations a command may read and execute from
const SYSTEM_READ_PATHS: &[&str] = &[
    "/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/etc", "/opt", "/proc", "/dev",
];

/// Files a command may write outside the project root
const SYSTEM_WRITE_FILES: &[&str] = &["/dev/null"];

/// A prepared ruleset confining a child to one project root
pub struct Sandbox {
    #[cfg(target_os = "linux")]
    ruleset: landlock::Ruleset,
}

impl Sandbox {
    #[cfg(target_os = "linux")]
    pub fn for_project(root: &Path, path_env: &str) -> Result<Self, SandboxError> {
        use landlock::{Ruleset, ACCESS_READ_EXECUTE, ACCESS_READ_WRITE_FILE};

        let mut ruleset = match Ruleset::new() {
            Ok(ruleset) => ruleset,
            Err(e) if is_unsupported(&e) => return Err(SandboxError::Unsupported),
            Err(e) => return Err(SandboxError::Ruleset(e)),
        };

        let rule = |ruleset: &mut Ruleset, path: &Path, access: u64, required: bool| {
            match ruleset.allow(path, access) {
                Ok(()) => Ok(()),
                Err(e) if !required && e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(SandboxError::Rule {
                    path: path.to_path_buf(),
                    source,
                }),
            }
        };

        for dir in SYSTEM_READ_PATHS {
            rule(&mut ruleset, Path::new(dir), ACCESS_READ_EXECUTE, false)?;
        }
        for dir in std::env::split_paths(path_env).filter(|p| p.is_absolute()) {
            rule(&mut ruleset, &dir, ACCESS_READ_EXECUTE, false)?;
        }
        for file in SYSTEM_WRITE_FILES {
            rule(&mut ruleset, Path::new(file), ACCESS_READ_WRITE_FILE, false)?;
        }
        rule(&mut ruleset, root, u64::MAX, true)?;

        debug!(root = %root.display(), "Sandbox ruleset prepared");
        Ok(Self { ruleset })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn for_project(_root: &Path, _path_env: &str) -> Result<Self, SandboxError> {
        Err(SandboxError::Unsupported)
    }

    /// Arrange for `cmd` to enter the sandbox and its own process group
    ///
    /// `self` must stay alive until `cmd` has been spawned.
    pub fn apply(&self, cmd: &mut Command) {
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(target_os = "linux")]
        {
            let fd = self.ruleset.raw_fd();
            // SAFETY: the closure runs between fork and exec and only makes
            // raw syscalls; it neither allocates nor takes locks.
            unsafe {
                cmd.pre_exec(move || landlock::restrict_self(fd));
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn is_unsupported(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::ENOSYS) | Some(libc::EOPNOTSUPP)
    )
}

/// SIGKILL every process in the group led by `pid`
pub fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!(pid, error = %e, "Failed to kill process group"),
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(target_os = "linux")]
mod landlock {
    use std::fs::File;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::Path;

    const CREATE_RULESET_VERSION: libc::c_uint = 1;
    const RULE_PATH_BENEATH: libc::c_int = 1;

    const ACCESS_EXECUTE: u64 = 1 << 0;
    const ACCESS_WRITE_FILE: u64 = 1 << 1;
    const ACCESS_READ_FILE: u64 = 1 << 2;
    const ACCESS_READ_DIR: u64 = 1 << 3;
    const ACCESS_REFER: u64 = 1 << 13;
    const ACCESS_TRUNCATE: u64 = 1 << 14;
    /// Every filesystem right of the first ABI
    const ACCESS_ABI_V1: u64 = (1 << 13) - 1;
    /// Rights that may be granted on a non-directory
    const ACCESS_FILE: u64 = ACCESS_EXECUTE | ACCESS_WRITE_FILE | ACCESS_READ_FILE | ACCESS_TRUNCATE;

    pub const ACCESS_READ_EXECUTE: u64 = ACCESS_EXECUTE | ACCESS_READ_FILE | ACCESS_READ_DIR;
    pub const ACCESS_READ_WRITE_FILE: u64 = ACCESS_READ_FILE | ACCESS_WRITE_FILE | ACCESS_TRUNCATE;

    #[repr(C)]
    struct RulesetAttr {
        handled_access_fs: u64,
    }

    #[repr(C, packed)]
    struct PathBeneathAttr {
        allowed_access: u64,
        parent_fd: i32,
    }

    pub struct Ruleset {
        fd: OwnedFd,
        handled: u64,
    }

    impl Ruleset {
        pub fn new() -> io::Result<Self> {
            // SAFETY: a null attribute with the version flag only queries the ABI
            let abi = unsafe {
                libc::syscall(
                    libc::SYS_landlock_create_ruleset,
                    std::ptr::null::<RulesetAttr>(),
                    0 as libc::size_t,
                    CREATE_RULESET_VERSION,
                )
            };
            if abi < 0 {
                return Err(io::Error::last_os_error());
            }

            let mut handled = ACCESS_ABI_V1;
            if abi >= 2 {
                handled |= ACCESS_REFER;
            }
            if abi >= 3 {
                handled |= ACCESS_TRUNCATE;
            }

            let attr = RulesetAttr {
                handled_access_fs: handled,
            };
            // SAFETY: attr is a valid landlock_ruleset_attr prefix of the given size
            let fd = unsafe {
                libc::syscall(
                    libc::SYS_landlock_create_ruleset,
                    &attr as *const RulesetAttr,
                    std::mem::size_of::<RulesetAttr>() as libc::size_t,
                    0 as libc::c_uint,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            // SAFETY: the kernel returned a fresh close-on-exec descriptor we now own
            let fd = unsafe { OwnedFd::from_raw_fd(fd as RawFd) };
            Ok(Self { fd, handled })
        }

        /// Grant `access` beneath `path`
        pub fn allow(&mut self, path: &Path, access: u64) -> io::Result<()> {
            let file = File::options()
                .read(true)
                .custom_flags(libc::O_PATH)
                .open(path)?;

            let mut allowed = access & self.handled;
            if !file.metadata()?.is_dir() {
                allowed &= ACCESS_FILE;
            }
            if allowed == 0 {
                return Ok(());
            }

            let attr = PathBeneathAttr {
                allowed_access: allowed,
                parent_fd: file.as_raw_fd(),
            };
            // SAFETY: attr outlives the call and both descriptors are open
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_landlock_add_rule,
                    self.fd.as_raw_fd(),
                    RULE_PATH_BENEATH,
                    &attr as *const PathBeneathAttr,
                    0 as libc::c_uint,
                )
            };
            if ret < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }

    /// Enforce the ruleset on the calling process
    ///
    /// Runs in the forked child, so it is limited to async-signal-safe calls.
    pub fn restrict_self(ruleset_fd: RawFd) -> io::Result<()> {
        // SAFETY: plain syscalls with integer arguments
        unsafe {
            if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::syscall(libc::SYS_landlock_restrict_self, ruleset_fd, 0 as libc::c_uint) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}
