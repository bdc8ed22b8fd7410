//! Privilege reduction for sandboxed children
//!
//! # What gets dropped
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Parent (engineer)                                              │
//! │    │ fork                                                        │
//! │    ▼                                                             │
//! │  Child, before exec:                                             │
//! │    1. setgid(1000)            (Unix, only when euid == 0)       │
//! │    2. clear caps + bounding   (Linux, opt-in)                   │
//! │    3. exec(python tmpXXXX.py)                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Containment gap
//!
//! This is partial. Without root there is nothing to drop, and on Windows
//! the child runs with the operator's full rights. There is no namespace,
//! seccomp or container isolation: the child can read and write whatever
//! the operator's account can. Timeout, command whitelist and the isolated
//! interpreter are the remaining controls.

use tokio::process::Command;

/// Group id the sandboxed child switches to when running as root
pub const DEFAULT_SANDBOX_GID: u32 = 1000;

// ═══════════════════════════════════════════════════════════════════════════
// PrivilegePolicy
// ═══════════════════════════════════════════════════════════════════════════
// WHAT IT IS:
//   What to shed in the forked child before it execs the interpreter.
//
// WHEN IT APPLIES:
//   Only when the parent's effective uid is 0. An unprivileged parent has
//   nothing worth dropping and setgid would fail with EPERM.
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegePolicy {
    /// Group to switch to (None keeps the parent's group)
    pub gid: Option<u32>,
    /// Clear every Linux capability, including the bounding set
    pub drop_capabilities: bool,
}

impl Default for PrivilegePolicy {
    fn default() -> Self {
        Self {
            gid: Some(DEFAULT_SANDBOX_GID),
            drop_capabilities: false,
        }
    }
}

impl PrivilegePolicy {
    /// Policy that leaves the child untouched
    pub fn none() -> Self {
        Self {
            gid: None,
            drop_capabilities: false,
        }
    }

    /// Whether `apply_to` will install anything on this platform and user
    pub fn is_active(&self) -> bool {
        platform::running_as_root() && (self.gid.is_some() || self.drop_capabilities)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // apply_to() - Install the drop on a command
    // ═══════════════════════════════════════════════════════════════════════
    // Registers a pre_exec hook; nothing happens in the parent. A failing
    // drop aborts the spawn with PermissionDenied rather than running the
    // child with full rights.
    // ═══════════════════════════════════════════════════════════════════════
    pub fn apply_to(&self, command: &mut Command) {
        if !self.is_active() {
            return;
        }
        platform::install(self, command);
    }
}

#[cfg(unix)]
mod platform {
    use std::io;

    use tokio::process::Command;

    use super::PrivilegePolicy;

    pub fn running_as_root() -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn denied(e: impl std::fmt::Display) -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, e.to_string())
    }

    pub fn install(policy: &PrivilegePolicy, command: &mut Command) {
        let gid = policy.gid;
        let drop_caps = policy.drop_capabilities;

        // SAFETY: the hook runs between fork and exec and only calls
        // async-signal-safe setgid plus capability syscalls.
        unsafe {
            command.pre_exec(move || {
                if let Some(gid) = gid {
                    nix::unistd::setgid(nix::unistd::Gid::from_raw(gid)).map_err(denied)?;
                }
                if drop_caps {
                    drop_all_capabilities()?;
                }
                Ok(())
            });
        }
    }

    #[cfg(target_os = "linux")]
    fn drop_all_capabilities() -> io::Result<()> {
        // Bounding first so the exec'd child cannot regain anything.
        // Needs CAP_SETPCAP, so a failure here is tolerated.
        let _ = caps::clear(None, caps::CapSet::Bounding);
        caps::clear(None, caps::CapSet::Inheritable).map_err(denied)?;
        caps::clear(None, caps::CapSet::Effective).map_err(denied)?;
        caps::clear(None, caps::CapSet::Permitted).map_err(denied)?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn drop_all_capabilities() -> io::Result<()> {
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use tokio::process::Command;

    use super::PrivilegePolicy;

    pub fn running_as_root() -> bool {
        false
    }

    pub fn install(_policy: &PrivilegePolicy, _command: &mut Command) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = PrivilegePolicy::default();
        assert_eq!(policy.gid, Some(DEFAULT_SANDBOX_GID));
        assert!(!policy.drop_capabilities);
    }

    #[test]
    fn test_none_policy_is_inactive() {
        assert!(!PrivilegePolicy::none().is_active());
    }

    #[tokio::test]
    async fn test_unprivileged_spawn_is_unaffected() {
        if platform::running_as_root() {
            return;
        }
        let mut cmd = Command::new("true");
        PrivilegePolicy::default().apply_to(&mut cmd);
        let status = cmd.status().await.unwrap();
        assert!(status.success());
    }
}
