//! Process identity and liveness.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetricsError;

/// File extension of process store files.
pub const STORE_EXT: &str = "db";

/// Role of a process within the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// HTTP API worker.
    Api,
    /// Background task worker.
    Worker,
    /// Periodic task scheduler.
    Beat,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Api => "api",
            Role::Worker => "worker",
            Role::Beat => "beat",
        }
    }

    /// On-disk role code.
    pub fn code(self) -> u8 {
        match self {
            Role::Api => 1,
            Role::Worker => 2,
            Role::Beat => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Role> {
        match code {
            1 => Some(Role::Api),
            2 => Some(Role::Worker),
            3 => Some(Role::Beat),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(Role::Api),
            "worker" => Ok(Role::Worker),
            "beat" => Ok(Role::Beat),
            other => Err(MetricsError::InvalidConfig(format!(
                "unknown process role: {other}"
            ))),
        }
    }
}

/// Owner of one store file. Ordering (pid, then role) is the canonical merge
/// order used by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId {
    pub pid: u32,
    pub role: Role,
}

impl ProcessId {
    pub fn new(pid: u32, role: Role) -> Self {
        Self { pid, role }
    }

    pub fn current(role: Role) -> Self {
        Self::new(std::process::id(), role)
    }

    /// `{role}_{pid}.db`
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.role, self.pid, STORE_EXT)
    }

    /// Inverse of [`ProcessId::file_name`]; anything else in the directory
    /// (temp files, foreign files) yields `None`.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(STORE_EXT)?.strip_suffix('.')?;
        let (role, pid) = stem.split_once('_')?;
        let role = role.parse().ok()?;
        if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self::new(pid.parse().ok()?, role))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.pid)
    }
}

/// Answers "does this pid still exist".
pub trait Liveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes the OS with signal 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLiveness;

impl Liveness for SystemLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == std::process::id() {
            return true;
        }
        let pid = match libc::pid_t::try_from(pid) {
            Ok(p) if p > 0 => p,
            _ => return false,
        };
        // SAFETY: signal 0 only checks that the process exists and may be signalled.
        let rc = unsafe { libc::kill(pid, 0) };
        if rc == 0 {
            return true;
        }
        // EPERM: exists, owned by another user.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}
