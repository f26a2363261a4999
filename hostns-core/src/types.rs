//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString, OsString};
use std::fmt;
use std::os::unix::ffi::OsStringExt;
use std::str::FromStr;

use nix::sched::CloneFlags;

use crate::{Error, Result};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// PID of the init process of a PID namespace
    pub const INIT: Self = Self(1);

    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        nix::unistd::getpid().into()
    }

    /// Whether this is the init process of its PID namespace
    #[must_use]
    pub const fn is_init(self) -> bool {
        self.0 == Self::INIT.0
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}

/// Namespace kinds joined when escaping to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// IPC objects
    Ipc,
    /// Mount table
    #[serde(rename = "mnt")]
    Mount,
    /// Network stack
    #[serde(rename = "net")]
    Network,
    /// Boot and monotonic clocks
    Time,
    /// Hostname and domain name
    Uts,
}

impl NamespaceKind {
    /// The host namespace set, sorted by `/proc/<pid>/ns` entry name.
    ///
    /// The mount namespace is joined before the mount table is relied on
    /// again, which only happens after the whole set has been joined.
    pub const HOST_SET: [Self; 5] = [
        Self::Ipc,
        Self::Mount,
        Self::Network,
        Self::Time,
        Self::Uts,
    ];

    /// Entry name under `/proc/<pid>/ns`
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Mount => "mnt",
            Self::Network => "net",
            Self::Time => "time",
            Self::Uts => "uts",
        }
    }

    /// [`proc_name`](Self::proc_name) as a C string, for `openat(2)`
    #[must_use]
    pub const fn proc_cname(self) -> &'static CStr {
        match self {
            Self::Ipc => c"ipc",
            Self::Mount => c"mnt",
            Self::Network => c"net",
            Self::Time => c"time",
            Self::Uts => c"uts",
        }
    }

    /// `nstype` passed to setns(2), so the kernel checks the handle kind
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::Time => CloneFlags::from_bits_retain(libc::CLONE_NEWTIME),
            Self::Uts => CloneFlags::CLONE_NEWUTS,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

impl FromStr for NamespaceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::HOST_SET
            .into_iter()
            .find(|kind| kind.proc_name() == s)
            .ok_or_else(|| Error::InvalidArgument {
                message: format!("unknown namespace kind: {s}"),
            })
    }
}

/// The command to run once the escape has completed
///
/// `argv[0]` is the program path exactly as given. The path is resolved by
/// execv(2) against the relocated working directory, without a PATH search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    argv: Vec<CString>,
}

impl Invocation {
    /// Build an invocation from raw command-line arguments
    ///
    /// # Errors
    /// Returns [`Error::Usage`] if `args` is empty and
    /// [`Error::InvalidArgument`] if an argument contains a NUL byte
    pub fn new<I, S>(program_name: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let argv = args
            .into_iter()
            .map(|arg| {
                CString::new(arg.into().into_vec()).map_err(|e| Error::InvalidArgument {
                    message: format!("argument contains a NUL byte at offset {}", e.nul_position()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if argv.is_empty() {
            return Err(Error::Usage {
                program: program_name.to_string(),
            });
        }

        Ok(Self { argv })
    }

    /// Path of the program to execute
    #[must_use]
    pub fn program(&self) -> &CStr {
        &self.argv[0]
    }

    /// Full argument vector, including `argv[0]`
    #[must_use]
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.argv.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}
