//! Namespace identifier snapshots

use std::fs;
use std::path::Path;

use hostns_core::{NamespaceKind, ProcessId, Result};

/// Identifiers (`ipc:[4026531839]` style link targets) of the host namespace set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// IPC namespace ID
    pub ipc: Option<String>,
    /// Mount namespace ID
    pub mnt: Option<String>,
    /// Network namespace ID
    pub net: Option<String>,
    /// Time namespace ID
    pub time: Option<String>,
    /// UTS namespace ID
    pub uts: Option<String>,
}

impl NamespaceInfo {
    /// Get namespace IDs for the calling thread
    ///
    /// # Errors
    /// Returns error if the namespace directory cannot be read
    pub fn current() -> Result<Self> {
        Self::from_dir(Path::new("/proc/thread-self/ns"))
    }

    /// Get namespace IDs for a specific PID
    ///
    /// # Errors
    /// Returns error if the namespace directory cannot be read
    pub fn for_pid(pid: ProcessId) -> Result<Self> {
        Self::from_dir(&Path::new("/proc").join(pid.to_string()).join("ns"))
    }

    /// Read every kind of the host set from `dir`
    ///
    /// Kinds the kernel does not support (e.g. `time` before 5.6) are `None`.
    ///
    /// # Errors
    /// Returns error if `dir` itself cannot be read
    pub fn from_dir(dir: &Path) -> Result<Self> {
        fs::metadata(dir)?;

        let mut info = Self::default();
        for kind in NamespaceKind::HOST_SET {
            *info.slot_mut(kind) = Self::identifier(dir, kind);
        }
        Ok(info)
    }

    /// Read one namespace link below `dir`
    #[must_use]
    pub fn identifier(dir: &Path, kind: NamespaceKind) -> Option<String> {
        fs::read_link(dir.join(kind.proc_name()))
            .map(|p| p.to_string_lossy().into_owned())
            .ok()
    }

    /// Identifier for `kind`
    #[must_use]
    pub fn get(&self, kind: NamespaceKind) -> Option<&str> {
        match kind {
            NamespaceKind::Ipc => self.ipc.as_deref(),
            NamespaceKind::Mount => self.mnt.as_deref(),
            NamespaceKind::Network => self.net.as_deref(),
            NamespaceKind::Time => self.time.as_deref(),
            NamespaceKind::Uts => self.uts.as_deref(),
        }
    }

    fn slot_mut(&mut self, kind: NamespaceKind) -> &mut Option<String> {
        match kind {
            NamespaceKind::Ipc => &mut self.ipc,
            NamespaceKind::Mount => &mut self.mnt,
            NamespaceKind::Network => &mut self.net,
            NamespaceKind::Time => &mut self.time,
            NamespaceKind::Uts => &mut self.uts,
        }
    }

    /// Kinds whose identifiers differ between `self` and `other`
    #[must_use]
    pub fn differing(&self, other: &Self) -> Vec<NamespaceKind> {
        NamespaceKind::HOST_SET
            .into_iter()
            .filter(|kind| self.get(*kind) != other.get(*kind))
            .collect()
    }

    /// Check if every namespace of the host set is shared with `other`
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.differing(other).is_empty()
    }
}

impl std::fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Namespace Info:")?;
        for kind in NamespaceKind::HOST_SET {
            if let Some(id) = self.get(kind) {
                writeln!(f, "  {:<5} {id}", kind.proc_name().to_uppercase())?;
            }
        }
        Ok(())
    }
}
