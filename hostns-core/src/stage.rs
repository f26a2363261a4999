//! Escape stages
//!
//! The escape is a linear pipeline. Every stage has one success transition
//! (to the next stage) and one failure transition (abort). There is no
//! retry state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of the escape sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Clone the mount tree rooted at the current working directory
    CaptureCwd,
    /// Mount a private proc instance and open PID 1's namespace directory
    ResolveHost,
    /// Join each host namespace
    JoinNamespaces,
    /// Unshare the mount namespace and make it recursively private
    IsolateMounts,
    /// Create the temporary attachment point
    CreateMountRoot,
    /// Move the captured tree onto the attachment point
    RelocateCwd,
    /// Change into the relocated directory
    ChangeDir,
    /// Replace the process image
    Exec,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Self; 8] = [
        Self::CaptureCwd,
        Self::ResolveHost,
        Self::JoinNamespaces,
        Self::IsolateMounts,
        Self::CreateMountRoot,
        Self::RelocateCwd,
        Self::ChangeDir,
        Self::Exec,
    ];

    /// The stage that follows this one, `None` after [`Stage::Exec`]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::CaptureCwd => Some(Self::ResolveHost),
            Self::ResolveHost => Some(Self::JoinNamespaces),
            Self::JoinNamespaces => Some(Self::IsolateMounts),
            Self::IsolateMounts => Some(Self::CreateMountRoot),
            Self::CreateMountRoot => Some(Self::RelocateCwd),
            Self::RelocateCwd => Some(Self::ChangeDir),
            Self::ChangeDir => Some(Self::Exec),
            Self::Exec => None,
        }
    }

    /// Human readable description used in diagnostics
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::CaptureCwd => "capture working directory",
            Self::ResolveHost => "resolve host namespaces",
            Self::JoinNamespaces => "join host namespaces",
            Self::IsolateMounts => "isolate mount namespace",
            Self::CreateMountRoot => "create mount root",
            Self::RelocateCwd => "relocate working directory",
            Self::ChangeDir => "change directory",
            Self::Exec => "execute command",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_walks_all_stages() {
        let mut walked = vec![Stage::CaptureCwd];
        while let Some(next) = walked.last().and_then(|s| s.next()) {
            walked.push(next);
        }

        assert_eq!(walked, Stage::ALL);
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(Stage::ALL.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_display() {
        assert_eq!(Stage::RelocateCwd.to_string(), "relocate working directory");
    }
}
