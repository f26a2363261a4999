//! Error types for hostns

use nix::errno::Errno;
use thiserror::Error;

use crate::{NamespaceKind, Stage};

/// hostns error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invoked as PID 1, there is no host to escape to
    #[error("must be run in the host PID namespace (refusing to run as PID 1)")]
    HostInit,

    /// No command was given
    #[error("Usage: {program} <COMMAND> [ARGS]...")]
    Usage {
        /// Name the program was invoked as
        program: String,
    },

    /// An argument cannot be passed to exec
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// An OS operation failed during one of the escape stages
    #[error("{stage}: {errno}")]
    Stage {
        /// Stage that failed
        stage: Stage,
        /// Underlying OS error
        errno: Errno,
    },

    /// Joining one specific host namespace failed
    #[error("join {kind} namespace: {errno}")]
    Join {
        /// Namespace that could not be opened or joined
        kind: NamespaceKind,
        /// Underlying OS error
        errno: Errno,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classes of failure, in the order they can occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Wrong invocation context or arguments, no OS state touched yet
    Usage,
    /// Capturing the cwd handle or building the proc view failed
    ResourceAcquisition,
    /// Opening or joining a host namespace failed
    NamespaceJoin,
    /// Unshare, temporary directory or relocation failed
    MountTransition,
    /// chdir or exec failed
    FinalExecution,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Category of a failure at `stage`
    #[must_use]
    pub const fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::CaptureCwd | Stage::ResolveHost => Self::ResourceAcquisition,
            Stage::JoinNamespaces => Self::NamespaceJoin,
            Stage::IsolateMounts | Stage::CreateMountRoot | Stage::RelocateCwd => {
                Self::MountTransition
            }
            Stage::ChangeDir | Stage::Exec => Self::FinalExecution,
        }
    }
}

impl Error {
    /// Build a stage failure
    #[must_use]
    pub const fn stage(stage: Stage, errno: Errno) -> Self {
        Self::Stage { stage, errno }
    }

    /// The stage this error was raised in, if any
    #[must_use]
    pub const fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::Join { .. } => Some(Stage::JoinNamespaces),
            _ => None,
        }
    }

    /// The OS error behind this failure, if any
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Stage { errno, .. } | Self::Join { errno, .. } => Some(*errno),
            Self::Io(e) => e.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }

    /// Classify this error
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::HostInit | Self::Usage { .. } | Self::InvalidArgument { .. } => {
                ErrorCategory::Usage
            }
            Self::Stage { stage, .. } => ErrorCategory::for_stage(*stage),
            Self::Join { .. } => ErrorCategory::NamespaceJoin,
            Self::Io(_) => ErrorCategory::Other,
        }
    }
}

/// Result type alias for hostns operations
pub type Result<T> = std::result::Result<T, Error>;
