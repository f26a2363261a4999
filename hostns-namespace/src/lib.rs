//! Re-entering host namespaces from inside a container
//!
//! This crate joins the host's ipc, mnt, net, time and uts namespaces through
//! PID 1 and carries the caller's working directory along:
//! - [`EscapeSequencer`] - the ordered escape stages
//! - [`HostBackend`] - the host namespace provider seam
//! - [`LinuxBackend`] - real syscalls
//! - [`MockBackend`] - recording backend for tests
//! - [`NamespaceInfo`] - namespace identifier snapshots

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod config;
pub mod info;
pub mod linux;
pub mod sequencer;

pub use backend::{HostBackend, MockBackend, MockOp};
pub use config::EscapeConfig;
pub use info::NamespaceInfo;
pub use linux::LinuxBackend;
pub use sequencer::{escape_and_exec, is_mount_root_of, EscapeSequencer};

// Re-export commonly used types
pub use hostns_core::{Error, Invocation, NamespaceKind, Result, Stage};
