//! hostns core - shared types for escaping back into host namespaces
//!
//! This crate provides the vocabulary used by the sequencer and the CLI:
//! the error taxonomy, the escape stages, namespace kinds and the target
//! command.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod stage;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use stage::Stage;
pub use types::{Invocation, NamespaceKind, ProcessId};
