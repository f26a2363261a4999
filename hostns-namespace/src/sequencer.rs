//! The namespace escape sequence
//!
//! Order of operations:
//! 1. Clone the cwd mount tree (before anything else changes)
//! 2. Mount a private proc and open PID 1's namespace directory
//! 3. Join ipc, mnt, net, time and uts from that directory
//! 4. Unshare the mount namespace and make it recursively private
//! 5. mkdtemp the mount root
//! 6. Move the cloned tree onto the mount root
//! 7. chdir into it
//! 8. execv the command
//!
//! Every stage is a one-shot OS transition. A failure aborts the whole
//! sequence and nothing is rolled back, except the mount root, which is
//! released on a best-effort basis.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use hostns_core::{Error, Invocation, NamespaceKind, Result, Stage};
use tracing::{debug, info};

use crate::backend::HostBackend;
use crate::config::EscapeConfig;

/// Mount root created by [`Stage::CreateMountRoot`]
#[derive(Debug)]
struct MountRoot {
    path: PathBuf,
    attached: bool,
}

/// Drives a [`HostBackend`] through the escape stages
#[derive(Debug)]
pub struct EscapeSequencer<B: HostBackend> {
    backend: B,
    config: EscapeConfig,
    stage: Option<Stage>,
}

impl<B: HostBackend> EscapeSequencer<B> {
    /// Create a new sequencer
    #[must_use]
    pub const fn new(backend: B, config: EscapeConfig) -> Self {
        Self {
            backend,
            config,
            stage: None,
        }
    }

    /// Create a new sequencer with the default config
    #[must_use]
    pub fn with_defaults(backend: B) -> Self {
        Self::new(backend, EscapeConfig::default())
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &EscapeConfig {
        &self.config
    }

    /// Get the backend
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Last stage entered, `None` before the sequence started
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Usage checks that must pass before any OS state is touched
    ///
    /// # Errors
    /// Returns [`Error::HostInit`] when running as PID 1, or a config error
    pub fn preflight(&self) -> Result<()> {
        if self.backend.current_pid().is_init() {
            return Err(Error::HostInit);
        }
        self.config.validate()
    }

    /// Parse raw arguments and run the escape
    ///
    /// The PID 1 check runs before the argument check.
    ///
    /// # Errors
    /// Returns the first failure, see [`escape_and_exec`](Self::escape_and_exec)
    pub fn run<I, S>(&mut self, program_name: &str, args: I) -> Result<B::Exec>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.preflight()?;
        let invocation = Invocation::new(program_name, args)?;
        self.escape(&invocation)
    }

    /// Re-enter the host namespaces and exec `invocation` in the caller's cwd
    ///
    /// With [`LinuxBackend`](crate::LinuxBackend) this only returns on failure.
    ///
    /// # Errors
    /// Returns an error tagged with the stage that failed
    pub fn escape_and_exec(&mut self, invocation: &Invocation) -> Result<B::Exec> {
        self.preflight()?;
        self.escape(invocation)
    }

    fn escape(&mut self, invocation: &Invocation) -> Result<B::Exec> {
        let proc_subset = self.config.proc_subset.clone();
        let template = self.config.mount_root_template.clone();

        let tree = self.step(Stage::CaptureCwd, B::capture_cwd)?;

        let ns_dir = self.step(Stage::ResolveHost, |b| {
            b.open_host_namespaces(proc_subset.as_deref())
        })?;

        self.enter(Stage::JoinNamespaces);
        for kind in NamespaceKind::HOST_SET {
            self.backend
                .join_namespace(&ns_dir, kind)
                .map_err(|errno| Error::Join { kind, errno })?;
            debug!(namespace = %kind, "Joined host namespace");
        }
        drop(ns_dir);

        self.step(Stage::IsolateMounts, B::isolate_mounts)?;

        let path = self.step(Stage::CreateMountRoot, |b| b.create_mount_root(&template))?;
        let mut root = MountRoot {
            path,
            attached: false,
        };

        let result = self.enter_mount_root(tree, &mut root, invocation);
        if result.is_err() && self.config.cleanup_on_failure {
            self.release(&root);
        }
        result
    }

    fn enter_mount_root(
        &mut self,
        tree: B::Tree,
        root: &mut MountRoot,
        invocation: &Invocation,
    ) -> Result<B::Exec> {
        let path = root.path.clone();

        self.step(Stage::RelocateCwd, |b| b.attach_tree(tree, &path))?;
        root.attached = true;

        self.step(Stage::ChangeDir, |b| b.change_dir(&path))?;

        info!(command = %invocation, cwd = %path.display(), "Executing command");
        self.step(Stage::Exec, |b| b.exec(invocation))
    }

    fn release(&mut self, root: &MountRoot) {
        match self.backend.release_mount_root(&root.path, root.attached) {
            Ok(()) => debug!(path = %root.path.display(), "Released mount root"),
            // The stage error is the one diagnostic the caller reports
            Err(e) => debug!(
                path = %root.path.display(),
                error = %e,
                "Could not release mount root"
            ),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(stage = %stage, "Entering stage");
        self.stage = Some(stage);
    }

    fn step<T>(&mut self, stage: Stage, op: impl FnOnce(&mut B) -> nix::Result<T>) -> Result<T> {
        self.enter(stage);
        op(&mut self.backend).map_err(|errno| {
            debug!(stage = %stage, error = %errno, "Escape aborted");
            Error::stage(stage, errno)
        })
    }
}

/// Convenience for the common case: escape with the real backend
///
/// # Errors
/// Returns the first failure; on success the process image is replaced
pub fn escape_and_exec<I, S>(program_name: &str, args: I) -> Result<std::convert::Infallible>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    EscapeSequencer::with_defaults(crate::LinuxBackend::new()).run(program_name, args)
}

/// Whether `path` looks like a mount root produced from `template`
#[must_use]
pub fn is_mount_root_of(path: &Path, template: &Path) -> bool {
    let (Some(path), Some(template)) = (path.to_str(), template.to_str()) else {
        return false;
    };
    template
        .strip_suffix(crate::config::TEMPLATE_SUFFIX)
        .and_then(|prefix| path.strip_prefix(prefix))
        .is_some_and(|rest| rest.len() == crate::config::TEMPLATE_SUFFIX.len() && !rest.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockOp};
    use hostns_core::{ErrorCategory, ProcessId};
    use nix::errno::Errno;

    fn invocation() -> Invocation {
        Invocation::new("enter-host-ns", ["/bin/cat", "marker.txt"]).unwrap()
    }

    #[test]
    fn test_full_sequence_order() {
        let backend = MockBackend::new();
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        let argv = seq.escape_and_exec(&invocation()).unwrap();
        assert_eq!(argv, vec!["/bin/cat", "marker.txt"]);
        assert_eq!(seq.stage(), Some(Stage::Exec));

        let mut stages: Vec<_> = backend.ops().iter().filter_map(MockOp::stage).collect();
        stages.dedup();
        assert_eq!(stages, Stage::ALL);
        assert_eq!(backend.joined(), NamespaceKind::HOST_SET);
    }

    #[test]
    fn test_cwd_is_relocated_into_mount_root() {
        let backend = MockBackend::new();
        let mut seq = EscapeSequencer::with_defaults(backend.clone());
        seq.escape_and_exec(&invocation()).unwrap();

        let ops = backend.ops();
        assert_eq!(ops[7], MockOp::IsolateMounts);
        let MockOp::CreateMountRoot(root) = &ops[8] else {
            panic!("expected mount root creation, got {:?}", ops[8]);
        };
        assert!(is_mount_root_of(root, Path::new("/tmp/tmp.XXXXXX")));
        assert_eq!(ops[9], MockOp::AttachTree(root.clone()));
        assert_eq!(ops[10], MockOp::ChangeDir(root.clone()));
    }

    #[test]
    fn test_host_init_touches_nothing() {
        let backend = MockBackend::new().with_pid(ProcessId::INIT);
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        let err = seq.escape_and_exec(&invocation()).unwrap_err();
        assert!(matches!(err, Error::HostInit));
        assert!(backend.is_untouched());
        assert_eq!(seq.stage(), None);
    }

    #[test]
    fn test_missing_command_touches_nothing() {
        let backend = MockBackend::new();
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        let err = seq.run("enter-host-ns", Vec::<OsString>::new()).unwrap_err();
        assert!(matches!(err, Error::Usage { .. }));
        assert!(backend.is_untouched());
    }

    #[test]
    fn test_host_init_checked_before_arguments() {
        let backend = MockBackend::new().with_pid(ProcessId::INIT);
        let mut seq = EscapeSequencer::with_defaults(backend);

        let err = seq.run("enter-host-ns", Vec::<OsString>::new()).unwrap_err();
        assert!(matches!(err, Error::HostInit));
    }

    #[test]
    fn test_join_failure_names_namespace() {
        let mut backend = MockBackend::new();
        backend.fail_join(NamespaceKind::Time, Errno::EINVAL);
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        let err = seq.escape_and_exec(&invocation()).unwrap_err();
        assert!(matches!(
            err,
            Error::Join {
                kind: NamespaceKind::Time,
                errno: Errno::EINVAL
            }
        ));
        assert_eq!(err.category(), ErrorCategory::NamespaceJoin);
        assert_eq!(
            backend.joined(),
            vec![NamespaceKind::Ipc, NamespaceKind::Mount, NamespaceKind::Network]
        );
        assert!(!backend.ops().contains(&MockOp::IsolateMounts));
    }

    #[test]
    fn test_failure_before_mount_root_needs_no_release() {
        let mut backend = MockBackend::new();
        backend.fail_at(Stage::IsolateMounts, Errno::EPERM);
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        let err = seq.escape_and_exec(&invocation()).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::IsolateMounts));
        assert!(backend
            .ops()
            .iter()
            .all(|op| !matches!(op, MockOp::ReleaseMountRoot { .. })));
    }

    #[test]
    fn test_relocate_failure_removes_unattached_root() {
        let mut backend = MockBackend::new();
        backend.fail_at(Stage::RelocateCwd, Errno::EINVAL);
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        let err = seq.escape_and_exec(&invocation()).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::RelocateCwd));
        assert!(matches!(
            backend.ops().last(),
            Some(MockOp::ReleaseMountRoot {
                attached: false,
                ..
            })
        ));
        assert!(backend.mount_roots().is_empty());
    }

    #[test]
    fn test_exec_failure_detaches_and_removes_root() {
        let mut backend = MockBackend::new();
        backend.fail_at(Stage::Exec, Errno::ENOENT);
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        let err = seq.escape_and_exec(&invocation()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::FinalExecution);
        assert!(matches!(
            backend.ops().last(),
            Some(MockOp::ReleaseMountRoot { attached: true, .. })
        ));
        assert!(backend.mount_roots().is_empty());
    }

    #[test]
    fn test_cleanup_can_be_disabled() {
        let mut backend = MockBackend::new();
        backend.fail_at(Stage::ChangeDir, Errno::EACCES);
        let config = EscapeConfig::new().with_cleanup_on_failure(false);
        let mut seq = EscapeSequencer::new(backend.clone(), config);

        seq.escape_and_exec(&invocation()).unwrap_err();
        assert_eq!(backend.mount_roots().len(), 1);
    }

    #[test]
    fn test_release_failure_keeps_original_error() {
        let mut backend = MockBackend::new();
        backend.fail_at(Stage::Exec, Errno::ENOEXEC);
        backend.fail_release(Errno::EBUSY);
        let mut seq = EscapeSequencer::with_defaults(backend);

        let err = seq.escape_and_exec(&invocation()).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::ENOEXEC));
    }

    #[test]
    fn test_release_failure_stays_below_warn() {
        use std::io::Write;
        use std::sync::{Arc, Mutex};

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();

        let mut backend = MockBackend::new();
        backend.fail_at(Stage::ChangeDir, Errno::EACCES);
        backend.fail_release(Errno::EBUSY);
        let mut seq = EscapeSequencer::with_defaults(backend);

        let err = tracing::subscriber::with_default(subscriber, || {
            seq.escape_and_exec(&invocation()).unwrap_err()
        });
        assert_eq!(err.failed_stage(), Some(Stage::ChangeDir));
        assert!(captured.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pid_checked_once_per_run() {
        let backend = MockBackend::new();
        let mut seq = EscapeSequencer::with_defaults(backend.clone());

        seq.run("enter-host-ns", ["/bin/true"]).unwrap();
        assert_eq!(backend.pid_queries(), 1);

        seq.escape_and_exec(&invocation()).unwrap();
        assert_eq!(backend.pid_queries(), 2);
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let backend = MockBackend::new();
        let config = EscapeConfig::new().with_mount_root_template("/tmp/fixed");
        let mut seq = EscapeSequencer::new(backend.clone(), config);

        let err = seq.escape_and_exec(&invocation()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(backend.is_untouched());
    }

    #[test]
    fn test_proc_subset_is_passed_through() {
        let backend = MockBackend::new();
        let mut seq = EscapeSequencer::with_defaults(backend.clone());
        seq.escape_and_exec(&invocation()).unwrap();

        assert_eq!(
            backend.ops()[1],
            MockOp::ResolveHost {
                pid: ProcessId::INIT,
                subset: Some("pid".to_string()),
            }
        );
    }

    #[test]
    fn test_is_mount_root_of() {
        let template = Path::new("/tmp/tmp.XXXXXX");
        assert!(is_mount_root_of(Path::new("/tmp/tmp.a1B2c3"), template));
        assert!(!is_mount_root_of(Path::new("/tmp/tmp.a1B2c"), template));
        assert!(!is_mount_root_of(Path::new("/var/tmp.a1B2c3"), template));
    }
}
