//! Host backend trait for pluggable implementations

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hostns_core::{Invocation, NamespaceKind, ProcessId, Stage};
use nix::errno::Errno;

use crate::config::TEMPLATE_SUFFIX;

/// Trait for the host namespace provider and the OS operations of the escape
///
/// This allows for different implementations:
/// - [`LinuxBackend`](crate::LinuxBackend) - real syscalls against the host's PID 1
/// - [`MockBackend`] - Testing without privileges
///
/// Every method is one OS transition. None of them is retried by the
/// sequencer, so implementations must not retry internally either.
pub trait HostBackend {
    /// Detached mount tree captured from the working directory
    type Tree;

    /// Handle on the host init process's namespace directory
    type NamespaceDir;

    /// Value produced by a successful exec
    ///
    /// A real exec never returns, so [`LinuxBackend`](crate::LinuxBackend)
    /// uses [`std::convert::Infallible`].
    type Exec;

    /// PID of the calling process in its own PID namespace
    fn current_pid(&self) -> ProcessId;

    /// Capture the current working directory as a detached tree
    fn capture_cwd(&mut self) -> nix::Result<Self::Tree>;

    /// Build a private proc view and open PID 1's namespace directory
    fn open_host_namespaces(&mut self, proc_subset: Option<&str>)
    -> nix::Result<Self::NamespaceDir>;

    /// Join the `kind` namespace found under `dir`
    fn join_namespace(&mut self, dir: &Self::NamespaceDir, kind: NamespaceKind)
    -> nix::Result<()>;

    /// Unshare the mount namespace and make the whole tree private
    fn isolate_mounts(&mut self) -> nix::Result<()>;

    /// Create a uniquely named directory from `template`
    fn create_mount_root(&mut self, template: &Path) -> nix::Result<PathBuf>;

    /// Move `tree` onto `target`, consuming it
    fn attach_tree(&mut self, tree: Self::Tree, target: &Path) -> nix::Result<()>;

    /// Change the working directory
    fn change_dir(&mut self, path: &Path) -> nix::Result<()>;

    /// Replace the process image
    fn exec(&mut self, invocation: &Invocation) -> nix::Result<Self::Exec>;

    /// Undo [`create_mount_root`](Self::create_mount_root), detaching the tree first if `attached`
    fn release_mount_root(&mut self, root: &Path, attached: bool) -> nix::Result<()>;
}

/// Operation recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    /// Working directory captured
    CaptureCwd,
    /// Proc view built and a PID's namespace directory opened
    ResolveHost {
        /// PID whose namespace directory was opened
        pid: ProcessId,
        /// Proc `subset=` option used
        subset: Option<String>,
    },
    /// Namespace joined
    Join(NamespaceKind),
    /// Mount namespace unshared and made private
    IsolateMounts,
    /// Mount root created
    CreateMountRoot(PathBuf),
    /// Tree attached
    AttachTree(PathBuf),
    /// Working directory changed
    ChangeDir(PathBuf),
    /// Command executed
    Exec(Vec<String>),
    /// Mount root released
    ReleaseMountRoot {
        /// Released directory
        path: PathBuf,
        /// Whether a tree had to be detached first
        attached: bool,
    },
}

impl MockOp {
    /// Stage this operation belongs to, `None` for cleanup
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::CaptureCwd => Some(Stage::CaptureCwd),
            Self::ResolveHost { .. } => Some(Stage::ResolveHost),
            Self::Join(_) => Some(Stage::JoinNamespaces),
            Self::IsolateMounts => Some(Stage::IsolateMounts),
            Self::CreateMountRoot(_) => Some(Stage::CreateMountRoot),
            Self::AttachTree(_) => Some(Stage::RelocateCwd),
            Self::ChangeDir(_) => Some(Stage::ChangeDir),
            Self::Exec(_) => Some(Stage::Exec),
            Self::ReleaseMountRoot { .. } => None,
        }
    }
}

/// Detached tree handed out by [`MockBackend`]
#[derive(Debug, PartialEq, Eq)]
pub struct MockTree {
    id: u64,
}

/// Namespace directory handed out by [`MockBackend`]
#[derive(Debug, PartialEq, Eq)]
pub struct MockNamespaceDir {
    pid: ProcessId,
}

impl MockNamespaceDir {
    /// PID this directory belongs to
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }
}

/// Mock backend for testing (no privileges, no syscalls)
///
/// Clones share state, so a test can keep one handle while the sequencer
/// owns the other.
///
/// # Example
/// ```
/// use hostns_core::{NamespaceKind, Stage};
/// use hostns_namespace::{HostBackend, MockBackend, MockOp};
/// use nix::errno::Errno;
///
/// let mut backend = MockBackend::new();
/// backend.fail_at(Stage::IsolateMounts, Errno::EPERM);
///
/// backend.capture_cwd().unwrap();
/// assert_eq!(backend.isolate_mounts(), Err(Errno::EPERM));
/// assert_eq!(backend.ops(), vec![MockOp::CaptureCwd]);
/// ```
#[derive(Clone)]
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

struct MockState {
    pid: ProcessId,
    pid_queries: usize,
    ops: Vec<MockOp>,
    stage_failures: HashMap<Stage, Errno>,
    join_failures: HashMap<NamespaceKind, Errno>,
    release_failure: Option<Errno>,
    next_id: u64,
    joined: Vec<NamespaceKind>,
    mount_roots: Vec<PathBuf>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            pid: ProcessId::from_raw(4242),
            pid_queries: 0,
            ops: Vec::new(),
            stage_failures: HashMap::new(),
            join_failures: HashMap::new(),
            release_failure: None,
            next_id: 1,
            joined: Vec::new(),
            mount_roots: Vec::new(),
        }
    }
}

impl MockState {
    fn check(&self, stage: Stage) -> nix::Result<()> {
        self.stage_failures.get(&stage).map_or(Ok(()), |e| Err(*e))
    }
}

impl MockBackend {
    /// Create a new mock backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::default())),
        }
    }

    /// Pretend to run as `pid`
    #[must_use]
    pub fn with_pid(self, pid: ProcessId) -> Self {
        self.state.borrow_mut().pid = pid;
        self
    }

    /// Make the operation of `stage` fail with `errno`
    pub fn fail_at(&mut self, stage: Stage, errno: Errno) {
        self.state.borrow_mut().stage_failures.insert(stage, errno);
    }

    /// Make joining `kind` fail with `errno`
    pub fn fail_join(&mut self, kind: NamespaceKind, errno: Errno) {
        self.state.borrow_mut().join_failures.insert(kind, errno);
    }

    /// Make mount root release fail with `errno`
    pub fn fail_release(&mut self, errno: Errno) {
        self.state.borrow_mut().release_failure = Some(errno);
    }

    /// Operations performed so far, in order
    #[must_use]
    pub fn ops(&self) -> Vec<MockOp> {
        self.state.borrow().ops.clone()
    }

    /// Number of times the current PID was queried
    #[must_use]
    pub fn pid_queries(&self) -> usize {
        self.state.borrow().pid_queries
    }

    /// Namespaces joined so far, in order
    #[must_use]
    pub fn joined(&self) -> Vec<NamespaceKind> {
        self.state.borrow().joined.clone()
    }

    /// Mount roots that currently exist
    #[must_use]
    pub fn mount_roots(&self) -> Vec<PathBuf> {
        self.state.borrow().mount_roots.clone()
    }

    /// Whether any namespace or mount state was touched
    #[must_use]
    pub fn is_untouched(&self) -> bool {
        self.state.borrow().ops.is_empty()
    }

    fn record(&self, op: MockOp) {
        tracing::debug!(?op, "Mock: recorded operation");
        self.state.borrow_mut().ops.push(op);
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

impl HostBackend for MockBackend {
    type Tree = MockTree;
    type NamespaceDir = MockNamespaceDir;
    type Exec = Vec<String>;

    fn current_pid(&self) -> ProcessId {
        let mut state = self.state.borrow_mut();
        state.pid_queries += 1;
        state.pid
    }

    fn capture_cwd(&mut self) -> nix::Result<MockTree> {
        let id = {
            let mut state = self.state.borrow_mut();
            state.check(Stage::CaptureCwd)?;
            state.next_id += 1;
            state.next_id
        };
        self.record(MockOp::CaptureCwd);
        Ok(MockTree { id })
    }

    fn open_host_namespaces(&mut self, proc_subset: Option<&str>) -> nix::Result<MockNamespaceDir> {
        self.state.borrow().check(Stage::ResolveHost)?;
        self.record(MockOp::ResolveHost {
            pid: ProcessId::INIT,
            subset: proc_subset.map(str::to_string),
        });
        Ok(MockNamespaceDir {
            pid: ProcessId::INIT,
        })
    }

    fn join_namespace(&mut self, dir: &MockNamespaceDir, kind: NamespaceKind) -> nix::Result<()> {
        if !dir.pid.is_init() {
            return Err(Errno::ESRCH);
        }
        {
            let mut state = self.state.borrow_mut();
            if let Some(errno) = state.join_failures.get(&kind) {
                return Err(*errno);
            }
            state.check(Stage::JoinNamespaces)?;
            state.joined.push(kind);
        }
        self.record(MockOp::Join(kind));
        Ok(())
    }

    fn isolate_mounts(&mut self) -> nix::Result<()> {
        self.state.borrow().check(Stage::IsolateMounts)?;
        self.record(MockOp::IsolateMounts);
        Ok(())
    }

    fn create_mount_root(&mut self, template: &Path) -> nix::Result<PathBuf> {
        let path = {
            let mut state = self.state.borrow_mut();
            state.check(Stage::CreateMountRoot)?;
            let prefix = template
                .to_str()
                .and_then(|t| t.strip_suffix(TEMPLATE_SUFFIX))
                .ok_or(Errno::EINVAL)?;
            state.next_id += 1;
            let path = PathBuf::from(format!("{prefix}{:06}", state.next_id));
            state.mount_roots.push(path.clone());
            path
        };
        self.record(MockOp::CreateMountRoot(path.clone()));
        Ok(path)
    }

    fn attach_tree(&mut self, tree: MockTree, target: &Path) -> nix::Result<()> {
        {
            let state = self.state.borrow();
            state.check(Stage::RelocateCwd)?;
            if !state.mount_roots.iter().any(|p| p == target) {
                return Err(Errno::ENOENT);
            }
        }
        tracing::trace!(tree = tree.id, "Mock: attaching tree");
        self.record(MockOp::AttachTree(target.to_path_buf()));
        Ok(())
    }

    fn change_dir(&mut self, path: &Path) -> nix::Result<()> {
        self.state.borrow().check(Stage::ChangeDir)?;
        self.record(MockOp::ChangeDir(path.to_path_buf()));
        Ok(())
    }

    fn exec(&mut self, invocation: &Invocation) -> nix::Result<Vec<String>> {
        self.state.borrow().check(Stage::Exec)?;
        let argv: Vec<String> = invocation
            .argv()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.record(MockOp::Exec(argv.clone()));
        Ok(argv)
    }

    fn release_mount_root(&mut self, root: &Path, attached: bool) -> nix::Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if let Some(errno) = state.release_failure {
                return Err(errno);
            }
            state.mount_roots.retain(|p| p != root);
        }
        self.record(MockOp::ReleaseMountRoot {
            path: root.to_path_buf(),
            attached,
        });
        Ok(())
    }
}
