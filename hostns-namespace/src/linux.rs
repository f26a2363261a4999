//! Linux implementation of the host backend
//!
//! The mount API (`open_tree`, `move_mount`, `fsopen`, `fsconfig`, `fsmount`)
//! goes through `rustix`; everything else goes through nix. rustix errors are
//! mapped onto nix's [`Errno`] so every stage reports the same error type.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use hostns_core::{Invocation, NamespaceKind, ProcessId};
use nix::errno::Errno;
use nix::fcntl::AT_FDCWD;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::{setns, unshare, CloneFlags};
use nix::unistd::UnlinkatFlags;
use rustix::fs::{Mode, OFlags, CWD};
use rustix::mount::{
    FsMountFlags, FsOpenFlags, MountAttrFlags, MoveMountFlags, OpenTreeFlags,
};
use tracing::{debug, trace};

use crate::backend::HostBackend;
use crate::info::NamespaceInfo;

/// Backend issuing the real syscalls
///
/// Every handle is an [`OwnedFd`] and closes on drop, including on the
/// early returns of a failed stage.
#[derive(Debug, Default)]
pub struct LinuxBackend;

impl LinuxBackend {
    /// Create a new Linux backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn errno(e: rustix::io::Errno) -> Errno {
    Errno::from_raw(e.raw_os_error())
}

/// `openat` relative to `dir`, read-only and close-on-exec
fn open_at(dir: BorrowedFd<'_>, path: &std::ffi::CStr, flags: OFlags) -> nix::Result<OwnedFd> {
    rustix::fs::openat(dir, path, flags | OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())
        .map_err(errno)
}

/// A fresh proc instance that is never attached to the filesystem
///
/// Because it is never attached, no other process can reach it. The only
/// entry ever resolved through it is PID 1's namespace directory.
struct HostProc {
    mount: OwnedFd,
}

impl HostProc {
    fn mount(subset: Option<&str>) -> nix::Result<Self> {
        let fs = rustix::mount::fsopen("proc", FsOpenFlags::FSOPEN_CLOEXEC).map_err(errno)?;

        if let Some(subset) = subset {
            rustix::mount::fsconfig_set_string(fs.as_fd(), "subset", subset).map_err(errno)?;
        }

        rustix::mount::fsconfig_create(fs.as_fd()).map_err(errno)?;
        let mount = rustix::mount::fsmount(
            fs.as_fd(),
            FsMountFlags::FSMOUNT_CLOEXEC,
            MountAttrFlags::empty(),
        )
        .map_err(errno)?;
        debug!(subset = ?subset, "Mounted private proc instance");

        Ok(Self { mount })
    }

    fn init_namespaces(&self) -> nix::Result<OwnedFd> {
        open_at(self.mount.as_fd(), c"1/ns", OFlags::DIRECTORY)
    }
}

fn path_to_cstring(path: &Path) -> nix::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)
}

impl HostBackend for LinuxBackend {
    type Tree = OwnedFd;
    type NamespaceDir = OwnedFd;
    type Exec = Infallible;

    fn current_pid(&self) -> ProcessId {
        ProcessId::current()
    }

    fn capture_cwd(&mut self) -> nix::Result<OwnedFd> {
        rustix::mount::open_tree(
            CWD,
            "",
            OpenTreeFlags::OPEN_TREE_CLONE
                | OpenTreeFlags::OPEN_TREE_CLOEXEC
                | OpenTreeFlags::AT_EMPTY_PATH,
        )
        .map_err(errno)
    }

    fn open_host_namespaces(&mut self, proc_subset: Option<&str>) -> nix::Result<OwnedFd> {
        HostProc::mount(proc_subset)?.init_namespaces()
    }

    fn join_namespace(&mut self, dir: &OwnedFd, kind: NamespaceKind) -> nix::Result<()> {
        let ns = open_at(dir.as_fd(), kind.proc_cname(), OFlags::empty())?;
        setns(ns.as_fd(), kind.clone_flag())?;

        trace!(
            namespace = %kind,
            id = ?NamespaceInfo::identifier(Path::new("/proc/thread-self/ns"), kind),
            "Namespace identifier after join"
        );
        Ok(())
    }

    fn isolate_mounts(&mut self) -> nix::Result<()> {
        unshare(CloneFlags::CLONE_NEWNS)?;
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )
    }

    fn create_mount_root(&mut self, template: &Path) -> nix::Result<PathBuf> {
        nix::unistd::mkdtemp(template)
    }

    fn attach_tree(&mut self, tree: OwnedFd, target: &Path) -> nix::Result<()> {
        let target = path_to_cstring(target)?;
        rustix::mount::move_mount(
            tree.as_fd(),
            "",
            CWD,
            target.as_c_str(),
            MoveMountFlags::MOVE_MOUNT_F_EMPTY_PATH,
        )
        .map_err(errno)
    }

    fn change_dir(&mut self, path: &Path) -> nix::Result<()> {
        nix::unistd::chdir(path)
    }

    fn exec(&mut self, invocation: &Invocation) -> nix::Result<Infallible> {
        nix::unistd::execv(invocation.program(), invocation.argv())
    }

    fn release_mount_root(&mut self, root: &Path, attached: bool) -> nix::Result<()> {
        if attached {
            umount2(root, MntFlags::MNT_DETACH)?;
        }
        nix::unistd::unlinkat(AT_FDCWD, root, UnlinkatFlags::RemoveDir)
    }
}
