//! Mount table enumeration
//!
//! Two sources:
//! - `mount -v --libxo json`: system-wide view, fsid not guaranteed
//! - the `security.jail.mntinfojson` sysctl: jail-scoped view with fsids,
//!   present only when the kernel module providing it is loaded

use crate::error::{Error, Result};
use crate::jail::ffi;
use crate::mount::FsId;
use crate::sys;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// sysctl exposing the caller's jail-scoped mount table as JSON
pub const MNTINFO_OID: &str = "security.jail.mntinfojson";

/// One row of a mount table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountEntry {
    pub fs_type: String,
    /// Mounted device or source directory
    pub special: String,
    /// Mount point
    pub node: PathBuf,
    pub options: Vec<String>,
    pub fsid: Option<FsId>,
}

impl MountEntry {
    pub fn new(
        fs_type: impl Into<String>,
        special: impl Into<String>,
        node: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fs_type: fs_type.into(),
            special: special.into(),
            node: node.into(),
            options: Vec::new(),
            fsid: None,
        }
    }

    pub fn with_fsid(mut self, fsid: FsId) -> Self {
        self.fsid = Some(fsid);
        self
    }

    pub fn is_nullfs(&self) -> bool {
        self.fs_type == "nullfs"
    }

    pub fn is_devfs(&self) -> bool {
        self.fs_type == "devfs"
    }

    /// Preferred unmount target: the fsid when known, the node otherwise
    pub fn unmount_target(&self) -> UnmountTarget {
        match self.fsid {
            Some(fsid) => UnmountTarget::FsId(fsid),
            None => UnmountTarget::Path(self.node.clone()),
        }
    }
}

/// Target of an unmount(2) call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnmountTarget {
    Path(PathBuf),
    /// Immune to path renames and races with other mounts on the same node
    FsId(FsId),
}

impl fmt::Display for UnmountTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmountTarget::Path(path) => write!(f, "{}", path.display()),
            UnmountTarget::FsId(fsid) => write!(f, "{}", fsid),
        }
    }
}

// libxo JSON layout emitted by mount(8)
#[derive(Debug, Deserialize)]
struct MountDocument {
    mount: MountedList,
}

#[derive(Debug, Deserialize)]
struct MountedList {
    #[serde(default)]
    mounted: Vec<RawMount>,
}

#[derive(Debug, Deserialize)]
struct RawMount {
    fstype: String,
    special: String,
    node: String,
    #[serde(default)]
    opts: Vec<String>,
    #[serde(default)]
    fsid: Option<String>,
}

impl TryFrom<RawMount> for MountEntry {
    type Error = Error;

    fn try_from(raw: RawMount) -> Result<Self> {
        let fsid = raw
            .fsid
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(FsId::from_packed)
            .transpose()?;

        Ok(MountEntry {
            fs_type: raw.fstype,
            special: raw.special,
            node: PathBuf::from(raw.node),
            options: raw.opts,
            fsid,
        })
    }
}

/// Parse the libxo JSON mount table, preserving listing order
pub fn parse_mount_json(json: &str) -> Result<Vec<MountEntry>> {
    let doc: MountDocument = serde_json::from_str(json)
        .map_err(|e| Error::MountTableParse(e.to_string()))?;
    doc.mount
        .mounted
        .into_iter()
        .map(MountEntry::try_from)
        .collect()
}

/// Read the system-wide mount table
pub fn read_mount_info() -> Result<Vec<MountEntry>> {
    let output = sys::run_tool("mount", &["-v", "--libxo", "json"])?;
    parse_mount_json(&output)
}

/// Read the jail-scoped mount table
///
/// `Ok(None)` means the facility is absent, which is the common case; callers
/// fall back to [`read_mount_info`].
pub fn read_jail_scoped_mount_info() -> Result<Option<Vec<MountEntry>>> {
    match ffi::sysctl_string(MNTINFO_OID) {
        Ok(json) => parse_mount_json(&json).map(Some),
        Err(e) if e.errno == Errno::ENOENT => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether `node` lies strictly below `root`
pub fn is_under(node: &Path, root: &Path) -> bool {
    node != root && node.starts_with(root)
}

/// Rewrite `node` relative to the jail root as seen from inside the jail
///
/// `/jails/test1/pkg` under `/jails/test1` becomes `/pkg`.
pub fn relative_node(node: &Path, root: &Path) -> Option<PathBuf> {
    node.strip_prefix(root)
        .ok()
        .map(|rel| Path::new("/").join(rel))
}

/// Select the entries a teardown may unmount, in the order to unmount them
///
/// Only entries strictly below `root` qualify. The result is the reverse of
/// listing order, so deeper mounts go before the mounts they sit on. A root of
/// `/` (or a relative root) yields nothing.
pub fn unmount_candidates<'a>(
    entries: &'a [MountEntry],
    root: &Path,
    skip_first_devfs: bool,
) -> Vec<&'a MountEntry> {
    if !root.is_absolute() || root.parent().is_none() {
        return Vec::new();
    }

    let mut devfs_skipped = !skip_first_devfs;
    let mut candidates: Vec<&MountEntry> = entries
        .iter()
        .filter(|entry| is_under(&entry.node, root))
        .filter(|entry| {
            if !devfs_skipped && entry.is_devfs() {
                devfs_skipped = true;
                return false;
            }
            true
        })
        .collect();

    candidates.reverse();
    candidates
}
