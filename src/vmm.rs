//! bhyve VMM device enumeration and destruction

use crate::error::{Result, SyscallError};
use crate::jail::ffi;
use std::fs;
use std::io;
use std::path::Path;

/// Directory where vmm(4) exposes one node per virtual machine
pub const VMM_DIR: &str = "/dev/vmm";

/// sysctl that destroys the named virtual machine
pub const VMM_DESTROY_OID: &str = "hw.vmm.destroy";

/// List VM names under the VMM device directory
///
/// A missing directory means vmm.ko is not loaded and yields an empty list.
pub fn list_vmm_devices(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Destroy a virtual machine by name
pub fn destroy_vmm(name: &str) -> std::result::Result<(), SyscallError> {
    ffi::set_sysctl_string(VMM_DESTROY_OID, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_missing_dir() {
        let dir = TempDir::new().unwrap();
        let names = list_vmm_devices(&dir.path().join("vmm")).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_list_sorted_names() {
        let dir = TempDir::new().unwrap();
        for name in ["web-vm", "builder", "ci0"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let names = list_vmm_devices(dir.path()).unwrap();
        assert_eq!(names, vec!["builder", "ci0", "web-vm"]);
    }
}
