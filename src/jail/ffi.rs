//! Native bindings for the syscalls the teardown depends on
//!
//! The iovec construction is adapted from libjail-rs (https://github.com/fubarnetes/libjail-rs)
//! Original authors: Fabian Freyer <fabian.freyer@physik.tu-berlin.de>
//! License: BSD-3-Clause
//!
//! Copyright (c) 2018, Fabian Freyer <fabian.freyer@physik.tu-berlin.de>
//! All rights reserved.
//!
//! Redistribution and use in source and binary forms, with or without
//! modification, are permitted provided that the following conditions are met:
//!
//! 1. Redistributions of source code must retain the above copyright notice, this
//!    list of conditions and the following disclaimer.
//!
//! 2. Redistributions in binary form must reproduce the above copyright notice,
//!    this list of conditions and the following disclaimer in the documentation
//!    and/or other materials provided with the distribution.
//!
//! 3. Neither the name of the copyright holder nor the names of its
//!    contributors may be used to endorse or promote products derived from
//!    this software without specific prior written permission.
//!
//! Every call returns `Result<_, SyscallError>` carrying the raw errno. Nothing
//! here decides whether an errno is benign; that is up to the caller.
//! On targets other than FreeBSD each call fails with `ENOSYS`.

use crate::error::SyscallError;
use bitflags::bitflags;
use nix::errno::Errno;
use std::ffi::CString;

/// Macro to construct iovec structures for nmount(2)
macro_rules! iovec {
    ($key:expr => $value:expr) => {
        vec![iovec!($key), iovec!($value)]
    };
    ($value:expr, $size:expr) => {
        libc::iovec {
            iov_base: $value as *mut libc::c_void,
            iov_len: $size,
        }
    };
    ($name:expr) => {
        iovec!($name.as_ptr(), $name.len())
    };
}

bitflags! {
    /// Flags accepted by nmount(2) and unmount(2)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: i32 {
        /// Read-only mount
        const RDONLY = 0x0000_0001;
        /// Force unmount even if busy
        const FORCE = 0x0008_0000;
        /// Hide from df(1) and friends
        const IGNORE = 0x0080_0000;
        /// Target is an `FSID:<val0>:<val1>` string
        const BYFSID = 0x0800_0000;
    }
}

/// Prefix of the unmount(2) target string that selects a mount by fsid
pub const FSID_PREFIX: &str = "FSID:";

#[cfg(target_os = "freebsd")]
mod native {
    use nix::errno::Errno;

    fn check(ret: libc::c_int) -> Result<libc::c_int, Errno> {
        if ret == -1 { Err(Errno::last()) } else { Ok(ret) }
    }

    pub fn nmount(iov: &mut [libc::iovec], flags: i32) -> Result<(), Errno> {
        check(unsafe { libc::nmount(iov.as_mut_ptr(), iov.len() as libc::c_uint, flags) })
            .map(drop)
    }

    pub fn unmount(target: &std::ffi::CStr, flags: i32) -> Result<(), Errno> {
        check(unsafe { libc::unmount(target.as_ptr(), flags) }).map(drop)
    }

    pub fn jail_attach(jid: i32) -> Result<(), Errno> {
        check(unsafe { libc::jail_attach(jid) }).map(drop)
    }

    pub fn jail_remove(jid: i32) -> Result<(), Errno> {
        check(unsafe { libc::jail_remove(jid) }).map(drop)
    }

    pub fn sysctlbyname(
        name: &std::ffi::CStr,
        old: Option<&mut [u8]>,
        new: Option<&[u8]>,
    ) -> Result<usize, Errno> {
        let (oldp, mut oldlen) = match old {
            Some(buf) => (buf.as_mut_ptr() as *mut libc::c_void, buf.len()),
            None => (std::ptr::null_mut(), 0),
        };
        let (newp, newlen) = match new {
            Some(buf) => (buf.as_ptr() as *const libc::c_void, buf.len()),
            None => (std::ptr::null(), 0),
        };
        let oldlenp = if newp.is_null() {
            &mut oldlen as *mut libc::size_t
        } else {
            std::ptr::null_mut()
        };
        check(unsafe { libc::sysctlbyname(name.as_ptr(), oldp, oldlenp, newp, newlen) })?;
        Ok(oldlen)
    }
}

#[cfg(not(target_os = "freebsd"))]
mod native {
    use nix::errno::Errno;

    pub fn nmount(_iov: &mut [libc::iovec], _flags: i32) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    pub fn unmount(_target: &std::ffi::CStr, _flags: i32) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    pub fn jail_attach(_jid: i32) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    pub fn jail_remove(_jid: i32) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    pub fn sysctlbyname(
        _name: &std::ffi::CStr,
        _old: Option<&mut [u8]>,
        _new: Option<&[u8]>,
    ) -> Result<usize, Errno> {
        Err(Errno::ENOSYS)
    }
}

fn c_string(operation: &str, value: &str) -> Result<CString, SyscallError> {
    CString::new(value).map_err(|_| SyscallError::new(operation, Errno::EINVAL))
}

/// Encode nmount(2) options as alternating NUL-terminated key/value buffers
fn encode_mount_options(options: &[(&str, &str)]) -> Result<Vec<Vec<u8>>, SyscallError> {
    let mut raw = Vec::with_capacity(options.len() * 2);
    for (key, value) in options {
        raw.push(c_string("nmount", key)?.into_bytes_with_nul());
        raw.push(c_string("nmount", value)?.into_bytes_with_nul());
    }
    Ok(raw)
}

/// Mount a filesystem with nmount(2)
///
/// `options` are passed through as the key/value iovec pairs the kernel
/// expects, e.g. `[("fstype", "nullfs"), ("fspath", "/jails/web/pkg"), ("target", "/pkg")]`.
pub fn nmount(options: &[(&str, &str)], flags: MountFlags) -> Result<(), SyscallError> {
    let raw = encode_mount_options(options)?;
    let mut iov: Vec<libc::iovec> = raw
        .chunks(2)
        .flat_map(|pair| iovec!(pair[0] => pair[1]))
        .collect();

    let fspath = options
        .iter()
        .find(|(key, _)| *key == "fspath")
        .map(|(_, value)| *value)
        .unwrap_or("?");

    native::nmount(&mut iov, flags.bits())
        .map_err(|errno| SyscallError::new(format!("nmount({})", fspath), errno))
}

/// Unmount a filesystem by path or by `FSID:<val0>:<val1>`
///
/// `MNT_BYFSID` is added automatically for the fsid form.
pub fn unmount(target: &str, flags: MountFlags) -> Result<(), SyscallError> {
    let operation = format!("unmount({})", target);
    let flags = if target.starts_with(FSID_PREFIX) {
        flags | MountFlags::BYFSID
    } else {
        flags
    };
    let target = c_string(&operation, target)?;
    native::unmount(&target, flags.bits()).map_err(|errno| SyscallError::new(operation, errno))
}

/// Attach the current process to a jail
///
/// Irreversible: the process stays jailed for the rest of its life.
pub fn jail_attach(jid: i32) -> Result<(), SyscallError> {
    native::jail_attach(jid)
        .map_err(|errno| SyscallError::new(format!("jail_attach({})", jid), errno))
}

/// Remove a jail by its ID, killing whatever still runs in it
pub fn jail_remove(jid: i32) -> Result<(), SyscallError> {
    native::jail_remove(jid)
        .map_err(|errno| SyscallError::new(format!("jail_remove({})", jid), errno))
}

/// Read a sysctl value as raw bytes using the two-phase size/fetch protocol
fn sysctl_bytes(name: &str) -> Result<Vec<u8>, SyscallError> {
    let operation = format!("sysctlbyname({})", name);
    let cname = c_string(&operation, name)?;

    // The value may grow between the size query and the fetch
    for _ in 0..4 {
        let len = native::sysctlbyname(&cname, None, None)
            .map_err(|errno| SyscallError::new(operation.as_str(), errno))?;
        let mut buf = vec![0u8; len + len / 4 + 1];
        match native::sysctlbyname(&cname, Some(&mut buf), None) {
            Ok(written) => {
                buf.truncate(written);
                return Ok(buf);
            }
            Err(Errno::ENOMEM) => continue,
            Err(errno) => return Err(SyscallError::new(operation, errno)),
        }
    }

    Err(SyscallError::new(operation, Errno::ENOMEM))
}

/// Read a string sysctl
pub fn sysctl_string(name: &str) -> Result<String, SyscallError> {
    let mut buf = sysctl_bytes(name)?;
    if let Some(nul) = buf.iter().position(|&b| b == 0) {
        buf.truncate(nul);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read an int sysctl
pub fn sysctl_i32(name: &str) -> Result<i32, SyscallError> {
    let buf = sysctl_bytes(name)?;
    let bytes: [u8; 4] = buf
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| SyscallError::new(format!("sysctlbyname({})", name), Errno::EINVAL))?;
    Ok(i32::from_ne_bytes(bytes))
}

/// Write a string sysctl (NUL-terminated)
pub fn set_sysctl_string(name: &str, value: &str) -> Result<(), SyscallError> {
    let operation = format!("sysctlbyname({}={})", name, value);
    let cname = c_string(&operation, name)?;
    let cvalue = c_string(&operation, value)?;
    native::sysctlbyname(&cname, None, Some(cvalue.as_bytes_with_nul()))
        .map(drop)
        .map_err(|errno| SyscallError::new(operation, errno))
}

/// Write an int sysctl (raw 4 bytes)
pub fn set_sysctl_i32(name: &str, value: i32) -> Result<(), SyscallError> {
    let operation = format!("sysctlbyname({}={})", name, value);
    let cname = c_string(&operation, name)?;
    native::sysctlbyname(&cname, None, Some(&value.to_ne_bytes()))
        .map(drop)
        .map_err(|errno| SyscallError::new(operation, errno))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_mount_options() {
        let raw = encode_mount_options(&[("fstype", "nullfs"), ("fspath", "/jails/web/pkg")])
            .unwrap();
        assert_eq!(
            raw,
            vec![
                b"fstype\0".to_vec(),
                b"nullfs\0".to_vec(),
                b"fspath\0".to_vec(),
                b"/jails/web/pkg\0".to_vec(),
            ]
        );
    }

    #[test]
    fn test_encode_rejects_interior_nul() {
        let err = encode_mount_options(&[("fstype", "null\0fs")]).unwrap_err();
        assert_eq!(err.errno, Errno::EINVAL);
    }

    #[test]
    fn test_flag_values() {
        assert_eq!(MountFlags::FORCE.bits(), 0x80000);
        assert_eq!(MountFlags::BYFSID.bits(), 0x8000000);
        assert_eq!(MountFlags::RDONLY.bits(), 0x1);
        assert_eq!(MountFlags::IGNORE.bits(), 0x800000);
    }

    #[cfg(not(target_os = "freebsd"))]
    #[test]
    fn test_unmount_reports_operation_and_errno() {
        let err = unmount("FSID:1:2", MountFlags::FORCE).unwrap_err();
        assert_eq!(err.operation, "unmount(FSID:1:2)");
        assert_eq!(err.errno, Errno::ENOSYS);
    }

    #[cfg(not(target_os = "freebsd"))]
    #[test]
    fn test_nmount_names_mount_point() {
        let err = nmount(
            &[("fstype", "nullfs"), ("fspath", "/jails/web/pkg"), ("target", "/pkg")],
            MountFlags::RDONLY,
        )
        .unwrap_err();
        assert_eq!(err.operation, "nmount(/jails/web/pkg)");
        assert_eq!(err.errno, Errno::ENOSYS);
    }

    #[cfg(not(target_os = "freebsd"))]
    #[test]
    fn test_sysctl_unavailable() {
        let err = sysctl_i32("security.jail.jailed").unwrap_err();
        assert_eq!(err.errno, Errno::ENOSYS);
        assert!(err.operation.contains("security.jail.jailed"));
    }
}
