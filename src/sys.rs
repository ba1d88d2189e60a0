//! System detection and base-system tool invocation

use crate::error::{Error, Result};
use crate::jail::ffi;
use nix::errno::Errno;
use std::process::Command;

/// sysctl reporting whether the current process is jailed
pub const JAILED_OID: &str = "security.jail.jailed";

/// Check whether the current process already runs inside a jail
///
/// Changes which code paths are legal: a jailed process sees only its own
/// subtree and may have access to the jail-scoped mount table.
pub fn is_jailed() -> Result<bool> {
    match ffi::sysctl_i32(JAILED_OID) {
        Ok(v) => Ok(v != 0),
        // Kernels without jail support cannot be jailed
        Err(e) if e.errno == Errno::ENOENT => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Run a base-system tool and return its stdout
///
/// A non-zero exit status becomes `Error::CommandFailed` with stderr attached.
pub fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::CommandFailed {
            command: command_line(program, args),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::CommandFailed {
            command: command_line(program, args),
            message: format!("{} ({})", stderr.trim(), output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a base-system tool and return its exit code, for tools like pgrep
/// that signal their answer through the status
pub fn run_tool_status(program: &str, args: &[&str]) -> Result<i32> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::CommandFailed {
            command: command_line(program, args),
            message: e.to_string(),
        })?;

    output.status.code().ok_or_else(|| Error::CommandFailed {
        command: command_line(program, args),
        message: "terminated by signal".to_string(),
    })
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        assert_eq!(command_line("jls", &["-n", "-q"]), "jls -n -q");
    }

    #[test]
    fn test_run_tool_missing_binary() {
        let err = run_tool("/nonexistent/scuttle-tool", &["-x"]).unwrap_err();
        match err {
            Error::CommandFailed { command, .. } => {
                assert_eq!(command, "/nonexistent/scuttle-tool -x")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(not(target_os = "freebsd"))]
    #[test]
    fn test_is_jailed_without_jail_support() {
        // sysctl is ENOSYS off FreeBSD, which is surfaced rather than guessed
        assert!(is_jailed().is_err());
    }
}
