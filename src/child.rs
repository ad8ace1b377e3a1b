//! Helpers for invoking the external helper programs this subsystem shells out to (`mkfs`,
//! `rbd`, `qemu-nbd`).
//!
//! Every exec site nulls standard descriptors before exec so helpers never block trying to
//! read an interactive prompt from whatever happens to be on our stdin.

use std::os::unix::process::ExitStatusExt as _;
use std::process::{Command, Stdio};

use crate::error::{BdevError, Result};

/// Runs `program` with `args`, with stdio nulled, and waits for it to complete.
///
/// A non-zero exit code or termination by signal is reported as [`BdevError::ChildFailed`];
/// signal-terminated children are treated the same as a nonzero exit.
pub fn run(program: &'static str, args: &[&str]) -> Result<()> {
	let status = Command::new(program)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::inherit())
		.status()
		.map_err(BdevError::Syscall)?;

	if status.success() {
		Ok(())
	} else {
		Err(BdevError::ChildFailed { program, status: Some(status) })
	}
}

/// Runs `mkfs -t <fstype> <path>`.
pub fn mkfs(path: &str, fstype: &str) -> Result<()> {
	run("mkfs", &["-t", fstype, path])
}

/// Returns `true` if `status` indicates the process was terminated by a signal, as opposed to
/// exiting with a nonzero status (used by callers that want to distinguish "ran and failed"
/// from "never ran").
pub fn was_signalled(status: std::process::ExitStatus) -> bool {
	status.signal().is_some()
}

#[test]
fn test_run_missing_program_is_syscall_error() {
	let err = run("definitely-not-a-real-program-xyz", &[]).unwrap_err();
	assert!(matches!(err, BdevError::Syscall(_)));
}

#[test]
fn test_run_false_is_child_failed() {
	// `false` is POSIX-guaranteed to exist and exit 1.
	let err = run("false", &[]).unwrap_err();
	assert!(matches!(err, BdevError::ChildFailed { program: "false", .. }));
}

#[test]
fn test_run_true_succeeds() {
	run("true", &[]).unwrap();
}
