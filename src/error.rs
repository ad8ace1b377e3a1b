//! The error type shared by the backend orchestrator and the registry.
//!
//! Individual modules (`lock`, `fstype`, `nbd_supervisor`) define their own, narrower error
//! enums in the same style and convert into [`BdevError`] at the point where they cross into
//! the orchestrator.

use std::fmt::{Display, Formatter};
use std::process::ExitStatus;

/// The errors that can occur while operating on a backing-store handle.
#[derive(Debug)]
pub enum BdevError {
	/// A handle was missing a field (`source`, `destination`, `type`) required for the
	/// requested operation, or the handle's type did not match the backend being invoked.
	BadArgument(&'static str),

	/// The operation is not implemented for this backend (e.g. `rbd.clone_paths`,
	/// `nbd.create`).
	Unsupported(&'static str),

	/// A registry lookup, free loop device, free NBD slot, or mapped RBD device could not be
	/// found.
	NotFound(&'static str),

	/// A child helper process (`mkfs`, `rbd`, `qemu-nbd`, rsync) exited with a failure status
	/// or was terminated by a signal.
	ChildFailed {
		/// The program that was run.
		program: &'static str,
		/// The exit status, if the process ran to completion.
		status: Option<ExitStatus>,
	},

	/// A syscall failed; the original error is preserved.
	Syscall(std::io::Error),

	/// A blocking wait exceeded its timeout. Only the anonymous-semaphore lock variant
	/// supports timeouts.
	Timeout,
}

impl Display for BdevError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::BadArgument(field) => write!(f, "missing or mismatched field: {field}"),
			Self::Unsupported(op) => write!(f, "operation not supported by this backend: {op}"),
			Self::NotFound(what) => write!(f, "not found: {what}"),
			Self::ChildFailed { program, status: Some(status) } => {
				write!(f, "{program} exited with {status}")
			}
			Self::ChildFailed { program, status: None } => {
				write!(f, "{program} did not run to completion")
			}
			Self::Syscall(_) => "syscall failed".fmt(f),
			Self::Timeout => "operation timed out".fmt(f),
		}
	}
}

impl std::error::Error for BdevError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Syscall(e) => Some(e),
			_ => None,
		}
	}
}

impl From<std::io::Error> for BdevError {
	fn from(source: std::io::Error) -> Self {
		Self::Syscall(source)
	}
}

impl From<nix::errno::Errno> for BdevError {
	fn from(source: nix::errno::Errno) -> Self {
		Self::Syscall(source.into())
	}
}

/// A result type whose error type is [`BdevError`].
pub type Result<T> = std::result::Result<T, BdevError>;
