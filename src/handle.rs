//! The backend handle: the small value object threaded through every bdev operation.

use std::fmt::{Display, Formatter};
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use crate::source::Source;

/// The name of a supported backing-store backend.
///
/// Order matters for nothing in this enum itself; dispatch order lives in
/// [`crate::registry::REGISTRY`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BackendKind {
	Dir,
	Loop,
	Lvm,
	Btrfs,
	Zfs,
	Aufs,
	Overlayfs,
	Rbd,
	Nbd,
}

impl BackendKind {
	/// The canonical lowercase name used in the registry and in derived paths.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Dir => "dir",
			Self::Loop => "loop",
			Self::Lvm => "lvm",
			Self::Btrfs => "btrfs",
			Self::Zfs => "zfs",
			Self::Aufs => "aufs",
			Self::Overlayfs => "overlayfs",
			Self::Rbd => "rbd",
			Self::Nbd => "nbd",
		}
	}

	/// Parses a backend name as accepted by `bdev_get`/`--bdev`.
	pub fn from_str(s: &str) -> Option<Self> {
		Some(match s {
			"dir" => Self::Dir,
			"loop" => Self::Loop,
			"lvm" => Self::Lvm,
			"btrfs" => Self::Btrfs,
			"zfs" => Self::Zfs,
			"aufs" => Self::Aufs,
			"overlayfs" => Self::Overlayfs,
			"rbd" => Self::Rbd,
			"nbd" => Self::Nbd,
			_ => return None,
		})
	}
}

impl Display for BackendKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		self.as_str().fmt(f)
	}
}

/// A backing-store handle: the semantic tuple `{ type_name, source, destination, mount_options,
/// loop_fd, nbd_index }` that flows through every backend operation.
///
/// Owned resources (`loop_fd`) are released by `Drop` rather than by a separate "destroy the
/// handle" step, so an error path that abandons a half-built handle cannot leak the descriptor.
#[derive(Debug)]
pub struct BackendHandle {
	/// Which backend this handle is bound to; immutable for the handle's life.
	pub kind: BackendKind,

	/// The parsed source location, if one has been set.
	pub source: Option<Source>,

	/// The original source string as given, preserved for textual substitution in
	/// `clone_paths` and for round-tripping into freshly constructed handles.
	pub raw_source: Option<String>,

	/// The in-namespace mount point, typically `<lxcpath>/<name>/rootfs`.
	pub destination: Option<PathBuf>,

	/// The comma-separated mount option list as given by the caller.
	pub mount_options: String,

	/// The attached loop device file descriptor, if this handle currently owns one.
	pub loop_fd: Option<OwnedFd>,

	/// The reserved NBD slot index, if this handle currently owns one.
	pub nbd_index: Option<u32>,
}

impl BackendHandle {
	/// Creates a zero-initialized handle bound to `kind`, with no source, destination, or
	/// owned resources yet.
	pub fn new(kind: BackendKind) -> Self {
		Self {
			kind,
			source: None,
			raw_source: None,
			destination: None,
			mount_options: String::new(),
			loop_fd: None,
			nbd_index: None,
		}
	}

	/// Sets the raw and parsed source together, keeping them consistent.
	pub fn set_source(&mut self, raw: impl Into<String>, parsed: Source) {
		self.raw_source = Some(raw.into());
		self.source = Some(parsed);
	}
}

#[test]
fn test_backend_kind_round_trip() {
	for kind in [
		BackendKind::Dir,
		BackendKind::Loop,
		BackendKind::Lvm,
		BackendKind::Btrfs,
		BackendKind::Zfs,
		BackendKind::Aufs,
		BackendKind::Overlayfs,
		BackendKind::Rbd,
		BackendKind::Nbd,
	] {
		assert_eq!(BackendKind::from_str(kind.as_str()), Some(kind));
	}
	assert_eq!(BackendKind::from_str("bogus"), None);
}

#[test]
fn test_new_handle_has_no_owned_resources() {
	let h = BackendHandle::new(BackendKind::Loop);
	assert!(h.loop_fd.is_none());
	assert!(h.nbd_index.is_none());
	assert!(h.source.is_none());
	assert!(h.destination.is_none());
}
