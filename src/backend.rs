//! The polymorphic contract every backend driver implements.

use std::path::Path;

use crate::error::Result;
use crate::handle::{BackendHandle, BackendKind};
use crate::specs::{BackendSpecs, Capabilities};

/// The context passed to [`Backend::clone_paths`], gathering the parameters the original
/// implementation passed positionally.
pub struct CloneContext<'a> {
	/// The source container's name.
	pub old_name: &'a str,
	/// The target container's name.
	pub new_name: &'a str,
	/// The source container's `lxcpath`.
	pub old_path: &'a Path,
	/// The target container's `lxcpath`.
	pub lxc_path: &'a Path,
	/// Whether a COW snapshot was requested rather than a byte copy.
	pub snapshot: bool,
	/// An explicit new size, overriding whatever the backend would otherwise derive.
	pub new_size: Option<u64>,
}

/// The operation vtable a backing-store backend must provide.
///
/// This models the C original's `struct bdev_ops` (a vtable of function pointers) as a trait
/// object; the registry in [`crate::registry`] is a static table of `(name, constructor,
/// capabilities)` keyed by name, with no dynamic registration.
pub trait Backend: Send + Sync {
	/// Which backend this is.
	fn kind(&self) -> BackendKind;

	/// The capability flags advertised for this backend.
	fn capabilities(&self) -> Capabilities;

	/// Pure classification: does `source` belong to this backend?
	///
	/// Must not mutate any external state; prefix-tagged sources (`dir:`, `loop:`, `nbd:`,
	/// `/dev/rbd/`) are accepted verbatim, others require kernel inspection.
	fn detect(&self, source: &str) -> bool;

	/// Mounts `handle.source` onto `handle.destination`.
	///
	/// Returns [`crate::error::BdevError::BadArgument`] if `source`, `destination`, or the
	/// handle's `kind` don't match what this backend expects.
	fn mount(&self, handle: &mut BackendHandle) -> Result<()>;

	/// Tears down the mount established by [`Backend::mount`] and releases any
	/// backend-owned resources (loop fd, NBD connection) held by `handle`.
	fn umount(&self, handle: &mut BackendHandle) -> Result<()>;

	/// Provisions fresh storage per `specs` and populates `handle.source`/`destination`.
	///
	/// All-or-nothing: on failure the caller is responsible for destroying whatever partial
	/// state was left behind; this method is not required to roll back external state it
	/// spawned (e.g. an LVM volume already created).
	fn create(&self, handle: &mut BackendHandle, dest: &Path, name: &str, specs: &BackendSpecs) -> Result<()>;

	/// Derives `new`'s source/destination from `orig`, performing a snapshot if
	/// `ctx.snapshot` and this backend supports it.
	///
	/// Must not touch the filesystem when returning an error. Fails if `ctx.snapshot` is set
	/// and `!self.capabilities().can_snapshot`.
	fn clone_paths(&self, orig: &BackendHandle, new: &mut BackendHandle, ctx: &CloneContext) -> Result<()>;

	/// Removes the storage artifact referenced by `handle`.
	fn destroy(&self, handle: &BackendHandle) -> Result<()>;
}
