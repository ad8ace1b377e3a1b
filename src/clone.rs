//! Container rootfs cloning and creation orchestration: `bdev_copy`/`bdev_create` in spirit.

use std::path::{Path, PathBuf};

use crate::backend::CloneContext;
use crate::backends::canonical_path;
use crate::child;
use crate::error::{BdevError, Result};
use crate::handle::{BackendHandle, BackendKind};
use crate::registry;
use crate::specs::BackendSpecs;

/// Parameters for [`clone_storage`], gathering what the original passed as `bdev_copy`'s
/// positional arguments plus its `LXC_CLONE_*` flag bits.
pub struct CloneRequest<'a> {
	/// The source container's name.
	pub old_name: &'a str,
	/// The target container's name.
	pub new_name: &'a str,
	/// The source container's `lxcpath`.
	pub old_path: &'a Path,
	/// The target container's `lxcpath`.
	pub lxc_path: &'a Path,
	/// An explicit target backend type, or `None` to keep the source's type.
	pub bdev_type: Option<BackendKind>,
	/// Whether a COW snapshot was requested.
	pub snapshot: bool,
	/// Whether a snapshot is acceptable but not required.
	pub maybe_snapshot: bool,
	/// Whether an explicit `bdev_type` should still be treated as "keep the original type" for
	/// the maybe-snapshot downgrade rule.
	pub keep_bdev_type: bool,
	/// An explicit new size, if any.
	pub new_size: Option<u64>,
	/// Whether the caller is running unprivileged, which restricts which backend
	/// combinations are allowed to snapshot.
	pub unprivileged: bool,
}

/// The result of a successful [`clone_storage`] call.
pub struct CloneOutcome {
	/// The newly derived handle.
	pub handle: BackendHandle,
	/// Whether the caller must additionally record a reverse dependency from the original
	/// container to the new one (set when the new storage still references the original's
	/// bytes on disk, e.g. an `aufs`/`overlayfs` layer over a `dir` rootfs).
	pub needs_rdep: bool,
}

/// Returns whether an unprivileged caller may request this particular clone combination.
///
/// Unprivileged users may copy and snapshot `dir`, `aufs`, `overlayfs`, `btrfs`, and `loop`;
/// notably not `zfs`, `lvm`, `rbd`, or `nbd`, which all require elevated access to provision.
fn unpriv_snap_allowed(orig_kind: BackendKind, bdev_type: Option<BackendKind>) -> bool {
	let allowed = |k: BackendKind| {
		matches!(k, BackendKind::Dir | BackendKind::Aufs | BackendKind::Overlayfs | BackendKind::Btrfs | BackendKind::Loop)
	};
	match bdev_type {
		Some(t) => allowed(t),
		None => allowed(orig_kind),
	}
}

/// Clones a container's backing storage, optionally as a COW snapshot, per `req`.
pub fn clone_storage(orig_raw_source: &str, req: &CloneRequest) -> Result<CloneOutcome> {
	let mut orig = registry::bdev_init(orig_raw_source, None, None, None)?;
	if orig.destination.is_none() {
		let dest = canonical_path(req.old_path, req.old_name, "rootfs");
		if !dest.exists() {
			if let Err(e) = std::fs::create_dir_all(&dest) {
				tracing::warn!(target: "bdev::clone", error = %e, path = %dest.display(), "failed to create original rootfs directory, continuing");
			}
		}
		orig.destination = Some(dest);
	}

	let orig_backend = registry::bdev_get(orig.kind);

	let mut snap = req.snapshot;
	let mut bdev_type = req.bdev_type;

	if req.maybe_snapshot && req.keep_bdev_type && bdev_type.is_none() && !orig_backend.capabilities().can_snapshot {
		snap = false;
	}

	if bdev_type.is_none() && !req.keep_bdev_type && snap && orig.kind == BackendKind::Dir {
		bdev_type = Some(BackendKind::Overlayfs);
	}

	if req.unprivileged && !unpriv_snap_allowed(orig.kind, bdev_type) {
		return Err(BdevError::Unsupported("snapshot combination not allowed for unprivileged users"));
	}

	let needs_rdep = match bdev_type {
		Some(new_kind) if orig.kind == BackendKind::Dir && matches!(new_kind, BackendKind::Aufs | BackendKind::Overlayfs) => true,
		None if snap && orig.kind == BackendKind::Lvm => true,
		_ => false,
	};

	let new_kind = bdev_type.unwrap_or(orig.kind);
	let new_backend = registry::bdev_get(new_kind);
	let mut new_handle = BackendHandle::new(new_kind);

	let ctx = CloneContext {
		old_name: req.old_name,
		new_name: req.new_name,
		old_path: req.old_path,
		lxc_path: req.lxc_path,
		snapshot: snap,
		new_size: req.new_size,
	};
	new_backend.clone_paths(&orig, &mut new_handle, &ctx)?;

	if snap {
		return Ok(CloneOutcome { handle: new_handle, needs_rdep });
	}

	// https://github.com/lxc/lxc/issues/131: restore via btrfs's own snapshot mechanism
	// instead of a byte copy when both sides live on the same btrfs filesystem.
	if bdev_type.is_some() && orig.kind == BackendKind::Btrfs && new_kind == BackendKind::Btrfs {
		if let (Some(orig_dest), Some(new_dest)) = (&orig.destination, &new_handle.destination) {
			if same_filesystem(orig_dest, new_dest).unwrap_or(false) {
				crate::backends::btrfs::restore_over(orig_dest, new_dest)?;
				return Ok(CloneOutcome { handle: new_handle, needs_rdep });
			}
		}
	}

	let orig_dest = orig.destination.clone().ok_or(BdevError::BadArgument("destination"))?;
	let new_dest = new_handle.destination.clone().ok_or(BdevError::BadArgument("destination"))?;
	run_copy(req.unprivileged, &orig_dest, &new_dest)?;

	Ok(CloneOutcome { handle: new_handle, needs_rdep })
}

/// Whether `a` and `b` live on the same mounted filesystem, by comparing `st_dev`.
fn same_filesystem(a: &Path, b: &Path) -> Result<bool> {
	use std::os::unix::fs::MetadataExt as _;
	let a = std::fs::metadata(a)?;
	let b = std::fs::metadata(b)?;
	Ok(a.dev() == b.dev())
}

/// Copies `orig_dest` onto `new_dest` with `rsync -aHAX --delete`.
///
/// When `unprivileged`, a full implementation would re-exec into the target container's user
/// namespace first so that copied files land with remapped ownership; that seam isn't wired up
/// here, so an unprivileged copy currently runs with the caller's own ownership intact.
fn run_copy(unprivileged: bool, orig_dest: &Path, new_dest: &Path) -> Result<()> {
	if unprivileged {
		tracing::debug!(target: "bdev::clone", "copying without uid/gid remapping; userns_exec integration is not implemented");
	}
	let src_arg = format!("{}/", orig_dest.display());
	let dst_arg = format!("{}/", new_dest.display());
	child::run("rsync", &["-aHAX", "--delete", &src_arg, &dst_arg])
}

/// Creates fresh backing storage at `dest` for a new container, choosing among `type_spec`'s
/// possibilities (`None` for `dir`, `"best"` to try an opinionated preference order, a
/// comma-separated list to try each in turn, or a single explicit type).
pub fn create_storage(dest: &Path, type_spec: Option<&str>, name: &str, specs: &BackendSpecs) -> Result<BackendHandle> {
	const BEST_OPTIONS: [&str; 5] = ["btrfs", "zfs", "lvm", "dir", "rbd"];

	let Some(type_spec) = type_spec else {
		return do_create(dest, BackendKind::Dir, name, specs);
	};

	if type_spec == "best" {
		let mut last_err = None;
		for candidate in BEST_OPTIONS {
			let kind = BackendKind::from_str(candidate).expect("BEST_OPTIONS only names real kinds");
			match do_create(dest, kind, name, specs) {
				Ok(handle) => return Ok(handle),
				Err(e) => last_err = Some(e),
			}
		}
		return Err(last_err.unwrap_or(BdevError::NotFound("usable backend")));
	}

	if type_spec.contains(',') {
		let mut last_err = None;
		for token in type_spec.split(',') {
			let kind = BackendKind::from_str(token).ok_or(BdevError::BadArgument("bdev type"))?;
			match do_create(dest, kind, name, specs) {
				Ok(handle) => return Ok(handle),
				Err(e) => last_err = Some(e),
			}
		}
		return Err(last_err.unwrap_or(BdevError::NotFound("usable backend")));
	}

	let kind = BackendKind::from_str(type_spec).ok_or(BdevError::BadArgument("bdev type"))?;
	do_create(dest, kind, name, specs)
}

fn do_create(dest: &Path, kind: BackendKind, name: &str, specs: &BackendSpecs) -> Result<BackendHandle> {
	let backend = registry::bdev_get(kind);
	let mut handle = BackendHandle::new(kind);
	backend.create(&mut handle, dest, name, specs)?;
	Ok(handle)
}

/// Parses a human-entered size like `"1g"`/`"512M"`/`"100"` into bytes, at base-10 multipliers
/// (`k`=1e3, `m`=1e6, `g`=1e9). Returns 0 if `s` does not start with a recognizable number.
pub fn get_fssize(s: &str) -> u64 {
	let trimmed = s.trim_start();
	let digits_end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
	if digits_end == 0 {
		return 0;
	}
	let Ok(mut value) = trimmed[..digits_end].parse::<u64>() else { return 0 };

	let suffix = trimmed[digits_end..].trim_start();
	match suffix.chars().next() {
		Some('g' | 'G') => value = value.saturating_mul(1_000_000_000),
		Some('m' | 'M') => value = value.saturating_mul(1_000_000),
		Some('k' | 'K') => value = value.saturating_mul(1_000),
		_ => {}
	}
	value
}

#[test]
fn test_get_fssize_suffixes() {
	assert_eq!(get_fssize("1g"), 1_000_000_000);
	assert_eq!(get_fssize("1G"), 1_000_000_000);
	assert_eq!(get_fssize("1024k"), 1_024_000);
	assert_eq!(get_fssize("512M"), 512_000_000);
	assert_eq!(get_fssize("100"), 100);
}

#[test]
fn test_get_fssize_no_leading_digits_is_zero() {
	assert_eq!(get_fssize(""), 0);
	assert_eq!(get_fssize("gibberish"), 0);
}

#[test]
fn test_unpriv_snap_allowed_excludes_privileged_only_backends() {
	assert!(unpriv_snap_allowed(BackendKind::Dir, None));
	assert!(unpriv_snap_allowed(BackendKind::Dir, Some(BackendKind::Overlayfs)));
	assert!(!unpriv_snap_allowed(BackendKind::Zfs, None));
	assert!(!unpriv_snap_allowed(BackendKind::Dir, Some(BackendKind::Lvm)));
}

#[test]
fn test_create_storage_none_defaults_to_dir() {
	let dir = tempfile::tempdir().unwrap();
	let dest = dir.path().join("rootfs");
	let handle = create_storage(&dest, None, "c1", &BackendSpecs::default()).unwrap();
	assert_eq!(handle.kind, BackendKind::Dir);
}

#[test]
fn test_create_storage_comma_list_tries_each_until_one_succeeds() {
	let dir = tempfile::tempdir().unwrap();
	let dest = dir.path().join("rootfs");
	// "zfs" always fails (Unsupported), "dir" always succeeds; the comma list should fall
	// through to dir.
	let handle = create_storage(&dest, Some("zfs,dir"), "c1", &BackendSpecs::default()).unwrap();
	assert_eq!(handle.kind, BackendKind::Dir);
}
