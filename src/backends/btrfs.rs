//! Btrfs subvolume backend: snapshots are real copy-on-write clones via the kernel's subvolume
//! ioctls, adapted from a Btrfs-backup tool's `create_snapshot`/`delete_subvolume` helpers.

use std::ffi::OsStr;
use std::fs::File;
use std::mem::MaybeUninit;
use std::os::unix::prelude::*;
use std::path::Path;

use nix::libc;

use super::canonical_path;
use crate::backend::{Backend, CloneContext};
use crate::child;
use crate::error::{BdevError, Result};
use crate::handle::{BackendHandle, BackendKind};
use crate::mount_opts;
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities};

/// The raw btrfs ioctls.
mod ioctl {
	/// The ioctl type code for btrfs ioctls.
	const MAGIC: u8 = 0x94;

	/// The maximum length of the name of a subvolume.
	pub const SUBVOL_NAME_MAX: usize = 4039;

	/// The maximum length of the name of a subvolume used in another place.
	pub const VOL_NAME_MAX: usize = 255;

	/// The size of a UUID used with btrfs ioctls.
	pub const UUID_SIZE: usize = 16;

	/// A flag to [`snap_create_v2`] to make the new subvolume read-only.
	pub const SUBVOL_RDONLY: u64 = 1 << 1;

	/// A flag to [`snap_destroy_v2`] to find the subvolume to destroy by subvolume ID rather
	/// than by name.
	pub const SUBVOL_SPEC_BY_ID: u64 = 1 << 4;

	#[derive(Default)]
	#[repr(C)]
	pub struct Timespec {
		pub sec: u64,
		pub nsec: u32,
	}

	#[repr(C)]
	pub union ArgsV2Identifier {
		pub name: [u8; SUBVOL_NAME_MAX + 1],
		pub devid: u64,
		pub subvolid: u64,
	}

	#[repr(C)]
	pub struct ArgsV2 {
		pub fd: i64,
		pub transid: u64,
		pub flags: u64,
		pub unused: [u64; 4],
		pub identifier: ArgsV2Identifier,
	}

	#[repr(C)]
	pub struct GetSubvolInfoArgs {
		pub treeid: u64,
		pub name: [u8; VOL_NAME_MAX + 1],
		pub parent_id: u64,
		pub dirid: u64,
		pub generation: u64,
		pub flags: u64,
		pub uuid: [u8; UUID_SIZE],
		pub parent_uuid: [u8; UUID_SIZE],
		pub received_uuid: [u8; UUID_SIZE],
		pub ctransid: u64,
		pub otransid: u64,
		pub stransid: u64,
		pub rtransid: u64,
		pub ctime: Timespec,
		pub otime: Timespec,
		pub stime: Timespec,
		pub rtime: Timespec,
		pub reserved: [u64; 8],
	}

	nix::ioctl_write_ptr!(snap_create_v2, MAGIC, 23, ArgsV2);
	nix::ioctl_read!(subvol_get_flags, MAGIC, 25, u64);
	nix::ioctl_write_ptr!(subvol_set_flags, MAGIC, 26, u64);
	nix::ioctl_read!(get_subvol_info, MAGIC, 60, GetSubvolInfoArgs);
	nix::ioctl_write_ptr!(snap_destroy_v2, MAGIC, 63, ArgsV2);
}

const BTRFS_SUPER_MAGIC: libc::__fsword_t = 0x9123683e;
const BTRFS_FIRST_FREE_OBJECTID: u64 = 256;

fn is_btrfs(f: impl AsFd) -> Result<bool> {
	let f = f.as_fd();
	let mut stat_buf = MaybeUninit::<libc::statfs>::uninit();
	// SAFETY: f is a valid fd and stat_buf is sized to hold a statfs.
	if unsafe { libc::fstatfs(f.as_raw_fd(), stat_buf.as_mut_ptr()) } < 0 {
		return Err(std::io::Error::last_os_error().into());
	}
	// SAFETY: fstatfs filled the buffer on success.
	let stat_buf = unsafe { stat_buf.assume_init() };
	Ok(stat_buf.f_type == BTRFS_SUPER_MAGIC)
}

fn is_subvolume(f: &File) -> Result<bool> {
	let metadata = f.metadata()?;
	Ok(metadata.is_dir() && metadata.ino() == BTRFS_FIRST_FREE_OBJECTID)
}

/// Creates a writable snapshot of `source` named `dest_name` inside `dest_parent`.
fn create_snapshot(source: &File, dest_parent: impl AsFd, dest_name: impl AsRef<OsStr>) -> Result<()> {
	let dest_name = dest_name.as_ref();
	if dest_name.len() > ioctl::SUBVOL_NAME_MAX {
		return Err(BdevError::BadArgument("snapshot name too long"));
	}
	if !is_btrfs(source)? {
		return Err(BdevError::BadArgument("source is not on a btrfs filesystem"));
	}
	if !is_subvolume(source)? {
		return Err(BdevError::BadArgument("source is not the root of a subvolume"));
	}

	let mut args = ioctl::ArgsV2 {
		fd: source.as_fd().as_raw_fd().into(),
		transid: 0,
		flags: 0,
		unused: [0; 4],
		identifier: ioctl::ArgsV2Identifier { name: [0; ioctl::SUBVOL_NAME_MAX + 1] },
	};
	// SAFETY: name is the active union member.
	unsafe { &mut args.identifier.name[..dest_name.len()] }.copy_from_slice(dest_name.as_bytes());
	// SAFETY: args is locally constructed and valid for the duration of the call.
	unsafe { ioctl::snap_create_v2(dest_parent.as_fd().as_raw_fd(), &args as *const _) }?;
	Ok(())
}

/// Deletes the subvolume rooted at `subvolume`, located inside `parent`.
fn delete_subvolume(parent: impl AsFd, subvolume: impl AsFd) -> Result<()> {
	let parent = parent.as_fd();
	let subvolume = subvolume.as_fd();

	let mut flags = 0_u64;
	// SAFETY: read-only ioctl, valid out-pointer.
	unsafe { ioctl::subvol_get_flags(subvolume.as_raw_fd(), &mut flags as *mut _) }?;
	flags &= !ioctl::SUBVOL_RDONLY;
	// SAFETY: flags is exactly the prior value minus the read-only bit.
	unsafe { ioctl::subvol_set_flags(subvolume.as_raw_fd(), &flags as *const _) }?;

	let mut info = MaybeUninit::<ioctl::GetSubvolInfoArgs>::uninit();
	// SAFETY: read-only ioctl, buffer sized for GetSubvolInfoArgs.
	unsafe { ioctl::get_subvol_info(subvolume.as_raw_fd(), info.as_mut_ptr()) }?;
	// SAFETY: filled on success.
	let info = unsafe { info.assume_init() };

	let args = ioctl::ArgsV2 {
		fd: 0,
		transid: 0,
		flags: ioctl::SUBVOL_SPEC_BY_ID,
		unused: [0_u64; 4],
		identifier: ioctl::ArgsV2Identifier { subvolid: info.treeid },
	};
	// SAFETY: args is fully populated above.
	unsafe { ioctl::snap_destroy_v2(parent.as_raw_fd(), &args as *const _) }?;
	Ok(())
}

/// The `btrfs` backend: a subvolume, mounted in place via bind mount like a plain directory.
pub struct Btrfs;

impl Backend for Btrfs {
	fn kind(&self) -> BackendKind {
		BackendKind::Btrfs
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: true, can_backup: true }
	}

	fn detect(&self, source: &str) -> bool {
		let path = Path::new(source);
		if !path.is_dir() {
			return false;
		}
		let Ok(f) = File::open(path) else { return false };
		matches!(is_btrfs(&f), Ok(true)) && matches!(is_subvolume(&f), Ok(true))
	}

	fn mount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(Source::Btrfs(src)) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		let Some(dest) = &handle.destination else {
			return Err(BdevError::BadArgument("destination"));
		};
		let parsed = mount_opts::parse(&handle.mount_options);
		let flags = parsed.flags | nix::mount::MsFlags::MS_BIND | nix::mount::MsFlags::MS_REC;
		let data = if parsed.data.is_empty() { None } else { Some(parsed.data.as_str()) };
		nix::mount::mount(Some(src.as_path()), dest.as_path(), Some("bind"), flags, data)?;
		Ok(())
	}

	fn umount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(dest) = &handle.destination else {
			return Err(BdevError::BadArgument("destination"));
		};
		nix::mount::umount(dest.as_path())?;
		Ok(())
	}

	fn create(&self, handle: &mut BackendHandle, dest: &Path, _name: &str, _specs: &BackendSpecs) -> Result<()> {
		if let Some(parent) = dest.parent() {
			std::fs::create_dir_all(parent)?;
		}
		child::run("btrfs", &["subvolume", "create", dest.to_str().ok_or(BdevError::BadArgument("path"))?])?;
		let raw = dest.display().to_string();
		handle.set_source(raw, Source::Btrfs(dest.to_path_buf()));
		handle.destination = Some(dest.to_path_buf());
		Ok(())
	}

	fn clone_paths(&self, orig: &BackendHandle, new: &mut BackendHandle, ctx: &CloneContext) -> Result<()> {
		let Some(Source::Btrfs(old_path)) = &orig.source else {
			return Err(BdevError::BadArgument("source"));
		};
		if !ctx.snapshot {
			return Err(BdevError::Unsupported("btrfs clone_paths requires a snapshot; use the generic copy path otherwise"));
		}

		let new_path = canonical_path(ctx.lxc_path, ctx.new_name, "rootfs");
		let new_parent = new_path.parent().ok_or(BdevError::BadArgument("destination"))?;
		std::fs::create_dir_all(new_parent)?;

		let source_file = File::open(old_path)?;
		let parent_file = File::open(new_parent)?;
		create_snapshot(&source_file, &parent_file, "rootfs")?;

		let raw = new_path.display().to_string();
		new.set_source(raw, Source::Btrfs(new_path.clone()));
		new.destination = Some(new_path);
		Ok(())
	}

	fn destroy(&self, handle: &BackendHandle) -> Result<()> {
		let Some(Source::Btrfs(path)) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		let parent = path.parent().ok_or(BdevError::BadArgument("source"))?;
		let subvolume = File::open(path)?;
		let parent_file = File::open(parent)?;
		delete_subvolume(&parent_file, &subvolume)?;
		Ok(())
	}
}

/// Restores `new_dest` from `orig_dest` via the btrfs snapshot ioctls directly, bypassing
/// `clone_paths` because the destination path is already known (used when a non-snapshot clone
/// discovers both sides already live on the same btrfs filesystem).
pub(crate) fn restore_over(orig_dest: &Path, new_dest: &Path) -> Result<()> {
	if new_dest.exists() {
		let parent = new_dest.parent().ok_or(BdevError::BadArgument("destination"))?;
		let subvolume = File::open(new_dest)?;
		let parent_file = File::open(parent)?;
		delete_subvolume(&parent_file, &subvolume)?;
	}
	let new_parent = new_dest.parent().ok_or(BdevError::BadArgument("destination"))?;
	std::fs::create_dir_all(new_parent)?;

	let name = new_dest.file_name().ok_or(BdevError::BadArgument("destination"))?;
	let source_file = File::open(orig_dest)?;
	let parent_file = File::open(new_parent)?;
	create_snapshot(&source_file, &parent_file, name)
}

#[test]
fn test_btrfs_detect_rejects_non_btrfs_directory() {
	let b = Btrfs;
	let tmp = tempfile::tempdir().unwrap();
	assert!(!b.detect(tmp.path().to_str().unwrap()));
}

#[test]
fn test_btrfs_clone_paths_requires_snapshot() {
	let b = Btrfs;
	let orig = {
		let mut h = BackendHandle::new(BackendKind::Btrfs);
		h.set_source("/var/lib/lxc/c1/rootfs", Source::Btrfs("/var/lib/lxc/c1/rootfs".into()));
		h.destination = Some("/var/lib/lxc/c1/rootfs".into());
		h
	};
	let mut new = BackendHandle::new(BackendKind::Btrfs);
	let ctx = CloneContext {
		old_name: "c1",
		new_name: "c2",
		old_path: Path::new("/var/lib/lxc"),
		lxc_path: Path::new("/var/lib/lxc"),
		snapshot: false,
		new_size: None,
	};
	assert!(matches!(b.clone_paths(&orig, &mut new, &ctx), Err(BdevError::Unsupported(_))));
}
