//! Loopback image backend.
//!
//! Grounded in the `loop_*` family of functions from the original C `bdev.c`; the raw ioctl
//! numbers for the Linux loop driver predate the modern `_IOC`-encoded ioctl convention (they
//! are bare historical constants, not `type+nr` pairs), so these are issued via raw
//! `libc::ioctl` rather than `nix::ioctl_*!`.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write as _};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::libc;

use super::canonical_path;
use crate::backend::{Backend, CloneContext};
use crate::child;
use crate::error::{BdevError, Result};
use crate::handle::{BackendHandle, BackendKind};
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities, DEFAULT_FSTYPE, DEFAULT_FS_SIZE};

const LOOP_SET_FD: libc::c_ulong = 0x4C00;
const LOOP_SET_STATUS64: libc::c_ulong = 0x4C04;
const LOOP_GET_STATUS64: libc::c_ulong = 0x4C05;
const LOOP_CTL_GET_FREE: libc::c_ulong = 0x4C82;
const LO_FLAGS_AUTOCLEAR: u32 = 4;
const LO_NAME_SIZE: usize = 64;
const LO_KEY_SIZE: usize = 32;

/// `BLKGETSIZE64`: `_IOR(0x12, 114, size_t)`.
const BLKGETSIZE64: libc::c_ulong = nix::request_code_read!(0x12, 114, std::mem::size_of::<libc::size_t>()) as libc::c_ulong;

#[repr(C)]
#[derive(Clone, Copy)]
struct LoopInfo64 {
	lo_device: u64,
	lo_inode: u64,
	lo_rdevice: u64,
	lo_offset: u64,
	lo_sizelimit: u64,
	lo_number: u32,
	lo_encrypt_type: u32,
	lo_encrypt_key_size: u32,
	lo_flags: u32,
	lo_file_name: [u8; LO_NAME_SIZE],
	lo_crypt_name: [u8; LO_NAME_SIZE],
	lo_encrypt_key: [u8; LO_KEY_SIZE],
	lo_init: [u64; 2],
}

impl Default for LoopInfo64 {
	fn default() -> Self {
		// SAFETY: an all-zero `LoopInfo64` is a valid bit pattern (plain integers and byte
		// arrays, no padding requiring initialization beyond zero).
		unsafe { std::mem::zeroed() }
	}
}

/// Searches `/dev/loop-control`'s `LOOP_CTL_GET_FREE`, falling back to scanning `/dev/loop*`
/// for a slot whose `LOOP_GET_STATUS64` fails with `ENXIO`.
fn find_free_loopdev() -> Result<(OwnedFd, PathBuf)> {
	if let Ok(ctl) = File::options().read(true).write(true).open("/dev/loop-control") {
		// SAFETY: ctl is a valid, open file descriptor; LOOP_CTL_GET_FREE takes no pointer
		// argument and returns the chosen index in the ioctl's return value.
		let idx = unsafe { libc::ioctl(ctl.as_raw_fd(), LOOP_CTL_GET_FREE) };
		if idx >= 0 {
			let path = PathBuf::from(format!("/dev/loop{idx}"));
			if let Ok(fd) = File::options().read(true).write(true).open(&path) {
				return Ok((fd.into(), path));
			}
		}
	}
	find_free_loopdev_no_control()
}

fn find_free_loopdev_no_control() -> Result<(OwnedFd, PathBuf)> {
	for entry in std::fs::read_dir("/dev")?.flatten() {
		let name = entry.file_name();
		let Some(name_str) = name.to_str() else { continue };
		if !name_str.starts_with("loop") || name_str == "loop-control" {
			continue;
		}
		let Ok(fd) = File::options().read(true).write(true).open(entry.path()) else { continue };
		let mut info = LoopInfo64::default();
		// SAFETY: fd is open and info is a properly sized, properly aligned buffer.
		let ret = unsafe { libc::ioctl(fd.as_raw_fd(), LOOP_GET_STATUS64, &mut info as *mut _) };
		let errno = std::io::Error::last_os_error().raw_os_error();
		if ret == 0 || errno != Some(libc::ENXIO) {
			continue;
		}
		return Ok((fd.into(), entry.path()));
	}
	Err(BdevError::NotFound("free loop device"))
}

/// Writes a sparse backing file of exactly `size` bytes and formats it with `mkfs -t fstype`.
fn do_loop_create(path: &Path, size: u64, fstype: &str) -> Result<()> {
	let mut f = File::options().write(true).create(true).truncate(true).open(path)?;
	if size > 0 {
		f.seek(SeekFrom::Start(size - 1))?;
		f.write_all(&[0u8])?;
	}
	drop(f);
	child::mkfs(path.to_str().ok_or(BdevError::BadArgument("path"))?, fstype)
}

/// Returns the backing device/file size in bytes via `BLKGETSIZE64`.
fn blk_getsize(path: &Path) -> Result<u64> {
	let fd = File::options().read(true).open(path)?;
	let mut size: u64 = 0;
	// SAFETY: fd is open for read and size is a valid u64 out-pointer.
	let ret = unsafe { libc::ioctl(fd.as_raw_fd(), BLKGETSIZE64, &mut size as *mut u64) };
	if ret < 0 {
		return Err(std::io::Error::last_os_error().into());
	}
	Ok(size)
}

/// Replaces a `.../rootfs` leaf with `.../rootdev`, the convention used for loop backing
/// files.
fn rootdev_path(dest: &Path) -> PathBuf {
	match dest.file_name() {
		Some(leaf) if leaf == "rootfs" => dest.with_file_name("rootdev"),
		_ => dest.join("rootdev"),
	}
}

/// The `loop` backend: a loopback-mounted image file.
pub struct Loop;

impl Backend for Loop {
	fn kind(&self) -> BackendKind {
		BackendKind::Loop
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: false, can_backup: true }
	}

	fn detect(&self, source: &str) -> bool {
		Source::parse_loop(source).is_some()
	}

	fn mount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(Source::Loop(backing)) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		let Some(dest) = handle.destination.clone() else {
			return Err(BdevError::BadArgument("destination"));
		};

		let (loop_fd, loop_path) = find_free_loopdev()?;

		let result = (|| -> Result<()> {
			let backing_fd = File::options().read(true).write(true).open(backing)?;
			// SAFETY: both fds are open for the duration of this ioctl.
			let ret = unsafe { libc::ioctl(loop_fd.as_raw_fd(), LOOP_SET_FD, backing_fd.as_raw_fd() as libc::c_ulong) };
			if ret < 0 {
				return Err(std::io::Error::last_os_error().into());
			}
			let mut info = LoopInfo64 { lo_flags: LO_FLAGS_AUTOCLEAR, ..Default::default() };
			// SAFETY: loop_fd is bound via LOOP_SET_FD above; info is a valid pointer.
			let ret = unsafe { libc::ioctl(loop_fd.as_raw_fd(), LOOP_SET_STATUS64, &mut info as *mut _) };
			if ret < 0 {
				return Err(std::io::Error::last_os_error().into());
			}
			crate::fstype::mount_unknown(&loop_path, &dest, &handle.mount_options)?;
			Ok(())
		})();

		match result {
			Ok(()) => {
				handle.loop_fd = Some(loop_fd);
				Ok(())
			}
			Err(e) => {
				// loop_fd drops here, releasing the slot.
				Err(e)
			}
		}
	}

	fn umount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(dest) = &handle.destination else {
			return Err(BdevError::BadArgument("destination"));
		};
		let result = nix::mount::umount(dest.as_path());
		handle.loop_fd = None;
		result?;
		Ok(())
	}

	fn create(&self, handle: &mut BackendHandle, dest: &Path, _name: &str, specs: &BackendSpecs) -> Result<()> {
		let srcdev = rootdev_path(dest);
		let size = specs.fssize.unwrap_or(DEFAULT_FS_SIZE);
		let fstype = specs.fstype.as_deref().unwrap_or(DEFAULT_FSTYPE);

		std::fs::create_dir_all(dest)?;
		do_loop_create(&srcdev, size, fstype)?;

		let raw = format!("loop:{}", srcdev.display());
		handle.set_source(raw, Source::Loop(srcdev));
		handle.destination = Some(dest.to_path_buf());
		Ok(())
	}

	fn clone_paths(&self, orig: &BackendHandle, new: &mut BackendHandle, ctx: &CloneContext) -> Result<()> {
		if ctx.snapshot {
			return Err(BdevError::Unsupported("loop devices cannot be snapshotted"));
		}
		if orig.destination.is_none() || orig.source.is_none() {
			return Err(BdevError::BadArgument("source/destination"));
		}

		let new_dest = canonical_path(ctx.lxc_path, ctx.new_name, "rootfs");
		let srcdev = rootdev_path(&new_dest);

		let is_block_backed = matches!(orig.kind, BackendKind::Lvm);
		let (size, fstype) = if is_block_backed {
			let Some(Source::Lvm { .. }) = &orig.source else {
				return Err(BdevError::BadArgument("source"));
			};
			let orig_path = orig.raw_source.as_deref().ok_or(BdevError::BadArgument("source"))?;
			let orig_dest = orig.destination.as_deref().ok_or(BdevError::BadArgument("destination"))?;
			let size = match ctx.new_size {
				Some(s) => s,
				None => blk_getsize(Path::new(orig_path))?,
			};
			let fstype = crate::fstype::detect(Path::new(orig_path), orig_dest, &orig.mount_options)?;
			(size, fstype)
		} else {
			(ctx.new_size.unwrap_or(DEFAULT_FS_SIZE), DEFAULT_FSTYPE.to_owned())
		};

		do_loop_create(&srcdev, size, &fstype)?;

		let raw = format!("loop:{}", srcdev.display());
		new.set_source(raw, Source::Loop(srcdev));
		new.destination = Some(new_dest);
		Ok(())
	}

	fn destroy(&self, handle: &BackendHandle) -> Result<()> {
		let Some(Source::Loop(backing)) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		if backing.exists() {
			std::fs::remove_file(backing)?;
		}
		Ok(())
	}
}

#[test]
fn test_loop_detect() {
	let l = Loop;
	assert!(l.detect("loop:/var/lib/lxc/c1/rootdev"));
	assert!(!l.detect("/var/lib/lxc/c1/rootdev"));
}

#[test]
fn test_rootdev_path_rewrites_rootfs_leaf() {
	assert_eq!(rootdev_path(Path::new("/var/lib/lxc/c1/rootfs")), Path::new("/var/lib/lxc/c1/rootdev"));
}

#[test]
fn test_do_loop_create_produces_exact_size() {
	// No mkfs binary guaranteed in the test sandbox; exercise only the sizing half by
	// replicating the seek+write directly: create must produce a file of exactly fssize bytes.
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("rootdev");
	let mut f = File::options().write(true).create(true).truncate(true).open(&path).unwrap();
	let size = 4096u64;
	f.seek(SeekFrom::Start(size - 1)).unwrap();
	f.write_all(&[0u8]).unwrap();
	drop(f);
	let metadata = std::fs::metadata(&path).unwrap();
	assert_eq!(metadata.len(), size);
}

#[test]
fn test_loop_clone_paths_rejects_snapshot() {
	let l = Loop;
	let mut orig = BackendHandle::new(BackendKind::Loop);
	orig.set_source("loop:/var/lib/lxc/c1/rootdev", Source::Loop("/var/lib/lxc/c1/rootdev".into()));
	orig.destination = Some("/var/lib/lxc/c1/rootfs".into());
	let mut new = BackendHandle::new(BackendKind::Loop);
	let ctx = CloneContext {
		old_name: "c1",
		new_name: "c2",
		old_path: Path::new("/var/lib/lxc"),
		lxc_path: Path::new("/var/lib/lxc"),
		snapshot: true,
		new_size: None,
	};
	assert!(matches!(l.clone_paths(&orig, &mut new, &ctx), Err(BdevError::Unsupported(_))));
}
