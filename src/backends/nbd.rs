//! NBD-imported image backend.
//!
//! Provisioning an NBD-backed container isn't supported (there is no sensible "create a new
//! image and attach qemu-nbd to it" operation distinct from just using `loop`), so only
//! `detect`/`mount`/`umount` are implemented; the attach/detach lifecycle itself lives in
//! [`crate::nbd_supervisor`], which populates `handle.nbd_index` before `mount` is called.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::backend::{Backend, CloneContext};
use crate::error::{BdevError, Result};
use crate::fstype;
use crate::handle::{BackendHandle, BackendKind};
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities};

/// How long [`Nbd::mount`] waits for the kernel to publish a requested partition's device node
/// after `qemu-nbd` attaches the whole-disk device.
const PARTITION_WAIT: Duration = Duration::from_secs(5);

/// The `nbd` backend: a network block device image, optionally a single partition thereof.
pub struct Nbd;

impl Backend for Nbd {
	fn kind(&self) -> BackendKind {
		BackendKind::Nbd
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: true, can_backup: false }
	}

	fn detect(&self, source: &str) -> bool {
		Source::parse_nbd(source).is_some()
	}

	fn mount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(Source::Nbd { partition, .. }) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		let Some(dest) = handle.destination.clone() else {
			return Err(BdevError::BadArgument("destination"));
		};
		let index = handle.nbd_index.ok_or(BdevError::BadArgument("nbd_index"))?;

		let dev = device_path(index, *partition);
		if partition.is_some() {
			wait_for_device(&dev)?;
		}
		fstype::mount_unknown(&dev, &dest, &handle.mount_options)
	}

	fn umount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(dest) = &handle.destination else {
			return Err(BdevError::BadArgument("destination"));
		};
		nix::mount::umount(dest.as_path())?;
		Ok(())
	}

	fn create(&self, _handle: &mut BackendHandle, _dest: &std::path::Path, _name: &str, _specs: &BackendSpecs) -> Result<()> {
		Err(BdevError::Unsupported("nbd does not support create"))
	}

	fn clone_paths(&self, _orig: &BackendHandle, _new: &mut BackendHandle, _ctx: &CloneContext) -> Result<()> {
		Err(BdevError::Unsupported("nbd does not support clone_paths"))
	}

	fn destroy(&self, _handle: &BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("nbd does not support destroy"))
	}
}

/// Derives `/dev/nbd<index>` or `/dev/nbd<index>p<partition>`.
fn device_path(index: u32, partition: Option<u8>) -> PathBuf {
	match partition {
		Some(p) => PathBuf::from(format!("/dev/nbd{index}p{p}")),
		None => PathBuf::from(format!("/dev/nbd{index}")),
	}
}

/// Polls for `dev` to appear, for up to [`PARTITION_WAIT`].
fn wait_for_device(dev: &std::path::Path) -> Result<()> {
	let deadline = Instant::now() + PARTITION_WAIT;
	while !dev.exists() {
		if Instant::now() >= deadline {
			return Err(BdevError::NotFound("nbd device node"));
		}
		std::thread::sleep(Duration::from_millis(100));
	}
	Ok(())
}

#[test]
fn test_nbd_detect() {
	let n = Nbd;
	assert!(n.detect("nbd:/var/lib/lxc/c1.img"));
	assert!(n.detect("nbd:/var/lib/lxc/c1.img:2"));
	assert!(!n.detect("/var/lib/lxc/c1.img"));
}

#[test]
fn test_device_path_with_and_without_partition() {
	assert_eq!(device_path(3, None), PathBuf::from("/dev/nbd3"));
	assert_eq!(device_path(3, Some(2)), PathBuf::from("/dev/nbd3p2"));
}

#[test]
fn test_mount_requires_nbd_index() {
	let n = Nbd;
	let mut handle = BackendHandle::new(BackendKind::Nbd);
	handle.set_source("nbd:/img", Source::Nbd { path: "/img".into(), partition: None });
	handle.destination = Some("/mnt".into());
	assert!(matches!(n.mount(&mut handle), Err(BdevError::BadArgument("nbd_index"))));
}

#[test]
fn test_mount_without_partition_does_not_wait_for_device() {
	// Whole-disk mounts must fail fast on a missing device node rather than pay PARTITION_WAIT's
	// up-to-5s poll, which is reserved for the partitioned case.
	let n = Nbd;
	let mut handle = BackendHandle::new(BackendKind::Nbd);
	handle.set_source("nbd:/img", Source::Nbd { path: "/img".into(), partition: None });
	handle.destination = Some("/mnt".into());
	handle.nbd_index = Some(999);

	let start = Instant::now();
	let _ = n.mount(&mut handle);
	assert!(start.elapsed() < PARTITION_WAIT);
}
