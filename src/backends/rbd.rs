//! Ceph RBD backend: provisioning and mapping are delegated to the `rbd` CLI, mirroring
//! `rbd_create`/`attach_rbd`/`rbd_destroy` in spirit without touching the Ceph wire protocol
//! directly.

use std::path::Path;

use crate::backend::{Backend, CloneContext};
use crate::child;
use crate::error::{BdevError, Result};
use crate::fstype;
use crate::handle::{BackendHandle, BackendKind};
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities, DEFAULT_FSTYPE, DEFAULT_FS_SIZE};

/// The `rbd` backend: a Ceph RBD image mapped to `/dev/rbd/<pool>/<name>`.
pub struct Rbd;

impl Backend for Rbd {
	fn kind(&self) -> BackendKind {
		BackendKind::Rbd
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: false, can_backup: false }
	}

	fn detect(&self, source: &str) -> bool {
		Source::parse_rbd(source).is_some()
	}

	fn mount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(Source::Rbd { pool, name }) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		let Some(dest) = handle.destination.clone() else {
			return Err(BdevError::BadArgument("destination"));
		};
		let dev = mapped_device_path(pool, name);
		if !dev.exists() {
			return Err(BdevError::NotFound("mapped rbd device"));
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

	fn create(&self, handle: &mut BackendHandle, dest: &Path, name: &str, specs: &BackendSpecs) -> Result<()> {
		let pool = specs.rbdpool.clone().ok_or(BdevError::BadArgument("rbdpool"))?;
		let rbd_name = specs.rbdname.clone().unwrap_or_else(|| name.to_owned());
		let size = specs.fssize.unwrap_or(DEFAULT_FS_SIZE);
		let fstype_name = specs.fstype.as_deref().unwrap_or(DEFAULT_FSTYPE);
		let size_mb = (size / (1024 * 1024)).max(1).to_string();

		child::run("rbd", &["create", "--pool", &pool, &rbd_name, "--size", &size_mb])?;
		child::run("rbd", &["map", "--pool", &pool, &rbd_name])?;

		let dev = mapped_device_path(&pool, &rbd_name);
		child::mkfs(dev.to_str().ok_or(BdevError::BadArgument("path"))?, fstype_name)?;

		std::fs::create_dir_all(dest)?;
		let raw = dev.display().to_string();
		handle.set_source(raw, Source::Rbd { pool, name: rbd_name });
		handle.destination = Some(dest.to_path_buf());
		Ok(())
	}

	fn clone_paths(&self, _orig: &BackendHandle, _new: &mut BackendHandle, _ctx: &CloneContext) -> Result<()> {
		Err(BdevError::Unsupported("rbd does not support clone_paths"))
	}

	fn destroy(&self, handle: &BackendHandle) -> Result<()> {
		let Some(Source::Rbd { pool, name }) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		let dev = mapped_device_path(pool, name);
		if dev.exists() {
			child::run("rbd", &["unmap", &dev.display().to_string()])?;
		}
		child::run("rbd", &["rm", "--pool", pool, name])
	}
}

fn mapped_device_path(pool: &str, name: &str) -> std::path::PathBuf {
	std::path::PathBuf::from(format!("/dev/rbd/{pool}/{name}"))
}

#[test]
fn test_rbd_detect() {
	let r = Rbd;
	assert!(r.detect("/dev/rbd/lxc/c1"));
	assert!(!r.detect("/dev/sda"));
}

#[test]
fn test_rbd_clone_paths_unsupported() {
	let r = Rbd;
	let orig = BackendHandle::new(BackendKind::Rbd);
	let mut new = BackendHandle::new(BackendKind::Rbd);
	let ctx = CloneContext {
		old_name: "c1",
		new_name: "c2",
		old_path: Path::new("/var/lib/lxc"),
		lxc_path: Path::new("/var/lib/lxc"),
		snapshot: false,
		new_size: None,
	};
	assert!(matches!(r.clone_paths(&orig, &mut new, &ctx), Err(BdevError::Unsupported(_))));
}
