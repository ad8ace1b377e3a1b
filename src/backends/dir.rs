//! Plain directory bind mount backend.

use std::path::Path;

use nix::mount::{mount, umount};

use super::canonical_path;
use crate::backend::{Backend, CloneContext};
use crate::error::{BdevError, Result};
use crate::handle::{BackendHandle, BackendKind};
use crate::mount_opts;
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities};

/// The `dir` backend: a bind mount of an existing directory.
pub struct Dir;

impl Backend for Dir {
	fn kind(&self) -> BackendKind {
		BackendKind::Dir
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: false, can_backup: true }
	}

	fn detect(&self, source: &str) -> bool {
		Source::parse_dir(source).is_some()
	}

	fn mount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(Source::Dir(src)) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		let Some(dest) = &handle.destination else {
			return Err(BdevError::BadArgument("destination"));
		};
		let parsed = mount_opts::parse(&handle.mount_options);
		let flags = parsed.flags | nix::mount::MsFlags::MS_BIND | nix::mount::MsFlags::MS_REC;
		let data = if parsed.data.is_empty() { None } else { Some(parsed.data.as_str()) };
		mount(Some(src.as_path()), dest.as_path(), Some("bind"), flags, data)?;
		Ok(())
	}

	fn umount(&self, handle: &mut BackendHandle) -> Result<()> {
		let Some(dest) = &handle.destination else {
			return Err(BdevError::BadArgument("destination"));
		};
		umount(dest.as_path())?;
		Ok(())
	}

	fn create(&self, handle: &mut BackendHandle, dest: &Path, _name: &str, specs: &BackendSpecs) -> Result<()> {
		let src = specs.dir.clone().map(std::path::PathBuf::from).unwrap_or_else(|| dest.to_path_buf());
		std::fs::create_dir_all(&src)?;
		std::fs::create_dir_all(dest)?;
		let raw = src.display().to_string();
		handle.set_source(raw, Source::Dir(src));
		handle.destination = Some(dest.to_path_buf());
		Ok(())
	}

	fn clone_paths(&self, orig: &BackendHandle, new: &mut BackendHandle, ctx: &CloneContext) -> Result<()> {
		if ctx.snapshot {
			return Err(BdevError::Unsupported("directories cannot be snapshotted; use aufs or overlayfs"));
		}
		if orig.destination.is_none() || orig.source.is_none() {
			return Err(BdevError::BadArgument("source/destination"));
		}
		let new_path = canonical_path(ctx.lxc_path, ctx.new_name, "rootfs");
		let raw = new_path.display().to_string();
		new.set_source(raw, Source::Dir(new_path.clone()));
		new.destination = Some(new_path);
		Ok(())
	}

	fn destroy(&self, handle: &BackendHandle) -> Result<()> {
		let Some(Source::Dir(src)) = &handle.source else {
			return Err(BdevError::BadArgument("source"));
		};
		if src.exists() {
			std::fs::remove_dir_all(src)?;
		}
		Ok(())
	}
}

#[test]
fn test_dir_detect_prefix_and_existing_directory() {
	let d = Dir;
	assert!(d.detect("dir:/nonexistent/path/at/all"));
	let tmp = tempfile::tempdir().unwrap();
	assert!(d.detect(tmp.path().to_str().unwrap()));
	assert!(!d.detect("/path/that/almost/certainly/does/not/exist/zzz"));
}

#[test]
fn test_dir_clone_paths_rejects_snapshot() {
	let d = Dir;
	let mut orig = BackendHandle::new(BackendKind::Dir);
	orig.set_source("/var/lib/lxc/c1/rootfs", Source::Dir("/var/lib/lxc/c1/rootfs".into()));
	orig.destination = Some("/var/lib/lxc/c1/rootfs".into());
	let mut new = BackendHandle::new(BackendKind::Dir);
	let ctx = CloneContext {
		old_name: "c1",
		new_name: "c2",
		old_path: Path::new("/var/lib/lxc"),
		lxc_path: Path::new("/var/lib/lxc"),
		snapshot: true,
		new_size: None,
	};
	assert!(matches!(d.clone_paths(&orig, &mut new, &ctx), Err(BdevError::Unsupported(_))));
}

#[test]
fn test_dir_clone_paths_rewrites_destination() {
	let d = Dir;
	let mut orig = BackendHandle::new(BackendKind::Dir);
	orig.set_source("/var/lib/lxc/c1/rootfs", Source::Dir("/var/lib/lxc/c1/rootfs".into()));
	orig.destination = Some("/var/lib/lxc/c1/rootfs".into());
	let mut new = BackendHandle::new(BackendKind::Dir);
	let ctx = CloneContext {
		old_name: "c1",
		new_name: "c2",
		old_path: Path::new("/var/lib/lxc"),
		lxc_path: Path::new("/var/lib/lxc"),
		snapshot: false,
		new_size: None,
	};
	d.clone_paths(&orig, &mut new, &ctx).unwrap();
	assert_eq!(new.destination, Some(Path::new("/var/lib/lxc/c2/rootfs").to_path_buf()));
	assert_eq!(new.raw_source.as_deref(), Some("/var/lib/lxc/c2/rootfs"));
}
