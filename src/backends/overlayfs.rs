//! OverlayFS union-mount backend.
//!
//! Same shape as [`crate::backends::aufs`]: only source classification is implemented, with
//! the actual overlay construction delegated elsewhere.

use std::path::Path;

use crate::backend::{Backend, CloneContext};
use crate::error::{BdevError, Result};
use crate::handle::{BackendHandle, BackendKind};
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities};

/// The `overlayfs` backend.
pub struct Overlayfs;

impl Backend for Overlayfs {
	fn kind(&self) -> BackendKind {
		BackendKind::Overlayfs
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: true, can_backup: true }
	}

	fn detect(&self, source: &str) -> bool {
		Source::parse_overlayfs(source).is_some()
	}

	fn mount(&self, _handle: &mut BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("overlayfs mount is not implemented"))
	}

	fn umount(&self, _handle: &mut BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("overlayfs umount is not implemented"))
	}

	fn create(&self, _handle: &mut BackendHandle, _dest: &Path, _name: &str, _specs: &BackendSpecs) -> Result<()> {
		Err(BdevError::Unsupported("overlayfs create is not implemented"))
	}

	fn clone_paths(&self, _orig: &BackendHandle, _new: &mut BackendHandle, _ctx: &CloneContext) -> Result<()> {
		Err(BdevError::Unsupported("overlayfs clone_paths is not implemented"))
	}

	fn destroy(&self, _handle: &BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("overlayfs destroy is not implemented"))
	}
}

#[test]
fn test_overlayfs_detect() {
	let o = Overlayfs;
	assert!(o.detect("overlayfs:/var/lib/lxc/c1/rootfs"));
	assert!(!o.detect("/var/lib/lxc/c1/rootfs"));
}
