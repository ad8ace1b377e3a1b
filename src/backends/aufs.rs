//! AUFS union-mount backend.
//!
//! Stacking and unstacking AUFS branches is delegated to the `aufs`-aware mount helpers this
//! backend would shell out to; only source classification is implemented here.

use std::path::Path;

use crate::backend::{Backend, CloneContext};
use crate::error::{BdevError, Result};
use crate::handle::{BackendHandle, BackendKind};
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities};

/// The `aufs` backend.
pub struct Aufs;

impl Backend for Aufs {
	fn kind(&self) -> BackendKind {
		BackendKind::Aufs
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: true, can_backup: true }
	}

	fn detect(&self, source: &str) -> bool {
		Source::parse_aufs(source).is_some()
	}

	fn mount(&self, _handle: &mut BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("aufs mount is not implemented"))
	}

	fn umount(&self, _handle: &mut BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("aufs umount is not implemented"))
	}

	fn create(&self, _handle: &mut BackendHandle, _dest: &Path, _name: &str, _specs: &BackendSpecs) -> Result<()> {
		Err(BdevError::Unsupported("aufs create is not implemented"))
	}

	fn clone_paths(&self, _orig: &BackendHandle, _new: &mut BackendHandle, _ctx: &CloneContext) -> Result<()> {
		Err(BdevError::Unsupported("aufs clone_paths is not implemented"))
	}

	fn destroy(&self, _handle: &BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("aufs destroy is not implemented"))
	}
}

#[test]
fn test_aufs_detect() {
	let a = Aufs;
	assert!(a.detect("aufs:/var/lib/lxc/c1/rootfs"));
	assert!(!a.detect("/var/lib/lxc/c1/rootfs"));
}
