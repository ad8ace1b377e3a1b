//! LVM logical volume backend.
//!
//! Like [`crate::backends::zfs`], provisioning is left to `lvcreate`/`lvremove`; this backend
//! only classifies `/dev/<vg>/<lv>` sources.

use std::path::Path;

use crate::backend::{Backend, CloneContext};
use crate::error::{BdevError, Result};
use crate::handle::{BackendHandle, BackendKind};
use crate::source::Source;
use crate::specs::{BackendSpecs, Capabilities};

/// The `lvm` backend.
pub struct Lvm;

impl Backend for Lvm {
	fn kind(&self) -> BackendKind {
		BackendKind::Lvm
	}

	fn capabilities(&self) -> Capabilities {
		Capabilities { can_snapshot: true, can_backup: false }
	}

	fn detect(&self, source: &str) -> bool {
		Source::parse_lvm(source).is_some()
	}

	fn mount(&self, _handle: &mut BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("lvm mount is not implemented"))
	}

	fn umount(&self, _handle: &mut BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("lvm umount is not implemented"))
	}

	fn create(&self, _handle: &mut BackendHandle, _dest: &Path, _name: &str, _specs: &BackendSpecs) -> Result<()> {
		Err(BdevError::Unsupported("lvm create is not implemented"))
	}

	fn clone_paths(&self, _orig: &BackendHandle, _new: &mut BackendHandle, _ctx: &CloneContext) -> Result<()> {
		Err(BdevError::Unsupported("lvm clone_paths is not implemented"))
	}

	fn destroy(&self, _handle: &BackendHandle) -> Result<()> {
		Err(BdevError::Unsupported("lvm destroy is not implemented"))
	}
}

#[test]
fn test_lvm_detect() {
	let l = Lvm;
	assert!(l.detect("/dev/lxc/c1"));
	assert!(!l.detect("/dev/rbd/lxc/c1"));
}
