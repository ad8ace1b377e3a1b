//! One module per supported backend.
//!
//! `dir`, `loop_dev`, `rbd`, and `nbd` are fully implemented, as is `btrfs` on top of its real
//! ioctl bindings. `zfs`, `lvm`, `aufs`, and `overlayfs` are thin stubs: their
//! `detect`/`capabilities` are real (so the registry and orchestrator dispatch correctly), but
//! their body operations return [`crate::error::BdevError::Unsupported`] — provisioning these
//! pools is delegated to their own external command-line tooling (`zfs`, `lvcreate`, `aufs`
//! utilities, `overlay` mount helpers), which is out of scope here.

pub mod aufs;
pub mod btrfs;
pub mod dir;
pub mod loop_dev;
pub mod lvm;
pub mod nbd;
pub mod overlayfs;
pub mod rbd;
pub mod zfs;

/// Helper shared by `dir_new_path`-style clone-path derivation: computes the canonical
/// `<lxcpath>/<name>/<leaf>` destination used by most backends.
pub(crate) fn canonical_path(lxcpath: &std::path::Path, name: &str, leaf: &str) -> std::path::PathBuf {
	lxcpath.join(name).join(leaf)
}
