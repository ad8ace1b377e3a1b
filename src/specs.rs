//! Creation-parameter records and per-backend capability flags.

use serde::Deserialize;

/// Default filesystem type used when a backend needs one and none was given.
pub const DEFAULT_FSTYPE: &str = "ext3";

/// Default filesystem size in bytes, used when a backend needs one and none was given.
pub const DEFAULT_FS_SIZE: u64 = 1_000_000_000;

/// The creation parameter record passed to [`crate::backend::Backend::create`].
///
/// Every field is optional; each backend supplies its own defaults for the options it
/// recognizes and ignores the rest.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct BackendSpecs {
	/// `dir`: overrides the rootfs source path instead of using `dest` directly.
	pub dir: Option<String>,

	/// `loop`/`lvm`/`rbd`: filesystem type to create, default [`DEFAULT_FSTYPE`].
	pub fstype: Option<String>,

	/// `loop`/`lvm`/`rbd`: filesystem size in bytes, default [`DEFAULT_FS_SIZE`].
	pub fssize: Option<u64>,

	/// `lvm`: volume group name, default `lxc`.
	pub vg: Option<String>,

	/// `lvm`: logical volume name, default the container name.
	pub lv: Option<String>,

	/// `lvm`: thin pool name, if the volume should be thin-provisioned.
	pub thinpool: Option<String>,

	/// `zfs`: dataset root, default `tank/lxc`.
	pub zfsroot: Option<String>,

	/// `rbd`: pool name.
	pub rbdpool: Option<String>,

	/// `rbd`: image name, default the container name.
	pub rbdname: Option<String>,
}

/// The capability flags advertised by a backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
	/// Whether `clone_paths(snap = true)` can succeed for this backend.
	pub can_snapshot: bool,
	/// Whether this backend is an acceptable target for a container backup.
	pub can_backup: bool,
}

#[test]
fn test_specs_defaults_via_serde() {
	let specs: BackendSpecs = serde_json::from_str("{}").unwrap();
	assert_eq!(specs, BackendSpecs::default());
}

#[test]
fn test_specs_partial_deserialize() {
	let specs: BackendSpecs = serde_json::from_str(r#"{"fstype": "ext4", "fssize": 1073741824}"#).unwrap();
	assert_eq!(specs.fstype.as_deref(), Some("ext4"));
	assert_eq!(specs.fssize, Some(1073741824));
	assert_eq!(specs.vg, None);
}
