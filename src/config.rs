//! Loading of the top-level configuration file (the `lxcpath`, default mount options, and
//! default backend type `lxc-create` and friends fall back to when a container doesn't specify
//! its own).

use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

use crate::handle::BackendKind;

/// The complete, validated configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GlobalConfig {
	/// The root directory under which container directories (`<lxcpath>/<name>/...`) live.
	pub lxc_path: PathBuf,

	/// The mount option string applied when a container doesn't specify its own.
	pub default_mount_options: String,

	/// The backend type used when a container doesn't specify its own (`None` means `dir`,
	/// mirroring `bdev_create`'s own default).
	pub default_bdev_type: Option<BackendKind>,
}

impl<'de> Deserialize<'de> for GlobalConfig {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		ParsedGlobalConfig::deserialize(deserializer)?.finish()
	}
}

fn default_lxc_path() -> PathBuf {
	PathBuf::from("/var/lib/lxc")
}

/// The intermediate JSON-parsed form, before defaulting and validation.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ParsedGlobalConfig {
	#[serde(default = "default_lxc_path")]
	lxc_path: PathBuf,

	#[serde(default)]
	default_mount_options: String,

	#[serde(default)]
	default_bdev_type: Option<String>,
}

impl ParsedGlobalConfig {
	fn finish<E: serde::de::Error>(self) -> Result<GlobalConfig, E> {
		let default_bdev_type = self
			.default_bdev_type
			.map(|s| BackendKind::from_str(&s).ok_or_else(|| E::invalid_value(serde::de::Unexpected::Str(&s), &"a known backend type")))
			.transpose()?;
		Ok(GlobalConfig { lxc_path: self.lxc_path, default_mount_options: self.default_mount_options, default_bdev_type })
	}
}

#[test]
fn test_deserialize_empty_uses_defaults() {
	let config: GlobalConfig = serde_json::from_str("{}").unwrap();
	assert_eq!(config.lxc_path, PathBuf::from("/var/lib/lxc"));
	assert_eq!(config.default_mount_options, "");
	assert_eq!(config.default_bdev_type, None);
}

#[test]
fn test_deserialize_explicit_fields() {
	let config: GlobalConfig = serde_json::from_str(
		r#"{"lxc_path": "/srv/lxc", "default_mount_options": "noatime", "default_bdev_type": "btrfs"}"#,
	)
	.unwrap();
	assert_eq!(config.lxc_path, PathBuf::from("/srv/lxc"));
	assert_eq!(config.default_mount_options, "noatime");
	assert_eq!(config.default_bdev_type, Some(BackendKind::Btrfs));
}

#[test]
fn test_deserialize_unknown_bdev_type_errors() {
	let result: Result<GlobalConfig, _> = serde_json::from_str(r#"{"default_bdev_type": "bogus"}"#);
	assert!(result.is_err());
}

#[test]
fn test_deserialize_rejects_unknown_fields() {
	let result: Result<GlobalConfig, _> = serde_json::from_str(r#"{"unexpected_field": 1}"#);
	assert!(result.is_err());
}
