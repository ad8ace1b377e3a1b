//! Parsing of backend-tagged source location strings.
//!
//! The raw source string accepted by [`crate::registry::bdev_init`] is morally a tagged URI
//! (see the grammar in the module-level documentation of [`crate::registry`]). Rather than
//! re-stripping prefixes at every call site, we parse it once into [`Source`] and match on the
//! variant thereafter.

use std::path::{Path, PathBuf};

/// A parsed, backend-tagged source location.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Source {
	/// A plain directory, optionally written with an explicit `dir:` prefix.
	Dir(PathBuf),

	/// A loopback backing file, written `loop:<path>`.
	Loop(PathBuf),

	/// An NBD-imported image, written `nbd:<path>[:<partition>]`.
	Nbd {
		/// The path to the image file.
		path: PathBuf,
		/// The selected partition, 1..=9, if any.
		partition: Option<u8>,
	},

	/// A mapped Ceph RBD device, `/dev/rbd/<pool>/<name>`.
	Rbd {
		/// The pool name.
		pool: String,
		/// The image name.
		name: String,
	},

	/// An LVM logical volume device node, `/dev/<vg>/<lv>`.
	Lvm {
		/// The volume group name.
		vg: String,
		/// The logical volume name.
		lv: String,
	},

	/// A raw ZFS dataset name.
	Zfs(String),

	/// A Btrfs subvolume path.
	Btrfs(PathBuf),

	/// An AUFS-backed rootfs path.
	Aufs(PathBuf),

	/// An OverlayFS-backed rootfs path.
	Overlayfs(PathBuf),
}

/// Picks the partition suffix (`:1`..`:9`) off the end of an `nbd:` source string.
///
/// Returns `None` if there is no trailing `:<digit>` or the digit is not in `1..=9`; exactly
/// one non-zero decimal digit is accepted.
pub fn nbd_partition(src: &str) -> Option<u8> {
	// Skip the "nbd:" tag itself; only a second colon introduces a partition.
	let rest = src.strip_prefix("nbd:")?;
	let (_path, suffix) = rest.rsplit_once(':')?;
	let mut chars = suffix.chars();
	let digit = chars.next()?;
	if chars.next().is_some() {
		return None;
	}
	match digit {
		'1'..='9' => Some(digit as u8 - b'0'),
		_ => None,
	}
}

impl Source {
	/// Parses a raw source string for the `nbd` backend, splitting off an optional partition
	/// suffix.
	pub fn parse_nbd(src: &str) -> Option<Self> {
		let rest = src.strip_prefix("nbd:")?;
		let partition = nbd_partition(src);
		let path = match partition {
			Some(_) => {
				let (path, _) = rest.rsplit_once(':')?;
				path
			}
			None => rest,
		};
		Some(Self::Nbd { path: PathBuf::from(path), partition })
	}

	/// Parses a raw source string for the `rbd` backend: `/dev/rbd/<pool>/<name>`.
	pub fn parse_rbd(src: &str) -> Option<Self> {
		let rest = src.strip_prefix("/dev/rbd/")?;
		let (pool, name) = rest.split_once('/')?;
		if name.is_empty() {
			return None;
		}
		Some(Self::Rbd { pool: pool.to_owned(), name: name.to_owned() })
	}

	/// Parses a raw source string for the `loop` backend: `loop:<path>`.
	pub fn parse_loop(src: &str) -> Option<Self> {
		src.strip_prefix("loop:").map(|p| Self::Loop(PathBuf::from(p)))
	}

	/// Parses a raw source string for the `dir` backend: either `dir:<path>` or a bare path
	/// that is an existing directory.
	pub fn parse_dir(src: &str) -> Option<Self> {
		if let Some(p) = src.strip_prefix("dir:") {
			return Some(Self::Dir(PathBuf::from(p)));
		}
		if Path::new(src).is_dir() {
			return Some(Self::Dir(PathBuf::from(src)));
		}
		None
	}

	/// Parses a raw source string for the `lvm` backend: `/dev/<vg>/<lv>` (excluding the
	/// `/dev/rbd/...` namespace, which belongs to the `rbd` backend).
	pub fn parse_lvm(src: &str) -> Option<Self> {
		let rest = src.strip_prefix("/dev/")?;
		let (vg, lv) = rest.split_once('/')?;
		if vg.is_empty() || lv.is_empty() || vg == "rbd" {
			return None;
		}
		Some(Self::Lvm { vg: vg.to_owned(), lv: lv.to_owned() })
	}

	/// Parses a raw source string for the `zfs` backend: a bare `<dataset>` name, unlike the
	/// other tagged backends there is no `zfs:` prefix in the wire grammar. Only the shape is
	/// checked here (non-empty, not an absolute path, no other backend's tag colon); actually
	/// confirming the dataset exists is [`crate::backends::zfs::Zfs::detect`]'s job, since a
	/// string of this shape is indistinguishable from an arbitrary relative path otherwise.
	pub fn parse_zfs(src: &str) -> Option<Self> {
		if src.is_empty() || src.starts_with('/') || src.contains(':') {
			return None;
		}
		Some(Self::Zfs(src.to_owned()))
	}

	/// Parses a raw source string for the `aufs` backend: `aufs:<path>`.
	pub fn parse_aufs(src: &str) -> Option<Self> {
		src.strip_prefix("aufs:").map(|p| Self::Aufs(PathBuf::from(p)))
	}

	/// Parses a raw source string for the `overlayfs` backend: `overlayfs:<path>`.
	pub fn parse_overlayfs(src: &str) -> Option<Self> {
		src.strip_prefix("overlayfs:").map(|p| Self::Overlayfs(PathBuf::from(p)))
	}
}

#[test]
fn test_nbd_partition_accepts_1_through_9() {
	for digit in b'1'..=b'9' {
		let src = format!("nbd:/img:{}", digit as char);
		assert_eq!(nbd_partition(&src), Some(digit - b'0'));
	}
}

#[test]
fn test_nbd_partition_rejects_0_letter_and_10() {
	assert_eq!(nbd_partition("nbd:/img:0"), None);
	assert_eq!(nbd_partition("nbd:/img:A"), None);
	assert_eq!(nbd_partition("nbd:/img:10"), None);
	assert_eq!(nbd_partition("nbd:/img"), None);
}

#[test]
fn test_parse_nbd_without_partition() {
	assert_eq!(
		Source::parse_nbd("nbd:/var/lib/lxc/c1.img"),
		Some(Source::Nbd { path: PathBuf::from("/var/lib/lxc/c1.img"), partition: None })
	);
}

#[test]
fn test_parse_nbd_with_partition() {
	assert_eq!(
		Source::parse_nbd("nbd:/var/lib/lxc/c1.img:3"),
		Some(Source::Nbd { path: PathBuf::from("/var/lib/lxc/c1.img"), partition: Some(3) })
	);
}

#[test]
fn test_parse_rbd() {
	assert_eq!(
		Source::parse_rbd("/dev/rbd/lxc/c1"),
		Some(Source::Rbd { pool: "lxc".to_owned(), name: "c1".to_owned() })
	);
	assert_eq!(Source::parse_rbd("/dev/rbd/lxc"), None);
	assert_eq!(Source::parse_rbd("/dev/sda"), None);
}

#[test]
fn test_parse_loop() {
	assert_eq!(Source::parse_loop("loop:/var/lib/lxc/c1/rootdev"), Some(Source::Loop(PathBuf::from("/var/lib/lxc/c1/rootdev"))));
	assert_eq!(Source::parse_loop("/var/lib/lxc/c1/rootdev"), None);
}

#[test]
fn test_parse_lvm_excludes_rbd_namespace() {
	assert_eq!(Source::parse_lvm("/dev/lxc/c1"), Some(Source::Lvm { vg: "lxc".to_owned(), lv: "c1".to_owned() }));
	assert_eq!(Source::parse_lvm("/dev/rbd/lxc/c1"), None);
	assert_eq!(Source::parse_lvm("/dev/sda"), None);
}

#[test]
fn test_parse_zfs_aufs_overlayfs() {
	assert_eq!(Source::parse_zfs("tank/lxc/c1"), Some(Source::Zfs("tank/lxc/c1".to_owned())));
	assert_eq!(Source::parse_zfs("/var/lib/lxc/c1/rootfs"), None);
	assert_eq!(Source::parse_zfs("nbd:/img"), None);
	assert_eq!(Source::parse_zfs(""), None);
	assert_eq!(Source::parse_aufs("aufs:/var/lib/lxc/c1/rootfs"), Some(Source::Aufs(PathBuf::from("/var/lib/lxc/c1/rootfs"))));
	assert_eq!(
		Source::parse_overlayfs("overlayfs:/var/lib/lxc/c1/rootfs"),
		Some(Source::Overlayfs(PathBuf::from("/var/lib/lxc/c1/rootfs")))
	);
}
