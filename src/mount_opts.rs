//! Parsing of the comma-separated mount option list into a flag bitmask and residual data
//! string, as consumed by `mount(2)`.

use nix::mount::MsFlags;

/// The parsed form of a mount option list: a kernel flag bitmask plus whatever options did not
/// correspond to a recognized flag, joined back with commas as the `data` argument to
/// `mount(2)`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MountOptions {
	/// The flag bits recognized among the given options.
	pub flags: MsFlags,
	/// The remaining, unrecognized options, comma-joined, to be passed as mount `data`.
	pub data: String,
}

/// Parses a comma-separated mount option string into flags and residual data.
pub fn parse(options: &str) -> MountOptions {
	let mut flags = MsFlags::empty();
	let mut residual = Vec::new();
	for opt in options.split(',').filter(|o| !o.is_empty()) {
		match opt {
			"ro" => flags |= MsFlags::MS_RDONLY,
			"rw" => flags &= !MsFlags::MS_RDONLY,
			"nosuid" => flags |= MsFlags::MS_NOSUID,
			"suid" => flags &= !MsFlags::MS_NOSUID,
			"noexec" => flags |= MsFlags::MS_NOEXEC,
			"exec" => flags &= !MsFlags::MS_NOEXEC,
			"nodev" => flags |= MsFlags::MS_NODEV,
			"dev" => flags &= !MsFlags::MS_NODEV,
			"bind" => flags |= MsFlags::MS_BIND,
			"rbind" => flags |= MsFlags::MS_BIND | MsFlags::MS_REC,
			"rec" => flags |= MsFlags::MS_REC,
			"sync" => flags |= MsFlags::MS_SYNCHRONOUS,
			"remount" => flags |= MsFlags::MS_REMOUNT,
			"noatime" => flags |= MsFlags::MS_NOATIME,
			"relatime" => flags |= MsFlags::MS_RELATIME,
			"strictatime" => flags |= MsFlags::MS_STRICTATIME,
			other => residual.push(other),
		}
	}
	MountOptions { flags, data: residual.join(",") }
}

#[test]
fn test_parse_empty() {
	let parsed = parse("");
	assert_eq!(parsed.flags, MsFlags::empty());
	assert_eq!(parsed.data, "");
}

#[test]
fn test_parse_known_flags() {
	let parsed = parse("ro,nosuid,noexec,nodev");
	assert_eq!(
		parsed.flags,
		MsFlags::MS_RDONLY | MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC | MsFlags::MS_NODEV
	);
	assert_eq!(parsed.data, "");
}

#[test]
fn test_parse_residual_data() {
	let parsed = parse("ro,discard,size=100M");
	assert_eq!(parsed.flags, MsFlags::MS_RDONLY);
	assert_eq!(parsed.data, "discard,size=100M");
}

#[test]
fn test_parse_bind_rec() {
	let parsed = parse("bind,rec");
	assert_eq!(parsed.flags, MsFlags::MS_BIND | MsFlags::MS_REC);
}
