//! The filesystem-type prober: given a block-like source, try mounting it against each type
//! the kernel advertises and keep the first one that succeeds.
//!
//! Two distinct entry points exist for two distinct needs:
//!
//! - [`mount_unknown()`]: establish a *real* mount in the caller's own namespace (used by
//!   `loop`/`rbd`/`nbd`'s `mount()`).
//! - [`detect()`]: fork into a private mount namespace, perform the same brute-force mount
//!   purely to learn the resolved fstype string, and throw the namespace away on exit (used by
//!   `loop::clone_paths` to discover an existing block device's fstype before recreating it
//!   elsewhere).

use std::io::{BufRead, BufReader, Read as _, Write as _};
use std::path::Path;

use nix::mount::{mount as nix_mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::ForkResult;

use crate::error::{BdevError, Result};
use crate::mount_opts;

/// Candidate-type source files to consult, in order, skipping `nodev` lines.
const CANDIDATE_FILES: [&str; 2] = ["/etc/filesystems", "/proc/filesystems"];

/// Reads candidate filesystem types from `/etc/filesystems` then `/proc/filesystems`,
/// skipping lines tagged `nodev`.
fn candidate_fstypes() -> Result<Vec<String>> {
	let mut types = Vec::new();
	for path in CANDIDATE_FILES {
		let Ok(f) = std::fs::File::open(path) else { continue };
		for line in BufReader::new(f).lines() {
			let line = line?;
			if line.contains("nodev") {
				continue;
			}
			let trimmed = line.trim();
			if !trimmed.is_empty() {
				types.push(trimmed.to_owned());
			}
		}
	}
	Ok(types)
}

/// Tries mounting `source` onto `dest` with each candidate fstype in turn, with `mntopts`
/// parsed into flags/data. Returns on the first success.
pub fn mount_unknown(source: &Path, dest: &Path, mntopts: &str) -> Result<()> {
	let parsed = mount_opts::parse(mntopts);
	let data = if parsed.data.is_empty() { None } else { Some(parsed.data.as_str()) };
	for fstype in candidate_fstypes()? {
		if nix_mount(Some(source), dest, Some(fstype.as_str()), parsed.flags, data).is_ok() {
			return Ok(());
		}
	}
	Err(BdevError::NotFound("filesystem type"))
}

/// Reads back the fstype the kernel actually used for `source` (dereferencing a symlink
/// first) by consulting `/proc/self/mounts`.
fn resolved_fstype(source: &Path) -> Result<String> {
	let real = std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
	let f = std::fs::File::open("/proc/self/mounts")?;
	for line in BufReader::new(f).lines() {
		let line = line?;
		let mut fields = line.split(' ');
		let Some(dev) = fields.next() else { continue };
		if Path::new(dev) != real {
			continue;
		}
		let Some(_mountpoint) = fields.next() else { continue };
		let Some(fstype) = fields.next() else { continue };
		return Ok(fstype.to_owned());
	}
	Err(BdevError::NotFound("mount entry for source"))
}

/// Detects `source`'s filesystem type by mounting it onto `dest` inside a disposable, private
/// mount namespace, best-effort marking `/` as `rslave` first if the host root is shared.
///
/// Returns the fstype string read back from `/proc/self/mounts`.
pub fn detect(source: &Path, dest: &Path, mntopts: &str) -> Result<String> {
	let (reader, mut writer) = os_pipe::pipe()?;

	// SAFETY: fork() is async-signal-safe and we immediately diverge into two well-defined
	// paths; the child never returns to the caller's stack frame with borrowed state beyond
	// what is Copy.
	match unsafe { nix::unistd::fork() }? {
		ForkResult::Parent { child } => {
			drop(writer);
			let mut buf = String::new();
			let _ = BufReader::new(reader).read_to_string(&mut buf);
			match waitpid(child, None) {
				Ok(WaitStatus::Exited(_, 0)) if !buf.is_empty() => Ok(buf),
				_ => Err(BdevError::NotFound("fstype")),
			}
		}
		ForkResult::Child => {
			drop(reader);
			let status = detect_in_child(source, dest, mntopts, &mut writer);
			std::process::exit(if status.is_ok() { 0 } else { 1 });
		}
	}
}

fn detect_in_child(source: &Path, dest: &Path, mntopts: &str, writer: &mut os_pipe::PipeWriter) -> Result<()> {
	unshare(CloneFlags::CLONE_NEWNS)?;

	if shared_rootfs() {
		if let Err(e) = nix_mount(None::<&str>, "/", None::<&str>, MsFlags::MS_SLAVE | MsFlags::MS_REC, None::<&str>) {
			tracing::warn!(target: "bdev::fstype", error = %e, "failed to make / rslave; continuing");
		}
	}

	mount_unknown(source, dest, mntopts)?;

	let fstype = resolved_fstype(source)?;
	writer.write_all(fstype.as_bytes())?;
	Ok(())
}

/// Best-effort check of whether `/`'s propagation type is shared, read from
/// `/proc/self/mountinfo`.
fn shared_rootfs() -> bool {
	let Ok(contents) = std::fs::read_to_string("/proc/self/mountinfo") else { return false };
	for line in contents.lines() {
		let mut fields = line.split(' ');
		let Some(_mount_id) = fields.next() else { continue };
		let Some(_parent_id) = fields.next() else { continue };
		let Some(_majmin) = fields.next() else { continue };
		let Some(_root) = fields.next() else { continue };
		let Some(mountpoint) = fields.next() else { continue };
		if mountpoint != "/" {
			continue;
		}
		for opt in fields {
			if opt == "-" {
				break;
			}
			if opt.starts_with("shared:") {
				return true;
			}
		}
	}
	false
}

#[test]
fn test_candidate_fstypes_skips_nodev() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("filesystems");
	std::fs::write(&path, "nodev\tproc\next4\nnodev\tsysfs\nbtrfs\n").unwrap();
	let mut types = Vec::new();
	for line in BufReader::new(std::fs::File::open(&path).unwrap()).lines() {
		let line = line.unwrap();
		if line.contains("nodev") {
			continue;
		}
		types.push(line.trim().to_owned());
	}
	assert_eq!(types, vec!["ext4".to_owned(), "btrfs".to_owned()]);
}
