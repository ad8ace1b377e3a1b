//! Attaches and detaches `qemu-nbd`-backed NBD devices, supervising each attached device with
//! a small watcher process so a crashed or killed container doesn't leak a live NBD connection.

use std::path::Path;

use nix::libc;
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::ForkResult;

use crate::child;
use crate::error::{BdevError, Result};

/// Whether `/sys/block/nbd<idx>/pid` exists, meaning the kernel already considers that slot
/// attached to a running `qemu-nbd`.
fn nbd_busy(idx: u32) -> bool {
	Path::new(&format!("/sys/block/nbd{idx}/pid")).exists()
}

/// Finds the first `/dev/nbd<idx>` device node that both exists and is not already busy.
fn find_free_slot() -> Result<u32> {
	let mut idx = 0;
	loop {
		let path = format!("/dev/nbd{idx}");
		if !Path::new(&path).exists() {
			return Err(BdevError::NotFound("free nbd device"));
		}
		if !nbd_busy(idx) {
			return Ok(idx);
		}
		idx += 1;
	}
}

/// Attaches `image_path` to the first free NBD slot and spawns a watcher process to detach it
/// again when either the image is no longer needed (`SIGHUP`) or `qemu-nbd` itself dies
/// (`SIGCHLD` with a failure status). Returns the attached slot index.
pub fn attach(image_path: &Path) -> Result<u32> {
	let idx = find_free_slot()?;
	let dev_path = format!("/dev/nbd{idx}");
	spawn_watcher(&dev_path, image_path)?;
	Ok(idx)
}

/// Detaches the NBD device at slot `idx` by running `qemu-nbd -d`.
pub fn detach(idx: u32) -> Result<()> {
	let dev_path = format!("/dev/nbd{idx}");
	child::run("qemu-nbd", &["-d", &dev_path])
}

/// Forks off the watcher and returns immediately, without waiting for it: the watcher only
/// exits once the NBD connection is torn down (by `SIGHUP` or a `qemu-nbd` failure), which in
/// the healthy steady-state case is never, so `attach()`'s caller must get the slot index back
/// right away rather than block for the connection's entire lifetime. The watcher is reaped on
/// a detached background thread instead, so it cannot linger as a zombie once it does exit.
fn spawn_watcher(dev_path: &str, image_path: &Path) -> Result<()> {
	let mut mask = SigSet::empty();
	mask.add(Signal::SIGHUP);
	mask.add(Signal::SIGCHLD);
	mask.thread_block()?;

	// SAFETY: unshare(CLONE_NEWPID) affects only children forked after this call, which is
	// exactly what follows.
	unshare(CloneFlags::CLONE_NEWPID)?;

	// SAFETY: fork() is async-signal-safe; the two resulting paths are fully independent.
	match unsafe { nix::unistd::fork() }? {
		ForkResult::Parent { child, .. } => {
			std::thread::spawn(move || {
				let _ = waitpid(child, None);
			});
			Ok(())
		}
		ForkResult::Child => {
			watcher_main(dev_path, image_path, mask);
		}
	}
}

/// Runs as the PID-namespace-init watcher: blocks SIGHUP/SIGCHLD, forks `qemu-nbd -c`, then
/// waits for either signal to decide whether to detach and with which exit code.
fn watcher_main(dev_path: &str, image_path: &Path, mask: SigSet) -> ! {
	let sfd = match SignalFd::with_flags(&mask, SfdFlags::empty()) {
		Ok(sfd) => sfd,
		Err(_) => std::process::exit(1),
	};

	// SAFETY: raw prctl call with no pointer arguments beyond the signal number; PR_SET_PDEATHSIG
	// takes an int argument, no out-pointer to validate.
	unsafe {
		libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGHUP, 0, 0, 0);
	}

	// SAFETY: fork() is async-signal-safe.
	match unsafe { nix::unistd::fork() } {
		Ok(ForkResult::Parent { .. }) => {
			loop {
				let Ok(info) = sfd.read_signal() else { continue };
				let Some(info) = info else { continue };
				let signo = info.ssi_signo as i32;
				if signo == Signal::SIGHUP as i32 {
					let _ = detach_by_path(dev_path);
					std::process::exit(0);
				} else if signo == Signal::SIGCHLD as i32 {
					let mut failed = false;
					while let Ok(status) = waitpid(None, Some(WaitPidFlag::WNOHANG)) {
						match status {
							WaitStatus::Exited(_, code) if code != 0 => failed = true,
							WaitStatus::Signaled(..) => failed = true,
							WaitStatus::StillAlive => break,
							_ => {}
						}
					}
					if failed {
						let _ = detach_by_path(dev_path);
						std::process::exit(1);
					}
				}
			}
		}
		Ok(ForkResult::Child) => {
			drop(sfd);
			let _ = mask.thread_unblock();
			exec_qemu_nbd_connect(dev_path, image_path);
			std::process::exit(1);
		}
		Err(_) => std::process::exit(1),
	}
}

fn detach_by_path(dev_path: &str) -> Result<()> {
	child::run("qemu-nbd", &["-d", dev_path])
}

fn exec_qemu_nbd_connect(dev_path: &str, image_path: &Path) {
	use std::os::unix::process::CommandExt as _;
	let image = image_path.to_string_lossy().into_owned();
	let _ = std::process::Command::new("qemu-nbd").args(["-c", dev_path, &image]).exec();
}

#[test]
fn test_nbd_busy_false_for_nonexistent_slot() {
	assert!(!nbd_busy(999_999));
}
