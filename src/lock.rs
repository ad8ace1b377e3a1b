//! Cross-process container locks.
//!
//! Two lock flavors, matching the two call patterns seen historically: an anonymous, in-process
//! semaphore for locks that only ever need to coordinate threads of the same process, and a
//! `flock(2)`-based file lock, named `<lxcpath>/locks/<name>`, for locks that must also exclude
//! other processes.
//!
//! A single process-wide mutex guards only descriptor allocation and state transitions (opening
//! the lock file lazily, recording that a semaphore was created); it is never held across the
//! blocking `flock`/semaphore wait itself, so one slow lock holder cannot stall unrelated lock
//! operations elsewhere in the process. Release is expressed as an RAII [`LockGuard`] rather
//! than a separate "unlock" call a caller might forget.

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use nix::fcntl::{flock, FlockArg};

use crate::error::{BdevError, Result};

/// A lazily-opened, lazily-reopened lock file descriptor slot, shared between a [`Lock`] and
/// every [`LockGuard`] it hands out so a guard's `Drop` can close the descriptor and reset the
/// slot for the next acquire, rather than leaving it open forever after the first lock.
type FileSlot = Arc<Mutex<Option<OwnedFd>>>;

/// Guards descriptor allocation and state transitions; never held across a blocking wait.
static STATE_MUTEX: Mutex<()> = Mutex::new(());

/// A minimal counting semaphore, standing in for the anonymous POSIX semaphore used for
/// same-process locks.
struct Semaphore {
	state: Mutex<bool>,
	cv: Condvar,
}

impl Semaphore {
	fn new() -> Self {
		Self { state: Mutex::new(true), cv: Condvar::new() }
	}

	fn wait(&self, timeout: Option<Duration>) -> Result<()> {
		let mut available = self.state.lock().unwrap();
		match timeout {
			None => {
				while !*available {
					available = self.cv.wait(available).unwrap();
				}
			}
			Some(d) => {
				let deadline = Instant::now() + d;
				while !*available {
					let remaining = deadline.saturating_duration_since(Instant::now());
					if remaining.is_zero() {
						return Err(BdevError::Timeout);
					}
					let (guard, result) = self.cv.wait_timeout(available, remaining).unwrap();
					available = guard;
					if result.timed_out() && !*available {
						return Err(BdevError::Timeout);
					}
				}
			}
		}
		*available = false;
		Ok(())
	}

	fn post(&self) {
		let mut available = self.state.lock().unwrap();
		*available = true;
		self.cv.notify_one();
	}
}

/// A container lock: either an in-process semaphore or a named file lock.
pub enum Lock {
	/// An unnamed, per-process semaphore.
	AnonSem(Arc<Semaphore>),
	/// A `flock(2)`-based lock on a file under `<lxcpath>/locks/`.
	FileLock { path: PathBuf, fd: FileSlot },
}

impl Lock {
	/// Creates an anonymous, same-process lock.
	pub fn new_anon() -> Self {
		Self::AnonSem(Arc::new(Semaphore::new()))
	}

	/// Creates (but does not yet open) a named file lock at `<lxcpath>/locks/<name>`, creating
	/// the `locks` directory on first use.
	pub fn new_file(lxcpath: &Path, name: &str) -> Result<Self> {
		let _state = STATE_MUTEX.lock().unwrap();
		let dir = lxcpath.join("locks");
		std::fs::create_dir_all(&dir)?;
		std::fs::set_permissions(&dir, std::os::unix::fs::PermissionsExt::from_mode(0o755))?;
		Ok(Self::FileLock { path: dir.join(name), fd: Arc::new(Mutex::new(None)) })
	}

	/// Acquires the lock, blocking until available or `timeout` elapses.
	///
	/// File locks do not support a timeout (matching `flock(2)`'s own lack of one); passing
	/// `Some(_)` for a file lock returns [`BdevError::Unsupported`] without blocking.
	pub fn acquire(&self, timeout: Option<Duration>) -> Result<LockGuard> {
		match self {
			Self::AnonSem(sem) => {
				sem.wait(timeout)?;
				Ok(LockGuard::Sem(sem.clone()))
			}
			Self::FileLock { path, fd } => {
				if timeout.is_some() {
					return Err(BdevError::Unsupported("flock-based locks do not support a timeout"));
				}
				let raw_fd = {
					let _state = STATE_MUTEX.lock().unwrap();
					let mut slot = fd.lock().unwrap();
					if slot.is_none() {
						let f = OpenOptions::new().read(true).write(true).create(true).mode(0o600).open(path)?;
						*slot = Some(f.into());
					}
					slot.as_ref().unwrap().as_raw_fd()
				};
				flock(raw_fd, FlockArg::LockExclusive)?;
				Ok(LockGuard::File(fd.clone()))
			}
		}
	}
}

/// An RAII guard releasing the lock it was returned from on drop.
///
/// The `File` variant holds the shared descriptor slot, not a cloned descriptor: dropping it
/// unlocks and closes the original descriptor and resets the slot to `None`, so the next
/// `acquire()` reopens the file exactly as `lxcunlock()`'s own close-then-`-1` reset does,
/// rather than reusing the same descriptor forever.
pub enum LockGuard {
	Sem(Arc<Semaphore>),
	File(FileSlot),
}

impl Drop for LockGuard {
	fn drop(&mut self) {
		match self {
			Self::Sem(sem) => sem.post(),
			Self::File(slot) => {
				let mut slot = slot.lock().unwrap();
				if let Some(fd) = slot.take() {
					let _ = flock(fd.as_raw_fd(), FlockArg::Unlock);
				}
			}
		}
	}
}

#[test]
fn test_anon_sem_acquire_release_round_trip() {
	let lock = Lock::new_anon();
	{
		let _guard = lock.acquire(None).unwrap();
	}
	let _guard2 = lock.acquire(Some(Duration::from_millis(100))).unwrap();
}

#[test]
fn test_anon_sem_second_acquire_blocks_until_released() {
	let lock = Arc::new(Lock::new_anon());
	let guard = lock.acquire(None).unwrap();

	let lock2 = lock.clone();
	let handle = std::thread::spawn(move || {
		let _guard = lock2.acquire(None).unwrap();
	});

	std::thread::sleep(Duration::from_millis(50));
	assert!(!handle.is_finished());
	drop(guard);
	handle.join().unwrap();
}

#[test]
fn test_anon_sem_timeout_expires() {
	let lock = Lock::new_anon();
	let _guard = lock.acquire(None).unwrap();
	let err = lock.acquire(Some(Duration::from_millis(50))).unwrap_err();
	assert!(matches!(err, BdevError::Timeout));
}

#[test]
fn test_file_lock_creates_locks_directory() {
	let dir = tempfile::tempdir().unwrap();
	let lock = Lock::new_file(dir.path(), "c1").unwrap();
	let _guard = lock.acquire(None).unwrap();
	assert!(dir.path().join("locks").is_dir());
}

#[test]
fn test_file_lock_reacquire_after_release_reopens_descriptor() {
	let dir = tempfile::tempdir().unwrap();
	let lock = Lock::new_file(dir.path(), "c1").unwrap();
	let Lock::FileLock { fd, .. } = &lock else { unreachable!() };

	{
		let _guard = lock.acquire(None).unwrap();
		assert!(fd.lock().unwrap().is_some());
	}
	// Dropping the guard must close the descriptor and reset the slot, not just unlock it.
	assert!(fd.lock().unwrap().is_none());

	let _guard2 = lock.acquire(None).unwrap();
	assert!(fd.lock().unwrap().is_some());
}

#[test]
fn test_file_lock_rejects_timeout() {
	let dir = tempfile::tempdir().unwrap();
	let lock = Lock::new_file(dir.path(), "c1").unwrap();
	let err = lock.acquire(Some(Duration::from_millis(10))).unwrap_err();
	assert!(matches!(err, BdevError::Unsupported(_)));
}
