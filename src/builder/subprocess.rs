//! Running many subprocesses concurrently from a single thread, by `poll`ing
//! all of their stdout/stderr pipes together.
//!
//! This generalizes the single-child `listen_to_child` loop (which could
//! only wait on one child's pipes at a time) to manage however many children
//! the dispatcher currently has running.

use nix::poll::{poll, EventFlags, PollFd};
use std::fs::File;
use std::io::{Read, Result as IoResult};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::process::{Child, Command, ExitStatus};
use std::slice::from_raw_parts_mut;

/// A subprocess started by a [`SubprocessSet`], identified by the token the
/// caller chose when starting it.
struct Running<T> {
	child: Child,
	token: T,
	stdout: Option<File>,
	stderr: Option<File>,
	/// Combined stdout+stderr captured so far, in the order it arrived.
	buffer: Vec<u8>,
}

/// A subprocess that has exited.
pub struct Finished<T> {
	pub token: T,
	pub status: ExitStatus,
	/// Combined stdout+stderr, in the order it was produced.
	pub output: Vec<u8>,
}

/// Manages any number of concurrently-running child processes, reading
/// their combined stdout+stderr as it becomes available, from one thread.
///
/// `T` is an opaque token the caller attaches to each subprocess (in this
/// crate, an [`EdgeId`][crate::graph::EdgeId]) to identify it again once it
/// finishes.
pub struct SubprocessSet<T> {
	running: Vec<Running<T>>,
}

impl<T> SubprocessSet<T> {
	pub fn new() -> Self {
		SubprocessSet {
			running: Vec::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.running.len()
	}

	pub fn is_empty(&self) -> bool {
		self.running.is_empty()
	}

	/// Start a command under `sh -c`, attaching `token` to it.
	pub fn add(&mut self, token: T, command: &raw_string::RawStr) -> IoResult<()> {
		use raw_string::unix::RawStrExt;
		let mut child = Command::new("sh")
			.arg("-c")
			.arg(command.as_osstr())
			.stdin(std::process::Stdio::null())
			.stdout(std::process::Stdio::piped())
			.stderr(std::process::Stdio::piped())
			.spawn()?;
		let stdout = child.stdout.take().map(|f| unsafe { into_file(f) });
		let stderr = child.stderr.take().map(|f| unsafe { into_file(f) });
		self.running.push(Running {
			child,
			token,
			stdout,
			stderr,
			buffer: Vec::new(),
		});
		Ok(())
	}

	/// Block until at least one running subprocess has exited, or
	/// `timeout_ms` milliseconds pass with nothing to report (`-1` to block
	/// forever). Returns every subprocess that finished in this call.
	///
	/// Drains available output into each subprocess's buffer as it polls,
	/// so no output is lost even if many finish in the same call.
	pub fn wait(&mut self, timeout_ms: i32) -> IoResult<Vec<Finished<T>>> {
		if self.running.is_empty() {
			return Ok(Vec::new());
		}

		let mut fds = Vec::new();
		// Parallel to `fds`: which running task each entry belongs to, and
		// the raw descriptor polled (so we can act on it after `poll`
		// without needing a way to recover it from `PollFd` itself).
		let mut owners = Vec::new();
		let mut raw_fds = Vec::new();
		for (i, task) in self.running.iter().enumerate() {
			if let Some(f) = &task.stdout {
				fds.push(PollFd::new(f.as_raw_fd(), EventFlags::POLLIN));
				owners.push(i);
				raw_fds.push(f.as_raw_fd());
			}
			if let Some(f) = &task.stderr {
				fds.push(PollFd::new(f.as_raw_fd(), EventFlags::POLLIN));
				owners.push(i);
				raw_fds.push(f.as_raw_fd());
			}
		}

		if !fds.is_empty() {
			poll(&mut fds, timeout_ms).map_err(|e| e.as_errno().unwrap())?;

			for ((fd, &owner), &raw_fd) in fds.iter().zip(owners.iter()).zip(raw_fds.iter()) {
				let revents = match fd.revents() {
					Some(r) => r,
					None => continue,
				};
				if revents.contains(EventFlags::POLLIN) {
					read_available(raw_fd, &mut self.running[owner].buffer);
				}
				if revents.intersects(EventFlags::POLLERR | EventFlags::POLLHUP) {
					close_matching(&mut self.running[owner], raw_fd);
				}
			}
		} else {
			// No pipes left open on anyone: just poll for process exit.
			std::thread::sleep(std::time::Duration::from_millis(
				if timeout_ms < 0 { 50 } else { timeout_ms as u64 },
			));
		}

		let mut finished = Vec::new();
		let mut still_running = Vec::new();
		for mut task in self.running.drain(..) {
			match task.child.try_wait()? {
				Some(status) => finished.push(Finished {
					token: task.token,
					status,
					output: std::mem::take(&mut task.buffer),
				}),
				None => still_running.push(task),
			}
		}
		self.running = still_running;

		Ok(finished)
	}
}

fn read_available(fd: RawFd, buffer: &mut Vec<u8>) {
	// Safe only in that we never close `fd` out from under this borrow: the
	// caller looked it up from a `File` it still owns.
	let mut file = unsafe { File::from_raw_fd(fd) };
	let mut chunk = [0u8; 4096];
	loop {
		match file.read(&mut chunk) {
			Ok(0) => break,
			Ok(n) => buffer.extend_from_slice(&chunk[..n]),
			Err(_) => break,
		}
	}
	// Don't let `File`'s Drop close a descriptor we don't own.
	std::mem::forget(file);
}

fn close_matching<T>(task: &mut Running<T>, fd: RawFd) {
	if task.stdout.as_ref().map_or(false, |f| f.as_raw_fd() == fd) {
		task.stdout.take();
	} else if task.stderr.as_ref().map_or(false, |f| f.as_raw_fd() == fd) {
		task.stderr.take();
	}
}

unsafe fn into_file(stream: impl IntoRawFd) -> File {
	File::from_raw_fd(stream.into_raw_fd())
}
