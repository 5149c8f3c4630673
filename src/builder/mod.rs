//! The build dispatcher: a single-threaded, cooperative loop around a
//! [`SubprocessSet`], driving a [`Plan`] to completion.

mod subprocess;

use self::subprocess::SubprocessSet;
use crate::status::BuildStatus;
use log::{debug, error, info};
use ninjin::buildlog::BuildLog;
use ninjin::depfile::read_deps_file;
use ninjin::deplog::DepLogMut;
use ninjin::graph::{EdgeId, Rule, State};
use ninjin::mtime::{mtime, Timestamp};
use ninjin::plan::Plan;
use ninjin::spec::DepStyle;
use raw_string::unix::RawStrExt;
use std::io::{Error, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Debug-mode flags set by `-d`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugFlags {
	pub keep_depfile: bool,
	pub keep_rsp: bool,
}

/// What happened when [`Builder::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
	Success,
	Failed,
	Interrupted,
}

pub struct Builder<'a> {
	pub state: &'a mut State,
	pub plan: Plan,
	pub build_dir: PathBuf,
	pub parallelism: usize,
	pub failures_allowed: usize,
	pub dry_run: bool,
	pub debug: DebugFlags,
	pub build_log: &'a mut BuildLog,
	pub dep_log: &'a mut DepLogMut,
	pub status: &'a BuildStatus,
	pub interrupted: &'a AtomicBool,
}

impl<'a> Builder<'a> {
	pub fn run(&mut self) -> Result<BuildOutcome, Error> {
		let start_time = Instant::now();
		let mut subprocesses = SubprocessSet::<EdgeId>::new();
		let mut failures = 0usize;

		loop {
			if self.interrupted.load(Ordering::SeqCst) {
				break;
			}
			if failures >= self.failures_allowed {
				break;
			}
			if self.plan.n_left() == 0 && subprocesses.is_empty() {
				break;
			}

			let mut dispatched_any = false;
			while subprocesses.len() < self.parallelism {
				let edge = match self.plan.next_at(self.state, Instant::now()) {
					Some(e) => e,
					None => break,
				};
				dispatched_any = true;
				self.status.edge_started(edge);
				if self.dry_run || self.state.edge(edge).is_phony() {
					// Nothing to actually run; complete it immediately.
					let n = self.plan.complete(self.state, edge, None);
					self.status.edge_finished(edge, true);
					if n == 0 && self.plan.n_left() == 0 {
						break;
					}
					continue;
				}
				self.launch(&mut subprocesses, edge)?;
			}

			if !dispatched_any && subprocesses.is_empty() {
				// Nothing ready, nothing running: either we're done (caught
				// above) or the plan is stuck on a failed dependency.
				break;
			}
			if subprocesses.is_empty() {
				continue;
			}

			let finished = subprocesses.wait(200)?;
			for job in finished {
				let ok = job.status.success();
				self.status.edge_finished(job.token, ok);
				if ok {
					let restat_edge = match &self.state.edge(job.token).rule {
						Rule::Command(cmd) => {
							cmd.restat || self.state.edge(job.token).dyndep_restat == Some(true)
						}
						Rule::Phony => false,
					};
					let old_mtimes: Vec<Option<Timestamp>> = if restat_edge {
						self.state
							.edge(job.token)
							.outputs
							.iter()
							.map(|&out| {
								let path = &self.state.node(out).path;
								self.build_log.entries.get(path).and_then(|e| e.restat_mtime)
							})
							.collect()
					} else {
						Vec::new()
					};

					self.record_deps(job.token)?;
					let entries = self.record_build_log_entry(job.token)?;
					let unchanged = restat_edge
						&& !entries.is_empty()
						&& entries.iter().zip(old_mtimes.iter()).all(|((_, e), old)| {
							e.restat_mtime.is_some() && e.restat_mtime == *old
						});
					self.build_log.entries.extend(entries);
					self.cleanup_temp_files(job.token);

					if restat_edge {
						// The output's mtime didn't advance past what the
						// last build logged: dependents blocked only on this
						// edge don't actually need to rebuild.
						let mut suppress = move |_next: EdgeId| -> bool { !unchanged };
						self.plan.complete(self.state, job.token, Some(&mut suppress));
					} else {
						self.plan.complete(self.state, job.token, None);
					}
				} else {
					if let Ok(text) = String::from_utf8(job.output.clone()) {
						if !text.trim().is_empty() {
							std::io::stderr().write_all(text.as_bytes()).ok();
						}
					}
					failures += 1;
					self.plan.complete(self.state, job.token, None);
				}
			}
		}

		info!("build finished after {:?}", start_time.elapsed());

		if self.interrupted.load(Ordering::SeqCst) {
			Ok(BuildOutcome::Interrupted)
		} else if failures > 0 {
			Ok(BuildOutcome::Failed)
		} else {
			Ok(BuildOutcome::Success)
		}
	}

	fn launch(&mut self, subprocesses: &mut SubprocessSet<EdgeId>, edge: EdgeId) -> Result<(), Error> {
		let cmd = match &self.state.edge(edge).rule {
			Rule::Command(cmd) => cmd.clone(),
			Rule::Phony => unreachable!("phony edges never reach launch()"),
		};
		if !cmd.rspfile.is_empty() {
			let path = self.build_dir.join(cmd.rspfile.to_str().unwrap_or(""));
			std::fs::write(path, cmd.rspfile_content.as_bytes())?;
		}
		debug!("launching: {}", cmd.command);
		subprocesses.add(edge, &cmd.command)
	}

	/// Build the build-log entries for `edge`'s outputs, re-stating them
	/// first if the rule (or a dyndep file) asked for `restat`.
	fn record_build_log_entry(
		&self,
		edge: EdgeId,
	) -> Result<Vec<(raw_string::RawString, ninjin::buildlog::Entry)>, Error> {
		let edge_ref = self.state.edge(edge);
		let cmd = match &edge_ref.rule {
			Rule::Command(cmd) => cmd,
			Rule::Phony => return Ok(Vec::new()),
		};
		let restat = cmd.restat || edge_ref.dyndep_restat == Some(true);
		let hash = ninjin::buildlog::murmur_hash_64a(cmd.command.as_bytes());
		let mut entries = Vec::with_capacity(edge_ref.outputs.len());
		for &out in &edge_ref.outputs {
			let path = self.state.node(out).path.clone();
			let restat_mtime = if restat {
				mtime(&self.build_dir.join(path.to_str().unwrap_or("")))?
			} else {
				None
			};
			entries.push((
				path,
				ninjin::buildlog::Entry {
					start_time_ms: 0,
					end_time_ms: 0,
					restat_mtime,
					command_hash: hash,
				},
			));
		}
		Ok(entries)
	}

	fn record_deps(&mut self, edge: EdgeId) -> Result<(), Error> {
		let cmd = match &self.state.edge(edge).rule {
			Rule::Command(cmd) => cmd.clone(),
			Rule::Phony => return Ok(()),
		};
		match cmd.deps {
			Some(DepStyle::Gcc) => {
				let depfile_path = self.build_dir.join(cmd.depfile.to_str().unwrap_or(""));
				read_deps_file(&depfile_path, |target, deps| {
					let mtime = Timestamp::from_system_time(std::time::SystemTime::now());
					self.dep_log
						.insert_deps(target, Some(mtime), deps)
						.map_err(|e| Error::new(ErrorKind::Other, e.to_string()))
				})?;
			}
			Some(DepStyle::Msvc) => {
				error!("MSVC-style deps are not supported by this build");
			}
			None => {}
		}
		Ok(())
	}

	fn cleanup_temp_files(&self, edge: EdgeId) {
		let cmd = match &self.state.edge(edge).rule {
			Rule::Command(cmd) => cmd,
			Rule::Phony => return,
		};
		if !cmd.rspfile.is_empty() && !self.debug.keep_rsp {
			let path = self.build_dir.join(cmd.rspfile.to_str().unwrap_or(""));
			std::fs::remove_file(path).ok();
		}
		if !cmd.depfile.is_empty() && !self.debug.keep_depfile {
			let path = self.build_dir.join(cmd.depfile.to_str().unwrap_or(""));
			std::fs::remove_file(path).ok();
		}
	}
}

pub fn default_parallelism() -> usize {
	let cpus = num_cpus_best_effort();
	if cpus >= 3 {
		cpus + 2
	} else {
		cpus.max(1) + 1
	}
}

fn num_cpus_best_effort() -> usize {
	std::thread::available_parallelism()
		.map(|n| n.get())
		.unwrap_or(1)
}

pub(crate) fn ensure_build_dir(dir: &Path) -> Result<(), Error> {
	if !dir.as_os_str().is_empty() {
		std::fs::create_dir_all(dir)?;
	}
	Ok(())
}
