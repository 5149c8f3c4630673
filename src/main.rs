//! `ninjin`: a command-line front end for the library crate of the same
//! name, wiring manifest loading, dependency scanning, and the dispatcher
//! together the way `ninja` itself does.

mod builder;
mod logger;
mod status;
mod subtools;
mod timeformat;

use builder::{BuildOutcome, Builder, DebugFlags};
use ninjin::buildlog::BuildLog;
use ninjin::deplog::DepLogMut;
use ninjin::load::load;
use ninjin::plan::Plan;
use ninjin::scan::Scanner;
use status::BuildStatus;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use structopt::StructOpt;

/// A Ninja-compatible incremental build engine.
#[derive(StructOpt, Debug)]
#[structopt(name = "ninjin")]
pub struct Options {
	/// Specify input build file (default: build.ninja).
	#[structopt(short = "f", long = "file", default_value = "build.ninja", parse(from_os_str))]
	pub file: PathBuf,

	/// Change to DIR before doing anything else.
	#[structopt(short = "C", long = "directory", parse(from_os_str))]
	pub directory: Option<PathBuf>,

	/// Run N jobs in parallel (0 means infinite, default derived from the
	/// number of CPUs).
	#[structopt(short = "j", long = "jobs")]
	pub jobs: Option<usize>,

	/// Keep going until N jobs fail (0 means never stop; default 1).
	#[structopt(short = "k", long = "keep-going", default_value = "1")]
	pub keep_going: usize,

	/// Don't start new jobs if the load average is greater than N.
	#[structopt(short = "l", long = "load-average")]
	pub load_average: Option<f64>,

	/// Dry run: don't run any commands, just act as if they all succeeded.
	#[structopt(short = "n", long = "dry-run")]
	pub dry_run: bool,

	/// Enable debugging (comma-separated: stats, explain, keepdepfile,
	/// keeprsp, nostatcache).
	#[structopt(short = "d", long = "debug")]
	pub debug: Vec<String>,

	/// Run a subtool (pass `list` to list subtools).
	#[structopt(short = "t", long = "tool")]
	pub tool: Option<String>,

	/// Adjust warnings (comma-separated: phonycycle=err|warn,
	/// dupbuild=err|warn, depfilemulti=*).
	#[structopt(short = "w", long = "warn")]
	pub warn: Vec<String>,

	/// Show verbose (debug-level) logging.
	#[structopt(short = "v", long = "verbose")]
	pub verbose: bool,

	/// Suppress the one-line build status.
	#[structopt(long = "quiet")]
	pub quiet: bool,

	/// Targets to build (default: every target reachable from `default`, or
	/// every output if no `default` was given).
	pub targets: Vec<String>,
}

impl Options {
	pub fn debug_flags(&self) -> Vec<&str> {
		self.debug.iter().flat_map(|s| s.split(',')).collect()
	}

	pub fn warn_flags(&self) -> Vec<&str> {
		self.warn.iter().flat_map(|s| s.split(',')).collect()
	}
}

/// Set once a termination signal is received; checked by the dispatcher
/// between iterations, never written to anywhere else.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_interrupt(_signal: nix::libc::c_int) {
	INTERRUPTED.store(true, Ordering::SeqCst);
}

fn install_interrupt_handler() {
	unsafe {
		let _ = nix::sys::signal::signal(
			nix::sys::signal::Signal::SIGINT,
			nix::sys::signal::SigHandler::Handler(handle_interrupt),
		);
		let _ = nix::sys::signal::signal(
			nix::sys::signal::Signal::SIGTERM,
			nix::sys::signal::SigHandler::Handler(handle_interrupt),
		);
	}
}

fn main() {
	let opt = Options::from_args();

	log::set_max_level(if opt.verbose {
		log::LevelFilter::Debug
	} else {
		log::LevelFilter::Info
	});
	log::set_logger(&logger::Logger).ok();

	if let Some(dir) = &opt.directory {
		if let Err(e) = std::env::set_current_dir(dir) {
			eprintln!("ninjin: can't chdir to {:?}: {}", dir, e);
			exit(1);
		}
	}

	if let Some(tool) = &opt.tool {
		match subtools::run_subtool(tool, &opt) {
			Ok(()) => exit(0),
			Err(e) => {
				eprintln!("ninjin: {}", e);
				exit(if e.kind() == ErrorKind::InvalidData { 3 } else { 1 });
			}
		}
	}

	install_interrupt_handler();
	exit(run_build(&opt));
}

fn run_build(opt: &Options) -> i32 {
	let spec = match ninjin::spec::read(&opt.file) {
		Ok(spec) => spec,
		Err(e) => {
			eprintln!("ninjin: {}", e);
			return 1;
		}
	};

	let build_dir = spec
		.build_dir
		.as_ref()
		.and_then(|d| d.to_str().ok())
		.map(PathBuf::from)
		.unwrap_or_else(PathBuf::new);

	let (mut state, errors) = load(&spec);
	if !errors.is_empty() {
		for e in &errors {
			eprintln!("ninjin: {}", e);
		}
		return 1;
	}

	if let Err(e) = builder::ensure_build_dir(&build_dir) {
		eprintln!("ninjin: can't create build directory {:?}: {}", build_dir, e);
		return 1;
	}

	let mut build_log = match BuildLog::read(build_dir.join(".ninja_log")) {
		Ok(log) => log,
		Err(e) if e.kind() == ErrorKind::NotFound => BuildLog::new(),
		Err(e) => {
			eprintln!("ninjin: loading .ninja_log: {}", e);
			return 1;
		}
	};

	let mut dep_log = match DepLogMut::open(build_dir.join(".ninja_deps")) {
		Ok(log) => log,
		Err(e) => {
			eprintln!("ninjin: loading .ninja_deps: {}", e);
			return 1;
		}
	};

	let roots: Vec<_> = if opt.targets.is_empty() {
		state.root_nodes.clone()
	} else {
		let mut roots = Vec::with_capacity(opt.targets.len());
		for target in &opt.targets {
			match state.lookup_node(raw_string::RawStr::from_str(target)) {
				Some(id) => roots.push(id),
				None => {
					eprintln!("ninjin: unknown target {:?}", target);
					return 1;
				}
			}
		}
		roots
	};

	{
		let mut scanner = Scanner::new(&mut state, Some(&build_log), Some(&dep_log), &build_dir);
		for &root in &roots {
			if let Err(e) = scanner.recompute_dirty(root) {
				eprintln!("ninjin: {}", e);
				return 1;
			}
		}
	}

	let plan = Plan::new(&state, &roots);
	let status = BuildStatus::new(plan.n_left(), opt.quiet);

	let debug = opt.debug_flags();
	let debug_flags = DebugFlags {
		keep_depfile: debug.contains(&"keepdepfile"),
		keep_rsp: debug.contains(&"keeprsp"),
	};

	let parallelism = match opt.jobs {
		Some(0) | None => builder::default_parallelism(),
		Some(n) => n,
	};

	let mut builder = Builder {
		state: &mut state,
		plan,
		build_dir,
		parallelism,
		failures_allowed: if opt.keep_going == 0 { usize::max_value() } else { opt.keep_going },
		dry_run: opt.dry_run,
		debug: debug_flags,
		build_log: &mut build_log,
		dep_log: &mut dep_log,
		status: &status,
		interrupted: &INTERRUPTED,
	};

	match builder.run() {
		Ok(BuildOutcome::Success) => {
			if let Err(e) = build_log.write(builder.build_dir.join(".ninja_log")) {
				eprintln!("ninjin: writing .ninja_log: {}", e);
				return 1;
			}
			0
		}
		Ok(BuildOutcome::Failed) => 1,
		Ok(BuildOutcome::Interrupted) => 2,
		Err(e) => {
			eprintln!("ninjin: {}", e);
			1
		}
	}
}
