//! `-t restat`: re-stat every output recorded in `.ninja_log`, so a later
//! build with `restat`-marked rules sees them as up to date if their content
//! didn't actually change.

use super::{load_state, Options};
use ninjin::buildlog::BuildLog;
use ninjin::mtime::mtime;
use std::io::{Error, ErrorKind};

pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let (_state, build_dir) = load_state(opt)?;
	let log_path = build_dir.join(".ninja_log");

	let mut build_log = match BuildLog::read(&log_path) {
		Ok(log) => log,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(e),
	};

	build_log.restat(|output| mtime(&build_dir.join(output.to_str().unwrap_or(""))))?;
	build_log.write(&log_path)
}
