//! `-t recompact`: rewrite `.ninja_log` and `.ninja_deps`, dropping entries
//! that are no longer reachable, to keep them from growing unboundedly.

use super::{load_state, Options};
use ninjin::buildlog::BuildLog;
use ninjin::deplog::recompact as recompact_deps;
use std::io::{Error, ErrorKind};

pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let (_state, build_dir) = load_state(opt)?;

	match BuildLog::recompact(build_dir.join(".ninja_log")) {
		Ok(()) => {}
		Err(e) if e.kind() == ErrorKind::NotFound => {}
		Err(e) => return Err(e),
	}

	match recompact_deps(build_dir.join(".ninja_deps")) {
		Ok(()) => {}
		Err(e) if e.kind() == ErrorKind::NotFound => {}
		Err(e) => return Err(e),
	}

	Ok(())
}
