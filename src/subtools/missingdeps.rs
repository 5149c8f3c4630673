//! `-t missingdeps`: find depfile/dyndep-discovered dependencies that
//! aren't reachable from any root target, which usually means a `build.ninja`
//! rule is missing an input.

use super::{load_state, Options};
use ninjin::deplog::DepLog;
use ninjin::missingdeps::ReachabilityCache;
use raw_string::RawStr;
use std::io::{Error, ErrorKind};

pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let (state, build_dir) = load_state(opt)?;

	let dep_log = match DepLog::read(build_dir.join(".ninja_deps")) {
		Ok(log) => log,
		Err(e) if e.kind() == ErrorKind::NotFound => DepLog::new(),
		Err(e) => return Err(e),
	};

	let roots: Vec<_> = if opt.targets.is_empty() {
		state.root_nodes.clone()
	} else {
		let mut roots = Vec::with_capacity(opt.targets.len());
		for target in &opt.targets {
			let id = state
				.lookup_node(RawStr::from_str(target))
				.ok_or_else(|| Error::new(ErrorKind::NotFound, format!("unknown target {:?}", target)))?;
			roots.push(id);
		}
		roots
	};

	let mut cache = ReachabilityCache::new(&state);
	let mut total_missing = 0usize;

	for &root in &roots {
		if state.node(root).in_edge.is_none() {
			continue;
		}
		let output_path = state.node(root).path.clone();
		let recorded = match dep_log.get(&output_path) {
			Some(info) => info,
			None => continue,
		};
		for dep_path in recorded.deps() {
			if dep_path == RawStr::from_str("build.ninja") {
				continue;
			}
			let dep_node = match state.lookup_node(dep_path) {
				Some(n) => n,
				None => continue,
			};
			let reachable = roots.iter().any(|&r| cache.path_exists_between(r, dep_node));
			if !reachable {
				println!("{} is a dependency of {} but is not reachable from any target", dep_path, output_path);
				total_missing += 1;
			}
		}
	}

	if total_missing > 0 {
		Err(Error::new(
			ErrorKind::InvalidData,
			format!("{} missing dependencies found", total_missing),
		))
	} else {
		println!("no missing dependencies");
		Ok(())
	}
}
