//! `-t clean`: remove the files a build produces.

use super::{load_state, Options};
use ninjin::buildlog::BuildLog;
use ninjin::clean::{clean_all, clean_dead, clean_rules, clean_targets, CleanResult};
use raw_string::RawStr;
use std::io::{Error, ErrorKind};

pub(super) fn main(opt: &Options) -> Result<(), Error> {
	let (state, build_dir) = load_state(opt)?;

	let rule_names: Vec<&str> = opt.targets.iter().filter(|t| t.starts_with("rule:")).map(|t| &t[5..]).collect();
	let plain_targets: Vec<&String> = opt.targets.iter().filter(|t| !t.starts_with("rule:")).collect();

	let result = if !rule_names.is_empty() {
		clean_rules(&state, &build_dir, &rule_names)
	} else if !plain_targets.is_empty() {
		let mut nodes = Vec::with_capacity(plain_targets.len());
		for target in plain_targets {
			let id = state
				.lookup_node(RawStr::from_str(target))
				.ok_or_else(|| Error::new(ErrorKind::NotFound, format!("unknown target {:?}", target)))?;
			nodes.push(id);
		}
		clean_targets(&state, &build_dir, &nodes)
	} else {
		let mut result = clean_all(&state, &build_dir);
		if let Ok(build_log) = BuildLog::read(build_dir.join(".ninja_log")) {
			merge(&mut result, clean_dead(&state, &build_dir, &build_log));
		}
		result
	};

	println!("Cleaned {} files ({} failed)", result.cleaned, result.failed);
	Ok(())
}

fn merge(total: &mut CleanResult, extra: CleanResult) {
	total.cleaned += extra.cleaned;
	total.failed += extra.failed;
}
