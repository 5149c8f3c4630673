//! `-t clean`: removing the files a build produces, as opposed to the
//! sources that feed it.

use crate::buildlog::BuildLog;
use crate::graph::{EdgeId, Rule, State};
use log::info;
use std::io;
use std::path::Path;

/// Tally of what a clean pass did, for the summary line printed afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanResult {
	pub cleaned: usize,
	pub failed: usize,
}

impl CleanResult {
	fn merge(&mut self, other: CleanResult) {
		self.cleaned += other.cleaned;
		self.failed += other.failed;
	}
}

fn remove_file(build_dir: &Path, path: &raw_string::RawStr, result: &mut CleanResult) {
	let full = build_dir.join(path.to_str().unwrap_or(""));
	match std::fs::remove_file(&full) {
		Ok(()) => {
			info!("Remove {}", path);
			result.cleaned += 1;
		}
		Err(e) if e.kind() == io::ErrorKind::NotFound => {}
		Err(e) => {
			log::warn!("Failed to remove {}: {}", path, e);
			result.failed += 1;
		}
	}
}

fn clean_edge(state: &State, build_dir: &Path, edge: EdgeId, result: &mut CleanResult) {
	let edge_ref = state.edge(edge);
	if edge_ref.is_phony() {
		return;
	}
	for &output in &edge_ref.outputs {
		remove_file(build_dir, &state.node(output).path, result);
	}
	if let Rule::Command(cmd) = &edge_ref.rule {
		if !cmd.depfile.is_empty() {
			remove_file(build_dir, &cmd.depfile, result);
		}
		if !cmd.rspfile.is_empty() {
			remove_file(build_dir, &cmd.rspfile, result);
		}
	}
}

/// Remove every file produced by any non-phony edge in `state`.
pub fn clean_all(state: &State, build_dir: &Path) -> CleanResult {
	let mut result = CleanResult::default();
	for edge in state.edge_ids() {
		clean_edge(state, build_dir, edge, &mut result);
	}
	result
}

/// Remove the outputs of the edges that (transitively) produce `targets`,
/// and everything those edges depend on that is itself generated.
pub fn clean_targets(state: &State, build_dir: &Path, targets: &[crate::graph::NodeId]) -> CleanResult {
	let mut result = CleanResult::default();
	let mut seen = std::collections::HashSet::new();
	let mut stack: Vec<_> = targets.to_vec();
	while let Some(node) = stack.pop() {
		if !seen.insert(node) {
			continue;
		}
		if let Some(edge) = state.node(node).in_edge {
			clean_edge(state, build_dir, edge, &mut result);
			stack.extend(state.edge(edge).inputs.iter().copied());
		}
	}
	result
}

/// Remove the outputs of every edge using one of the named rules.
pub fn clean_rules(state: &State, build_dir: &Path, rule_names: &[&str]) -> CleanResult {
	let mut result = CleanResult::default();
	for edge in state.edge_ids() {
		let matches = match &state.edge(edge).rule {
			Rule::Command(cmd) => rule_names.contains(&cmd.name.as_str()),
			Rule::Phony => false,
		};
		if matches {
			clean_edge(state, build_dir, edge, &mut result);
		}
	}
	result
}

/// Remove build log entries (and, if present, their on-disk output) for
/// outputs no longer produced by anything in `state` — leftovers from a
/// manifest that used to build them and no longer does.
pub fn clean_dead(state: &State, build_dir: &Path, build_log: &BuildLog) -> CleanResult {
	let mut result = CleanResult::default();
	for path in build_log.entries.keys() {
		if state.lookup_node(path).map_or(true, |n| state.node(n).in_edge.is_none()) {
			remove_file(build_dir, path, &mut result);
		}
	}
	result
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::graph::{CommandRule, DEFAULT_POOL};
	use raw_string::RawString;
	use std::io::Write;

	fn command_edge(state: &mut State, name: &str) -> EdgeId {
		state.add_edge(
			Rule::Command(Box::new(CommandRule {
				name: name.to_string(),
				command: RawString::from("touch $out"),
				description: RawString::new(),
				depfile: RawString::new(),
				deps: None,
				msvc_deps_prefix: RawString::new(),
				generator: false,
				restat: false,
				rspfile: RawString::new(),
				rspfile_content: RawString::new(),
				dyndep: RawString::new(),
			})),
			DEFAULT_POOL,
		)
	}

	#[test]
	fn clean_all_removes_existing_outputs() {
		let dir = std::env::temp_dir().join("ninj-clean-test-all");
		std::fs::create_dir_all(&dir).unwrap();
		let out_path = dir.join("built.txt");
		std::fs::File::create(&out_path).unwrap().write_all(b"x").unwrap();

		let mut state = State::new();
		let out = state.get_node(RawString::from("built.txt"), 0);
		let edge = command_edge(&mut state, "cc");
		state.add_out(edge, out).unwrap();

		let result = clean_all(&state, &dir);
		assert_eq!(result.cleaned, 1);
		assert!(!out_path.exists());
		std::fs::remove_dir_all(&dir).ok();
	}

	#[test]
	fn clean_all_skips_phony_outputs() {
		let dir = std::env::temp_dir().join("ninj-clean-test-phony");
		std::fs::create_dir_all(&dir).unwrap();

		let mut state = State::new();
		let out = state.get_node(RawString::from("alias"), 0);
		let edge = state.add_edge(Rule::Phony, DEFAULT_POOL);
		state.add_out(edge, out).unwrap();

		let result = clean_all(&state, &dir);
		assert_eq!(result.cleaned, 0);
		assert_eq!(result.failed, 0);
		std::fs::remove_dir_all(&dir).ok();
	}

	#[test]
	fn clean_rules_only_removes_matching_rule() {
		let dir = std::env::temp_dir().join("ninj-clean-test-rules");
		std::fs::create_dir_all(&dir).unwrap();
		std::fs::File::create(dir.join("a.o")).unwrap();
		std::fs::File::create(dir.join("a.out")).unwrap();

		let mut state = State::new();
		let obj = state.get_node(RawString::from("a.o"), 0);
		let bin = state.get_node(RawString::from("a.out"), 0);
		let cc = command_edge(&mut state, "cc");
		state.add_out(cc, obj).unwrap();
		let link = command_edge(&mut state, "link");
		state.add_out(link, bin).unwrap();

		let result = clean_rules(&state, &dir, &["cc"]);
		assert_eq!(result.cleaned, 1);
		assert!(!dir.join("a.o").exists());
		assert!(dir.join("a.out").exists());
		std::fs::remove_dir_all(&dir).ok();
	}
}
