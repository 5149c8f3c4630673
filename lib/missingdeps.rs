//! Detecting dependencies that were discovered (through a depfile or dyndep
//! file) but aren't actually reachable from any of the targets being built.
//!
//! This is what `-t missingdeps` reports, and what a build aborts on by
//! default: a header that's `#include`d but never named as (or reachable
//! through) a build input usually means a missing entry in `build.ninja`.

use crate::graph::{EdgeId, NodeId, State};
use raw_string::RawStr;
use std::collections::HashMap;

/// Memoizes reachability queries between nodes in a [`State`], so that
/// repeated checks (one per discovered dependency) don't redo the same
/// graph walk.
pub struct ReachabilityCache<'a> {
	state: &'a State,
	/// Memoized answer for "is `from` reachable from `root`", keyed by
	/// `(root, from)`.
	cache: HashMap<(NodeId, NodeId), bool>,
}

impl<'a> ReachabilityCache<'a> {
	pub fn new(state: &'a State) -> Self {
		ReachabilityCache {
			state,
			cache: HashMap::new(),
		}
	}

	/// Is `needle` reachable by walking the inputs of `root` and its
	/// transitive dependencies?
	pub fn path_exists_between(&mut self, root: NodeId, needle: NodeId) -> bool {
		if root == needle {
			return true;
		}
		if let Some(&answer) = self.cache.get(&(root, needle)) {
			return answer;
		}

		// Mark as false up front so a cycle in the (supposedly acyclic)
		// graph can't recurse forever.
		self.cache.insert((root, needle), false);

		let mut found = false;
		if let Some(edge) = self.state.node(root).in_edge {
			for &input in &self.state.edge(edge).inputs {
				if self.path_exists_between(input, needle) {
					found = true;
					break;
				}
			}
		}

		self.cache.insert((root, needle), found);
		found
	}
}

/// A dependency discovered for `edge` that isn't reachable from any of
/// `roots`.
#[derive(Debug, Clone)]
pub struct MissingDep {
	pub edge: EdgeId,
	pub node: NodeId,
}

/// Check each of `edge`'s current inputs against `roots`, reporting those
/// not reachable from any of them.
///
/// `build_ninja` is exempted: depending on the manifest itself (as e.g.
/// `configure`-style generator rules often do via a dyndep-free implicit
/// dependency) is never "missing", since it isn't meant to be part of the
/// dependency DAG being checked.
pub fn find_missing_deps(
	state: &State,
	cache: &mut ReachabilityCache,
	roots: &[NodeId],
	edge: EdgeId,
	build_ninja: &RawStr,
) -> Vec<MissingDep> {
	let mut missing = Vec::new();
	for &input in &state.edge(edge).inputs {
		if state.node(input).path.as_ref() as &RawStr == build_ninja {
			continue;
		}
		let reachable = roots.iter().any(|&root| cache.path_exists_between(root, input));
		if !reachable {
			missing.push(MissingDep { edge, node: input });
		}
	}
	missing
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::graph::{CommandRule, Rule, DEFAULT_POOL};
	use raw_string::RawString;

	fn command_edge(state: &mut State) -> EdgeId {
		state.add_edge(
			Rule::Command(Box::new(CommandRule {
				name: "cc".to_string(),
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
	fn finds_unreachable_dependency() {
		let mut state = State::new();
		let out = state.get_node(RawString::from("out"), 0);
		let tracked_in = state.get_node(RawString::from("tracked.c"), 0);
		let surprise_in = state.get_node(RawString::from("surprise.h"), 0);
		let edge = command_edge(&mut state);
		state.add_out(edge, out).unwrap();
		state.add_in(edge, tracked_in);

		// `surprise_in` was discovered by a depfile but was never an input
		// of any edge reachable from `out`, so it's pushed directly into
		// `edge`'s own inputs to simulate a depfile having just been read.
		state.add_in(edge, surprise_in);

		let mut cache = ReachabilityCache::new(&state);
		let missing = find_missing_deps(
			&state,
			&mut cache,
			&[out],
			edge,
			RawStr::from_str("build.ninja"),
		);
		assert_eq!(missing.len(), 1);
		assert_eq!(missing[0].node, surprise_in);
	}

	#[test]
	fn build_ninja_is_exempt() {
		let mut state = State::new();
		let out = state.get_node(RawString::from("out"), 0);
		let manifest = state.get_node(RawString::from("build.ninja"), 0);
		let edge = command_edge(&mut state);
		state.add_out(edge, out).unwrap();
		state.add_in(edge, manifest);

		let mut cache = ReachabilityCache::new(&state);
		let missing = find_missing_deps(
			&state,
			&mut cache,
			&[out],
			edge,
			RawStr::from_str("build.ninja"),
		);
		assert!(missing.is_empty());
	}
}
