//! Determining which edges are out of date ("dirty") and need to be rerun.

use crate::buildlog::BuildLog;
use crate::canon::canonicalize;
use crate::deplog::DepLog;
use crate::dyndep::{load_dyndep_file, DyndepError};
use crate::error::ErrorWithLocation;
use crate::graph::{EdgeId, NodeId, Rule, State};
use crate::mtime::{mtime as stat_mtime, Timestamp};
use std::error::Error;
use std::fmt;
use std::path::Path;

/// A dependency cycle was found while scanning for dirty edges.
///
/// `path` starts and ends with the same name, e.g. for `a -> b -> c -> a`,
/// contains `["a", "b", "c", "a"]`.
#[derive(Clone, Debug)]
pub struct DependencyCycle {
	pub path: Vec<String>,
	/// The cycle is a single edge, phony, with one output and no implicit
	/// ins/outs: building it with `-w phonycycle=err` turns this into an
	/// error instead of a silent no-op.
	pub phonycycle: bool,
}

impl fmt::Display for DependencyCycle {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "dependency cycle: ")?;
		for (i, name) in self.path.iter().enumerate() {
			if i > 0 {
				write!(f, " -> ")?;
			}
			write!(f, "{}", name)?;
		}
		if self.phonycycle {
			write!(f, " [-w phonycycle=err]")?;
		}
		Ok(())
	}
}

impl Error for DependencyCycle {}

/// Anything that can go wrong while scanning: a cycle in the build graph, or
/// a dyndep file that failed to load.
#[derive(Debug)]
pub enum ScanError {
	Cycle(DependencyCycle),
	Dyndep(ErrorWithLocation<DyndepError>),
}

impl fmt::Display for ScanError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ScanError::Cycle(e) => write!(f, "{}", e),
			ScanError::Dyndep(e) => write!(f, "{}", e),
		}
	}
}

impl Error for ScanError {}

impl From<DependencyCycle> for ScanError {
	fn from(e: DependencyCycle) -> Self {
		ScanError::Cycle(e)
	}
}

impl From<ErrorWithLocation<DyndepError>> for ScanError {
	fn from(e: ErrorWithLocation<DyndepError>) -> Self {
		ScanError::Dyndep(e)
	}
}

/// Scans the build graph rooted at `root`, determining which edges are
/// dirty (need to run), consulting the build log and deps log for
/// previously-recorded state.
pub struct Scanner<'a> {
	state: &'a mut State,
	build_log: Option<&'a BuildLog>,
	dep_log: Option<&'a DepLog>,
	build_dir: &'a Path,
	mtimes: std::collections::HashMap<std::path::PathBuf, Option<Timestamp>>,
}

impl<'a> Scanner<'a> {
	pub fn new(
		state: &'a mut State,
		build_log: Option<&'a BuildLog>,
		dep_log: Option<&'a DepLog>,
		build_dir: &'a Path,
	) -> Self {
		Scanner {
			state,
			build_log,
			dep_log,
			build_dir,
			mtimes: std::collections::HashMap::new(),
		}
	}

	fn node_path(&self, node: NodeId) -> std::path::PathBuf {
		let path = self.state.node(node).path.to_str().unwrap_or("");
		self.build_dir.join(path)
	}

	fn node_mtime(&mut self, node: NodeId) -> Result<Option<Timestamp>, std::io::Error> {
		let path = self.node_path(node);
		if let Some(&t) = self.mtimes.get(&path) {
			return Ok(t);
		}
		let t = stat_mtime(&path)?;
		self.mtimes.insert(path, t);
		Ok(t)
	}

	/// Recompute dirtiness for every edge reachable from `root`, recursively.
	pub fn recompute_dirty(&mut self, root: NodeId) -> Result<(), ScanError> {
		let mut edge_stack = Vec::new();
		self.visit_node(root, &mut edge_stack)
	}

	fn visit_node(&mut self, node: NodeId, edge_stack: &mut Vec<EdgeId>) -> Result<(), ScanError> {
		let edge = match self.state.node(node).in_edge {
			Some(e) => e,
			None => return Ok(()), // source file, nothing to scan
		};

		// `outputs_ready` doubles as "already visited" here: once an edge's
		// dirty state has been computed, its inputs don't need re-walking.
		if self.state.edge(edge).outputs_ready {
			return Ok(());
		}

		if let Some(pos) = edge_stack.iter().position(|&e| e == edge) {
			return Err(self.cycle_error(node, &edge_stack[pos..]).into());
		}

		edge_stack.push(edge);

		// First touch: if this edge has a dyndep binding not yet loaded,
		// scan its node and, once that's ready, load it so the implicit
		// ins/outs it adds are in place before we recurse into `inputs`.
		self.load_pending_dyndep(edge, edge_stack)?;

		let inputs: Vec<NodeId> = self.state.edge(edge).inputs.clone();
		for &input in &inputs {
			self.visit_node(input, edge_stack)?;
		}
		edge_stack.pop();

		self.recompute_edge_dirty(edge)?;
		Ok(())
	}

	fn load_pending_dyndep(&mut self, edge: EdgeId, edge_stack: &mut Vec<EdgeId>) -> Result<(), ScanError> {
		if !self.state.edge(edge).dyndep_pending {
			return Ok(());
		}
		let dyndep_path = match &self.state.edge(edge).rule {
			Rule::Command(cmd) if !cmd.dyndep.is_empty() => cmd.dyndep.clone(),
			_ => return Ok(()),
		};
		let canon = canonicalize(&dyndep_path).map(|c| c.path).unwrap_or(dyndep_path);
		let dyndep_node = self.state.get_node(canon, 0);

		self.visit_node(dyndep_node, edge_stack)?;

		// A dyndep file shared by several edges is loaded once; a sibling
		// edge visited above may already have cleared the flag.
		if self.state.edge(edge).dyndep_pending {
			let path = self.node_path(dyndep_node);
			load_dyndep_file(self.state, &path)?;
		}
		Ok(())
	}

	/// Build a [`DependencyCycle`] for the edges in `cycle` (all still
	/// waiting on `node`, which re-enters the first of them). Each edge is
	/// named by its first output, except the first edge in the cycle, which
	/// re-enters through `node` and so is named by that instead (it may
	/// have other, unrelated outputs too).
	fn cycle_error(&self, node: NodeId, cycle: &[EdgeId]) -> DependencyCycle {
		let mut path = Vec::with_capacity(cycle.len() + 1);
		for (i, &e) in cycle.iter().enumerate() {
			let name = if i == 0 {
				self.state.node(node).path.to_string()
			} else {
				self.state.node(self.state.edge(e).outputs[0]).path.to_string()
			};
			path.push(name);
		}
		path.push(self.state.node(node).path.to_string());

		let closing = self.state.edge(cycle[0]);
		let phonycycle = cycle.len() == 1
			&& closing.is_phony()
			&& closing.outputs.len() == 1
			&& closing.implicit_outs == 0
			&& closing.implicit_deps == 0;

		DependencyCycle { path, phonycycle }
	}

	fn recompute_edge_dirty(&mut self, edge: EdgeId) -> Result<(), ScanError> {
		if self.state.edge(edge).outputs_ready {
			return Ok(());
		}

		let is_phony = self.state.edge(edge).is_phony();
		let inputs = self.state.edge(edge).inputs.clone();

		let mut dirty = false;
		let mut most_recent_input: Option<Timestamp> = None;

		for &input in &inputs {
			if self.state.node(input).dirty {
				dirty = true;
			}
			if let Ok(Some(t)) = self.node_mtime(input) {
				most_recent_input = Some(most_recent_input.map_or(t, |m| m.max(t)));
			} else if self.state.node(input).in_edge.is_none() {
				// A leaf input that doesn't exist: the edge can't be built.
				dirty = true;
			}
		}

		let edge_restat = match &self.state.edge(edge).rule {
			Rule::Command(cmd) => cmd.restat || self.state.edge(edge).dyndep_restat == Some(true),
			Rule::Phony => false,
		};

		let outputs = self.state.edge(edge).outputs.clone();
		let mut oldest_output: Option<Timestamp> = None;
		let mut any_output_missing = false;
		for &output in &outputs {
			match self.node_mtime(output) {
				Ok(Some(mut t)) => {
					// A restat rule's output may have been rewritten with
					// unchanged content: the build log's recorded mtime
					// from the run that last actually changed it stands in
					// for the real one, as long as it's no older than the
					// edge's inputs.
					if edge_restat {
						if let Some(logged) = self.logged_restat_mtime(output) {
							if most_recent_input.map_or(true, |inp| logged >= inp) {
								t = logged;
							}
						}
					}
					oldest_output = Some(oldest_output.map_or(t, |m| m.min(t)));
				}
				_ => any_output_missing = true,
			}
		}

		if !dirty && !is_phony {
			if any_output_missing {
				dirty = true;
			} else if let (Some(inp), Some(out)) = (most_recent_input, oldest_output) {
				if inp > out {
					dirty = true;
				}
			}

			if !dirty {
				dirty = self.command_changed_or_new(edge, &outputs);
			}

			if !dirty {
				dirty = self.deps_are_dirty(edge);
			}
		} else if is_phony && any_output_missing && !outputs.is_empty() {
			dirty = true;
		}

		self.state.edge_mut(edge).dirty = dirty;
		self.state.edge_mut(edge).outputs_ready = true;

		for &output in &outputs {
			self.state.node_mut(output).dirty = dirty;
		}

		Ok(())
	}

	/// The mtime the build log recorded for `output` the last time a
	/// `restat` rule actually ran, if any.
	fn logged_restat_mtime(&self, output: NodeId) -> Option<Timestamp> {
		let build_log = self.build_log?;
		let path = &self.state.node(output).path;
		build_log.lookup_output(path)?.restat_mtime
	}

	fn command_changed_or_new(&self, edge: EdgeId, outputs: &[NodeId]) -> bool {
		let cmd = match &self.state.edge(edge).rule {
			Rule::Command(cmd) => cmd,
			Rule::Phony => return false,
		};
		if cmd.generator {
			// Generator rules are never considered dirty due to a command
			// line change; only missing outputs or stale inputs count.
			return false;
		}
		let build_log = match self.build_log {
			Some(log) => log,
			None => return false,
		};
		let hash = crate::buildlog::murmur_hash_64a(cmd.command.as_bytes());
		for &output in outputs {
			let path = &self.state.node(output).path;
			match build_log.lookup_output(path) {
				Some(entry) if entry.command_hash == hash => {}
				_ => return true,
			}
		}
		false
	}

	fn deps_are_dirty(&mut self, edge: EdgeId) -> bool {
		let dep_log = match self.dep_log {
			Some(log) => log,
			None => return false,
		};
		let uses_deps = matches!(&self.state.edge(edge).rule, Rule::Command(cmd) if cmd.deps.is_some());
		if !uses_deps {
			return false;
		}
		let outputs = self.state.edge(edge).outputs.clone();
		for &output in &outputs {
			let path = self.state.node(output).path.clone();
			let info = match dep_log.get(&path) {
				Some(info) => info,
				None => return true, // never recorded: needs a first build
			};
			for dep_path in info.deps() {
				match stat_mtime(&self.build_dir.join(dep_path.to_str().unwrap_or(""))) {
					Ok(Some(t)) => {
						if info.mtime().map_or(true, |m| t > m) {
							return true;
						}
					}
					Ok(None) => return true, // a recorded dep has vanished
					Err(_) => return true,
				}
			}
		}
		false
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::graph::{CommandRule, DEFAULT_POOL};
	use raw_string::RawString;

	fn command_edge(state: &mut State, command: &str) -> EdgeId {
		state.add_edge(
			Rule::Command(Box::new(CommandRule {
				name: "cc".to_string(),
				command: RawString::from(command),
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
	fn missing_output_is_dirty() {
		let mut state = State::new();
		let out = state.get_node(RawString::from("no-such-output-ninjin-test"), 0);
		let edge = command_edge(&mut state, "touch out");
		state.add_out(edge, out).unwrap();

		let dir = std::env::current_dir().unwrap();
		let mut scanner = Scanner::new(&mut state, None, None, &dir);
		scanner.recompute_dirty(out).unwrap();
		assert!(scanner.state.edge(edge).dirty);
	}

	#[test]
	fn source_file_has_no_in_edge_and_is_never_dirty() {
		let mut state = State::new();
		let src = state.get_node(RawString::from("Cargo.toml"), 0);
		let dir = std::env::current_dir().unwrap();
		let mut scanner = Scanner::new(&mut state, None, None, &dir);
		scanner.recompute_dirty(src).unwrap();
		assert!(!scanner.state.node(src).dirty);
	}

	#[test]
	fn detects_cycles() {
		let mut state = State::new();
		let a = state.get_node(RawString::from("a"), 0);
		let b = state.get_node(RawString::from("b"), 0);
		let e1 = command_edge(&mut state, "touch a");
		let e2 = command_edge(&mut state, "touch b");
		state.add_out(e1, a).unwrap();
		state.add_in(e1, b);
		state.add_out(e2, b).unwrap();
		state.add_in(e2, a);

		let dir = std::env::current_dir().unwrap();
		let mut scanner = Scanner::new(&mut state, None, None, &dir);
		assert!(scanner.recompute_dirty(a).is_err());
	}
}
