//! The in-memory build graph: nodes (files), edges (build rules), and pools.

use raw_string::{RawStr, RawString};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

/// The stable index of a [`Node`] in a [`State`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u32);

/// The stable index of an [`Edge`] in a [`State`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EdgeId(pub u32);

/// The stable index of a [`Pool`] in a [`State`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PoolId(pub u32);

/// The built-in pool with unlimited depth, used when no `pool = ` is set.
pub const DEFAULT_POOL: PoolId = PoolId(0);
/// The built-in pool with depth 1, reserved for tasks that want exclusive
/// access to the terminal.
pub const CONSOLE_POOL: PoolId = PoolId(1);

/// A file in the build graph, either an input, an output, or both.
#[derive(Clone, Debug)]
pub struct Node {
	/// The canonicalized path.
	pub path: RawString,
	/// Which of `path`'s separators were originally backslashes.
	pub slash_bits: u64,
	/// The edge that produces this node, if any. A node with no producing
	/// edge is a source file.
	pub in_edge: Option<EdgeId>,
	/// The edges that use this node as an input (explicit, implicit, or
	/// order-only) or as a validation target.
	pub out_edges: Vec<EdgeId>,
	/// The edges that use this node as a validation target specifically.
	pub validation_out_edges: Vec<EdgeId>,
	/// Set once this node has been determined to need rebuilding.
	pub dirty: bool,
}

impl Node {
	fn new(path: RawString, slash_bits: u64) -> Self {
		Node {
			path,
			slash_bits,
			in_edge: None,
			out_edges: Vec::new(),
			validation_out_edges: Vec::new(),
			dirty: false,
		}
	}
}

/// A rule: either the builtin phony rule, or a real command.
#[derive(Clone, Debug)]
pub enum Rule {
	/// The builtin `phony` rule: no command is run, the edge just groups
	/// its inputs under an output name.
	Phony,
	/// A rule with an actual command to run.
	Command(Box<CommandRule>),
}

/// The details needed to run a non-phony edge's command.
#[derive(Clone, Debug)]
pub struct CommandRule {
	pub name: String,
	pub command: RawString,
	pub description: RawString,
	pub depfile: RawString,
	pub deps: Option<crate::spec::DepStyle>,
	pub msvc_deps_prefix: RawString,
	pub generator: bool,
	pub restat: bool,
	pub rspfile: RawString,
	pub rspfile_content: RawString,
	pub dyndep: RawString,
}

/// A build edge: a rule application, with concrete inputs and outputs.
#[derive(Clone, Debug)]
pub struct Edge {
	pub rule: Rule,
	pub pool: PoolId,
	/// All inputs: explicit first, then implicit, then order-only.
	pub inputs: Vec<NodeId>,
	pub explicit_deps: usize,
	pub implicit_deps: usize,
	/// All outputs: explicit first, then implicit.
	pub outputs: Vec<NodeId>,
	pub implicit_outs: usize,
	/// Validation targets (`|@`): built alongside this edge, but their
	/// staleness does not make this edge dirty, and vice versa.
	pub validations: Vec<NodeId>,
	/// Whether this edge still needs a dyndep file consulted before its
	/// dirty state can be determined.
	pub dyndep_pending: bool,
	/// Set by the dyndep file, if any: overrides `rule`'s `restat` flag.
	pub dyndep_restat: Option<bool>,
	pub dirty: bool,
	/// Edge was found not to produce new output, once already up to date
	/// (order-only/"clean") - used to short-circuit repeated scans.
	pub outputs_ready: bool,
}

impl Edge {
	pub fn is_phony(&self) -> bool {
		matches!(self.rule, Rule::Phony)
	}

	pub fn explicit_inputs(&self) -> &[NodeId] {
		&self.inputs[..self.explicit_deps]
	}

	pub fn implicit_inputs(&self) -> &[NodeId] {
		&self.inputs[self.explicit_deps..self.explicit_deps + self.implicit_deps]
	}

	pub fn order_only_inputs(&self) -> &[NodeId] {
		&self.inputs[self.explicit_deps + self.implicit_deps..]
	}

	pub fn explicit_outputs(&self) -> &[NodeId] {
		&self.outputs[..self.outputs.len() - self.implicit_outs]
	}

	pub fn implicit_outputs(&self) -> &[NodeId] {
		&self.outputs[self.outputs.len() - self.implicit_outs..]
	}
}

/// A named group of edges that share a concurrency limit.
#[derive(Clone, Debug)]
pub struct Pool {
	pub name: String,
	/// `None` means unlimited (the default pool).
	pub depth: Option<u16>,
	pub in_use: u16,
}

/// An attempt to add an edge whose output is already produced by another
/// edge.
#[derive(Clone, Debug)]
pub struct DuplicateOutput(pub RawString);

impl fmt::Display for DuplicateOutput {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "multiple rules generate {}", self.0)
	}
}

impl Error for DuplicateOutput {}

/// The whole build graph: every known node, edge, and pool.
#[derive(Clone, Debug)]
pub struct State {
	nodes: Vec<Node>,
	by_path: BTreeMap<RawString, NodeId>,
	edges: Vec<Edge>,
	pools: Vec<Pool>,
	/// The targets named on the command line, or the defaults if none were.
	pub root_nodes: Vec<NodeId>,
	/// The targets named by `default` statements.
	pub default_nodes: Vec<NodeId>,
}

impl State {
	pub fn new() -> Self {
		State {
			nodes: Vec::new(),
			by_path: BTreeMap::new(),
			edges: Vec::new(),
			pools: vec![
				Pool {
					name: String::new(),
					depth: None,
					in_use: 0,
				},
				Pool {
					name: "console".to_string(),
					depth: Some(1),
					in_use: 0,
				},
			],
			root_nodes: Vec::new(),
			default_nodes: Vec::new(),
		}
	}

	pub fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id.0 as usize]
	}

	pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
		&mut self.nodes[id.0 as usize]
	}

	pub fn edge(&self, id: EdgeId) -> &Edge {
		&self.edges[id.0 as usize]
	}

	pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
		&mut self.edges[id.0 as usize]
	}

	pub fn pool(&self, id: PoolId) -> &Pool {
		&self.pools[id.0 as usize]
	}

	pub fn pool_mut(&mut self, id: PoolId) -> &mut Pool {
		&mut self.pools[id.0 as usize]
	}

	pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
		(0..self.nodes.len() as u32).map(NodeId)
	}

	pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> {
		(0..self.edges.len() as u32).map(EdgeId)
	}

	/// Get or create the node for `path` (already canonicalized).
	pub fn get_node(&mut self, path: RawString, slash_bits: u64) -> NodeId {
		if let Some(&id) = self.by_path.get(&path) {
			return id;
		}
		let id = NodeId(self.nodes.len() as u32);
		self.by_path.insert(path.clone(), id);
		self.nodes.push(Node::new(path, slash_bits));
		id
	}

	/// Look up a node by path without creating it.
	pub fn lookup_node(&self, path: &RawStr) -> Option<NodeId> {
		self.by_path.get(path).copied()
	}

	/// Register a named pool, or look up the existing one with that name.
	pub fn get_pool(&mut self, name: &str, depth: u16) -> PoolId {
		if let Some(i) = self.pools.iter().position(|p| p.name == name) {
			return PoolId(i as u32);
		}
		let id = PoolId(self.pools.len() as u32);
		self.pools.push(Pool {
			name: name.to_string(),
			depth: Some(depth),
			in_use: 0,
		});
		id
	}

	pub fn lookup_pool(&self, name: &str) -> Option<PoolId> {
		self.pools.iter().position(|p| p.name == name).map(|i| PoolId(i as u32))
	}

	/// Add a new edge with no inputs or outputs yet, returning its id.
	pub fn add_edge(&mut self, rule: Rule, pool: PoolId) -> EdgeId {
		let id = EdgeId(self.edges.len() as u32);
		self.edges.push(Edge {
			rule,
			pool,
			inputs: Vec::new(),
			explicit_deps: 0,
			implicit_deps: 0,
			outputs: Vec::new(),
			implicit_outs: 0,
			validations: Vec::new(),
			dyndep_pending: false,
			dyndep_restat: None,
			dirty: false,
			outputs_ready: false,
		});
		id
	}

	/// Record `node` as an input of `edge`, and `edge` as a consumer of
	/// `node`.
	pub fn add_in(&mut self, edge: EdgeId, node: NodeId) {
		self.edges[edge.0 as usize].inputs.push(node);
		self.nodes[node.0 as usize].out_edges.push(edge);
	}

	/// Record `node` as an output of `edge`. Fails if another edge already
	/// produces `node`.
	pub fn add_out(&mut self, edge: EdgeId, node: NodeId) -> Result<(), DuplicateOutput> {
		if let Some(existing) = self.nodes[node.0 as usize].in_edge {
			if existing != edge {
				return Err(DuplicateOutput(self.nodes[node.0 as usize].path.clone()));
			}
		}
		self.nodes[node.0 as usize].in_edge = Some(edge);
		self.edges[edge.0 as usize].outputs.push(node);
		Ok(())
	}

	/// Record `node` as a validation target of `edge`.
	pub fn add_validation(&mut self, edge: EdgeId, node: NodeId) {
		self.edges[edge.0 as usize].validations.push(node);
		self.nodes[node.0 as usize].validation_out_edges.push(edge);
	}

	/// Reset all transient per-build state (`dirty`, `outputs_ready`,
	/// dyndep pending flags, pool usage), keeping the graph's shape.
	pub fn reset(&mut self) {
		for node in &mut self.nodes {
			node.dirty = false;
		}
		for edge in &mut self.edges {
			edge.dirty = false;
			edge.outputs_ready = false;
		}
		for pool in &mut self.pools {
			pool.in_use = 0;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn get_node_interns_by_path() {
		let mut state = State::new();
		let a = state.get_node(RawString::from("foo"), 0);
		let b = state.get_node(RawString::from("foo"), 0);
		let c = state.get_node(RawString::from("bar"), 0);
		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_eq!(state.lookup_node(RawStr::from_str("foo")), Some(a));
		assert_eq!(state.lookup_node(RawStr::from_str("missing")), None);
	}

	#[test]
	fn add_out_detects_duplicates() {
		let mut state = State::new();
		let out = state.get_node(RawString::from("out"), 0);
		let e1 = state.add_edge(Rule::Phony, DEFAULT_POOL);
		let e2 = state.add_edge(Rule::Phony, DEFAULT_POOL);
		state.add_out(e1, out).unwrap();
		assert!(state.add_out(e2, out).is_err());
		// Adding the same output to the same edge again is fine (idempotent
		// from the perspective of the duplicate check).
		assert!(state.add_out(e1, out).is_ok());
	}

	#[test]
	fn edge_input_output_slices() {
		let mut state = State::new();
		let e = state.add_edge(Rule::Phony, DEFAULT_POOL);
		let exp_in = state.get_node(RawString::from("a"), 0);
		let imp_in = state.get_node(RawString::from("b"), 0);
		let oo_in = state.get_node(RawString::from("c"), 0);
		state.add_in(e, exp_in);
		state.add_in(e, imp_in);
		state.add_in(e, oo_in);
		{
			let edge = state.edge_mut(e);
			edge.explicit_deps = 1;
			edge.implicit_deps = 1;
		}
		let edge = state.edge(e);
		assert_eq!(edge.explicit_inputs(), &[exp_in]);
		assert_eq!(edge.implicit_inputs(), &[imp_in]);
		assert_eq!(edge.order_only_inputs(), &[oo_in]);
	}
}
