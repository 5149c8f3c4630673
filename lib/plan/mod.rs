//! Tracking which edges still need to run, and in what order, honoring pool
//! concurrency limits.
//!
//! Generalizes the task-number based scheduling in the old queue module to
//! work directly on [`EdgeId`]s and consult [`State`]'s pools for
//! concurrency limits.

use crate::graph::{EdgeId, NodeId, PoolId, State};
use std::mem::replace;
use std::time::{Duration, Instant};

/// The status of an [`EdgeId`] tracked by a [`Plan`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EdgeStatus {
	/// Not in the dependency tree of the targets we want.
	NotNeeded,
	/// In the dependency tree; waiting on a dependency or ready to run.
	///
	/// If [`EdgeInfo::n_deps_left`] is zero, the edge is ready (tracked in
	/// [`Plan::ready`]).
	Needed { phony: bool, outdated: bool },
	/// Currently running.
	Running { start_time: Instant },
	/// Finished running.
	Finished { running_time: Duration },
	/// Was not outdated, so didn't need to run.
	NotRun,
	/// Phony and outdated: instantly done once its dependencies are.
	PhonyFinished,
}

#[derive(Clone, Debug)]
struct EdgeInfo {
	status: EdgeStatus,
	pool: PoolId,
	/// Edges that depend on this one, and whether the dependency is
	/// order-only.
	next: Vec<(EdgeId, bool)>,
	n_deps_left: usize,
}

/// The set of edges that need to run to build the requested targets, and the
/// order constraints (including pool capacity) between them.
pub struct Plan {
	edges: Vec<EdgeInfo>,
	ready: Vec<EdgeId>,
	n_left: usize,
}

impl Plan {
	/// Build a plan to build `roots`, given each edge's dirtiness already
	/// computed (e.g. by [`crate::scan`]).
	pub fn new(state: &State, roots: &[NodeId]) -> Plan {
		let n_edges = state.edge_ids().count();
		let mut edges = vec![
			EdgeInfo {
				status: EdgeStatus::NotNeeded,
				pool: crate::graph::DEFAULT_POOL,
				next: Vec::new(),
				n_deps_left: 0,
			};
			n_edges
		];

		let mut to_visit: Vec<EdgeId> = Vec::new();
		for &root in roots {
			if let Some(edge) = state.node(root).in_edge {
				if edges[edge.0 as usize].status == EdgeStatus::NotNeeded {
					to_visit.push(edge);
					edges[edge.0 as usize].status = EdgeStatus::Needed {
						phony: false,
						outdated: false,
					};
				}
			}
		}

		let mut n_tasks = 0;
		let mut finished = Vec::new();
		let mut ready = Vec::new();

		while let Some(edge_id) = to_visit.pop() {
			let edge = state.edge(edge_id);
			let phony = edge.is_phony();
			let outdated = edge.dirty;

			let order_only_start = edge.explicit_deps + edge.implicit_deps;
			let mut n_deps = 0;
			for (i, &input) in edge.inputs.iter().enumerate() {
				if let Some(dep_edge) = state.node(input).in_edge {
					if edges[dep_edge.0 as usize].status == EdgeStatus::NotNeeded {
						to_visit.push(dep_edge);
						edges[dep_edge.0 as usize].status = EdgeStatus::Needed {
							phony: false,
							outdated: false,
						};
					}
					let order_only = i >= order_only_start;
					n_deps += 1;
					edges[dep_edge.0 as usize].next.push((edge_id, order_only));
				}
			}

			edges[edge_id.0 as usize].pool = edge.pool;
			edges[edge_id.0 as usize].status = EdgeStatus::Needed { phony, outdated };
			if !phony {
				n_tasks += 1;
			}
			edges[edge_id.0 as usize].n_deps_left = n_deps;

			if n_deps == 0 {
				if !outdated {
					if !phony {
						n_tasks -= 1;
					}
					edges[edge_id.0 as usize].status = EdgeStatus::NotRun;
					finished.push(edge_id);
				} else if phony {
					edges[edge_id.0 as usize].status = EdgeStatus::PhonyFinished;
					finished.push(edge_id);
				} else {
					ready.push(edge_id);
				}
			}
		}

		let mut plan = Plan {
			edges,
			ready,
			n_left: n_tasks,
		};

		while let Some(edge_id) = finished.pop() {
			plan.update_finished_edge(edge_id, &mut finished, None);
		}

		plan
	}

	/// Find the next edge to run, given the current pool usage in `state`.
	///
	/// Always returns the lowest-numbered [`EdgeId`] among the ones whose
	/// pool currently has room, so that edges are released in a stable,
	/// deterministic order.
	pub fn next(&mut self, state: &mut State) -> Option<EdgeId> {
		self.next_at(state, Instant::now())
	}

	pub fn next_at(&mut self, state: &mut State, start_time: Instant) -> Option<EdgeId> {
		let mut candidate_idx = None;
		for (i, &edge_id) in self.ready.iter().enumerate() {
			let pool = state.pool(self.edges[edge_id.0 as usize].pool);
			let has_room = pool.depth.map_or(true, |depth| pool.in_use < depth);
			if has_room {
				match candidate_idx {
					Some(j) if self.ready[j] <= edge_id => {}
					_ => candidate_idx = Some(i),
				}
			}
		}

		let idx = candidate_idx?;
		let edge_id = self.ready.remove(idx);

		let pool_id = self.edges[edge_id.0 as usize].pool;
		state.pool_mut(pool_id).in_use += 1;

		debug_assert_eq!(self.edges[edge_id.0 as usize].n_deps_left, 0);
		self.edges[edge_id.0 as usize].status = EdgeStatus::Running { start_time };
		self.n_left -= 1;
		Some(edge_id)
	}

	/// Mark `edge` as finished, releasing its pool slot and queueing any
	/// dependents that are now ready.
	///
	/// `restat` is consulted for every dependent of an edge that actually
	/// ran (not an order-only one) to decide whether it's still outdated —
	/// it can both raise and lower a dependent that scanning pessimistically
	/// marked outdated already. If not given, they're all left outdated.
	pub fn complete(
		&mut self,
		state: &mut State,
		edge: EdgeId,
		restat: Option<&mut dyn FnMut(EdgeId) -> bool>,
	) -> usize {
		self.complete_at(state, edge, restat, Instant::now())
	}

	pub fn complete_at(
		&mut self,
		state: &mut State,
		edge: EdgeId,
		restat: Option<&mut dyn FnMut(EdgeId) -> bool>,
		finish_time: Instant,
	) -> usize {
		let pool_id = self.edges[edge.0 as usize].pool;
		state.pool_mut(pool_id).in_use -= 1;

		self.edges[edge.0 as usize].status = match &self.edges[edge.0 as usize].status {
			EdgeStatus::Running { start_time } => EdgeStatus::Finished {
				running_time: finish_time - *start_time,
			},
			other => panic!("complete() on an edge that isn't Running: {:?}", other),
		};

		let mut newly_ready = 0;
		let mut newly_finished = Vec::new();
		newly_ready += self.update_finished_edge(edge, &mut newly_finished, restat);
		while let Some(edge) = newly_finished.pop() {
			newly_ready += self.update_finished_edge(edge, &mut newly_finished, None);
		}
		newly_ready
	}

	fn update_finished_edge(
		&mut self,
		edge: EdgeId,
		newly_finished: &mut Vec<EdgeId>,
		mut restat: Option<&mut dyn FnMut(EdgeId) -> bool>,
	) -> usize {
		let did_run = match &self.edges[edge.0 as usize].status {
			EdgeStatus::NotRun => false,
			EdgeStatus::PhonyFinished => true,
			EdgeStatus::Finished { .. } => true,
			other => unreachable!("edge {:?} was not finished: {:?}", edge, other),
		};

		let mut newly_ready = 0;
		for (next, order_only) in replace(&mut self.edges[edge.0 as usize].next, Vec::new()) {
			let next_phony;
			let next_outdated;
			match &mut self.edges[next.0 as usize].status {
				EdgeStatus::Needed { phony, outdated } => {
					if did_run && !order_only {
						*outdated = if let Some(restat) = restat.as_mut() {
							restat(next)
						} else {
							true
						};
					}
					next_phony = *phony;
					next_outdated = *outdated;
				}
				other => unreachable!("edge {:?} in `next` list was not Needed: {:?}", next, other),
			}
			self.edges[next.0 as usize].n_deps_left -= 1;
			if self.edges[next.0 as usize].n_deps_left == 0 {
				if !next_outdated {
					if !next_phony {
						self.n_left -= 1;
					}
					self.edges[next.0 as usize].status = EdgeStatus::NotRun;
					newly_finished.push(next);
				} else if next_phony {
					self.edges[next.0 as usize].status = EdgeStatus::PhonyFinished;
					newly_finished.push(next);
				} else {
					self.ready.push(next);
					newly_ready += 1;
				}
			}
		}
		newly_ready
	}

	pub fn status(&self, edge: EdgeId) -> EdgeStatus {
		self.edges[edge.0 as usize].status
	}

	/// Edges left to run, not counting phony edges.
	pub fn n_left(&self) -> usize {
		self.n_left
	}

	/// Whether any edge is currently queued and ready to run (ignoring pool
	/// capacity).
	pub fn has_ready(&self) -> bool {
		!self.ready.is_empty()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::graph::{CommandRule, Rule, DEFAULT_POOL};
	use raw_string::RawString;

	fn command_edge(state: &mut State, pool: PoolId) -> EdgeId {
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
			pool,
		)
	}

	#[test]
	fn runs_ready_edges_in_order() {
		let mut state = State::new();
		let a = state.get_node(RawString::from("a"), 0);
		let b = state.get_node(RawString::from("b"), 0);
		let e1 = command_edge(&mut state, DEFAULT_POOL);
		let e2 = command_edge(&mut state, DEFAULT_POOL);
		state.add_out(e1, a).unwrap();
		state.add_out(e2, b).unwrap();
		state.edge_mut(e1).dirty = true;
		state.edge_mut(e2).dirty = true;

		let mut plan = Plan::new(&state, &[a, b]);
		assert_eq!(plan.n_left(), 2);

		let first = plan.next(&mut state).unwrap();
		assert_eq!(first, e1);
		let second = plan.next(&mut state).unwrap();
		assert_eq!(second, e2);
		assert!(plan.next(&mut state).is_none());
	}

	#[test]
	fn respects_pool_capacity() {
		let mut state = State::new();
		let pool = state.get_pool("links", 1);
		let a = state.get_node(RawString::from("a"), 0);
		let b = state.get_node(RawString::from("b"), 0);
		let e1 = command_edge(&mut state, pool);
		let e2 = command_edge(&mut state, pool);
		state.add_out(e1, a).unwrap();
		state.add_out(e2, b).unwrap();
		state.edge_mut(e1).dirty = true;
		state.edge_mut(e2).dirty = true;

		let mut plan = Plan::new(&state, &[a, b]);
		let first = plan.next(&mut state).unwrap();
		assert!(plan.next(&mut state).is_none());
		plan.complete(&mut state, first, None);
		let second = plan.next(&mut state).unwrap();
		assert_ne!(first, second);
	}

	#[test]
	fn dependent_becomes_ready_after_completion() {
		let mut state = State::new();
		let a = state.get_node(RawString::from("a"), 0);
		let b = state.get_node(RawString::from("b"), 0);
		let e1 = command_edge(&mut state, DEFAULT_POOL);
		let e2 = command_edge(&mut state, DEFAULT_POOL);
		state.add_out(e1, a).unwrap();
		state.add_in(e2, a);
		state.add_out(e2, b).unwrap();
		state.edge_mut(e1).dirty = true;
		state.edge_mut(e2).dirty = true;

		let mut plan = Plan::new(&state, &[b]);
		let first = plan.next(&mut state).unwrap();
		assert_eq!(first, e1);
		assert!(plan.next(&mut state).is_none());
		plan.complete(&mut state, first, None);
		let second = plan.next(&mut state).unwrap();
		assert_eq!(second, e2);
	}
}
