//! `-t query`: show what a target depends on and what depends on it.

use super::{load_state, Options};
use std::io::{Error, ErrorKind};

pub(super) fn main(opt: &Options) -> Result<(), Error> {
	if opt.targets.is_empty() {
		return Err(Error::new(ErrorKind::InvalidInput, "usage: -t query TARGET..."));
	}
	let (state, _build_dir) = load_state(opt)?;

	for target in &opt.targets {
		let node = state
			.lookup_node(raw_string::RawStr::from_str(target))
			.ok_or_else(|| Error::new(ErrorKind::NotFound, format!("unknown target {:?}", target)))?;

		println!("{}:", target);
		match state.node(node).in_edge {
			Some(edge) => {
				let edge = state.edge(edge);
				println!("  input:");
				for &input in edge.explicit_inputs() {
					println!("    {}", state.node(input).path);
				}
				for &input in edge.implicit_inputs() {
					println!("    {} (implicit)", state.node(input).path);
				}
				for &input in edge.order_only_inputs() {
					println!("    {} (order-only)", state.node(input).path);
				}
			}
			None => println!("  (source file)"),
		}

		let dependents: Vec<_> = state.node(node).out_edges.iter()
			.flat_map(|&e| state.edge(e).outputs.iter().copied())
			.collect();
		if !dependents.is_empty() {
			println!("  outputs:");
			for out in dependents {
				println!("    {}", state.node(out).path);
			}
		}
	}

	Ok(())
}
