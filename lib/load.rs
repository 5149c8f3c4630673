//! Converting a parsed [`Spec`](crate::spec::Spec) into a [`State`] graph.

use crate::canon::canonicalize;
use crate::error::{ErrorWithLocation, Location};
use crate::graph::{CommandRule, DuplicateOutput, Rule, State, CONSOLE_POOL, DEFAULT_POOL};
use crate::spec::Spec;
use raw_string::RawString;
use std::error::Error;
use std::fmt;

/// Something that went wrong turning a [`Spec`] into a [`State`].
#[derive(Debug)]
pub enum LoadError {
	/// Two build rules produce the same output.
	DuplicateOutput(DuplicateOutput),
	/// `ninja_required_version` asked for a version newer than this one.
	RequiredVersionTooNew {
		required: String,
		have: &'static str,
	},
}

impl fmt::Display for LoadError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			LoadError::DuplicateOutput(e) => write!(f, "{}", e),
			LoadError::RequiredVersionTooNew { required, have } => write!(
				f,
				"ninja_required_version = {} is newer than this program ({})",
				required, have
			),
		}
	}
}

impl Error for LoadError {}

impl From<DuplicateOutput> for LoadError {
	fn from(e: DuplicateOutput) -> Self {
		LoadError::DuplicateOutput(e)
	}
}

/// The version this implementation presents to `ninja_required_version`
/// checks.
pub const VERSION: &str = "1.10.0";

fn parse_version(v: &str) -> Option<(u32, u32, u32)> {
	let mut parts = v.trim().splitn(3, '.');
	let major = parts.next()?.parse().ok()?;
	let minor = parts.next().unwrap_or("0").parse().ok()?;
	let patch = parts.next().unwrap_or("0").parse().ok()?;
	Some((major, minor, patch))
}

/// Check a `ninja_required_version` value against [`VERSION`].
pub fn check_required_version(required: &RawString) -> Result<(), LoadError> {
	let required_str = match required.to_str() {
		Ok(s) => s,
		Err(_) => return Ok(()),
	};
	let (req, have) = match (parse_version(required_str), parse_version(VERSION)) {
		(Some(req), Some(have)) => (req, have),
		_ => return Ok(()),
	};
	if req > have {
		return Err(LoadError::RequiredVersionTooNew {
			required: required_str.to_string(),
			have: VERSION,
		});
	}
	Ok(())
}

fn intern(state: &mut State, path: &RawString) -> crate::graph::NodeId {
	// The parser already canonicalized every path; re-canonicalizing is a
	// no-op on the text (idempotent) but this is also where slash_bits
	// would be recorded for a path seen for the first time.
	let slash_bits = canonicalize(path).map(|c| c.slash_bits).unwrap_or(0);
	state.get_node(path.clone(), slash_bits)
}

/// Turn a parsed [`Spec`] into a [`State`], collecting every error instead
/// of stopping at the first one.
pub fn load(spec: &Spec) -> (State, Vec<ErrorWithLocation<LoadError>>) {
	let mut state = State::new();
	let mut errors = Vec::new();

	if let Some(required) = &spec.required_version {
		if let Err(e) = check_required_version(required) {
			errors.push(Location::UNKNOWN.error(e));
		}
	}

	for rule in &spec.build_rules {
		let pool = match &rule.command {
			Some(cmd) if cmd.pool.is_empty() => DEFAULT_POOL,
			Some(cmd) if cmd.pool == "console" => CONSOLE_POOL,
			Some(cmd) => state.get_pool(&cmd.pool, cmd.pool_depth.unwrap_or(0)),
			None => DEFAULT_POOL,
		};

		let edge_rule = match &rule.command {
			None => Rule::Phony,
			Some(cmd) => Rule::Command(Box::new(CommandRule {
				name: cmd.rule_name.clone(),
				command: cmd.command.clone(),
				description: cmd.description.clone(),
				depfile: cmd.depfile.clone(),
				deps: cmd.deps,
				msvc_deps_prefix: cmd.msvc_deps_prefix.clone(),
				generator: cmd.generator,
				restat: cmd.restat,
				rspfile: cmd.rspfile.clone(),
				rspfile_content: cmd.rspfile_content.clone(),
				dyndep: cmd.dyndep.clone(),
			})),
		};

		let edge = state.add_edge(edge_rule, pool);

		for input in &rule.inputs {
			let id = intern(&mut state, input);
			state.add_in(edge, id);
		}
		state.edge_mut(edge).explicit_deps = rule.inputs.len() - rule.implicit_deps;
		state.edge_mut(edge).implicit_deps = rule.implicit_deps;

		for order_dep in &rule.order_deps {
			let id = intern(&mut state, order_dep);
			state.add_in(edge, id);
		}

		for output in &rule.outputs {
			let id = intern(&mut state, output);
			if let Err(e) = state.add_out(edge, id) {
				errors.push(Location::UNKNOWN.error(LoadError::from(e)));
			}
		}
		state.edge_mut(edge).implicit_outs = rule.implicit_outs;

		for validation in &rule.validations {
			let id = intern(&mut state, validation);
			state.add_validation(edge, id);
		}
		if let Some(cmd) = &rule.command {
			state.edge_mut(edge).dyndep_pending = !cmd.dyndep.is_empty();
		}
	}

	for target in &spec.default_targets {
		if let Some(id) = state.lookup_node(target) {
			state.default_nodes.push(id);
		}
	}
	state.root_nodes = if state.default_nodes.is_empty() {
		state.node_ids().filter(|&id| state.node(id).in_edge.is_some()).collect()
	} else {
		state.default_nodes.clone()
	};

	(state, errors)
}

#[cfg(test)]
mod test {
	use super::*;
	use std::path::Path;

	#[test]
	fn loads_a_simple_graph() {
		let spec = crate::spec::read_from(
			Path::new("build.ninja"),
			raw_string::RawStr::from_str(
				"rule cc\n  command = cc $in -o $out\nbuild out.o: cc in.c\n",
			)
			.as_bytes(),
		)
		.unwrap();
		let (state, errors) = load(&spec);
		assert!(errors.is_empty());
		let out = state.lookup_node(raw_string::RawStr::from_str("out.o")).unwrap();
		let inp = state.lookup_node(raw_string::RawStr::from_str("in.c")).unwrap();
		let edge = state.node(out).in_edge.unwrap();
		assert_eq!(state.edge(edge).inputs, vec![inp]);
	}

	#[test]
	fn duplicate_output_is_an_error() {
		let spec = crate::spec::read_from(
			Path::new("build.ninja"),
			raw_string::RawStr::from_str(
				"rule cc\n  command = cc $in -o $out\nbuild out.o: cc in.c\nbuild out.o: cc in2.c\n",
			)
			.as_bytes(),
		)
		.unwrap();
		let (_, errors) = load(&spec);
		assert_eq!(errors.len(), 1);
	}

	#[test]
	fn rejects_too_new_required_version() {
		assert!(check_required_version(&RawString::from("9999.0")).is_err());
		assert!(check_required_version(&RawString::from("1.0")).is_ok());
	}
}
