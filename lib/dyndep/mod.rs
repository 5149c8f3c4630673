//! Loading `dyndep` files: late-bound extra inputs/outputs discovered by a
//! previous build, recorded in a small ninja-syntax file of their own.

use crate::canon::canonicalize;
use crate::error::{AddLocationToError, AddLocationToResult, ErrorWithLocation, Location};
use crate::graph::{EdgeId, NodeId, State};
use crate::spec::error::ParseError;
use crate::spec::expand::expand_str;
use crate::spec::parse::{Parser, Statement};
use crate::spec::scope::{BuildScope, FileScope};
use raw_string::RawStr;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Something that went wrong loading a dyndep file.
#[derive(Debug)]
pub enum DyndepError {
	Io(std::io::Error),
	Parse(ParseError),
	/// The file didn't start with `ninja_dyndep_version = 1`.
	BadVersion,
	/// A statement other than a `build` line at the top level.
	UnexpectedStatement,
	/// A `build` statement whose rule isn't `dyndep`.
	WrongRule(String),
	/// A `build` statement whose first explicit output doesn't name a node
	/// already known to the graph.
	UnknownOutput(String),
	/// The node named is not produced by any edge.
	NotAnOutput(String),
	/// The edge named wasn't declared with a `dyndep = ` binding.
	NotPendingDyndep(String),
	/// A variable other than `restat` inside a dyndep `build` block.
	UnknownVariable(String),
}

impl fmt::Display for DyndepError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			DyndepError::Io(e) => write!(f, "{}", e),
			DyndepError::Parse(e) => write!(f, "{}", e),
			DyndepError::BadVersion => {
				write!(f, "expected 'ninja_dyndep_version = 1' as the first line")
			}
			DyndepError::UnexpectedStatement => write!(f, "expected a 'build' statement"),
			DyndepError::WrongRule(r) => write!(f, "dyndep file build line uses rule {:?}, expected 'dyndep'", r),
			DyndepError::UnknownOutput(o) => write!(f, "{:?} is not a known output", o),
			DyndepError::NotAnOutput(o) => write!(f, "{:?} is not built by any edge", o),
			DyndepError::NotPendingDyndep(o) => write!(
				f,
				"the edge that builds {:?} has no pending dyndep binding",
				o
			),
			DyndepError::UnknownVariable(v) => write!(f, "unexpected variable {:?} in dyndep file", v),
		}
	}
}

impl Error for DyndepError {}

impl From<ParseError> for DyndepError {
	fn from(e: ParseError) -> Self {
		DyndepError::Parse(e)
	}
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, DyndepError> {
	let mut bytes = Vec::new();
	File::open(path)
		.and_then(|f| BufReader::new(f).read_to_end(&mut bytes))
		.map_err(DyndepError::Io)?;
	Ok(bytes)
}

/// Insert a newly-discovered implicit input into `edge`, right after its
/// existing implicit inputs and before its order-only inputs.
fn insert_implicit_in(state: &mut State, edge: EdgeId, node: NodeId) {
	let idx = {
		let e = state.edge(edge);
		e.explicit_deps + e.implicit_deps
	};
	state.edge_mut(edge).inputs.insert(idx, node);
	state.edge_mut(edge).implicit_deps += 1;
	state.node_mut(node).out_edges.push(edge);
}

/// Append a newly-discovered implicit output to `edge`.
fn insert_implicit_out(
	state: &mut State,
	edge: EdgeId,
	node: NodeId,
) -> Result<(), crate::graph::DuplicateOutput> {
	state.add_out(edge, node)?;
	state.edge_mut(edge).implicit_outs += 1;
	Ok(())
}

/// Parse and apply a dyndep file to `state`, resolving the pending dyndep
/// bindings of every edge it mentions.
pub fn load_dyndep_file(
	state: &mut State,
	path: &Path,
) -> Result<(), ErrorWithLocation<DyndepError>> {
	let source = read_bytes(path).err_at(Location::UNKNOWN)?;
	let source = RawStr::from_bytes(&source);
	let mut parser = Parser::new(path, source);
	let scope = FileScope::new();

	let version_stmt = parser
		.next_statement()
		.map_err(|e| e.convert())?
		.ok_or_else(|| DyndepError::BadVersion.at(parser.location()))?;
	match version_stmt {
		Statement::Variable {
			name: "ninja_dyndep_version",
			value,
		} if value.as_bytes() == b"1" => {}
		_ => return Err(DyndepError::BadVersion.at(parser.location())),
	}

	while let Some(statement) = parser.next_statement().map_err(|e| e.convert())? {
		let loc = parser.location();
		let (rule_name, explicit_outputs, implicit_outputs, implicit_deps) = match statement {
			Statement::Build {
				rule_name,
				explicit_outputs,
				implicit_outputs,
				implicit_deps,
				..
			} => (rule_name, explicit_outputs, implicit_outputs, implicit_deps),
			_ => return Err(DyndepError::UnexpectedStatement.at(loc)),
		};

		if rule_name != "dyndep" {
			return Err(DyndepError::WrongRule(rule_name.to_string()).at(loc));
		}

		let build_scope = BuildScope {
			file_scope: &scope,
			build_vars: &[],
		};

		let anchor = explicit_outputs
			.get(0)
			.ok_or_else(|| DyndepError::UnknownOutput(String::new()).at(loc))?;
		let anchor = expand_str(*anchor, &build_scope).err_at(loc)?;
		let anchor = canonicalize(&anchor).map(|c| c.path).unwrap_or(anchor);

		let node = state
			.lookup_node(&anchor)
			.ok_or_else(|| DyndepError::UnknownOutput(anchor.to_string()).at(loc))?;
		let edge = state
			.node(node)
			.in_edge
			.ok_or_else(|| DyndepError::NotAnOutput(anchor.to_string()).at(loc))?;
		if !state.edge(edge).dyndep_pending {
			return Err(DyndepError::NotPendingDyndep(anchor.to_string()).at(loc));
		}

		let mut restat = None;
		while let Some(var) = parser.next_variable().map_err(|e| e.convert())? {
			match var.name {
				"restat" => restat = Some(true),
				other => return Err(DyndepError::UnknownVariable(other.to_string()).at(loc)),
			}
		}

		for output in &implicit_outputs {
			let path = expand_str(*output, &build_scope).err_at(loc)?;
			let path = canonicalize(&path).map(|c| c.path).unwrap_or(path);
			let id = state.get_node(path, 0);
			insert_implicit_out(state, edge, id)
				.map_err(|e| DyndepError::UnknownOutput(e.0.to_string()).at(loc))?;
		}

		for dep in &implicit_deps {
			let path = expand_str(*dep, &build_scope).err_at(loc)?;
			let path = canonicalize(&path).map(|c| c.path).unwrap_or(path);
			let id = state.get_node(path, 0);
			insert_implicit_in(state, edge, id);
		}

		state.edge_mut(edge).dyndep_restat = Some(restat.unwrap_or(false));
		state.edge_mut(edge).dyndep_pending = false;
	}

	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::graph::{CommandRule, Rule, DEFAULT_POOL};
	use raw_string::RawString;
	use std::io::Write;

	fn setup_edge(state: &mut State, out: &str, dyndep: &str) -> (EdgeId, NodeId) {
		let out_node = state.get_node(RawString::from(out), 0);
		let edge = state.add_edge(
			Rule::Command(Box::new(CommandRule {
				name: "touch".to_string(),
				command: RawString::from("touch $out"),
				description: RawString::new(),
				depfile: RawString::new(),
				deps: None,
				msvc_deps_prefix: RawString::new(),
				generator: false,
				restat: false,
				rspfile: RawString::new(),
				rspfile_content: RawString::new(),
				dyndep: RawString::from(dyndep),
			})),
			DEFAULT_POOL,
		);
		state.add_out(edge, out_node).unwrap();
		state.edge_mut(edge).dyndep_pending = true;
		(edge, out_node)
	}

	#[test]
	fn applies_implicit_ins_and_outs() {
		let mut state = State::new();
		let (edge, _out) = setup_edge(&mut state, "out", "out.dd");

		let dd_path = "ninj-test-dyndep-apply.dd";
		{
			let mut f = File::create(dd_path).unwrap();
			writeln!(f, "ninja_dyndep_version = 1").unwrap();
			writeln!(f, "build out | out.imp: dyndep | in.imp").unwrap();
		}

		load_dyndep_file(&mut state, Path::new(dd_path)).unwrap();
		std::fs::remove_file(dd_path).ok();

		assert!(!state.edge(edge).dyndep_pending);
		assert_eq!(state.edge(edge).dyndep_restat, Some(false));

		let imp_out = state.lookup_node(RawStr::from_str("out.imp")).unwrap();
		assert!(state.edge(edge).outputs.contains(&imp_out));
		assert_eq!(state.edge(edge).implicit_outs, 1);

		let imp_in = state.lookup_node(RawStr::from_str("in.imp")).unwrap();
		assert!(state.edge(edge).inputs.contains(&imp_in));
		assert_eq!(state.edge(edge).implicit_deps, 1);
	}

	#[test]
	fn restat_binding_is_recorded() {
		let mut state = State::new();
		let (edge, _out) = setup_edge(&mut state, "out2", "out2.dd");

		let dd_path = "ninj-test-dyndep-restat.dd";
		{
			let mut f = File::create(dd_path).unwrap();
			writeln!(f, "ninja_dyndep_version = 1").unwrap();
			writeln!(f, "build out2: dyndep").unwrap();
			writeln!(f, "  restat = 1").unwrap();
		}

		load_dyndep_file(&mut state, Path::new(dd_path)).unwrap();
		std::fs::remove_file(dd_path).ok();

		assert_eq!(state.edge(edge).dyndep_restat, Some(true));
	}

	#[test]
	fn rejects_bad_version_line() {
		let mut state = State::new();
		let dd_path = "ninj-test-dyndep-badver.dd";
		{
			let mut f = File::create(dd_path).unwrap();
			writeln!(f, "foo = bar").unwrap();
		}
		let result = load_dyndep_file(&mut state, Path::new(dd_path));
		std::fs::remove_file(dd_path).ok();
		assert!(result.is_err());
	}
}
