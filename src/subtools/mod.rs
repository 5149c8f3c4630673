//! `-t TOOL` subcommands.

mod clean;
mod missingdeps;
mod query;
mod recompact;
mod restat;

use super::Options;
use ninjin::graph::State;
use ninjin::spec::Spec;
use std::io::{Error, ErrorKind};
use std::path::PathBuf;

static SUBTOOLS: &[(&str, fn(&Options) -> Result<(), Error>)] = &[
	("query", query::main),
	("missingdeps", missingdeps::main),
	("recompact", recompact::main),
	("restat", restat::main),
	("clean", clean::main),
	("list", list),
];

pub(super) fn run_subtool(tool: &str, options: &Options) -> Result<(), Error> {
	if let Some((_, main)) = SUBTOOLS.iter().find(|(name, _)| *name == tool) {
		main(options)
	} else {
		Err(Error::new(
			ErrorKind::Other,
			format!("Unknown subtool {:?}", tool),
		))
	}
}

fn list(_: &Options) -> Result<(), Error> {
	println!("Subtools:");
	for (name, _) in SUBTOOLS {
		println!("\t{}", name);
	}
	Ok(())
}

/// Read and load the manifest named by `-f`, returning the graph and the
/// build directory (from `builddir = ...`, or empty if unset).
fn load_state(opt: &Options) -> Result<(State, PathBuf), Error> {
	let spec: Spec = ninjin::spec::read(&opt.file)?;
	let build_dir = spec
		.build_dir
		.as_ref()
		.and_then(|d| d.to_str().ok())
		.map(PathBuf::from)
		.unwrap_or_else(PathBuf::new);
	let (state, errors) = ninjin::load::load(&spec);
	if let Some(e) = errors.into_iter().next() {
		return Err(Error::new(ErrorKind::InvalidData, e.to_string()));
	}
	Ok((state, build_dir))
}
