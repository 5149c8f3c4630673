//! Parsing of Makefile-style dependency files, as written by `gcc -M` /
//! `clang -M` and consumed through a rule's `depfile = ` variable.

use raw_string::{RawStr, RawString};
use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind, Read};
use std::mem::replace;
use std::path::Path;

/// A single `target: deps...` entry from a depfile.
#[derive(Debug, PartialEq, Eq)]
pub struct DepfileEntry {
	pub target: RawString,
	pub deps: Vec<RawString>,
}

/// Read a Makefile-style dependency file.
///
/// `f` is called once for every `target: deps` rule found (gcc's `-MD`
/// output has exactly one; some other tools emit more).
pub fn read_deps_file(
	file_name: &Path,
	f: impl FnMut(RawString, Vec<RawString>) -> Result<(), Error>,
) -> Result<(), Error> {
	let file = File::open(file_name).map_err(|e| {
		Error::new(e.kind(), format!("Unable to read {:?}: {}", file_name, e))
	})?;
	read_deps_file_from(file, f)
}

#[derive(Default)]
struct State {
	/// The (incomplete) path we're currently reading.
	path: RawString,
	/// The target, once we've finished reading it.
	target: Option<RawString>,
	/// The rest of the paths we've finished reading.
	deps: Vec<RawString>,
}

impl State {
	fn add_part(&mut self, s: &RawStr) {
		self.path.push_str(s);
	}

	fn finish_path(&mut self) -> Result<(), Error> {
		if !self.path.is_empty() {
			let mut path = replace(&mut self.path, RawString::new());
			if self.target.is_none() && path.last() == Some(b':') {
				path.pop();
				if path.is_empty() {
					return Err(Error::new(
						ErrorKind::InvalidData,
						"Rule in dependency file has no output",
					));
				}
				self.target = Some(path);
			} else if self.target.is_none() {
				return Err(Error::new(
					ErrorKind::InvalidData,
					"Rule in dependency file has multiple outputs",
				));
			} else {
				self.deps.push(path);
			}
		}
		Ok(())
	}

	fn finish_deps(
		&mut self,
		f: &mut impl FnMut(RawString, Vec<RawString>) -> Result<(), Error>,
	) -> Result<(), Error> {
		self.finish_path()?;
		if let Some(target) = self.target.take() {
			f(target, replace(&mut self.deps, Vec::new()))?;
		}
		Ok(())
	}
}

/// Characters that, when preceded by a backslash, are escaped (the
/// backslash is dropped and the character taken literally). Any other
/// character after a backslash keeps the backslash: this is the GCC/Clang
/// depfile dialect, not full Makefile syntax.
fn is_escapable(c: u8) -> bool {
	matches!(c, b' ' | b'\\' | b'#' | b'*' | b'[' | b']' | b'|')
}

fn read_deps_file_from(
	file: impl Read,
	mut f: impl FnMut(RawString, Vec<RawString>) -> Result<(), Error>,
) -> Result<(), Error> {
	let mut file = BufReader::new(file);

	let mut state = State::default();
	let mut line = RawString::new();

	loop {
		line.clear();
		if file.read_until(b'\n', &mut line.as_mut_bytes())? == 0 {
			break;
		}

		if line.last() == Some(b'\n') {
			line.pop();
		}
		if line.last() == Some(b'\r') {
			line.pop();
		}

		let mut write_offset = 0;
		let mut read_offset = 0;

		loop {
			match memchr::memchr2(b' ', b'\\', line[read_offset..].as_bytes())
				.map(|i| i + read_offset)
			{
				Some(i) if line[i] == b'\\' && i + 1 == line.len() => {
					// Backslash at the end of the line: the rule continues
					// on the next line, but the token just before it is
					// already complete.
					state.add_part(&line[write_offset..i]);
					state.finish_path()?;
					break;
				}
				Some(i) if line[i] == b'\\' => {
					// Backslash before a character.
					let c = line[i + 1];
					if is_escapable(c) {
						// Escaped character: drop the backslash, keep `c`.
						state.add_part(&line[write_offset..i]);
						write_offset = i + 1;
					} else {
						// Not one of ours: keep the backslash literally.
					}
					read_offset = i + 2;
				}
				Some(i) => {
					// A space: ends the current path.
					debug_assert_eq!(line[i], b' ');
					state.add_part(&line[write_offset..i]);
					state.finish_path()?;
					write_offset = i + 1;
					read_offset = i + 1;
				}
				None => {
					// End of the line, with no trailing continuation: the
					// rule is complete.
					state.add_part(&line[write_offset..]);
					state.finish_deps(&mut f)?;
					break;
				}
			}
		}
	}

	if state.target.is_none() {
		Ok(())
	} else {
		Err(Error::new(ErrorKind::InvalidData, "Unexpected end of file"))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Cursor;

	fn check(input: &str, mut expected: &[(&str, &[&str])]) {
		let file = Cursor::new(input);
		read_deps_file_from(file, |target, deps| {
			assert_eq!(target, expected[0].0);
			assert!(deps.iter().eq(expected[0].1.iter()));
			expected = &expected[1..];
			Ok(())
		})
		.unwrap();
		assert!(expected.is_empty());
	}

	#[test]
	fn simple() {
		check(
			r#"
output: input input2 input3 \
 input4 input5 \
 input6

output2: input7

output3: input8 \

"#,
			&[
				(
					"output",
					&["input", "input2", "input3", "input4", "input5", "input6"],
				),
				("output2", &["input7"]),
				("output3", &["input8"]),
			],
		);
	}

	#[test]
	fn escapes() {
		check(
			r#"
bloep\ bloep: a\ b\*c\\d\ab"#,
			&[("bloep bloep", &["a b*c\\d\\ab"])],
		);
	}

	#[test]
	fn hash_and_pipe_escapes() {
		check(r"out: a\#b c\|d", &[("out", &["a#b", "c|d"])]);
	}

	#[test]
	fn colons() {
		check(
			r#"
output: in:put in:put:2:"#,
			&[("output", &["in:put", "in:put:2:"])],
		);
	}

	#[test]
	fn no_deps() {
		check(
			r#"
hello:
world:

test: \

test2:"#,
			&[
				("hello", &[]),
				("world", &[]),
				("test", &[]),
				("test2", &[]),
			],
		);
	}

	#[test]
	fn truncated_is_an_error() {
		let file = Cursor::new(
			r#"
output: input input2 input3 \
 input4 input5 \"#,
		);
		assert!(read_deps_file_from(file, |_, _| Ok(())).is_err());
	}

	#[test]
	fn multiple_outputs_is_an_error() {
		let file = Cursor::new(
			r#"
output output2: input input2 input3"#,
		);
		assert!(read_deps_file_from(file, |_, _| Ok(())).is_err());
	}

}
