//! Reading and writing dependency logs (i.e. `.ninja_deps` files).

use crate::mtime::Timestamp;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use indexmap::map::Entry as IndexMapEntry;
use indexmap::map::IndexMap;
use log::warn;
use raw_string::{RawStr, RawString};
use std::fs::File;
use std::io::{BufWriter, Cursor, Error, ErrorKind, Read, Seek, SeekFrom, Write};
use std::mem::replace;
use std::path::Path;

/// Represents the contents of a `.ninja_deps` file.
#[derive(Clone, Debug)]
pub struct DepLog {
	records: IndexMap<RawString, Option<Record>>,
}

/// Represents a `.ninja_deps` file, and allows making additions to it.
#[derive(Debug)]
pub struct DepLogMut {
	deps: DepLog,
	file: BufWriter<File>,
}

/// The information you get out of a `DepLog` for a specific target.
#[derive(Clone, Copy, Debug)]
pub struct TargetInfo<'a> {
	record: &'a Record,
	log: &'a DepLog,
}

#[derive(Clone, Debug)]
struct Record {
	deps: Vec<u32>,
	mtime: Option<Timestamp>,
}

impl DepLog {
	/// Create a new empty log.
	pub fn new() -> Self {
		DepLog {
			records: IndexMap::new(),
		}
	}

	fn path_by_id(&self, id: u32) -> Option<&RawStr> {
		self.records.get_index(id as usize).map(|(k, _)| &k[..])
	}

	/// The number of distinct paths known to this log, including ones that
	/// are only ever referenced as a dependency.
	pub fn path_count(&self) -> usize {
		self.records.len()
	}

	/// Look up a target in the log.
	pub fn get(&self, path: &RawStr) -> Option<TargetInfo> {
		self.records.get(path).and_then(|v| {
			v.as_ref().map(|r| TargetInfo {
				record: r,
				log: self,
			})
		})
	}

	/// Iterate over all targets in the log.
	pub fn iter(&self) -> impl Iterator<Item = (&RawStr, TargetInfo)> {
		let log = self;
		self.records.iter().flat_map(move |(k, v)| {
			v.as_ref()
				.map(move |v| (&k[..], TargetInfo { record: v, log }))
		})
	}

	/// Read a log from a file.
	pub fn read(file: impl AsRef<Path>) -> Result<DepLog, Error> {
		let mut file = File::open(file.as_ref()).map_err(|e| {
			Error::new(
				e.kind(),
				format!("Unable to read {:?}: {}", file.as_ref(), e),
			)
		})?;
		DepLog::read_from(&mut file)
	}

	/// Read a log.
	pub fn read_from(file: &mut dyn Read) -> Result<DepLog, Error> {
		let mut data = Vec::new();
		file.read_to_end(&mut data)?;
		DepLog::parse(&data).map(|(log, _truncate_to)| log)
	}

	/// Parse a log's contents already fully read into memory, also
	/// returning the byte offset of the last fully-parsed record if the
	/// file turned out to have a truncated tail (e.g. from a killed
	/// process). A caller that owns the real file can use that offset to
	/// truncate away the unreadable garbage before appending to it.
	fn parse(data: &[u8]) -> Result<(DepLog, Option<u64>), Error> {
		let mut file = Cursor::new(data);

		{
			let mut header = [0u8; 12];
			file.read_exact(&mut header)?;
			if &header != b"# ninjadeps\n" {
				return Err(Error::new(ErrorKind::InvalidData, "Not a ninjadeps file"));
			}
		}

		let version = file.read_u32::<LE>()?;
		if version != 3 && version != 4 {
			return Err(Error::new(
				ErrorKind::InvalidData,
				format!(
					"Only version 3 and 4 are supported, but version {} was found",
					version
				),
			));
		}

		let mut records = IndexMap::<RawString, Option<Record>>::new();
		let mut truncate_to = None;

		loop {
			let record_start = file.position();

			let record_head = match file.read_u32::<LE>() {
				Ok(data) => data,
				Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => break,
				Err(e) => return Err(e),
			};

			// A record head with no room left for its body means the file
			// was cut off mid-write (e.g. by a killed process); the rest of
			// the log, if any, is unreadable. Recover by dropping the
			// partial record instead of failing the whole read: the caller
			// truncates the file back to `record_start` before writing more.
			let result: Result<(), Error> = (|| {
				if record_head & 0x8000_0000 == 0 {
					// Path record
					let size = record_head;

					if size % 4 != 0 || size < 4 {
						return Err(Error::new(
							ErrorKind::InvalidData,
							format!("Invalid path record size: 0x{:x}", size),
						));
					}

					let id = records.len() as u32;

					let mut name = vec![0u8; size as usize - 4];
					file.read_exact(&mut name)?;
					while name.last() == Some(&0u8) {
						// Remove padding
						name.pop();
					}

					let checksum = file.read_u32::<LE>()?;
					if checksum != !id {
						return Err(Error::new(
							ErrorKind::InvalidData,
							format!(
								"Invalid checksum in file: 0x{:08x} for ID 0x{:08x}",
								checksum, id
							),
						));
					}

					if records.insert(RawString::from_bytes(name), None).is_some() {
						return Err(Error::new(
							ErrorKind::InvalidData,
							format!(
								"Duplicate path in file: {:?}",
								records.get_index(id as usize).unwrap().0
							),
						));
					}
				} else {
					// Deps record
					let size = record_head & 0x7FFF_FFFF;

					if size % 4 != 0 || size < if version < 4 { 8 } else { 12 } {
						return Err(Error::new(
							ErrorKind::InvalidData,
							format!("Invalid dependencies record size: 0x{:x}", size),
						));
					}

					let len = (size / 4 - if version < 4 { 2 } else { 3 }) as usize;

					let id = file.read_u32::<LE>()? as usize;

					let mtime = if version < 4 {
						u64::from(file.read_u32::<LE>()?) * 1_000_000_000 + 999_999_999
					} else {
						file.read_u64::<LE>()?
					};

					let n_records = records.len();

					let record = match records.get_index_mut(id) {
						Some((_, r)) => r,
						None => {
							return Err(Error::new(
								ErrorKind::InvalidData,
								format!("Dependencies record for undefined path ID: 0x{:x}", id),
							));
						}
					};

					let mut record_deps = match record {
						Some(r) => {
							// Re-use the old deps vector.
							let mut d = replace(&mut r.deps, Vec::new());
							d.clear();
							d
						}
						None => Vec::new(),
					};

					record_deps.reserve_exact(len);

					for _ in 0..len {
						let dep = file.read_u32::<LE>()?;
						if dep as usize >= n_records {
							return Err(Error::new(
								ErrorKind::InvalidData,
								format!("Undefined path ID in dependency: 0x{:x}", dep),
							));
						}
						record_deps.push(dep);
					}

					*record = Some(Record {
						deps: record_deps,
						mtime: Timestamp::from_nanos(mtime),
					});
				}
				Ok(())
			})();

			match result {
				Ok(()) => {}
				Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => {
					warn!("premature end of file; recovering");
					truncate_to = Some(record_start);
					break;
				}
				Err(e) => return Err(e),
			}
		}

		Ok((DepLog { records }, truncate_to))
	}
}

impl<'a> TargetInfo<'a> {
	/// Get the `mtime` that was recorded in the log.
	pub fn mtime(&self) -> Option<Timestamp> {
		self.record.mtime
	}

	/// Get an iterator over the dependencies.
	pub fn deps(&self) -> impl Iterator<Item = &'a RawStr> + ExactSizeIterator {
		let log = self.log;
		self.record
			.deps
			.iter()
			.map(move |&i| log.path_by_id(i).unwrap())
	}
}

impl DepLogMut {
	/// Open and read a dependency log, or start a new one.
	pub fn open(file: impl AsRef<Path>) -> Result<DepLogMut, Error> {
		let mut file = std::fs::OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(file)?;
		if file.metadata()?.len() == 0 {
			file.write_all(b"# ninjadeps\n\x04\0\0\0")?;
			Ok(DepLogMut {
				deps: DepLog::new(),
				file: BufWriter::new(file),
			})
		} else {
			let mut data = Vec::new();
			file.read_to_end(&mut data)?;
			let (deps, truncate_to) = DepLog::parse(&data)?;
			if let Some(valid_len) = truncate_to {
				// The file had a partial record at the tail, left by a
				// killed process: cut it off now so the next append lands
				// right after the last valid record instead of leaving
				// that garbage stranded in the middle of the file.
				file.set_len(valid_len)?;
				file.seek(SeekFrom::Start(valid_len))?;
			}
			Ok(DepLogMut {
				deps,
				file: BufWriter::new(file),
			})
		}
	}

	/// Writes a path to the file, if it wasn't already in there.
	///
	/// In both cases, it returns the ID of the path.
	fn insert_path(&mut self, path: RawString) -> Result<u32, Error> {
		let entry = self.deps.records.entry(path);
		let id = entry.index() as u32;
		if let IndexMapEntry::Vacant(entry) = entry {
			let padding = (4 - entry.key().len() % 4) % 4;
			let size = entry.key().len() as u32 + padding as u32 + 4;
			self.file.write_u32::<LE>(size)?;
			self.file.write_all(entry.key().as_bytes())?;
			self.file.write_all(&b"\0\0\0"[..padding])?;
			self.file.write_u32::<LE>(!id)?;
			entry.insert(None);
		}
		Ok(id)
	}

	/// Write a list of dependencies to the file, if it is different than
	/// what's already in the file.
	pub fn insert_deps(
		&mut self,
		target: RawString,
		mtime: Option<Timestamp>,
		deps: Vec<RawString>,
	) -> Result<(), Error> {
		let target = self.insert_path(target)?;
		let record = self.deps.records.get_index_mut(target as usize).unwrap().1;

		let mut need_write = false;

		let mut dep_ids = if let Some(record) = record.as_mut() {
			if record.mtime != mtime {
				need_write = true;
			}
			replace(&mut record.deps, Vec::new())
		} else {
			need_write = true;
			Vec::new()
		};

		if deps.len() != dep_ids.len() {
			need_write = true;
			dep_ids.resize(deps.len(), !0);
		}

		for (dep, dep_id) in deps.into_iter().zip(dep_ids.iter_mut()) {
			let new_id = self.insert_path(dep)?;
			if *dep_id != new_id {
				need_write = true;
				*dep_id = new_id;
			}
		}

		if need_write {
			let size = dep_ids.len() as u32 * 4 + 12;
			let mtime = mtime.map_or(0, Timestamp::to_nanos);
			self.file.write_u32::<LE>(0x8000_0000 | size)?;
			self.file.write_u32::<LE>(target)?;
			self.file.write_u64::<LE>(mtime)?;
			for &dep in &dep_ids {
				self.file.write_u32::<LE>(dep)?;
			}
		}

		*self.deps.records.get_index_mut(target as usize).unwrap().1 = Some(Record {
			deps: dep_ids,
			mtime,
		});

		Ok(())
	}
}

impl std::ops::Deref for DepLogMut {
	type Target = DepLog;
	fn deref(&self) -> &Self::Target {
		&self.deps
	}
}

impl DepLog {
	/// Find every target that lists `path` among its dependencies.
	pub fn reverse_deps<'a>(&'a self, path: &'a RawStr) -> impl Iterator<Item = &'a RawStr> + 'a {
		let target_id = self.records.get_full(path).map(|(i, _, _)| i as u32);
		self.records.iter().filter_map(move |(k, v)| {
			let record = v.as_ref()?;
			let target_id = target_id?;
			if record.deps.contains(&target_id) {
				Some(&k[..])
			} else {
				None
			}
		})
	}
}

/// Rewrite a `.ninja_deps` file, dropping any path that is neither the
/// target of a live record nor referenced as a dependency of one.
///
/// This is what `-t recompact` does: it keeps the log small by discarding
/// paths that are no longer reachable from any recorded target.
pub fn recompact(file: impl AsRef<Path>) -> Result<(), Error> {
	let deps = DepLog::read(file.as_ref())?;

	let mut live = vec![false; deps.records.len()];
	for (id, (_, record)) in deps.records.iter().enumerate() {
		if let Some(r) = record {
			live[id] = true;
			for &d in &r.deps {
				live[d as usize] = true;
			}
		}
	}

	let mut id_map = vec![0u32; deps.records.len()];
	let mut new_id = 0u32;
	for (old_id, keep) in live.iter().enumerate() {
		if *keep {
			id_map[old_id] = new_id;
			new_id += 1;
		}
	}

	let new_file = File::create(file.as_ref())?;
	let mut w = BufWriter::new(new_file);
	w.write_all(b"# ninjadeps\n")?;
	w.write_u32::<LE>(4)?;

	for (old_id, (path, _)) in deps.records.iter().enumerate() {
		if !live[old_id] {
			continue;
		}
		let id = id_map[old_id];
		let padding = (4 - path.len() % 4) % 4;
		let size = path.len() as u32 + padding as u32 + 4;
		w.write_u32::<LE>(size)?;
		w.write_all(path.as_bytes())?;
		w.write_all(&b"\0\0\0"[..padding])?;
		w.write_u32::<LE>(!id)?;
	}

	for (old_id, (_, record)) in deps.records.iter().enumerate() {
		let record = match record {
			Some(r) if live[old_id] => r,
			_ => continue,
		};
		let new_deps: Vec<u32> = record.deps.iter().map(|&d| id_map[d as usize]).collect();
		let size = new_deps.len() as u32 * 4 + 12;
		w.write_u32::<LE>(0x8000_0000 | size)?;
		w.write_u32::<LE>(id_map[old_id])?;
		w.write_u64::<LE>(record.mtime.map_or(0, Timestamp::to_nanos))?;
		for d in new_deps {
			w.write_u32::<LE>(d)?;
		}
	}

	w.flush()?;
	Ok(())
}

#[cfg(test)]
mod recompact_test {
	use super::*;

	#[test]
	fn drops_dead_paths() -> Result<(), Error> {
		let file_name = "ninj-test-deps-recompact";
		std::fs::remove_file(file_name).ok();
		{
			let mut dep_log = DepLogMut::open(file_name)?;
			dep_log.insert_deps(
				"out".into(),
				Timestamp::from_nanos(1),
				vec!["in1".into(), "in2".into()],
			)?;
		}
		{
			let mut dep_log = DepLogMut::open(file_name)?;
			// Re-recording with fewer deps leaves "in2" unreferenced by
			// anything; after recompact it should be gone entirely.
			dep_log.insert_deps("out".into(), Timestamp::from_nanos(2), vec!["in1".into()])?;
		}
		assert_eq!(DepLog::read(file_name)?.path_count(), 3);
		recompact(file_name)?;
		let log = DepLog::read(file_name)?;
		assert_eq!(log.path_count(), 2);
		assert!(log.get(RawStr::from_str("out")).is_some());
		assert_eq!(
			log.get(RawStr::from_str("out")).unwrap().deps().collect::<Vec<_>>(),
			vec![RawStr::from_str("in1")]
		);
		std::fs::remove_file(file_name)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	#[rustfmt::skip]
	fn test() -> Result<(), Error> {
		let file_name = "ninj-test-deps-file";
		std::fs::remove_file(file_name).ok();
		for _ in 0..2 {
			{
				let mut dep_log = DepLogMut::open(file_name)?;
				dep_log.insert_deps("output1".into(), Timestamp::from_nanos(100), vec!["input1".into(), "input2".into()])?;
				dep_log.insert_deps("output2".into(), Timestamp::from_nanos(200), vec!["input1".into(), "input3".into()])?;
			}
			{
				let dep_log = DepLog::read(file_name)?;
				assert_eq!(dep_log.get(RawStr::from_str("output1")).unwrap().mtime(), Timestamp::from_nanos(100));
				assert_eq!(dep_log.get(RawStr::from_str("output2")).unwrap().mtime(), Timestamp::from_nanos(200));
				assert!(dep_log.get(RawStr::from_str("output1")).unwrap().deps().eq(&["input1", "input2"]));
				assert!(dep_log.get(RawStr::from_str("output2")).unwrap().deps().eq(&["input1", "input3"]));
			}
			{
				let mut dep_log = DepLogMut::open(file_name)?;
				dep_log.insert_deps("output1".into(), Timestamp::from_nanos(100), vec!["input1".into(), "input2".into()])?;
				dep_log.insert_deps("output2".into(), Timestamp::from_nanos(200), vec!["input1".into()])?;
				dep_log.insert_deps("output3".into(), Timestamp::from_nanos(300), vec!["input4".into()])?;
			}
			{
				let dep_log = DepLog::read(file_name)?;
				assert_eq!(dep_log.get(RawStr::from_str("output1")).unwrap().mtime(), Timestamp::from_nanos(100));
				assert_eq!(dep_log.get(RawStr::from_str("output2")).unwrap().mtime(), Timestamp::from_nanos(200));
				assert_eq!(dep_log.get(RawStr::from_str("output3")).unwrap().mtime(), Timestamp::from_nanos(300));
				assert!(dep_log.get(RawStr::from_str("output1")).unwrap().deps().eq(&["input1", "input2"]));
				assert!(dep_log.get(RawStr::from_str("output2")).unwrap().deps().eq(&["input1"]));
				assert!(dep_log.get(RawStr::from_str("output3")).unwrap().deps().eq(&["input4"]));
			}
		}
		std::fs::remove_file(file_name)?;
		Ok(())
	}

	#[test]
	fn recovers_from_truncated_tail() -> Result<(), Error> {
		let file_name = "ninj-test-deps-truncated";
		std::fs::remove_file(file_name).ok();
		{
			let mut dep_log = DepLogMut::open(file_name)?;
			dep_log.insert_deps("output1".into(), Timestamp::from_nanos(100), vec!["input1".into()])?;
		}
		let good_len = std::fs::metadata(file_name)?.len();

		// Simulate a process killed mid-write: a path record header
		// announcing more bytes than actually follow it.
		{
			let mut file = std::fs::OpenOptions::new().append(true).open(file_name)?;
			file.write_all(&40u32.to_le_bytes())?;
			file.write_all(b"unfinished")?;
		}

		let recovered = DepLog::read(file_name)?;
		assert_eq!(recovered.path_count(), 2);
		assert_eq!(
			recovered.get(RawStr::from_str("output1")).unwrap().mtime(),
			Timestamp::from_nanos(100)
		);

		// Opening for writes truncates away the garbage tail, so the
		// next append lands right after the last valid record.
		{
			let mut dep_log = DepLogMut::open(file_name)?;
			dep_log.insert_deps("output2".into(), Timestamp::from_nanos(200), vec!["input2".into()])?;
		}
		assert!(std::fs::metadata(file_name)?.len() > good_len);

		let log = DepLog::read(file_name)?;
		assert_eq!(log.path_count(), 4);
		assert_eq!(
			log.get(RawStr::from_str("output2")).unwrap().mtime(),
			Timestamp::from_nanos(200)
		);

		std::fs::remove_file(file_name)?;
		Ok(())
	}
}
