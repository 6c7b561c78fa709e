// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

// On disk cram file layout, big-endian, no padding:
//
// Header (20 bytes):
// [MAGIC: 4][VERSION: 4][NUM_JOBS: 4][TOTAL_PROCS: 4][MAX_JOB_SIZE: 4]
// MAGIC - must be 0x6372616d ("cram" in ASCII).
//
// Then NUM_JOBS job records, each:
// [RECORD_SIZE: 4][RECORD_SIZE bytes of job record -- see job.rs]
//
// This reader is purely sequential: there is no seek or
// random-access-by-rank. The bootstrap dispatcher in bootstrap.rs is the
// only consumer that needs random access, and it gets there by reading
// every record once, in order, on a single rank.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::codec::{self, Cursor};
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x6372_616d;
pub const HEADER_LEN: usize = 20;
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
	pub version: u32,
	pub num_jobs: u32,
	pub total_procs: u32,
	pub max_job_size: u32,
}

/// A sequential cursor over a cram file's job records.
///
/// Holds a single reusable scratch buffer of `max_job_size` bytes; each
/// call to `next` overwrites it, and `current_record` borrows the
/// portion that is valid until the following call.
pub struct CramFile {
	source: Box<dyn Read>,
	pub header: Header,
	scratch: Vec<u8>,
	record_len: usize,
	cur_job_id: i64,
	cur_job_procs: u32,
}

impl CramFile {
	/// Opens `path`, validates its header, and positions the cursor
	/// before job 0. Honors `CRAM_BUFFER_SIZE` for the underlying
	/// buffered reader's capacity.
	pub fn open(path: impl AsRef<Path>) -> Result<CramFile> {
		let path = path.as_ref();
		let file = File::open(path).map_err(|source| Error::NotFound { path: path.to_path_buf(), source })?;
		let reader = BufReader::with_capacity(buffer_size(), file);
		Self::from_reader(Box::new(reader), path)
	}

	/// Memory-maps `path` instead of buffering reads from it. Same
	/// record-walking semantics as `open`; only the I/O strategy
	/// differs, per spec.md section 9's optional mmap path.
	#[cfg(feature = "mmap")]
	pub fn open_mapped(path: impl AsRef<Path>) -> Result<CramFile> {
		let path = path.as_ref();
		let file = File::open(path).map_err(|source| Error::NotFound { path: path.to_path_buf(), source })?;
		let mmap = unsafe { memmap2::Mmap::map(&file)? };
		let cursor = std::io::Cursor::new(mmap);
		Self::from_reader(Box::new(cursor), path)
	}

	fn from_reader(mut source: Box<dyn Read>, path: &Path) -> Result<CramFile> {
		let magic = codec::read_u32_from(&mut source, "magic")?;
		if magic != MAGIC {
			return Err(Error::NotCramFile { path: path.to_path_buf() });
		}
		let version = codec::read_u32_from(&mut source, "version")?;
		let num_jobs = codec::read_u32_from(&mut source, "num_jobs")?;
		let total_procs = codec::read_u32_from(&mut source, "total_procs")?;
		let max_job_size = codec::read_u32_from(&mut source, "max_job_size")?;

		Ok(CramFile {
			source,
			header: Header { version, num_jobs, total_procs, max_job_size },
			scratch: vec![0u8; max_job_size as usize],
			record_len: 0,
			cur_job_id: -1,
			cur_job_procs: 0,
		})
	}

	pub fn has_more(&self) -> bool {
		(self.cur_job_id + 1) < self.header.num_jobs as i64
	}

	pub fn cur_job_id(&self) -> i64 {
		self.cur_job_id
	}

	pub fn cur_job_procs(&self) -> u32 {
		self.cur_job_procs
	}

	/// Reads the next job record into the internal scratch buffer.
	/// Returns `Ok(false)` if there are no more jobs; otherwise
	/// `Ok(true)` and `current_record()` exposes the bytes.
	pub fn next(&mut self) -> Result<bool> {
		if !self.has_more() {
			return Ok(false);
		}

		let record_size = codec::read_u32_from(&mut self.source, "record_size")?;
		if record_size > self.header.max_job_size {
			return Err(Error::OversizeRecord { record_size, max_job_size: self.header.max_job_size });
		}

		let record_size = record_size as usize;
		let actual = codec::read_up_to(&mut self.source, &mut self.scratch[..record_size])?;
		if actual != record_size {
			return Err(Error::Truncated { context: "job record", expected: record_size, actual });
		}
		self.record_len = record_size;

		let mut cur = Cursor::new(&self.scratch[..self.record_len]);
		self.cur_job_procs = cur.read_u32()?;
		self.cur_job_id += 1;

		Ok(true)
	}

	/// The raw bytes of the record most recently read by `next`.
	pub fn current_record(&self) -> &[u8] {
		&self.scratch[..self.record_len]
	}

	/// Size, in bytes, of the scratch buffer (`max_job_size`).
	pub fn max_job_size(&self) -> usize {
		self.scratch.len()
	}

	/// Releases the underlying file stream and scratch buffer.
	/// Dropping a `CramFile` does the same thing; this exists so callers
	/// can make the point in the cram file's lifecycle explicit, as the
	/// operation table in spec.md section 4.4 names it.
	pub fn close(self) {}
}

/// Parses `CRAM_BUFFER_SIZE` (decimal bytes), falling back to the
/// 2 MiB default and logging a warning on an invalid value -- matches
/// `get_cram_buffer_size` in `original_source/src/c/libcram/cram_file.c`.
fn buffer_size() -> usize {
	match std::env::var("CRAM_BUFFER_SIZE") {
		Err(_) => DEFAULT_BUFFER_SIZE,
		Ok(value) => match value.parse::<usize>() {
			Ok(n) if n > 0 => n,
			_ => {
				log::warn!(
					"invalid value for CRAM_BUFFER_SIZE: {:?}, using default of {} bytes",
					value,
					DEFAULT_BUFFER_SIZE
				);
				DEFAULT_BUFFER_SIZE
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_u32(buf: &mut Vec<u8>, v: u32) {
		buf.extend_from_slice(&v.to_be_bytes());
	}

	fn write_string(buf: &mut Vec<u8>, s: &[u8]) {
		write_u32(buf, s.len() as u32);
		buf.extend_from_slice(s);
	}

	/// Builds a cram file's bytes in memory: the test suite's file-writer
	/// helper named in spec.md section 8.
	pub fn build_file(jobs: &[(u32, &str, &[&str], &[&str], &[(&str, &str)])]) -> Vec<u8> {
		let mut records = Vec::new();
		let mut max_job_size = 0u32;
		let mut total_procs = 0u32;
		for (num_procs, cwd, args, subtracted, changed) in jobs {
			let mut record = Vec::new();
			write_u32(&mut record, *num_procs);
			write_string(&mut record, cwd.as_bytes());
			write_u32(&mut record, args.len() as u32);
			for a in *args {
				write_string(&mut record, a.as_bytes());
			}
			write_u32(&mut record, subtracted.len() as u32);
			for s in *subtracted {
				write_string(&mut record, s.as_bytes());
			}
			write_u32(&mut record, changed.len() as u32);
			for (k, v) in *changed {
				write_string(&mut record, k.as_bytes());
				write_string(&mut record, v.as_bytes());
			}
			max_job_size = max_job_size.max(record.len() as u32);
			total_procs += num_procs;
			records.push(record);
		}

		let mut out = Vec::new();
		write_u32(&mut out, MAGIC);
		write_u32(&mut out, 1); // version
		write_u32(&mut out, jobs.len() as u32);
		write_u32(&mut out, total_procs);
		write_u32(&mut out, max_job_size);
		for record in records {
			write_u32(&mut out, record.len() as u32);
			out.extend_from_slice(&record);
		}
		out
	}

	fn write_temp(bytes: &[u8]) -> tempfile_path::TempFile {
		tempfile_path::TempFile::write(bytes)
	}

	// A tiny, dependency-free stand-in for a temp file, since the crate
	// otherwise has no need for the `tempfile` crate.
	mod tempfile_path {
		use std::io::Write;
		use std::path::PathBuf;

		pub struct TempFile {
			pub path: PathBuf,
		}

		impl TempFile {
			pub fn write(bytes: &[u8]) -> TempFile {
				let mut path = std::env::temp_dir();
				let unique = format!(
					"cram-test-{}-{}.cram",
					std::process::id(),
					super::next_id()
				);
				path.push(unique);
				let mut f = std::fs::File::create(&path).unwrap();
				f.write_all(bytes).unwrap();
				TempFile { path }
			}
		}

		impl Drop for TempFile {
			fn drop(&mut self) {
				let _ = std::fs::remove_file(&self.path);
			}
		}
	}

	use std::sync::atomic::{AtomicU64, Ordering};
	static NEXT_ID: AtomicU64 = AtomicU64::new(0);
	fn next_id() -> u64 {
		NEXT_ID.fetch_add(1, Ordering::Relaxed)
	}

	#[test]
	fn opens_and_walks_single_job() {
		let bytes = build_file(&[(4, "/tmp/a", &["./app", "-n", "10"], &[], &[("LANG", "C"), ("PATH", "/bin")])]);
		let tmp = write_temp(&bytes);
		let mut f = CramFile::open(&tmp.path).unwrap();
		assert_eq!(f.header.num_jobs, 1);
		assert_eq!(f.header.total_procs, 4);
		assert!(f.has_more());
		assert!(f.next().unwrap());
		assert_eq!(f.cur_job_procs(), 4);
		assert!(!f.has_more());
		assert!(!f.next().unwrap());
	}

	#[test]
	fn empty_file_has_no_jobs() {
		let bytes = build_file(&[]);
		let tmp = write_temp(&bytes);
		let mut f = CramFile::open(&tmp.path).unwrap();
		assert_eq!(f.header.num_jobs, 0);
		assert!(!f.has_more());
		assert!(!f.next().unwrap());
	}

	#[test]
	fn bad_magic_is_rejected() {
		let bytes = vec![0u8; 20];
		let tmp = write_temp(&bytes);
		match CramFile::open(&tmp.path) {
			Err(Error::NotCramFile { .. }) => {}
			other => panic!("expected NotCramFile, got {:?}", other),
		}
	}

	#[test]
	fn missing_file_is_not_found() {
		match CramFile::open("/nonexistent/path/does-not-exist.cram") {
			Err(Error::NotFound { .. }) => {}
			other => panic!("expected NotFound, got {:?}", other),
		}
	}

	#[test]
	fn oversize_record_is_rejected() {
		// Hand-build a file whose header claims max_job_size=64 but whose
		// single record is 65 bytes.
		let mut out = Vec::new();
		write_u32(&mut out, MAGIC);
		write_u32(&mut out, 1);
		write_u32(&mut out, 1); // num_jobs
		write_u32(&mut out, 1); // total_procs
		write_u32(&mut out, 64); // max_job_size
		write_u32(&mut out, 65); // record_size -- bigger than max_job_size
		out.extend_from_slice(&vec![0u8; 65]);

		let tmp = write_temp(&out);
		let mut f = CramFile::open(&tmp.path).unwrap();
		match f.next() {
			Err(Error::OversizeRecord { record_size: 65, max_job_size: 64 }) => {}
			other => panic!("expected OversizeRecord, got {:?}", other),
		}
	}
}
