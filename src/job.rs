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

// Decodes one compressed job record -- the bytes inside a cram file's
// `record_size` window -- into a fully owned `Job`. See
// `original_source/src/c/libcram/cram_file.c`'s `cram_job_decompress`
// for the record this module is a faithful, memory-safe translation of.

use std::io::Write;

use crate::codec::{Bytes, Cursor};
use crate::env::{self, Environment};
use crate::error::Result;

/// A fully decoded sub-job: how many processes it gets, where it runs,
/// what it's invoked with, and what environment it sees.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Job {
	pub num_procs: u32,
	pub working_dir: Bytes,
	pub args: Vec<Bytes>,
	pub env: Environment,
}

/// Decodes one job record.
///
/// `base` is `None` for the first job in a file and `Some(&first_job.env)`
/// for every subsequent one -- there is no chaining of deltas, every job
/// after the first decompresses directly against job 0.
pub fn decode(record: &[u8], base: Option<&Environment>) -> Result<Job> {
	let mut cur = Cursor::new(record);

	let num_procs = cur.read_u32()?;
	let working_dir = cur.read_string()?;

	let num_args = cur.read_u32()? as usize;
	let mut args = Vec::with_capacity(num_args);
	for _ in 0..num_args {
		args.push(cur.read_string()?);
	}

	let num_subtracted = cur.read_u32()? as usize;
	let mut subtracted = Vec::with_capacity(num_subtracted);
	for _ in 0..num_subtracted {
		subtracted.push(cur.read_string()?);
	}

	let num_changed = cur.read_u32()? as usize;
	let mut changed = Vec::with_capacity(num_changed);
	for _ in 0..num_changed {
		let key = cur.read_string()?;
		let value = cur.read_string()?;
		changed.push((key, value));
	}

	let env = env::decompress(base, &subtracted, &changed)?;

	Ok(Job { num_procs, working_dir, args, env })
}

fn write_lossy<W: Write>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
	write!(w, "{}", String::from_utf8_lossy(bytes))
}

impl Job {
	/// Prints this job's metadata in the stable, human-readable form the
	/// `cram-cat` CLI tool uses -- process count, working directory,
	/// arguments, and environment, in that order.
	pub fn write_human<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
		writeln!(w, "  Num procs: {}", self.num_procs)?;
		write!(w, "  Working dir: ")?;
		write_lossy(w, &self.working_dir)?;
		writeln!(w)?;

		writeln!(w, "  Arguments:")?;
		write!(w, "      ")?;
		for (i, arg) in self.args.iter().enumerate() {
			if i > 0 {
				write!(w, " ")?;
			}
			write_lossy(w, arg)?;
		}
		writeln!(w)?;

		writeln!(w, "  Environment:")?;
		for (k, v) in self.env.keys.iter().zip(self.env.values.iter()) {
			write!(w, "      '")?;
			write_lossy(w, k)?;
			write!(w, "' : '")?;
			write_lossy(w, v)?;
			writeln!(w, "'")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn encode_record(num_procs: u32, working_dir: &str, args: &[&str], subtracted: &[&str], changed: &[(&str, &str)]) -> Vec<u8> {
		let mut buf = Vec::new();
		buf.extend_from_slice(&num_procs.to_be_bytes());
		encode_string(&mut buf, working_dir.as_bytes());
		buf.extend_from_slice(&(args.len() as u32).to_be_bytes());
		for a in args {
			encode_string(&mut buf, a.as_bytes());
		}
		buf.extend_from_slice(&(subtracted.len() as u32).to_be_bytes());
		for s in subtracted {
			encode_string(&mut buf, s.as_bytes());
		}
		buf.extend_from_slice(&(changed.len() as u32).to_be_bytes());
		for (k, v) in changed {
			encode_string(&mut buf, k.as_bytes());
			encode_string(&mut buf, v.as_bytes());
		}
		buf
	}

	fn encode_string(buf: &mut Vec<u8>, s: &[u8]) {
		buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
		buf.extend_from_slice(s);
	}

	#[test]
	fn decode_first_job_has_no_base() {
		let record = encode_record(4, "/tmp/a", &["./app", "-n", "10"], &[], &[("LANG", "C"), ("PATH", "/bin")]);
		let job = decode(&record, None).unwrap();
		assert_eq!(job.num_procs, 4);
		assert_eq!(job.working_dir, b"/tmp/a".to_vec());
		assert_eq!(job.args, vec![b"./app".to_vec(), b"-n".to_vec(), b"10".to_vec()]);
		assert_eq!(job.env.keys, vec![b"LANG".to_vec(), b"PATH".to_vec()]);
	}

	#[test]
	fn decode_second_job_against_base() {
		let first = encode_record(4, "/tmp/a", &["./app"], &[], &[("A", "1"), ("B", "2"), ("C", "3")]);
		let base_job = decode(&first, None).unwrap();

		let second = encode_record(2, "/tmp/b", &["./other"], &["B"], &[("C", "9"), ("D", "4")]);
		let job = decode(&second, Some(&base_job.env)).unwrap();
		assert_eq!(job.env.keys, vec![b"A".to_vec(), b"C".to_vec(), b"D".to_vec()]);
		assert_eq!(job.env.values, vec![b"1".to_vec(), b"9".to_vec(), b"4".to_vec()]);
	}

	#[test]
	fn decode_truncated_record_fails() {
		let mut record = encode_record(1, "/tmp", &[], &[], &[]);
		record.truncate(record.len() - 1);
		assert!(decode(&record, None).is_err());
	}

	#[test]
	fn human_output_lists_fields_in_order() {
		let record = encode_record(1, "/tmp/a", &["./app"], &[], &[("A", "1")]);
		let job = decode(&record, None).unwrap();
		let mut out = Vec::new();
		job.write_human(&mut out).unwrap();
		let text = String::from_utf8(out).unwrap();
		assert!(text.contains("Num procs: 1"));
		assert!(text.contains("Working dir: /tmp/a"));
		assert!(text.contains("./app"));
		assert!(text.contains("'A' : '1'"));
	}
}
