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

// The collective operation that reads a cram file once, on one rank,
// and fans the per-rank job records out over `comm` instead of having
// every rank hammer the filesystem. See spec.md section 4.5 for the
// protocol this is a direct translation of, and
// `original_source/src/c/libcram/cram_file.c`'s `cram_file_bcast_jobs`
// for the implementation it replaces the non-scaling
// seek-and-search reader with.

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::file::CramFile;
use crate::job::{self, Job};

/// Reserved tag for point-to-point cram messages, matching `CRAM_TAG` in
/// the original source.
pub const TAG: i32 = 7675;

/// Recommended cap on outstanding send-request pairs, matching
/// `MAX_CONCURRENT_PEERS` in the original source.
pub const DEFAULT_MAX_CONCURRENT_PEERS: usize = 512;

#[derive(Clone, Copy, Debug)]
pub struct Options {
	/// Maximum number of ranks root keeps send requests outstanding for
	/// at once (so at most `2 * max_concurrent_peers` requests are ever
	/// in flight, one id-message and one record-message per rank).
	pub max_concurrent_peers: usize,
	pub tag: i32,
}

impl Default for Options {
	fn default() -> Options {
		Options { max_concurrent_peers: DEFAULT_MAX_CONCURRENT_PEERS, tag: TAG }
	}
}

/// Checks the size precondition the root enforces before doing any I/O:
/// `comm_size >= total_procs`. Split out from `bootstrap` so it can be
/// tested without needing a communicator to abort.
pub fn check_size(total_procs: u32, comm_size: i32) -> Result<()> {
	if i64::from(comm_size) < i64::from(total_procs) {
		return Err(Error::UndersizedCommunicator { total_procs, comm_size });
	}
	Ok(())
}

/// Aborts `comm` with a diagnostic on stderr if `result` is an error,
/// otherwise returns the wrapped value. Every error that can arise inside
/// the collective bootstrap protocol is fatal to `parent_comm` per
/// spec.md section 7 -- there is no recoverable-by-the-caller path here,
/// so the public `bootstrap` operation never returns an error itself; it
/// either produces a `(Job, i32)` on every rank or terminates the run.
fn or_abort<C: Communicator, T>(comm: &C, result: Result<T>) -> T {
	match result {
		Ok(v) => v,
		Err(e) => {
			log::error!("Error: {}", e);
			comm.abort(e.exit_code());
		}
	}
}

/// Runs the bootstrap protocol with default options. See
/// `bootstrap_with_options` for the full contract.
pub fn bootstrap<C: Communicator>(file: Option<&mut CramFile>, root: i32, comm: &C) -> (Job, i32) {
	bootstrap_with_options(file, root, comm, &Options::default())
}

/// Collective over `comm`: every rank in `0..comm.size()` must call this
/// together. `file` must be `Some`, already open and freshly positioned
/// before job 0, on `root`; every other rank passes `None`.
///
/// Returns this rank's decoded job and its sub-job id, or a null job and
/// `-1` if this rank is not covered by any job in the file (including
/// every rank when the file has zero jobs). There is no error return: any
/// fatal condition -- an undersized communicator, a malformed file, or a
/// messaging failure -- collectively aborts `parent_comm` from whichever
/// rank detects it, per spec.md section 7.
pub fn bootstrap_with_options<C: Communicator>(
	mut file: Option<&mut CramFile>,
	root: i32,
	comm: &C,
	options: &Options,
) -> (Job, i32) {
	let rank = comm.rank();
	let size = comm.size();

	// Step 1: size check and max_job_size fan-out.
	let mut max_job_size: u32 = 0;
	if rank == root {
		let file = file.as_deref_mut().expect("file must be Some on the root rank");
		or_abort(comm, check_size(file.header.total_procs, size));
		max_job_size = file.max_job_size() as u32;
	}
	let mut size_buf = max_job_size.to_be_bytes();
	or_abort(comm, comm.broadcast(root, &mut size_buf));
	max_job_size = u32::from_be_bytes(size_buf);

	// Step 2: first job broadcast. A file with zero jobs has no job 0;
	// every rank gets the null job as its base and nobody is "in the
	// first job".
	let has_job_zero = if rank == root {
		let file = file.as_deref_mut().expect("file must be Some on the root rank");
		or_abort(comm, file.next())
	} else {
		false
	};
	let mut has_job_zero_buf = [has_job_zero as u8];
	or_abort(comm, comm.broadcast(root, &mut has_job_zero_buf));
	let has_job_zero = has_job_zero_buf[0] != 0;

	let mut record_buf = vec![0u8; max_job_size as usize];
	if has_job_zero && rank == root {
		let file = file.as_deref_mut().expect("file must be Some on the root rank");
		let record = file.current_record();
		record_buf[..record.len()].copy_from_slice(record);
	}
	if has_job_zero {
		or_abort(comm, comm.broadcast(root, &mut record_buf));
	}

	let first_job =
		if has_job_zero { or_abort(comm, job::decode(&record_buf, None)) } else { Job::default() };

	let mut outcome: Option<(Job, i32)> = None;
	if i64::from(rank) < i64::from(first_job.num_procs) {
		outcome = Some((first_job.clone(), 0));
	}

	if rank == root {
		run_root_side(file.expect("file must be Some on the root rank"), &first_job, root, size, comm, options, &mut outcome);
	} else if outcome.is_none() {
		outcome = Some(receive_assignment(root, comm, &first_job, max_job_size, options));
	}

	outcome.expect("every rank resolves a (job, sub_job_id) assignment")
}

/// Root's half of the protocol: iterate the remaining job records,
/// scattering each one to its rank range with a bounded number of
/// requests outstanding at once, then mark any surplus ranks inactive.
/// Root determines its own assignment directly, without ever sending a
/// message to itself (the original always sends regardless of whether
/// the target happens to be the root rank, which only works because a
/// typical run never schedules root into anything but job 0).
fn run_root_side<C: Communicator>(
	file: &mut CramFile,
	first_job: &Job,
	root: i32,
	size: i32,
	comm: &C,
	options: &Options,
	outcome: &mut Option<(Job, i32)>,
) {
	let max_job_size = file.max_job_size();
	let mut cur_rank: i32 = first_job.num_procs as i32;
	let mut pending: Vec<C::Request> = Vec::with_capacity(options.max_concurrent_peers * 2);

	while file.has_more() {
		if !or_abort(comm, file.next()) {
			break;
		}
		let job_id = file.cur_job_id() as i32;
		let mut payload = file.current_record().to_vec();
		payload.resize(max_job_size, 0);

		let end_rank = cur_rank + file.cur_job_procs() as i32;
		while cur_rank < end_rank {
			if cur_rank == root {
				*outcome = Some((or_abort(comm, job::decode(&payload, Some(&first_job.env))), job_id));
			} else {
				pending.push(comm.isend(cur_rank, options.tag, job_id.to_be_bytes().to_vec()));
				pending.push(comm.isend(cur_rank, options.tag, payload.clone()));
				if pending.len() >= options.max_concurrent_peers * 2 {
					or_abort(comm, comm.wait_all(std::mem::take(&mut pending)));
				}
			}
			cur_rank += 1;
		}
	}
	if !pending.is_empty() {
		or_abort(comm, comm.wait_all(pending));
	}

	// Step 5: anyone left over (total_procs < comm size) is inactive.
	let mut inactive: Vec<C::Request> = Vec::new();
	for r in cur_rank..size {
		if r == root {
			*outcome = Some((Job::default(), -1));
			continue;
		}
		inactive.push(comm.isend(r, options.tag, (-1i32).to_be_bytes().to_vec()));
		if inactive.len() >= options.max_concurrent_peers * 2 {
			or_abort(comm, comm.wait_all(std::mem::take(&mut inactive)));
		}
	}
	if !inactive.is_empty() {
		or_abort(comm, comm.wait_all(inactive));
	}
}

/// A non-root rank's half: receive the sub-job id, then (if active) the
/// record bytes, and decompress against `first_job`.
fn receive_assignment<C: Communicator>(
	root: i32,
	comm: &C,
	first_job: &Job,
	max_job_size: u32,
	options: &Options,
) -> (Job, i32) {
	let mut id_buf = [0u8; 4];
	or_abort(comm, comm.recv(root, options.tag, &mut id_buf));
	let id = i32::from_be_bytes(id_buf);

	if id < 0 {
		return (Job::default(), -1);
	}

	let mut payload = vec![0u8; max_job_size as usize];
	or_abort(comm, comm.recv(root, options.tag, &mut payload));
	let job = or_abort(comm, job::decode(&payload, Some(&first_job.env)));
	(job, id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::comm::thread;
	use crate::file::CramFile;
	use std::io::Write;
	use std::panic::{catch_unwind, AssertUnwindSafe};
	use std::thread as std_thread;

	fn write_temp(bytes: &[u8]) -> std::path::PathBuf {
		let mut path = std::env::temp_dir();
		static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
		let n = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		path.push(format!("cram-bootstrap-test-{}-{}.cram", std::process::id(), n));
		let mut f = std::fs::File::create(&path).unwrap();
		f.write_all(bytes).unwrap();
		path
	}

	fn write_u32(buf: &mut Vec<u8>, v: u32) {
		buf.extend_from_slice(&v.to_be_bytes());
	}
	fn write_string(buf: &mut Vec<u8>, s: &[u8]) {
		write_u32(buf, s.len() as u32);
		buf.extend_from_slice(s);
	}

	fn build_file(jobs: &[(u32, &str, &[&str], &[&str], &[(&str, &str)])]) -> Vec<u8> {
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
		write_u32(&mut out, crate::file::MAGIC);
		write_u32(&mut out, 1);
		write_u32(&mut out, jobs.len() as u32);
		write_u32(&mut out, total_procs);
		write_u32(&mut out, max_job_size);
		for record in records {
			write_u32(&mut out, record.len() as u32);
			out.extend_from_slice(&record);
		}
		out
	}

	/// Runs `bootstrap` across `size` simulated ranks (rank `root` gets
	/// the open file, everyone else `None`) and returns every rank's
	/// `(job, sub_job_id)` outcome, indexed by rank.
	fn run_bootstrap(path: &std::path::Path, root: i32, size: i32) -> Vec<(Job, i32)> {
		let comms = thread::build(size);
		let handles: Vec<_> = comms
			.into_iter()
			.map(|comm| {
				let path = path.to_path_buf();
				std_thread::spawn(move || {
					let mut file = if comm.rank() == root { Some(CramFile::open(&path).unwrap()) } else { None };
					bootstrap(file.as_mut(), root, &comm)
				})
			})
			.collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	}

	#[test]
	fn single_job_file_assigns_every_rank_to_job_zero() {
		let bytes = build_file(&[(4, "/tmp/a", &["./app", "-n", "10"], &[], &[("LANG", "C"), ("PATH", "/bin")])]);
		let path = write_temp(&bytes);
		let results = run_bootstrap(&path, 0, 4);
		for (job, id) in &results {
			assert_eq!(*id, 0);
			assert_eq!(job.working_dir, b"/tmp/a".to_vec());
			assert_eq!(job.env.get(b"LANG"), Some(&b"C".to_vec()));
		}
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn two_jobs_with_diff_decompress_correctly() {
		let bytes = build_file(&[
			(2, "/a", &["x"], &[], &[("A", "1"), ("B", "2"), ("C", "3")]),
			(2, "/b", &["y"], &["B"], &[("C", "9"), ("D", "4")]),
		]);
		let path = write_temp(&bytes);
		let results = run_bootstrap(&path, 0, 4);

		assert_eq!(results[0].1, 0);
		assert_eq!(results[1].1, 0);
		assert_eq!(results[2].1, 1);
		assert_eq!(results[3].1, 1);
		assert_eq!(results[2].0.env.keys, vec![b"A".to_vec(), b"C".to_vec(), b"D".to_vec()]);
		assert_eq!(results[2].0.env.values, vec![b"1".to_vec(), b"9".to_vec(), b"4".to_vec()]);
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn surplus_ranks_are_inactive() {
		let bytes = build_file(&[(5, "/a", &["x"], &[], &[("A", "1")])]);
		let path = write_temp(&bytes);
		let results = run_bootstrap(&path, 0, 8);
		for r in 0..5 {
			assert_eq!(results[r].1, 0);
		}
		for r in 5..8 {
			assert_eq!(results[r].1, -1);
		}
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn empty_file_leaves_every_rank_inactive() {
		let bytes = build_file(&[]);
		let path = write_temp(&bytes);
		let results = run_bootstrap(&path, 0, 4);
		for (_, id) in &results {
			assert_eq!(*id, -1);
		}
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn root_not_rank_zero_does_not_deadlock() {
		// root is rank 2, which falls in the second job's range; root
		// must resolve its own assignment without sending to itself.
		let bytes = build_file(&[
			(2, "/a", &["x"], &[], &[("A", "1")]),
			(2, "/b", &["y"], &[], &[("A", "1")]),
		]);
		let path = write_temp(&bytes);
		let results = run_bootstrap(&path, 2, 4);
		assert_eq!(results[2].1, 1);
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn undersized_communicator_aborts() {
		let bytes = build_file(&[(4, "/a", &["x"], &[], &[])]);
		let path = write_temp(&bytes);
		let comms = thread::build(3);
		let mut file = Some(CramFile::open(&path).unwrap());
		let root_comm = comms.into_iter().next().unwrap();
		let result = catch_unwind(AssertUnwindSafe(|| bootstrap(file.as_mut(), 0, &root_comm)));
		assert!(result.is_err(), "expected bootstrap to abort via panic on an undersized communicator");
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn concurrency_cap_holds_for_many_ranks() {
		let jobs: Vec<(u32, &str, &[&str], &[&str], &[(&str, &str)])> =
			vec![(10, "/a", &["x"], &[], &[("A", "1")]); 200];
		let bytes = build_file(&jobs);
		let path = write_temp(&bytes);
		let results = run_bootstrap(&path, 0, 2000);
		for (job, _) in &results {
			assert_eq!(job.env.get(b"A"), Some(&b"1".to_vec()));
		}
		let _ = std::fs::remove_file(&path);
	}

	#[test]
	fn check_size_rejects_one_short() {
		match check_size(5, 4) {
			Err(Error::UndersizedCommunicator { total_procs: 5, comm_size: 4 }) => {}
			other => panic!("expected UndersizedCommunicator, got {:?}", other),
		}
		assert!(check_size(5, 5).is_ok());
	}
}
