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

// Prints a cram file's header and every job's metadata, in the same
// field order as `cram_file_cat`/`cram_job_print` in
// `original_source/src/c/test/cram-cat.c`.

use std::path::PathBuf;
use std::process;

use cram::{job, CramFile, Error, Job};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "cram-cat", about = "Print the contents of a cram file")]
struct Options {
	/// Path to the cram file to print.
	#[structopt(parse(from_os_str))]
	path: PathBuf,
}

fn run(options: &Options) -> cram::Result<()> {
	let mut file = CramFile::open(&options.path)?;

	println!("Number of Jobs:   {:12}", file.header.num_jobs);
	println!("Total Procs:      {:12}", file.header.total_procs);
	println!("Cram version:     {:12}", file.header.version);
	println!("Max job record:   {:12}", file.max_job_size());
	println!();
	println!("Job information:");

	if !file.has_more() {
		return Ok(());
	}

	file.next()?;
	let first_job = job::decode(file.current_record(), None)?;
	println!("Job {}:", file.cur_job_id());
	print_job(&first_job);

	while file.has_more() {
		file.next()?;
		let decoded = job::decode(file.current_record(), Some(&first_job.env))?;
		println!("Job {}:", file.cur_job_id());
		print_job(&decoded);
	}

	Ok(())
}

fn print_job(job: &Job) {
	let mut out = std::io::stdout();
	job.write_human(&mut out).expect("writing to stdout failed");
}

fn main() {
	env_logger::init();
	let options = Options::from_args();

	if let Err(e) = run(&options) {
		eprintln!("Error: {}", e);
		process::exit(exit_code(&e));
	}
}

fn exit_code(e: &Error) -> i32 {
	e.exit_code()
}
