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

// Times a straight sequential walk of a cram file's job records, with no
// decoding, matching the intent of
// `original_source/src/c/test/cram-read-file-test.c`'s
// `read_entire_cram_file` -- useful for tuning `CRAM_BUFFER_SIZE` against
// a given file and filesystem.

use std::path::PathBuf;
use std::process;
use std::time::Instant;

use cram::{CramFile, Error};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "cram-bench", about = "Time a sequential read of a cram file")]
struct Options {
	/// Path to the cram file to read.
	#[structopt(parse(from_os_str))]
	path: PathBuf,
}

fn run(options: &Options) -> cram::Result<()> {
	println!("Reading file: {}", options.path.display());

	let mut file = CramFile::open(&options.path)?;
	let mut bytes_walked: u64 = 0;

	let start = Instant::now();
	while file.has_more() {
		file.next()?;
		bytes_walked += file.current_record().len() as u64;
	}
	let elapsed = start.elapsed();

	println!("Read {} jobs ({} bytes) in {:.6} seconds", file.header.num_jobs, bytes_walked, elapsed.as_secs_f64());
	Ok(())
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
