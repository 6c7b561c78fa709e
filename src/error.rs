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

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while reading or bootstrapping a cram file.
///
/// There is no retry path anywhere in this crate: any of these is fatal to
/// whichever operation raised it, and collective operations turn them into
/// an abort of the parent communicator.
#[derive(Debug)]
pub enum Error {
	/// The cram file could not be opened.
	NotFound { path: std::path::PathBuf, source: io::Error },
	/// The file's magic number did not match `0x6372616d`.
	NotCramFile { path: std::path::PathBuf },
	/// A read came up short, whether from a file stream or an in-memory
	/// buffer.
	Truncated { context: &'static str, expected: usize, actual: usize },
	/// A job record's `record_size` exceeded the header's `max_job_size`.
	OversizeRecord { record_size: u32, max_job_size: u32 },
	/// Subtractions were present without a base job, or the merge detected
	/// a sort-order violation.
	InvalidDelta { reason: &'static str },
	/// The parent communicator has fewer ranks than the file's `total_procs`.
	UndersizedCommunicator { total_procs: u32, comm_size: i32 },
	/// The underlying send/recv/broadcast primitives reported a failure.
	MessagingError { reason: String },
	/// Plain I/O failure not otherwise classified above.
	Io(io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::NotFound { path, source } =>
				write!(f, "cannot open cram file {}: {}", path.display(), source),
			Error::NotCramFile { path } =>
				write!(f, "{} is not a cram file", path.display()),
			Error::Truncated { context, expected, actual } =>
				write!(f, "truncated read while reading {}: expected {} bytes, got {}",
					context, expected, actual),
			Error::OversizeRecord { record_size, max_job_size } =>
				write!(f, "invalid job record size: {} > {}", record_size, max_job_size),
			Error::InvalidDelta { reason } =>
				write!(f, "invalid environment delta: {}", reason),
			Error::UndersizedCommunicator { total_procs, comm_size } =>
				write!(f, "this cram file requires {} processes, but the communicator has only {}",
					total_procs, comm_size),
			Error::MessagingError { reason } =>
				write!(f, "messaging error: {}", reason),
			Error::Io(e) => write!(f, "{}", e),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::NotFound { source, .. } => Some(source),
			Error::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(e)
	}
}

impl Error {
	/// Exit code this error should carry into a collective abort, per the
	/// "pass the I/O error number through when it is meaningful" rule.
	pub fn exit_code(&self) -> i32 {
		match self {
			Error::Io(e) => e.raw_os_error().unwrap_or(1),
			Error::NotFound { source, .. } => source.raw_os_error().unwrap_or(1),
			_ => 1,
		}
	}
}
