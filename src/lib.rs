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

//! Cram packs many MPI jobs' launch metadata -- process counts, working
//! directories, arguments, environments -- into a single file that a
//! bootstrap dispatcher can fan out to every rank of a parent
//! communicator in one collective pass, instead of having each rank
//! independently open, seek and parse the file itself.
//!
//! Environments are stored delta-compressed against the file's first job:
//! `env` implements the merge that reconstructs a job's full environment
//! from a base plus a (subtracted keys, changed pairs) delta. `codec` and
//! `job` implement the on-disk record format that delta rides inside of,
//! `file` sequentially walks a cram file's header and records, `comm`
//! abstracts the message-passing substrate the dispatcher runs over, and
//! `bootstrap` is the dispatcher itself.
//!
//! See `cram-cat` for a CLI that prints a cram file's contents and
//! `cram-bench` for one that times a straight sequential walk of it.

pub mod bootstrap;
pub mod codec;
pub mod comm;
pub mod env;
pub mod error;
pub mod file;
pub mod job;

pub use bootstrap::{bootstrap, bootstrap_with_options, Options};
pub use comm::Communicator;
pub use env::Environment;
pub use error::{Error, Result};
pub use file::CramFile;
pub use job::Job;
