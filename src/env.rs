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

// Reconstructs a job's environment from a base environment plus a delta
// of (subtracted keys, changed pairs), in one merge pass over three
// sorted arrays. See spec.md section 4.2 for the full algorithm; this
// is a direct translation guarding both cursors, unlike
// `original_source/src/c/libcram/cram_file.c`'s `decompress`, which
// counts overlaps via a bsearch-pointer-vs-base-address comparison
// (undefined when the key is absent) and only guards the `changed`
// cursor, not the `base` one.

use crate::codec::Bytes;
use crate::error::{Error, Result};

/// A decoded environment: parallel, strictly-ascending `keys`/`values`
/// arrays. Sorted so that decompression is a linear merge rather than a
/// hash lookup per key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Environment {
	pub keys: Vec<Bytes>,
	pub values: Vec<Bytes>,
}

impl Environment {
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
		self.keys.binary_search_by(|k| k.as_slice().cmp(key)).ok().map(|i| &self.values[i])
	}

	fn is_sorted(keys: &[Bytes]) -> bool {
		keys.windows(2).all(|w| w[0] < w[1])
	}
}

/// Rebuilds an environment from a base plus a delta.
///
/// `base == None` is the "first job" case: `subtracted` must be empty and
/// the result is exactly `changed`. A non-empty `subtracted` without a
/// base is `InvalidDelta`.
pub fn decompress(
	base: Option<&Environment>,
	subtracted: &[Bytes],
	changed: &[(Bytes, Bytes)],
) -> Result<Environment> {
	let base = match base {
		None => {
			if !subtracted.is_empty() {
				return Err(Error::InvalidDelta {
					reason: "subtracted keys present but no base job was supplied",
				});
			}
			let keys: Vec<Bytes> = changed.iter().map(|(k, _)| k.clone()).collect();
			let values: Vec<Bytes> = changed.iter().map(|(_, v)| v.clone()).collect();
			if !Environment::is_sorted(&keys) {
				return Err(Error::InvalidDelta { reason: "changed keys are not strictly ascending" });
			}
			return Ok(Environment { keys, values });
		}
		Some(base) => base,
	};

	if !Environment::is_sorted(subtracted) {
		return Err(Error::InvalidDelta { reason: "subtracted keys are not strictly ascending" });
	}
	let changed_keys: Vec<&Bytes> = changed.iter().map(|(k, _)| k).collect();
	if !changed_keys.windows(2).all(|w| w[0] < w[1]) {
		return Err(Error::InvalidDelta { reason: "changed keys are not strictly ascending" });
	}

	// Overlap = number of changed keys that are already present in base.
	// Counted by explicit presence check, not by comparing a bsearch
	// result pointer against the array base (the original's UB when the
	// key is absent).
	let overlap = changed
		.iter()
		.filter(|(k, _)| base.keys.binary_search(k).is_ok())
		.count();

	let out_len = base.len() + changed.len() - subtracted.len() - overlap;
	let mut keys = Vec::with_capacity(out_len);
	let mut values = Vec::with_capacity(out_len);

	let (mut b, mut c, mut s) = (0usize, 0usize, 0usize);
	while keys.len() < out_len {
		if b == base.len() && c < changed.len() {
			keys.push(changed[c].0.clone());
			values.push(changed[c].1.clone());
			c += 1;
			continue;
		}

		if c == changed.len() || (b < base.len() && base.keys[b] < changed[c].0) {
			if b >= base.len() {
				return Err(Error::InvalidDelta { reason: "merge ran past end of base environment" });
			}
			if s < subtracted.len() && base.keys[b] == subtracted[s] {
				b += 1;
				s += 1;
			} else {
				keys.push(base.keys[b].clone());
				values.push(base.values[b].clone());
				b += 1;
			}
			continue;
		}

		if base.keys[b] == changed[c].0 {
			keys.push(changed[c].0.clone());
			values.push(changed[c].1.clone());
			b += 1;
			c += 1;
		} else {
			// base.keys[b] > changed[c].0
			keys.push(changed[c].0.clone());
			values.push(changed[c].1.clone());
			c += 1;
		}
	}

	Ok(Environment { keys, values })
}

/// Computes the `(subtracted, changed)` delta that, applied to `base` via
/// `decompress`, reproduces `job`. This is the producer-side inverse of
/// `decompress`; the core does not specify a file-generation tool, but
/// this pure function is what the testable "delta round-trip" property
/// in spec.md section 8 exercises, and it is the natural building block
/// for any collaborator that writes cram files.
pub fn diff(base: &Environment, job: &Environment) -> (Vec<Bytes>, Vec<(Bytes, Bytes)>) {
	let subtracted: Vec<Bytes> = base
		.keys
		.iter()
		.filter(|k| job.get(k).is_none())
		.cloned()
		.collect();

	let changed: Vec<(Bytes, Bytes)> = job
		.keys
		.iter()
		.zip(job.values.iter())
		.filter(|(k, v)| base.get(k).map(|bv| bv != *v).unwrap_or(true))
		.map(|(k, v)| (k.clone(), v.clone()))
		.collect();

	(subtracted, changed)
}
