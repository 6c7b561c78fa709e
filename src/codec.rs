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

// Wire format: big-endian u32 integers, and strings as a u32 length
// followed by exactly that many opaque bytes (no terminator, no
// alignment). This module is the only place that knows those two facts;
// everything above it works with `Bytes` (an opaque owned byte string)
// and `u32`.
//
//   read_u32:    [4 bytes, big-endian] -> u32
//   read_string: [4 bytes len][len bytes] -> Bytes

use std::convert::TryInto;
use std::io::Read;

use crate::error::{Error, Result};

/// An owned, opaque byte string. Environment keys/values and arguments
/// are not guaranteed to be valid UTF-8 on disk, and the original format
/// truncates at the declared length rather than at an embedded NUL, so
/// we never treat these as `String` internally.
pub type Bytes = Vec<u8>;

/// A cursor over an in-memory buffer, used to decode one job record that
/// has already been read off disk in full.
pub struct Cursor<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Cursor<'a> {
	pub fn new(buf: &'a [u8]) -> Cursor<'a> {
		Cursor { buf, pos: 0 }
	}

	pub fn position(&self) -> usize {
		self.pos
	}

	pub fn remaining(&self) -> usize {
		self.buf.len() - self.pos
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		if self.remaining() < 4 {
			return Err(Error::Truncated { context: "integer", expected: 4, actual: self.remaining() });
		}
		let bytes: [u8; 4] = self.buf[self.pos..self.pos + 4].try_into().expect("checked above");
		self.pos += 4;
		Ok(u32::from_be_bytes(bytes))
	}

	pub fn read_string(&mut self) -> Result<Bytes> {
		let len = self.read_u32()? as usize;
		if self.remaining() < len {
			return Err(Error::Truncated { context: "string", expected: len, actual: self.remaining() });
		}
		let bytes = self.buf[self.pos..self.pos + len].to_vec();
		self.pos += len;
		Ok(bytes)
	}
}

/// Reads the same two primitives from a buffered file stream. A short
/// read here is truncation, same as in `Cursor`.
pub fn read_u32_from<R: Read>(r: &mut R, context: &'static str) -> Result<u32> {
	let mut bytes = [0u8; 4];
	let actual = read_up_to(r, &mut bytes)?;
	if actual != 4 {
		return Err(Error::Truncated { context, expected: 4, actual });
	}
	Ok(u32::from_be_bytes(bytes))
}

/// Fills `buf` as far as the stream allows, returning the number of bytes
/// actually read (may be less than `buf.len()` on a short/EOF read).
pub fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		match r.read(&mut buf[filled..])? {
			0 => break,
			n => filled += n,
		}
	}
	Ok(filled)
}
