//! Word-level helpers: byte/bit order and slicing into field-wide pieces.

use std::fmt;

/// Order in which the bytes of a word, and the bits of each byte, go over
/// the wire. Both set is the identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Endian {
	/// most significant byte first
	pub big_bytes: bool,
	/// most significant bit of each byte first
	pub big_bits: bool,
}

impl Default for Endian {
	fn default() -> Self {
		Endian {
			big_bytes: true,
			big_bits: true,
		}
	}
}

impl fmt::Display for Endian {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} bytes, {} bits",
			if self.big_bytes { "big" } else { "little" },
			if self.big_bits { "msb" } else { "lsb" },
		)
	}
}

/// Reorder the bytes and bits of a `width`-bit word (a multiple of 8).
/// Applying it twice gives back `value`.
pub fn rearrange(value: u32, width: u8, endian: Endian) -> u32 {
	debug_assert!(width % 8 == 0 && width <= 32);
	let mut bytes = word_to_bytes(value, width);
	if !endian.big_bytes {
		bytes.reverse();
	}
	if !endian.big_bits {
		for b in &mut bytes {
			*b = b.reverse_bits();
		}
	}
	word_from_bytes(&bytes)
}

/// big-endian word from file bytes
pub fn word_from_bytes(bytes: &[u8]) -> u32 {
	bytes.iter().fold(0u32, |acc, b| acc << 8 | *b as u32)
}

pub fn word_to_bytes(value: u32, width: u8) -> Vec<u8> {
	let n = (width / 8) as usize;
	(0..n).map(|i| (value >> (8 * (n - 1 - i))) as u8).collect()
}

/// number of `field_width`-bit slices needed for `width` bits
pub fn slice_count(width: u8, field_width: u8) -> usize {
	((width + field_width - 1) / field_width) as usize
}

/// Split the low `width` bits of `value` into `field_width`-bit slices,
/// most significant first. Only the first slice may be partial.
pub fn slices(value: u32, width: u8, field_width: u8) -> Vec<u32> {
	let n = slice_count(width, field_width);
	let mask = (1u64 << field_width) - 1;
	let value = value as u64 & ((1u64 << width) - 1);
	(0..n)
		.map(|i| ((value >> (field_width as usize * (n - 1 - i))) & mask) as u32)
		.collect()
}

/// inverse of `slices`
pub fn join_slices(slices: &[u32], field_width: u8) -> u32 {
	let mask = (1u64 << field_width) - 1;
	slices.iter().fold(0u64, |acc, s| acc << field_width | (*s as u64 & mask)) as u32
}
