//! Fixed-length bit buffer used to build and take apart shift register
//! contents. Bit 0 is the first bit shifted out on TDI (and the first bit
//! captured from TDO).

use std::fmt;
use std::ops::Range;

use bitvec::prelude::*;

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitVector {
	bits: BitVec<u8, Lsb0>,
}

impl BitVector {
	/// all bits cleared
	pub fn new(len: usize) -> Self {
		BitVector {
			bits: bitvec![u8, Lsb0; 0; len],
		}
	}

	/// `len` bits taken from `value`, least significant bit first
	pub fn from_value(value: u64, len: usize) -> Self {
		assert!(len <= 64, "BitVector::from_value limited to 64 bits, got {}", len);
		let mut v = BitVector::new(len);
		if len > 0 {
			v.bits[..len].store_le(value);
		}
		v
	}

	pub fn len(&self) -> usize {
		self.bits.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bits.is_empty()
	}

	pub fn get(&self, index: usize) -> bool {
		assert!(index < self.len(), "bit index {} out of range (length {})", index, self.len());
		self.bits[index]
	}

	pub fn set(&mut self, index: usize, value: bool) {
		assert!(index < self.len(), "bit index {} out of range (length {})", index, self.len());
		self.bits.set(index, value);
	}

	/// read up to 64 bits as an integer, lowest index is bit 0
	pub fn value(&self, range: Range<usize>) -> u64 {
		assert!(range.end <= self.len(), "bit range {:?} out of range (length {})", range, self.len());
		assert!(range.end - range.start <= 64);
		if range.start == range.end {
			return 0;
		}
		self.bits[range].load_le::<u64>()
	}

	pub fn set_value(&mut self, range: Range<usize>, value: u64) {
		assert!(range.end <= self.len(), "bit range {:?} out of range (length {})", range, self.len());
		assert!(range.end - range.start <= 64);
		if range.start == range.end {
			return;
		}
		self.bits[range].store_le(value);
	}

	pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
		self.bits.iter().by_vals()
	}

	pub fn push(&mut self, value: bool) {
		self.bits.push(value);
	}
}

impl fmt::Debug for BitVector {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "BitVector[{}](", self.len())?;
		// highest index first, like a register dump
		for i in (0..self.len()).rev() {
			f.write_str(if self.bits[i] { "1" } else { "0" })?;
		}
		write!(f, ")")
	}
}
