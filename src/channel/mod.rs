//! Word transfers between hex files and board memories.

mod narrow;
mod transfer;
mod word;

pub use self::narrow::{
	ChannelKind,
	ChannelLayout,
	Geometry,
	NarrowChannel,
	CLOCK_DELAY,
	DEFAULT_FLASH_POLLS,
	DEFAULT_POLL_DELAY,
};
pub use self::transfer::{
	download,
	upload,
	verify,
	TransferStats,
	SELF_TEST_ROUNDS,
};
pub use self::word::{
	join_slices,
	rearrange,
	slice_count,
	slices,
	word_from_bytes,
	word_to_bytes,
	Endian,
};

/// Word-addressed access to a board memory; implemented by the narrow
/// channel and by boundary scan.
pub trait WordAccess {
	fn geometry(&self) -> &Geometry;

	/// `value` is in wire order
	fn write_word(&mut self, word_address: u32, value: u32) -> crate::AResult<()>;

	fn read_word(&mut self, word_address: u32) -> crate::AResult<u32>;

	/// fraction of successful handshake probes
	fn self_test(&mut self, rounds: usize) -> crate::AResult<f32>;
}

impl<'a, M: ?Sized + WordAccess> WordAccess for &'a mut M {
	fn geometry(&self) -> &Geometry {
		M::geometry(&**self)
	}

	fn write_word(&mut self, word_address: u32, value: u32) -> crate::AResult<()> {
		M::write_word(*self, word_address, value)
	}

	fn read_word(&mut self, word_address: u32) -> crate::AResult<u32> {
		M::read_word(*self, word_address)
	}

	fn self_test(&mut self, rounds: usize) -> crate::AResult<f32> {
		M::self_test(*self, rounds)
	}
}
