use std::fmt;
use std::str;
use std::time::Duration;

use super::word::{
	join_slices,
	slice_count,
	slices,
	Endian,
};
use super::WordAccess;
use crate::port::{
	BitChannel,
	BitField,
	Registers,
};
use crate::XferError;

/// How the board side of a channel commits and acknowledges words.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ChannelKind {
	/// state id checked after every slice
	Ram,
	/// state id checked once per word
	PeripheralBus,
	/// state id polled after the last slice until programming finishes
	Flash,
}

impl fmt::Display for ChannelKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			ChannelKind::Ram => "ram",
			ChannelKind::PeripheralBus => "bus",
			ChannelKind::Flash => "flash",
		};
		f.write_str(s)
	}
}

impl str::FromStr for ChannelKind {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"ram" | "sdram" => Ok(ChannelKind::Ram),
			"bus" | "peripheral" => Ok(ChannelKind::PeripheralBus),
			"flash" => Ok(ChannelKind::Flash),
			_ => bail!("unknown channel kind {:?} (ram, bus or flash)", s),
		}
	}
}

/// Address and data widths of the memory behind a channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Geometry {
	/// bits of the word address
	pub address_width: u8,
	/// bits per word: 8, 16 or 32
	pub data_width: u8,
	pub kind: ChannelKind,
	pub endian: Endian,
}

impl Geometry {
	pub fn new(address_width: u8, data_width: u8, kind: ChannelKind) -> crate::AResult<Self> {
		match data_width {
			8 | 16 | 32 => (),
			_ => return Err(XferError::BadWidth(format!("data width {} (8, 16 or 32)", data_width)).into()),
		}
		if address_width == 0 || address_width > 32 {
			return Err(XferError::BadWidth(format!("address width {} (1..=32)", address_width)).into());
		}
		Ok(Geometry {
			address_width,
			data_width,
			kind,
			endian: Endian::default(),
		})
	}

	pub fn with_endian(mut self, endian: Endian) -> Self {
		self.endian = endian;
		self
	}

	pub fn bytes_per_word(&self) -> usize {
		(self.data_width / 8) as usize
	}

	/// byte address >> shift = word address
	pub fn address_shift(&self) -> u32 {
		self.bytes_per_word().trailing_zeros()
	}

	pub fn word_address(&self, byte_address: u32) -> u32 {
		byte_address >> self.address_shift()
	}

	pub fn byte_address(&self, word_address: u32) -> u32 {
		word_address << self.address_shift()
	}

	/// Rejects byte ranges that don't consist of whole words or leave the
	/// address space.
	pub fn check_range(&self, address: u32, length: usize) -> crate::AResult<()> {
		let stride = self.bytes_per_word();
		if address as usize % stride != 0 || length % stride != 0 {
			return Err(XferError::Alignment { address, length, stride }.into());
		}
		let words = (length / stride) as u64;
		let end = self.word_address(address) as u64 + words;
		ensure!(end <= 1u64 << self.address_width,
			"range 0x{:x}+0x{:x} exceeds the {}-bit word address space", address, length, self.address_width
		);
		Ok(())
	}
}

/// Where the narrow channel's signals sit in the 24-bit register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChannelLayout {
	/// latch pulse; the board advances its state id on the rising edge
	pub clock: u8,
	/// resets the board state machine to state 0 while high
	pub reset: u8,
	/// direction: high while downloading
	pub write: u8,
	pub data_out: BitField,
	pub data_in: BitField,
	pub state: BitField,
}

pub const DEFAULT_FLASH_POLLS: usize = 1000;
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_micros(50);
pub const CLOCK_DELAY: Duration = Duration::from_micros(1);

/// Lock-step word transfer through a channel narrower than the words.
///
/// Every latched slice advances a state id on the board; the id is read back
/// through the status field and compared with the count kept here. A
/// mismatch aborts the word, only `reset` brings both sides back in step.
pub struct NarrowChannel<'a, R: Registers> {
	ch: &'a mut BitChannel<R>,
	layout: ChannelLayout,
	geometry: Geometry,
	expected: u32,
	flash_polls: usize,
	poll_delay: Duration,
}

impl<'a, R: Registers> NarrowChannel<'a, R> {
	pub fn new(ch: &'a mut BitChannel<R>, layout: ChannelLayout, geometry: Geometry) -> crate::AResult<Self> {
		ensure!(layout.data_out.width() <= 16, "output field {} wider than 16 bits", layout.data_out);
		ensure!(layout.data_in.width() <= 16, "input field {} wider than 16 bits", layout.data_in);
		debug!("narrow channel: {:?} {:?}", layout, geometry);
		Ok(NarrowChannel {
			ch,
			layout,
			geometry,
			expected: 0,
			flash_polls: DEFAULT_FLASH_POLLS,
			poll_delay: DEFAULT_POLL_DELAY,
		})
	}

	/// bound and spacing of the busy polling after a flash write
	pub fn with_flash_polling(mut self, polls: usize, delay: Duration) -> Self {
		self.flash_polls = polls.max(1);
		self.poll_delay = delay;
		self
	}

	pub fn layout(&self) -> &ChannelLayout {
		&self.layout
	}

	fn state_mask(&self) -> u32 {
		self.layout.state.value_mask()
	}

	fn read_state(&mut self) -> crate::AResult<u32> {
		self.ch.inp(self.layout.state)
	}

	fn check_state(&mut self) -> crate::AResult<()> {
		let expected = self.expected & self.state_mask();
		let actual = self.read_state()?;
		if actual != expected {
			debug!("state id mismatch: expected {}, read {}", expected, actual);
			return Err(XferError::Desync { expected, actual }.into());
		}
		Ok(())
	}

	/// Pulse reset and check the board reports state 0.
	pub fn reset(&mut self) -> crate::AResult<()> {
		self.ch.out_bit(self.layout.clock, false)?;
		self.ch.out_bit(self.layout.reset, true)?;
		self.ch.delay(CLOCK_DELAY);
		self.ch.out_bit(self.layout.reset, false)?;
		self.expected = 0;
		self.check_state()
	}

	fn pulse_clock(&mut self) -> crate::AResult<()> {
		self.ch.out_bit(self.layout.clock, true)?;
		self.ch.delay(CLOCK_DELAY);
		// the slice must still be on the data lines here
		self.ch.out_bit(self.layout.clock, false)?;
		self.expected = self.expected.wrapping_add(1);
		Ok(())
	}

	fn latch(&mut self, value: u32) -> crate::AResult<()> {
		self.ch.out(value, self.layout.data_out)?;
		self.pulse_clock()
	}

	fn start(&mut self, write: bool, word_address: u32) -> crate::AResult<()> {
		ensure!((word_address as u64) < 1u64 << self.geometry.address_width,
			"word address 0x{:x} beyond {} address bits", word_address, self.geometry.address_width
		);
		self.ch.out_bit(self.layout.write, write)?;
		self.reset()?;
		for s in slices(word_address, self.geometry.address_width, self.layout.data_out.width()) {
			self.latch(s)?;
		}
		self.check_state()
	}

	fn poll_ready(&mut self) -> crate::AResult<()> {
		let expected = self.expected & self.state_mask();
		for _ in 0..self.flash_polls {
			if self.read_state()? == expected {
				return Ok(());
			}
			self.ch.delay(self.poll_delay);
		}
		Err(XferError::Timeout { what: "flash write", polls: self.flash_polls }.into())
	}

	/// Write one word (already in wire order) to `word_address`.
	pub fn write_word(&mut self, word_address: u32, value: u32) -> crate::AResult<()> {
		self.start(true, word_address)?;
		let data = slices(value, self.geometry.data_width, self.layout.data_out.width());
		let last = data.len() - 1;
		for (i, s) in data.into_iter().enumerate() {
			self.latch(s)?;
			match self.geometry.kind {
				ChannelKind::Ram => self.check_state()?,
				ChannelKind::PeripheralBus if i == last => self.check_state()?,
				ChannelKind::Flash if i == last => self.poll_ready()?,
				_ => (),
			}
		}
		trace!("wrote 0x{:x} to word 0x{:x}", value, word_address);
		self.reset()
	}

	/// Read one word (in wire order) from `word_address`.
	pub fn read_word(&mut self, word_address: u32) -> crate::AResult<u32> {
		self.start(false, word_address)?;
		let field_width = self.layout.data_in.width();
		let count = slice_count(self.geometry.data_width, field_width);
		let mut data = Vec::with_capacity(count);
		for _ in 0..count {
			// the board presents the next slice after each clock
			data.push(self.ch.inp(self.layout.data_in)?);
			self.pulse_clock()?;
			if self.geometry.kind == ChannelKind::Ram {
				self.check_state()?;
			}
		}
		if self.geometry.kind != ChannelKind::Ram {
			self.check_state()?;
		}
		let top_bits = self.geometry.data_width as u32 - (count as u32 - 1) * field_width as u32;
		data[0] &= (1u32 << top_bits) - 1;
		let value = join_slices(&data, field_width);
		trace!("read 0x{:x} from word 0x{:x}", value, word_address);
		self.reset()?;
		Ok(value)
	}

	fn probe(&mut self, pattern: u32) -> crate::AResult<()> {
		self.ch.out_bit(self.layout.write, false)?;
		self.reset()?;
		self.latch(pattern & self.layout.data_out.value_mask())?;
		self.check_state()
	}

	/// Probe the handshake `rounds` times (reset, one latch, check) and
	/// return the fraction that succeeded.
	pub fn self_test(&mut self, rounds: usize) -> crate::AResult<f32> {
		if rounds == 0 {
			return Ok(1.0);
		}
		let mut passed = 0usize;
		for round in 0..rounds {
			let pattern = if round % 2 == 0 { 0x5 } else { 0xa };
			match self.probe(pattern) {
				Ok(()) => passed += 1,
				Err(e) => {
					if let Some(XferError::TransportAbsent { .. }) = e.downcast_ref::<XferError>() {
						return Err(e);
					}
					trace!("self test round {} failed: {}", round, e);
				},
			}
		}
		// leave the board idle; a vanished port fails the whole self test
		if let Err(e) = self.reset() {
			if let Some(XferError::TransportAbsent { .. }) = e.downcast_ref::<XferError>() {
				return Err(e);
			}
			trace!("reset after self test failed: {}", e);
		}
		Ok(passed as f32 / rounds as f32)
	}
}

impl<'a, R: Registers> WordAccess for NarrowChannel<'a, R> {
	fn geometry(&self) -> &Geometry {
		&self.geometry
	}

	fn write_word(&mut self, word_address: u32, value: u32) -> crate::AResult<()> {
		NarrowChannel::write_word(self, word_address, value)
	}

	fn read_word(&mut self, word_address: u32) -> crate::AResult<u32> {
		NarrowChannel::read_word(self, word_address)
	}

	fn self_test(&mut self, rounds: usize) -> crate::AResult<f32> {
		NarrowChannel::self_test(self, rounds)
	}
}
