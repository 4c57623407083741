use std::thread;
use std::time::{
	Duration,
	Instant,
};

use crate::AResult;

pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

/// The three 8-bit registers of a PC parallel port (or something emulating
/// one). Together they form one 24-bit logical register:
/// data = bits 0..8, status = bits 8..16, control = bits 16..24.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
	Data,
	Status,
	Control,
}

impl Register {
	pub const ALL: [Register; 3] = [Register::Data, Register::Status, Register::Control];

	pub fn index(self) -> usize {
		match self {
			Register::Data => 0,
			Register::Status => 1,
			Register::Control => 2,
		}
	}

	pub fn from_index(index: usize) -> Option<Self> {
		match index {
			0 => Some(Register::Data),
			1 => Some(Register::Status),
			2 => Some(Register::Control),
			_ => None,
		}
	}

	/// first bit of this register in the 24-bit logical register
	pub fn shift(self) -> u8 {
		(self.index() * 8) as u8
	}

	pub fn is_writable(self) -> bool {
		self != Register::Status
	}
}

/// Raw register access of a transport. Values are physical levels; the
/// inversion mask is applied one layer up in `BitChannel`.
pub trait Registers {
	fn write_register(&mut self, reg: Register, value: u8) -> AResult<()>;
	fn read_register(&mut self, reg: Register) -> AResult<u8>;

	// protocol delays; tests replace this with something that doesn't sleep
	fn delay(&mut self, duration: Duration) {
		reliable_sleep(duration);
	}
}

impl<'a, R: ?Sized + Registers> Registers for &'a mut R {
	fn write_register(&mut self, reg: Register, value: u8) -> AResult<()> {
		R::write_register(*self, reg, value)
	}

	fn read_register(&mut self, reg: Register) -> AResult<u8> {
		R::read_register(*self, reg)
	}

	fn delay(&mut self, duration: Duration) {
		R::delay(*self, duration)
	}
}

impl<R: ?Sized + Registers> Registers for Box<R> {
	fn write_register(&mut self, reg: Register, value: u8) -> AResult<()> {
		R::write_register(&mut **self, reg, value)
	}

	fn read_register(&mut self, reg: Register) -> AResult<u8> {
		R::read_register(&mut **self, reg)
	}

	fn delay(&mut self, duration: Duration) {
		R::delay(&mut **self, duration)
	}
}
