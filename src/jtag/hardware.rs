use std::time::Duration;

use crate::port::{
	reliable_sleep,
	BitChannel,
	Registers,
};

const TCK_EDGE: Duration = Duration::from_nanos(500);

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct TapPins {
	pub tck: bool,
	pub tms: bool,
	pub tdi: bool,
}

pub trait Hardware {
	fn set_pins(&mut self, pins: TapPins) -> crate::AResult<()>;
	fn read_tdo(&mut self) -> crate::AResult<bool>;

	// delay for (at least) one clock edge
	fn delay(&mut self) {
		reliable_sleep(TCK_EDGE);
	}
}

impl<'a, H: ?Sized + Hardware> Hardware for &'a mut H {
	fn set_pins(&mut self, pins: TapPins) -> crate::AResult<()> {
		H::set_pins(*self, pins)
	}

	fn read_tdo(&mut self) -> crate::AResult<bool> {
		H::read_tdo(*self)
	}

	fn delay(&mut self) {
		H::delay(*self)
	}
}

/// Positions of the JTAG signals in the 24-bit port register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct JtagLayout {
	pub tck: u8,
	pub tms: u8,
	pub tdi: u8,
	pub tdo: u8,
}

/// JTAG pins bit-banged through a `BitChannel`.
pub struct ChannelTap<'a, R: Registers> {
	ch: &'a mut BitChannel<R>,
	layout: JtagLayout,
}

impl<'a, R: Registers> ChannelTap<'a, R> {
	pub fn new(ch: &'a mut BitChannel<R>, layout: JtagLayout) -> Self {
		ChannelTap { ch, layout }
	}
}

impl<'a, R: Registers> Hardware for ChannelTap<'a, R> {
	fn set_pins(&mut self, pins: TapPins) -> crate::AResult<()> {
		// TMS/TDI settle while TCK is low
		if !pins.tck {
			self.ch.out_bit(self.layout.tck, false)?;
		}
		self.ch.out_bit(self.layout.tms, pins.tms)?;
		self.ch.out_bit(self.layout.tdi, pins.tdi)?;
		if pins.tck {
			self.ch.out_bit(self.layout.tck, true)?;
		}
		Ok(())
	}

	fn read_tdo(&mut self) -> crate::AResult<bool> {
		self.ch.inp_bit(self.layout.tdo)
	}

	fn delay(&mut self) {
		self.ch.delay(TCK_EDGE);
	}
}
