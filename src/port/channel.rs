use std::fmt;
use std::str;
use std::time::Duration;

use super::{
	Register,
	Registers,
};
use crate::XferError;

/// number of bits in the logical register
pub const REGISTER_BITS: u8 = 24;

/// Inversion mask of a PC parallel port: status bit 7 (BUSY) and control
/// bits 0, 1, 3 (STROBE, AUTOFD, SELECTIN) are inverted by the hardware.
pub const PC_PARPORT_INV_MASK: u32 = 0x0B_8000;

/// Number of `out` calls verified by reading the register back.
pub const DEFAULT_SELF_CHECKS: usize = 100;

/// Inclusive range of bit positions in the logical 24-bit register.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitField {
	pub lo: u8,
	pub hi: u8,
}

impl BitField {
	pub fn new(lo: u8, hi: u8) -> Self {
		assert!(lo <= hi, "bit field {}..={} is reversed", lo, hi);
		assert!(hi < REGISTER_BITS, "bit field {}..={} exceeds the {}-bit register", lo, hi, REGISTER_BITS);
		BitField { lo, hi }
	}

	pub fn bit(pos: u8) -> Self {
		BitField::new(pos, pos)
	}

	pub fn width(&self) -> u8 {
		self.hi - self.lo + 1
	}

	/// mask of the field's bits, not shifted
	pub fn value_mask(&self) -> u32 {
		if self.width() >= 32 { !0 } else { (1u32 << self.width()) - 1 }
	}

	/// mask of the field's bits in register position
	pub fn mask(&self) -> u32 {
		self.value_mask() << self.lo
	}

	pub fn insert(&self, register: u32, value: u32) -> u32 {
		(register & !self.mask()) | ((value & self.value_mask()) << self.lo)
	}

	pub fn extract(&self, register: u32) -> u32 {
		(register >> self.lo) & self.value_mask()
	}

	pub fn touches(&self, reg: Register) -> bool {
		0 != self.mask() & (0xff << reg.shift())
	}
}

impl fmt::Debug for BitField {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "BitField({}..={})", self.lo, self.hi)
	}
}

impl fmt::Display for BitField {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		if self.lo == self.hi {
			write!(f, "{}", self.lo)
		} else {
			write!(f, "{}:{}", self.lo, self.hi)
		}
	}
}

impl str::FromStr for BitField {
	type Err = ::failure::Error;

	// "5" or "0:3" (lo:hi, inclusive)
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (lo, hi) = match s.find(':') {
			None => {
				let pos = with_context!(("invalid bit position {:?}", s), Ok(s.trim().parse::<u8>()?))?;
				(pos, pos)
			},
			Some(sep) => {
				let lo = with_context!(("invalid low bit in {:?}", s), Ok(s[..sep].trim().parse::<u8>()?))?;
				let hi = with_context!(("invalid high bit in {:?}", s), Ok(s[sep + 1..].trim().parse::<u8>()?))?;
				(lo, hi)
			},
		};
		ensure!(lo <= hi, "bit field {:?}: low bit above high bit", s);
		ensure!(hi < REGISTER_BITS, "bit field {:?}: beyond bit {}", s, REGISTER_BITS - 1);
		Ok(BitField { lo, hi })
	}
}

/// Bit-addressable view of a transport's registers.
///
/// Protocol code reads and writes active-high values; `inv_mask` marks the
/// positions the hardware inverts. The first `self_checks` calls to `out`
/// read the register back and fail if it didn't take the value, which is
/// how a missing or misconfigured port gets noticed.
pub struct BitChannel<R: Registers> {
	port: R,
	inv_mask: u32,
	// logical value last written to the writable registers
	shadow: u32,
	checks_remaining: usize,
}

impl<R: Registers> BitChannel<R> {
	pub fn new(mut port: R, inv_mask: u32) -> crate::AResult<Self> {
		let data = port.read_register(Register::Data)? as u32;
		let control = port.read_register(Register::Control)? as u32;
		let physical = data << Register::Data.shift() | control << Register::Control.shift();
		let shadow = physical ^ (inv_mask & writable_mask());

		debug!("bit channel: inversion mask 0x{:06x}, initial output 0x{:06x}", inv_mask, shadow);

		Ok(BitChannel {
			port,
			inv_mask,
			shadow,
			checks_remaining: DEFAULT_SELF_CHECKS,
		})
	}

	pub fn with_self_checks(mut self, count: usize) -> Self {
		self.checks_remaining = count;
		self
	}

	pub fn self_checks_remaining(&self) -> usize {
		self.checks_remaining
	}

	pub fn port(&mut self) -> &mut R {
		&mut self.port
	}

	pub fn into_port(self) -> R {
		self.port
	}

	pub fn delay(&mut self, duration: Duration) {
		self.port.delay(duration)
	}

	pub fn out(&mut self, value: u32, field: BitField) -> crate::AResult<()> {
		assert!(!field.touches(Register::Status), "{:?} overlaps the read-only status register", field);

		let logical = field.insert(self.shadow, value);
		let physical = logical ^ self.inv_mask;
		let check = self.checks_remaining > 0;
		if check {
			self.checks_remaining -= 1;
		}

		for &reg in [Register::Data, Register::Control].iter() {
			if !field.touches(reg) {
				continue;
			}
			let byte = (physical >> reg.shift()) as u8;
			trace!("out {:?} <- 0x{:02x}", reg, byte);
			self.port.write_register(reg, byte)?;

			if check {
				let back = self.port.read_register(reg)?;
				let m = (field.mask() >> reg.shift()) as u8;
				if 0 != (back ^ byte) & m {
					error!("{:?} register didn't keep written value 0x{:02x} (read 0x{:02x})", reg, byte, back);
					return Err(XferError::TransportAbsent {
						written: (byte as u32) << reg.shift(),
						read: (back as u32) << reg.shift(),
					}.into());
				}
			}
		}

		self.shadow = logical;
		Ok(())
	}

	pub fn out_bit(&mut self, pos: u8, value: bool) -> crate::AResult<()> {
		self.out(value as u32, BitField::bit(pos))
	}

	pub fn inp(&mut self, field: BitField) -> crate::AResult<u32> {
		let mut physical = 0u32;
		for &reg in Register::ALL.iter() {
			if field.touches(reg) {
				let byte = self.port.read_register(reg)?;
				trace!("in  {:?} -> 0x{:02x}", reg, byte);
				physical |= (byte as u32) << reg.shift();
			}
		}
		Ok(field.extract(physical ^ self.inv_mask))
	}

	pub fn inp_bit(&mut self, pos: u8) -> crate::AResult<bool> {
		Ok(0 != self.inp(BitField::bit(pos))?)
	}
}

fn writable_mask() -> u32 {
	0xff << Register::Data.shift() | 0xff << Register::Control.shift()
}
