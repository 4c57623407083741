//! Memory access by driving a chip's pins through its boundary-scan
//! register (EXTEST).

use std::iter;

use crate::bits::BitVector;
use crate::channel::{
	Geometry,
	WordAccess,
};
use crate::XferError;

/// Instruction and data register access of a scan chain.
pub trait ScanPath {
	fn load_instruction(&mut self, instruction: &BitVector) -> crate::AResult<()>;

	/// shift `frame` through the data register, returning the captured bits
	fn scan_data(&mut self, frame: &BitVector) -> crate::AResult<BitVector>;
}

impl<'a, S: ?Sized + ScanPath> ScanPath for &'a mut S {
	fn load_instruction(&mut self, instruction: &BitVector) -> crate::AResult<()> {
		S::load_instruction(*self, instruction)
	}

	fn scan_data(&mut self, frame: &BitVector) -> crate::AResult<BitVector> {
		S::scan_data(*self, frame)
	}
}

/// Boundary-scan cells of one pin.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PinCells {
	/// output enable cell; `None` for pins that always drive
	pub enable: Option<usize>,
	pub output: usize,
	pub input: usize,
}

/// Where a memory's pins sit in the boundary-scan register.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BsdrLayout {
	/// register length in bits
	pub length: usize,
	pub ir_length: usize,
	pub extest: u64,
	/// least significant pin first
	pub address: Vec<PinCells>,
	pub data: Vec<PinCells>,
	pub ce: PinCells,
	pub oe: PinCells,
	pub we: PinCells,
	/// level of an enable cell that turns the output driver on
	pub enable_drives: bool,
}

impl BsdrLayout {
	fn pins(&self) -> impl Iterator<Item = &PinCells> + '_ {
		self.address.iter()
			.chain(self.data.iter())
			.chain(iter::once(&self.ce))
			.chain(iter::once(&self.oe))
			.chain(iter::once(&self.we))
	}

	pub fn validate(&self) -> crate::AResult<()> {
		ensure!(self.ir_length > 0 && self.ir_length <= 64, "instruction length {} not in 1..=64", self.ir_length);
		ensure!(self.address.len() <= 32, "{} address pins, at most 32 supported", self.address.len());
		ensure!(self.data.len() <= 32, "{} data pins, at most 32 supported", self.data.len());
		for pin in self.pins() {
			let cells = [Some(pin.output), Some(pin.input), pin.enable];
			for &cell in cells.iter() {
				if let Some(cell) = cell {
					ensure!(cell < self.length, "cell {} outside the {}-bit register", cell, self.length);
				}
			}
		}
		Ok(())
	}
}

fn bus_mask(pins: usize) -> u32 {
	if pins >= 32 { !0 } else { (1u32 << pins) - 1 }
}

/// RAM access through EXTEST: every shift drives the pins from the frame
/// built here and captures what the pins show.
///
/// Control signals are active low.
pub struct BoundaryScan<S: ScanPath> {
	scan: S,
	layout: BsdrLayout,
	geometry: Geometry,
	frame: BitVector,
	captured: BitVector,
	extest_loaded: bool,
}

impl<S: ScanPath> BoundaryScan<S> {
	pub fn new(scan: S, layout: BsdrLayout, geometry: Geometry) -> crate::AResult<Self> {
		layout.validate()?;
		if layout.data.len() != geometry.data_width as usize {
			return Err(XferError::BadWidth(format!(
				"{} data pins for {}-bit words", layout.data.len(), geometry.data_width
			)).into());
		}
		ensure!(layout.address.len() >= geometry.address_width as usize,
			"{} address pins for {} address bits", layout.address.len(), geometry.address_width
		);

		let mut bs = BoundaryScan {
			scan,
			frame: BitVector::new(layout.length),
			captured: BitVector::new(layout.length),
			layout,
			geometry,
			extest_loaded: false,
		};
		// data bus floating, memory deselected
		bs.float_data();
		bs.set_controls(true, true, true);
		Ok(bs)
	}

	pub fn scan_path(&mut self) -> &mut S {
		&mut self.scan
	}

	pub fn into_scan_path(self) -> S {
		self.scan
	}

	fn drive(&mut self, pin: PinCells, value: bool) {
		if let Some(enable) = pin.enable {
			self.frame.set(enable, self.layout.enable_drives);
		}
		self.frame.set(pin.output, value);
	}

	fn drive_bus(&mut self, pins: &[PinCells], value: u32) {
		for (i, &pin) in pins.iter().enumerate() {
			self.drive(pin, 0 != (value >> i) & 1);
		}
	}

	fn read_bus(&self, pins: &[PinCells]) -> u32 {
		pins.iter().enumerate().fold(0, |acc, (i, pin)| acc | (self.captured.get(pin.input) as u32) << i)
	}

	pub fn set_address(&mut self, address: u32) {
		let pins = self.layout.address.clone();
		self.drive_bus(&pins, address);
	}

	pub fn set_data(&mut self, data: u32) {
		let pins = self.layout.data.clone();
		self.drive_bus(&pins, data);
	}

	/// turn off the data drivers so the memory can drive the bus
	pub fn float_data(&mut self) {
		let off = !self.layout.enable_drives;
		for pin in &self.layout.data {
			if let Some(enable) = pin.enable {
				self.frame.set(enable, off);
			}
		}
	}

	/// levels of chip enable, output enable and write enable
	pub fn set_controls(&mut self, ce: bool, oe: bool, we: bool) {
		self.drive(self.layout.ce, ce);
		self.drive(self.layout.oe, oe);
		self.drive(self.layout.we, we);
	}

	fn enter_extest(&mut self) -> crate::AResult<()> {
		if !self.extest_loaded {
			let instruction = BitVector::from_value(self.layout.extest, self.layout.ir_length);
			self.scan.load_instruction(&instruction)?;
			debug!("EXTEST (0x{:x}) loaded", self.layout.extest);
			self.extest_loaded = true;
		}
		Ok(())
	}

	/// shift the frame in, capturing the pins
	pub fn shift(&mut self) -> crate::AResult<()> {
		self.enter_extest()?;
		let captured = self.scan.scan_data(&self.frame)?;
		ensure!(captured.len() == self.layout.length,
			"captured {} bits from a {}-bit register", captured.len(), self.layout.length
		);
		self.captured = captured;
		Ok(())
	}

	/// address pins as captured by the last shift
	pub fn get_address(&self) -> u32 {
		self.read_bus(&self.layout.address)
	}

	/// data pins as captured by the last shift
	pub fn get_data(&self) -> u32 {
		self.read_bus(&self.layout.data)
	}

	fn check_address(&self, expected: u32) -> crate::AResult<()> {
		let mask = bus_mask(self.layout.address.len());
		let actual = self.get_address() & mask;
		if actual != expected & mask {
			return Err(XferError::AddressMismatch { expected: expected & mask, actual }.into());
		}
		Ok(())
	}

	/// Write one word: set up address and data with WE high, pulse WE low,
	/// raise it again; the pins must show the address after each step.
	pub fn write_ram(&mut self, address: u32, value: u32) -> crate::AResult<()> {
		self.set_address(address);
		self.set_data(value);
		self.set_controls(false, true, true);
		self.shift()?;

		self.set_controls(false, true, false);
		self.shift()?;
		self.check_address(address)?;

		self.set_controls(false, true, true);
		self.shift()?;
		self.check_address(address)?;
		trace!("wrote 0x{:x} to 0x{:x} by boundary scan", value, address);
		Ok(())
	}

	/// Read one word with OE low; the data comes from the second capture.
	pub fn read_ram(&mut self, address: u32) -> crate::AResult<u32> {
		self.set_address(address);
		self.float_data();
		self.set_controls(false, false, true);
		self.shift()?;
		self.shift()?;
		self.check_address(address)?;
		let value = self.get_data() & bus_mask(self.layout.data.len());

		self.set_controls(false, true, true);
		self.shift()?;
		trace!("read 0x{:x} from 0x{:x} by boundary scan", value, address);
		Ok(value)
	}
}

impl<S: ScanPath> WordAccess for BoundaryScan<S> {
	fn geometry(&self) -> &Geometry {
		&self.geometry
	}

	fn write_word(&mut self, word_address: u32, value: u32) -> crate::AResult<()> {
		self.write_ram(word_address, value)
	}

	fn read_word(&mut self, word_address: u32) -> crate::AResult<u32> {
		self.read_ram(word_address)
	}

	// drive alternating address patterns and compare the capture
	fn self_test(&mut self, rounds: usize) -> crate::AResult<f32> {
		if rounds == 0 {
			return Ok(1.0);
		}
		let mask = bus_mask(self.layout.address.len());
		let mut passed = 0usize;
		for round in 0..rounds {
			let pattern = if round % 2 == 0 { 0x5555_5555 } else { 0xaaaa_aaaa } & mask;
			self.set_address(pattern);
			self.shift()?;
			if self.get_address() & mask == pattern {
				passed += 1;
			}
		}
		Ok(passed as f32 / rounds as f32)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::channel::{
		download,
		upload,
		ChannelKind,
	};
	use crate::hex::{
		HexFormat,
		HexReader,
		HexWriter,
	};
	use crate::progress::TransferProgress;
	use crate::testing::{
		test_bsdr_layout,
		ScanRam,
	};

	fn scan() -> BoundaryScan<ScanRam> {
		let layout = test_bsdr_layout();
		let geometry = Geometry::new(16, 8, ChannelKind::Ram).unwrap();
		BoundaryScan::new(ScanRam::new(layout.clone()), layout, geometry).unwrap()
	}

	fn check_mismatch<T: std::fmt::Debug>(r: crate::AResult<T>) {
		match r {
			Ok(v) => panic!("address mismatch not detected, got {:?}", v),
			Err(e) => match e.downcast_ref::<XferError>() {
				Some(XferError::AddressMismatch { expected: 0x1234, actual: 0x1235 }) => (),
				_ => panic!("unexpected error {}", e),
			},
		}
	}

	#[test]
	fn address_loopback() {
		let mut bs = scan();
		bs.set_address(0x1234);
		bs.shift().unwrap();
		assert_eq!(bs.get_address(), 0x1234);
		assert_eq!(bs.scan_path().instruction, Some(0));
	}

	#[test]
	fn ram_round_trip() {
		let mut bs = scan();
		bs.write_ram(0x1234, 0xa5).unwrap();
		assert_eq!(bs.scan_path().memory.get(&0x1234), Some(&0xa5));
		assert_eq!(bs.scan_path().frames, 3);
		assert_eq!(bs.read_ram(0x1234).unwrap(), 0xa5);
		assert_eq!(bs.read_ram(0x1235).unwrap(), 0);
	}

	#[test]
	fn driven_address_mismatch() {
		let mut bs = scan();
		bs.scan_path().address_fault = 1;
		check_mismatch(bs.write_ram(0x1234, 0xa5));
		check_mismatch(bs.read_ram(0x1234));
		assert_eq!(bs.self_test(4).unwrap(), 0.0);
	}

	#[test]
	fn file_transfer() {
		let data: Vec<u8> = (0..40).collect();
		let mut w = HexWriter::new(Vec::new(), HexFormat::Motorola);
		w.write_data(0x100, &data).unwrap();
		let file = String::from_utf8(w.finish().unwrap()).unwrap();

		let mut bs = scan();
		let mut progress = TransferProgress::new();
		let stats = download(&mut bs, HexReader::new(file.as_bytes()), &mut progress).unwrap();
		assert_eq!(stats.words, 40);
		assert_eq!(bs.scan_path().memory.get(&0x127), Some(&39));

		let mut w = HexWriter::new(Vec::new(), HexFormat::Motorola);
		upload(&mut bs, 0x100, 0x127, &mut w, &mut progress).unwrap();
		let back = String::from_utf8(w.finish().unwrap()).unwrap();
		assert_eq!(back, file);
	}

	#[test]
	fn layout_checked() {
		let mut layout = test_bsdr_layout();
		layout.we.output = layout.length;
		let geometry = Geometry::new(16, 8, ChannelKind::Ram).unwrap();
		assert!(BoundaryScan::new(ScanRam::new(layout.clone()), layout, geometry).is_err());

		let layout = test_bsdr_layout();
		let geometry = Geometry::new(16, 16, ChannelKind::Ram).unwrap();
		assert!(BoundaryScan::new(ScanRam::new(layout.clone()), layout, geometry).is_err());
	}
}
