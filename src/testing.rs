//! Simulated hardware for unit tests.

use std::collections::HashMap;
use std::time::Duration;

use crate::bits::BitVector;
use crate::channel::{
	slice_count,
	slices,
	ChannelLayout,
	Geometry,
};
use crate::jtag::{
	BsdrLayout,
	Hardware,
	JtagLayout,
	PinCells,
	ScanPath,
	TapPins,
	TapState,
};
use crate::port::{
	BitField,
	Register,
	Registers,
};

/// Port whose data and control registers keep what was written.
#[derive(Default)]
pub struct LatchPort {
	pub data: u8,
	pub status: u8,
	pub control: u8,
	/// reads of data/control return 0, like a missing port
	pub stuck: bool,
	pub reads: usize,
}

impl Registers for LatchPort {
	fn write_register(&mut self, reg: Register, value: u8) -> crate::AResult<()> {
		match reg {
			Register::Data => self.data = value,
			Register::Control => self.control = value,
			Register::Status => bail!("status is read-only"),
		}
		Ok(())
	}

	fn read_register(&mut self, reg: Register) -> crate::AResult<u8> {
		self.reads += 1;
		Ok(match reg {
			_ if self.stuck && reg != Register::Status => 0,
			Register::Data => self.data,
			Register::Status => self.status,
			Register::Control => self.control,
		})
	}

	fn delay(&mut self, _duration: Duration) {}
}

/// data out 0..=3, clock 4, reset 5, write 6; state in status bits 0..=3,
/// data in status bits 4..=7
pub fn test_layout() -> ChannelLayout {
	ChannelLayout {
		clock: 4,
		reset: 5,
		write: 6,
		data_out: BitField::new(0, 3),
		data_in: BitField::new(12, 15),
		state: BitField::new(8, 11),
	}
}

/// Board side of the narrow channel protocol, with a word memory.
pub struct MockBoard {
	layout: ChannelLayout,
	address_width: u8,
	data_width: u8,
	data: u8,
	control: u8,
	clock: bool,
	state: u32,
	address: u64,
	value: u64,
	pending: bool,
	busy: usize,
	edges: usize,

	pub memory: HashMap<u32, u32>,
	pub word_writes: usize,
	/// register reads and writes
	pub ops: usize,
	pub delays: Vec<Duration>,
	/// ignore this rising clock edge (counted from 0)
	pub drop_clock: Option<usize>,
	/// status always shows this state
	pub stuck_state: Option<u32>,
	/// status reads showing "busy" after each committed word
	pub busy_polls: usize,
	/// register writes after this many are lost and reads float high
	pub unplug_after_writes: Option<usize>,
	writes: usize,
}

impl MockBoard {
	pub fn new(layout: ChannelLayout, geometry: Geometry) -> Self {
		MockBoard {
			layout,
			address_width: geometry.address_width,
			data_width: geometry.data_width,
			data: 0,
			control: 0,
			clock: false,
			state: 0,
			address: 0,
			value: 0,
			pending: false,
			busy: 0,
			edges: 0,
			memory: HashMap::new(),
			word_writes: 0,
			ops: 0,
			delays: Vec::new(),
			drop_clock: None,
			stuck_state: None,
			busy_polls: 0,
			unplug_after_writes: None,
			writes: 0,
		}
	}

	fn unplugged(&self) -> bool {
		self.unplug_after_writes.map_or(false, |n| self.writes > n)
	}

	fn address_slices(&self) -> u32 {
		slice_count(self.address_width, self.layout.data_out.width()) as u32
	}

	fn output(&self) -> u32 {
		(self.data as u32) << Register::Data.shift() | (self.control as u32) << Register::Control.shift()
	}

	fn step(&mut self) {
		let out = self.output();
		let bit = |pos: u8| 0 != (out >> pos) & 1;
		let clock = bit(self.layout.clock);
		let write = bit(self.layout.write);

		if bit(self.layout.reset) {
			self.state = 0;
			self.address = 0;
			self.value = 0;
			self.pending = false;
			self.busy = 0;
			self.clock = clock;
			return;
		}

		if clock && !self.clock {
			let edge = self.edges;
			self.edges += 1;
			if self.drop_clock != Some(edge) {
				let width = self.layout.data_out.width();
				let slice = self.layout.data_out.extract(out) as u64;
				if self.state < self.address_slices() {
					self.address = (self.address << width | slice) & ((1u64 << self.address_width) - 1);
				} else if write {
					self.value = (self.value << width | slice) & ((1u64 << self.data_width) - 1);
				}
				self.state += 1;
				let data_slices = slice_count(self.data_width, width) as u32;
				if write && self.state == self.address_slices() + data_slices {
					self.pending = true;
				}
			}
		} else if !clock && self.clock && self.pending {
			self.memory.insert(self.address as u32, self.value as u32);
			self.word_writes += 1;
			self.pending = false;
			self.busy = self.busy_polls;
		}
		self.clock = clock;
	}

	fn status(&mut self) -> u8 {
		let state = if self.busy > 0 {
			self.busy -= 1;
			self.state.wrapping_sub(1)
		} else {
			self.state
		};
		let state = self.stuck_state.unwrap_or(state);

		let mut slice = 0;
		if self.state >= self.address_slices() {
			let index = (self.state - self.address_slices()) as usize;
			let word = self.memory.get(&(self.address as u32)).cloned().unwrap_or(0);
			let pieces = slices(word, self.data_width, self.layout.data_in.width());
			slice = pieces.get(index).cloned().unwrap_or(0);
		}

		let reg = self.layout.data_in.insert(self.layout.state.insert(0, state), slice);
		(reg >> Register::Status.shift()) as u8
	}
}

impl Registers for MockBoard {
	fn write_register(&mut self, reg: Register, value: u8) -> crate::AResult<()> {
		self.ops += 1;
		self.writes += 1;
		if self.unplugged() {
			return Ok(());
		}
		match reg {
			Register::Data => self.data = value,
			Register::Control => self.control = value,
			Register::Status => bail!("status is read-only"),
		}
		self.step();
		Ok(())
	}

	fn read_register(&mut self, reg: Register) -> crate::AResult<u8> {
		self.ops += 1;
		if self.unplugged() {
			return Ok(0xff);
		}
		Ok(match reg {
			Register::Data => self.data,
			Register::Status => self.status(),
			Register::Control => self.control,
		})
	}

	fn delay(&mut self, duration: Duration) {
		self.delays.push(duration);
	}
}

/// One TAP with a 4-bit instruction register, IDCODE (0b0001) and BYPASS.
pub struct TapDevice {
	pub state: TapState,
	pub idcode: u32,
	pub ir: u8,
	pins: TapPins,
	ir_shift: Vec<bool>,
	dr_shift: Vec<bool>,
	pub rising_edges: usize,
}

pub const TEST_IR_LEN: usize = 4;
pub const TEST_IDCODE_IR: u8 = 0b0001;

impl TapDevice {
	pub fn new(idcode: u32) -> Self {
		TapDevice {
			// power-up state is unknown to the host
			state: TapState::ShiftDr,
			idcode,
			ir: TEST_IDCODE_IR,
			pins: TapPins::default(),
			ir_shift: Vec::new(),
			dr_shift: Vec::new(),
			rising_edges: 0,
		}
	}

	fn rising_edge(&mut self, tms: bool, tdi: bool) {
		self.rising_edges += 1;
		match self.state {
			TapState::Reset => self.ir = TEST_IDCODE_IR,
			TapState::CaptureIr => {
				// 01 pattern as required by 1149.1
				self.ir_shift = (0..TEST_IR_LEN).map(|i| i == 0).collect();
			},
			TapState::ShiftIr => {
				self.ir_shift.push(tdi);
				self.ir_shift.remove(0);
			},
			TapState::UpdateIr => {
				self.ir = self.ir_shift.iter().enumerate().fold(0, |acc, (i, &b)| acc | (b as u8) << i);
			},
			TapState::CaptureDr => {
				self.dr_shift = if self.ir == TEST_IDCODE_IR {
					(0..32).map(|i| 0 != (self.idcode >> i) & 1).collect()
				} else {
					vec![false]
				};
			},
			TapState::ShiftDr => {
				self.dr_shift.push(tdi);
				self.dr_shift.remove(0);
			},
			_ => (),
		}
		self.state = self.state.next(tms);
	}
}

impl Hardware for TapDevice {
	fn set_pins(&mut self, pins: TapPins) -> crate::AResult<()> {
		if pins.tck && !self.pins.tck {
			self.rising_edge(pins.tms, pins.tdi);
		}
		self.pins = pins;
		Ok(())
	}

	fn read_tdo(&mut self) -> crate::AResult<bool> {
		Ok(match self.state {
			TapState::ShiftIr => self.ir_shift.first().cloned().unwrap_or(false),
			TapState::ShiftDr => self.dr_shift.first().cloned().unwrap_or(false),
			_ => false,
		})
	}

	fn delay(&mut self) {}
}

/// `TapDevice` wired to port register bits as given by `layout`.
pub struct TapPort {
	pub device: TapDevice,
	layout: JtagLayout,
	data: u8,
	control: u8,
}

impl TapPort {
	pub fn new(idcode: u32, layout: JtagLayout) -> Self {
		TapPort {
			device: TapDevice::new(idcode),
			layout,
			data: 0,
			control: 0,
		}
	}

	fn pin(&self, pos: u8) -> bool {
		let out = (self.data as u32) << Register::Data.shift() | (self.control as u32) << Register::Control.shift();
		0 != (out >> pos) & 1
	}
}

impl Registers for TapPort {
	fn write_register(&mut self, reg: Register, value: u8) -> crate::AResult<()> {
		match reg {
			Register::Data => self.data = value,
			Register::Control => self.control = value,
			Register::Status => bail!("status is read-only"),
		}
		let pins = TapPins {
			tck: self.pin(self.layout.tck),
			tms: self.pin(self.layout.tms),
			tdi: self.pin(self.layout.tdi),
		};
		self.device.set_pins(pins)
	}

	fn read_register(&mut self, reg: Register) -> crate::AResult<u8> {
		Ok(match reg {
			Register::Data => self.data,
			Register::Control => self.control,
			Register::Status => {
				let tdo = self.device.read_tdo()? as u32;
				(tdo << self.layout.tdo >> Register::Status.shift()) as u8
			},
		})
	}

	fn delay(&mut self, _duration: Duration) {}
}

/// Scan path to an SRAM behind a boundary-scan chip. Captured pins show
/// what the current frame drives; undriven data pins show the memory at
/// the driven address while `oe` and `ce` are low, and a frame with `ce`
/// and `we` low writes the memory.
pub struct ScanRam {
	layout: BsdrLayout,
	pub instruction: Option<u64>,
	pub memory: HashMap<u32, u32>,
	pub frames: usize,
	/// xor applied to the captured address
	pub address_fault: u32,
}

impl ScanRam {
	pub fn new(layout: BsdrLayout) -> Self {
		ScanRam {
			layout,
			instruction: None,
			memory: HashMap::new(),
			frames: 0,
			address_fault: 0,
		}
	}

	fn driven(layout: &BsdrLayout, frame: &BitVector, pin: &PinCells) -> bool {
		match pin.enable {
			Some(e) => frame.get(e) == layout.enable_drives,
			None => true,
		}
	}

	fn bus(frame: &BitVector, pins: &[PinCells], cell: impl Fn(&PinCells) -> usize) -> u32 {
		pins.iter().enumerate().fold(0, |acc, (i, p)| acc | (frame.get(cell(p)) as u32) << i)
	}
}

impl ScanPath for ScanRam {
	fn load_instruction(&mut self, instruction: &BitVector) -> crate::AResult<()> {
		self.instruction = Some(instruction.value(0..instruction.len()));
		Ok(())
	}

	fn scan_data(&mut self, frame: &BitVector) -> crate::AResult<BitVector> {
		ensure!(frame.len() == self.layout.length, "frame of {} bits, register has {}", frame.len(), self.layout.length);
		ensure!(self.instruction == Some(self.layout.extest), "EXTEST not loaded");
		self.frames += 1;

		let layout = self.layout.clone();
		let address = ScanRam::bus(frame, &layout.address, |p| p.output);
		let data_driven = layout.data.iter().all(|p| ScanRam::driven(&layout, frame, p));
		let driven_data = ScanRam::bus(frame, &layout.data, |p| p.output);
		let ce = frame.get(layout.ce.output);
		let oe = frame.get(layout.oe.output);
		let we = frame.get(layout.we.output);

		let data = if data_driven {
			driven_data
		} else if !ce && !oe {
			self.memory.get(&address).cloned().unwrap_or(0)
		} else {
			0
		};
		if !ce && !we && data_driven {
			self.memory.insert(address, driven_data);
		}

		let mut captured = frame.clone();
		let captured_address = address ^ self.address_fault;
		for (i, p) in layout.address.iter().enumerate() {
			captured.set(p.input, 0 != (captured_address >> i) & 1);
		}
		for (i, p) in layout.data.iter().enumerate() {
			captured.set(p.input, 0 != (data >> i) & 1);
		}
		Ok(captured)
	}
}

/// 16 address and 8 data pins, then CE, OE, WE; three cells per pin
/// (output, input, enable). EXTEST is 0 in a 5-bit instruction register.
pub fn test_bsdr_layout() -> BsdrLayout {
	let pin = |k: usize| PinCells {
		enable: Some(3 * k + 2),
		output: 3 * k,
		input: 3 * k + 1,
	};
	BsdrLayout {
		length: 3 * 27,
		ir_length: 5,
		extest: 0,
		address: (0..16).map(pin).collect(),
		data: (16..24).map(pin).collect(),
		ce: pin(24),
		oe: pin(25),
		we: pin(26),
		enable_drives: true,
	}
}
