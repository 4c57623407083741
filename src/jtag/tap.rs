use std::collections::VecDeque;
use std::fmt;

use super::{
	Hardware,
	ScanPath,
	TapPins,
};
use crate::bits::BitVector;
use crate::XferError;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum TapState {
	Reset,
	Idle,
	SelectDr,
	CaptureDr,
	ShiftDr,
	Exit1Dr,
	PauseDr,
	Exit2Dr,
	UpdateDr,
	SelectIr,
	CaptureIr,
	ShiftIr,
	Exit1Ir,
	PauseIr,
	Exit2Ir,
	UpdateIr,
}

impl TapState {
	pub const ALL: [TapState; 16] = [
		TapState::Reset,
		TapState::Idle,
		TapState::SelectDr,
		TapState::CaptureDr,
		TapState::ShiftDr,
		TapState::Exit1Dr,
		TapState::PauseDr,
		TapState::Exit2Dr,
		TapState::UpdateDr,
		TapState::SelectIr,
		TapState::CaptureIr,
		TapState::ShiftIr,
		TapState::Exit1Ir,
		TapState::PauseIr,
		TapState::Exit2Ir,
		TapState::UpdateIr,
	];

	/// state after one TCK with the given TMS level
	pub fn next(self, tms: bool) -> TapState {
		use self::TapState::*;
		let (low, high) = match self {
			Reset => (Idle, Reset),
			Idle => (Idle, SelectDr),
			SelectDr => (CaptureDr, SelectIr),
			CaptureDr => (ShiftDr, Exit1Dr),
			ShiftDr => (ShiftDr, Exit1Dr),
			Exit1Dr => (PauseDr, UpdateDr),
			PauseDr => (PauseDr, Exit2Dr),
			Exit2Dr => (ShiftDr, UpdateDr),
			UpdateDr => (Idle, SelectDr),
			SelectIr => (CaptureIr, Reset),
			CaptureIr => (ShiftIr, Exit1Ir),
			ShiftIr => (ShiftIr, Exit1Ir),
			Exit1Ir => (PauseIr, UpdateIr),
			PauseIr => (PauseIr, Exit2Ir),
			Exit2Ir => (ShiftIr, UpdateIr),
			UpdateIr => (Idle, SelectDr),
		};
		if tms { high } else { low }
	}

	/// TMS level reaching `to` in a single TCK, if it is a direct successor
	pub fn tms_to(self, to: TapState) -> Option<bool> {
		if self.next(false) == to {
			Some(false)
		} else if self.next(true) == to {
			Some(true)
		} else {
			None
		}
	}

	fn index(self) -> usize {
		self as usize
	}

	/// Shortest list of states leading from `self` to `to` (excluding
	/// `self`, empty if already there).
	pub fn path_to(self, to: TapState) -> Vec<TapState> {
		let mut previous: [Option<TapState>; 16] = [None; 16];
		let mut queue = VecDeque::new();
		queue.push_back(self);
		while let Some(state) = queue.pop_front() {
			if state == to {
				break;
			}
			for &tms in [false, true].iter() {
				let next = state.next(tms);
				if next != self && previous[next.index()].is_none() {
					previous[next.index()] = Some(state);
					queue.push_back(next);
				}
			}
		}

		let mut path = Vec::new();
		let mut state = to;
		while state != self {
			path.push(state);
			state = match previous[state.index()] {
				Some(s) => s,
				// every state is reachable from every other
				None => break,
			};
		}
		path.reverse();
		path
	}
}

impl fmt::Display for TapState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// TMS/TDI sequencing of one TAP controller, tracking its state.
pub struct Tap<H: Hardware> {
	hw: H,
	state: TapState,
}

impl<H: Hardware> Tap<H> {
	/// The controller state is unknown until `init`.
	pub fn new(hw: H) -> Self {
		Tap {
			hw,
			state: TapState::Reset,
		}
	}

	pub fn state(&self) -> TapState {
		self.state
	}

	pub fn hardware(&mut self) -> &mut H {
		&mut self.hw
	}

	pub fn into_hardware(self) -> H {
		self.hw
	}

	// one TCK cycle; TDO is sampled before the rising edge
	fn clock(&mut self, tms: bool, tdi: bool) -> crate::AResult<bool> {
		self.hw.set_pins(TapPins { tck: false, tms, tdi })?;
		self.hw.delay();
		let tdo = self.hw.read_tdo()?;
		self.hw.set_pins(TapPins { tck: true, tms, tdi })?;
		self.hw.delay();
		self.state = self.state.next(tms);
		Ok(tdo)
	}

	/// Five TCKs with TMS high reach Reset from anywhere; then go to Idle.
	pub fn init(&mut self) -> crate::AResult<()> {
		for _ in 0..5 {
			self.clock(true, false)?;
		}
		debug_assert_eq!(self.state, TapState::Reset);
		self.clock(false, false)?;
		debug!("TAP reset, now {}", self.state);
		Ok(())
	}

	/// Step through `states` in order; each must be a direct successor of
	/// the one before (or the same state, for the looping states).
	pub fn go_through_sequence(&mut self, states: &[TapState]) -> crate::AResult<()> {
		for &to in states {
			match self.state.tms_to(to) {
				Some(tms) => {
					self.clock(tms, false)?;
				},
				None => {
					return Err(XferError::IllegalTransition { from: self.state, to }.into());
				},
			}
		}
		Ok(())
	}

	/// go to `to` on the shortest path
	pub fn move_to(&mut self, to: TapState) -> crate::AResult<()> {
		let path = self.state.path_to(to);
		trace!("TAP {} -> {}: {:?}", self.state, to, path);
		self.go_through_sequence(&path)
	}

	/// Shift `bits` through the register, bit 0 first, and return what came
	/// out of TDO. With `exit` the last bit moves on to Exit1.
	pub fn shift(&mut self, bits: &BitVector, exit: bool) -> crate::AResult<BitVector> {
		ensure!(self.state == TapState::ShiftDr || self.state == TapState::ShiftIr,
			"can't shift in TAP state {}", self.state
		);
		ensure!(!bits.is_empty(), "empty shift");
		let last = bits.len() - 1;
		let mut captured = BitVector::new(0);
		for (i, bit) in bits.iter().enumerate() {
			captured.push(self.clock(exit && i == last, bit)?);
		}
		Ok(captured)
	}

	/// Shift `ir` into the instruction register and update it; ends in Idle.
	pub fn load_instruction(&mut self, ir: &BitVector) -> crate::AResult<BitVector> {
		self.move_to(TapState::ShiftIr)?;
		let captured = self.shift(ir, true)?;
		self.go_through_sequence(&[TapState::UpdateIr, TapState::Idle])?;
		Ok(captured)
	}

	/// Shift `dr` through the selected data register and update it; ends in
	/// Idle.
	pub fn scan_data(&mut self, dr: &BitVector) -> crate::AResult<BitVector> {
		self.move_to(TapState::ShiftDr)?;
		let captured = self.shift(dr, true)?;
		self.go_through_sequence(&[TapState::UpdateDr, TapState::Idle])?;
		Ok(captured)
	}

	pub fn read_idcode(&mut self, idcode_instruction: &BitVector) -> crate::AResult<u32> {
		self.load_instruction(idcode_instruction)?;
		let idcode = self.scan_data(&BitVector::new(32))?.value(0..32) as u32;
		info!("IDCODE 0x{:08x}", idcode);
		Ok(idcode)
	}
}

impl<H: Hardware> ScanPath for Tap<H> {
	fn load_instruction(&mut self, instruction: &BitVector) -> crate::AResult<()> {
		Tap::load_instruction(self, instruction)?;
		Ok(())
	}

	fn scan_data(&mut self, frame: &BitVector) -> crate::AResult<BitVector> {
		Tap::scan_data(self, frame)
	}
}
