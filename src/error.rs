use std::fmt;

use failure::Fail;

use crate::jtag::TapState;

/// How bad a failure is for the surrounding transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	Info,
	/// recoverable, reported
	Minor,
	/// operation aborted; the transfer loop may continue with the next record
	Major,
	/// the transport is unusable
	Fatal,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			Severity::Info => "info",
			Severity::Minor => "minor",
			Severity::Major => "major",
			Severity::Fatal => "fatal",
		};
		f.write_str(s)
	}
}

/// Structured protocol failures; everything else is plain context.
#[derive(Debug, Fail)]
pub enum XferError {
	#[fail(display = "lost synchronization with board state machine: expected state {}, read {}", expected, actual)]
	Desync {
		expected: u32,
		actual: u32,
	},

	#[fail(display = "{} did not finish after {} polls", what, polls)]
	Timeout {
		what: &'static str,
		polls: usize,
	},

	#[fail(display = "range 0x{:x}+0x{:x} is not aligned to {}-byte words", address, length, stride)]
	Alignment {
		address: u32,
		length: usize,
		stride: usize,
	},

	#[fail(display = "hex record checksum mismatch at 0x{:x}: expected 0x{:02x}, found 0x{:02x}", address, expected, found)]
	Checksum {
		address: u32,
		expected: u8,
		found: u8,
	},

	#[fail(display = "malformed input: {}", _0)]
	Malformed(String),

	#[fail(display = "boundary scan drove address 0x{:x}, but read back 0x{:x}", expected, actual)]
	AddressMismatch {
		expected: u32,
		actual: u32,
	},

	#[fail(display = "illegal TAP transition {:?} -> {:?}", from, to)]
	IllegalTransition {
		from: TapState,
		to: TapState,
	},

	#[fail(display = "transport not responding: wrote 0x{:06x}, read back 0x{:06x}", written, read)]
	TransportAbsent {
		written: u32,
		read: u32,
	},

	#[fail(display = "unsupported width: {}", _0)]
	BadWidth(String),
}

impl XferError {
	pub fn severity(&self) -> Severity {
		match self {
			XferError::Checksum { .. } => Severity::Minor,
			XferError::Desync { .. } => Severity::Major,
			XferError::Timeout { .. } => Severity::Major,
			XferError::Alignment { .. } => Severity::Major,
			XferError::Malformed(_) => Severity::Major,
			XferError::AddressMismatch { .. } => Severity::Major,
			XferError::IllegalTransition { .. } => Severity::Major,
			XferError::BadWidth(_) => Severity::Major,
			XferError::TransportAbsent { .. } => Severity::Fatal,
		}
	}
}

/// Severity of an arbitrary error; anything not from the protocol layer
/// (I/O, OS) is treated as major.
pub fn severity_of(e: &failure::Error) -> Severity {
	match e.downcast_ref::<XferError>() {
		Some(x) => x.severity(),
		None => Severity::Major,
	}
}

/// Looks through context wrappers for a structured failure.
pub fn find_xfer_error(e: &failure::Error) -> Option<&XferError> {
	e.iter_chain().filter_map(|c| c.downcast_ref::<XferError>()).next()
}
