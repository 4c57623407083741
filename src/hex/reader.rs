use std::io;

use failure::Fail;

use super::{
	HexFormat,
	HexRecord,
	RecordKind,
};
use crate::XferError;

/// Streams records out of a hex file, keeping the running base address
/// set by extended address records.
pub struct HexReader<R: io::BufRead> {
	lines: io::Lines<R>,
	format: Option<HexFormat>,
	base_address: u32,
	address_mask: u32,
	line_number: usize,
	finished: bool,
}

impl<R: io::BufRead> HexReader<R> {
	/// detect the format of each line from its start character
	pub fn new(input: R) -> Self {
		HexReader {
			lines: input.lines(),
			format: None,
			base_address: 0,
			address_mask: !0,
			line_number: 0,
			finished: false,
		}
	}

	/// only accept lines of `format`
	pub fn with_format(mut self, format: HexFormat) -> Self {
		self.format = Some(format);
		self
	}

	/// mask applied to every effective address
	pub fn with_address_mask(mut self, mask: u32) -> Self {
		self.address_mask = mask;
		self
	}

	pub fn base_address(&self) -> u32 {
		self.base_address
	}

	pub fn line_number(&self) -> usize {
		self.line_number
	}

	fn next_record(&mut self) -> Option<crate::AResult<HexRecord>> {
		loop {
			let line = match self.lines.next()? {
				Ok(line) => line,
				Err(e) => return Some(Err(e.into())),
			};
			self.line_number += 1;
			if line.trim().is_empty() {
				continue;
			}

			let parsed = match self.format {
				Some(format) => HexRecord::parse_format(&line, format),
				None => HexRecord::parse(&line),
			};
			let mut record = match parsed {
				Ok(r) => r,
				Err(e) => {
					let msg = format!("line {}: {}", self.line_number, e);
					return Some(Err(failure::Error::from(e.context(msg))));
				},
			};

			record.base_address = self.base_address;
			record.address_mask = self.address_mask;
			if record.is_valid() {
				if let Some(base) = record.extended_base() {
					trace!("line {}: base address now 0x{:08x}", self.line_number, base);
					self.base_address = base;
				}
			}
			if record.kind() == RecordKind::EndOfFile {
				self.finished = true;
			}
			return Some(Ok(record));
		}
	}

	/// all records up to and including the end-of-file record
	pub fn read_all(self) -> crate::AResult<Vec<HexRecord>> {
		self.collect()
	}

	/// `(address, bytes)` of every data record; any record with a bad
	/// checksum fails the whole read
	pub fn data_chunks(self) -> crate::AResult<Vec<(u32, Vec<u8>)>> {
		let mut chunks = Vec::new();
		for record in self {
			let record = record?;
			if !record.is_valid() {
				return Err(XferError::Checksum {
					address: record.address(),
					expected: record.compute_checksum(),
					found: record.checksum,
				}.into());
			}
			if record.is_data() {
				chunks.push((record.address(), record.bytes));
			}
		}
		Ok(chunks)
	}
}

impl<R: io::BufRead> Iterator for HexReader<R> {
	type Item = crate::AResult<HexRecord>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.finished {
			return None;
		}
		let result = self.next_record();
		if let Some(Err(_)) = result {
			self.finished = true;
		}
		result
	}
}
