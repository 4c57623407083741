use std::io;

use super::{
	HexFormat,
	HexRecord,
	RecordType,
};

pub const DEFAULT_RECORD_LEN: usize = 16;

/// Writes byte ranges as hex records of one format, inserting extended
/// address records where the format needs them.
pub struct HexWriter<W: io::Write> {
	out: W,
	format: HexFormat,
	record_len: usize,
	// upper 16 bits of the last Intel extended linear address
	upper: Option<u16>,
	// widest address field used so far
	address_bytes: usize,
}

impl<W: io::Write> HexWriter<W> {
	pub fn new(out: W, format: HexFormat) -> Self {
		HexWriter {
			out,
			format,
			record_len: DEFAULT_RECORD_LEN,
			upper: None,
			address_bytes: 2,
		}
	}

	/// payload bytes per data record (1..=250)
	pub fn with_record_len(mut self, record_len: usize) -> Self {
		assert!(record_len > 0 && record_len <= 250, "invalid record length {}", record_len);
		self.record_len = record_len;
		self
	}

	pub fn format(&self) -> HexFormat {
		self.format
	}

	pub fn record_len(&self) -> usize {
		self.record_len
	}

	pub fn write_record(&mut self, record: &HexRecord) -> crate::AResult<()> {
		writeln!(self.out, "{}", record.to_line())?;
		Ok(())
	}

	pub fn write_data(&mut self, address: u32, data: &[u8]) -> crate::AResult<()> {
		let mut address = address;
		let mut rest = data;
		while !rest.is_empty() {
			let mut len = rest.len().min(self.record_len);
			if self.format == HexFormat::Intel {
				let upper = (address >> 16) as u16;
				if self.upper != Some(upper) {
					if self.upper.is_some() || upper != 0 {
						self.write_record(&HexRecord::extended_linear_address(upper))?;
					}
					self.upper = Some(upper);
				}
				// never cross a 64k boundary within one record
				let room = 0x1_0000 - (address & 0xffff) as usize;
				len = len.min(room);
			}

			let record = HexRecord::data(self.format, address, rest[..len].to_vec());
			self.address_bytes = self.address_bytes.max(record.record_type.address_bytes());
			self.write_record(&record)?;

			address = address.wrapping_add(len as u32);
			rest = &rest[len..];
		}
		Ok(())
	}

	/// write the terminating record and return the output
	pub fn finish(mut self) -> crate::AResult<W> {
		let end = match self.format {
			HexFormat::Intel => Some(HexRecord::new(RecordType::IntelEndOfFile, 0, Vec::new())),
			HexFormat::Motorola => {
				let end_type = match self.address_bytes {
					2 => RecordType::MotorolaEnd16,
					3 => RecordType::MotorolaEnd24,
					_ => RecordType::MotorolaEnd32,
				};
				Some(HexRecord::new(end_type, 0, Vec::new()))
			},
			HexFormat::Xess => None,
		};
		if let Some(end) = end {
			self.write_record(&end)?;
		}
		self.out.flush()?;
		Ok(self.out)
	}
}
