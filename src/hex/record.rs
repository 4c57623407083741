use std::fmt;
use std::str;

use failure::Fail;

/// Line dialect; detected from the first character of a line.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum HexFormat {
	/// `:LLAAAATT<data>CC`
	Intel,
	/// `STLL<address><data>CC`
	Motorola,
	/// `-LL<address><data>CC`, address of 4, 6 or 8 digits
	Xess,
}

impl HexFormat {
	pub fn start_char(self) -> char {
		match self {
			HexFormat::Intel => ':',
			HexFormat::Motorola => 'S',
			HexFormat::Xess => '-',
		}
	}

	pub fn detect(line: &str) -> Option<Self> {
		match line.trim_start().chars().next()? {
			':' => Some(HexFormat::Intel),
			'S' | 's' => Some(HexFormat::Motorola),
			'-' => Some(HexFormat::Xess),
			_ => None,
		}
	}
}

impl fmt::Display for HexFormat {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			HexFormat::Intel => "intel",
			HexFormat::Motorola => "motorola",
			HexFormat::Xess => "xess",
		};
		f.write_str(s)
	}
}

impl str::FromStr for HexFormat {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"intel" | "mcs" | "hex" => Ok(HexFormat::Intel),
			"motorola" | "srec" | "exo" => Ok(HexFormat::Motorola),
			"xess" | "xes" => Ok(HexFormat::Xess),
			_ => bail!("unknown hex format {:?} (intel, motorola or xess)", s),
		}
	}
}

/// What a record means, independent of its dialect.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum RecordKind {
	Data,
	EndOfFile,
	ExtendedAddress,
	StartAddress,
	Header,
	Count,
	Invalid,
}

impl RecordKind {
	pub fn from_code(code: u8) -> Self {
		RecordType::from_code(code).map(RecordType::kind).unwrap_or(RecordKind::Invalid)
	}
}

/// Record types of all formats. The codes share one space: Intel types
/// are 0x00..=0x05, Motorola `Sn` is 0x10 + n, XESS-16/24/32 are
/// 0x20..=0x22.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum RecordType {
	IntelData,
	IntelEndOfFile,
	IntelExtendedSegmentAddress,
	IntelStartSegmentAddress,
	IntelExtendedLinearAddress,
	IntelStartLinearAddress,
	MotorolaHeader,
	MotorolaData16,
	MotorolaData24,
	MotorolaData32,
	MotorolaCount16,
	MotorolaCount24,
	MotorolaEnd32,
	MotorolaEnd24,
	MotorolaEnd16,
	Xess16,
	Xess24,
	Xess32,
}

impl RecordType {
	pub fn code(self) -> u8 {
		use self::RecordType::*;
		match self {
			IntelData => 0x00,
			IntelEndOfFile => 0x01,
			IntelExtendedSegmentAddress => 0x02,
			IntelStartSegmentAddress => 0x03,
			IntelExtendedLinearAddress => 0x04,
			IntelStartLinearAddress => 0x05,
			MotorolaHeader => 0x10,
			MotorolaData16 => 0x11,
			MotorolaData24 => 0x12,
			MotorolaData32 => 0x13,
			MotorolaCount16 => 0x15,
			MotorolaCount24 => 0x16,
			MotorolaEnd32 => 0x17,
			MotorolaEnd24 => 0x18,
			MotorolaEnd16 => 0x19,
			Xess16 => 0x20,
			Xess24 => 0x21,
			Xess32 => 0x22,
		}
	}

	pub fn from_code(code: u8) -> Option<Self> {
		use self::RecordType::*;
		Some(match code {
			0x00 => IntelData,
			0x01 => IntelEndOfFile,
			0x02 => IntelExtendedSegmentAddress,
			0x03 => IntelStartSegmentAddress,
			0x04 => IntelExtendedLinearAddress,
			0x05 => IntelStartLinearAddress,
			0x10 => MotorolaHeader,
			0x11 => MotorolaData16,
			0x12 => MotorolaData24,
			0x13 => MotorolaData32,
			0x15 => MotorolaCount16,
			0x16 => MotorolaCount24,
			0x17 => MotorolaEnd32,
			0x18 => MotorolaEnd24,
			0x19 => MotorolaEnd16,
			0x20 => Xess16,
			0x21 => Xess24,
			0x22 => Xess32,
			_ => return None,
		})
	}

	pub fn format(self) -> HexFormat {
		match self.code() {
			0x00..=0x0f => HexFormat::Intel,
			0x10..=0x1f => HexFormat::Motorola,
			_ => HexFormat::Xess,
		}
	}

	pub fn kind(self) -> RecordKind {
		use self::RecordType::*;
		match self {
			IntelData | MotorolaData16 | MotorolaData24 | MotorolaData32 | Xess16 | Xess24 | Xess32 => RecordKind::Data,
			IntelEndOfFile | MotorolaEnd16 | MotorolaEnd24 | MotorolaEnd32 => RecordKind::EndOfFile,
			IntelExtendedSegmentAddress | IntelExtendedLinearAddress => RecordKind::ExtendedAddress,
			IntelStartSegmentAddress | IntelStartLinearAddress => RecordKind::StartAddress,
			MotorolaHeader => RecordKind::Header,
			MotorolaCount16 | MotorolaCount24 => RecordKind::Count,
		}
	}

	/// bytes in the address field of the line
	pub fn address_bytes(self) -> usize {
		use self::RecordType::*;
		match self {
			IntelData | IntelEndOfFile | IntelExtendedSegmentAddress | IntelStartSegmentAddress
			| IntelExtendedLinearAddress | IntelStartLinearAddress => 2,
			MotorolaHeader | MotorolaData16 | MotorolaCount16 | MotorolaEnd16 | Xess16 => 2,
			MotorolaData24 | MotorolaCount24 | MotorolaEnd24 | Xess24 => 3,
			MotorolaData32 | MotorolaEnd32 | Xess32 => 4,
		}
	}

	/// `n` of the `Sn` prefix
	pub fn motorola_digit(self) -> Option<u8> {
		match self.format() {
			HexFormat::Motorola => Some(self.code() - 0x10),
			_ => None,
		}
	}

	/// data record of `format` with the narrowest address field holding
	/// `address_bytes` bytes
	pub fn data_for(format: HexFormat, address_bytes: usize) -> Self {
		use self::RecordType::*;
		match (format, address_bytes) {
			(HexFormat::Intel, _) => IntelData,
			(HexFormat::Motorola, 0..=2) => MotorolaData16,
			(HexFormat::Motorola, 3) => MotorolaData24,
			(HexFormat::Motorola, _) => MotorolaData32,
			(HexFormat::Xess, 0..=2) => Xess16,
			(HexFormat::Xess, 3) => Xess24,
			(HexFormat::Xess, _) => Xess32,
		}
	}

	/// length of the payload if the type fixes it
	fn fixed_len(self) -> Option<usize> {
		use self::RecordType::*;
		match self {
			IntelEndOfFile => Some(0),
			IntelExtendedSegmentAddress | IntelExtendedLinearAddress => Some(2),
			IntelStartSegmentAddress | IntelStartLinearAddress => Some(4),
			MotorolaCount16 | MotorolaCount24 | MotorolaEnd16 | MotorolaEnd24 | MotorolaEnd32 => Some(0),
			_ => None,
		}
	}
}

/// bytes needed to write `address`, at least 2
pub fn address_bytes_for(address: u32) -> usize {
	match address {
		0..=0xffff => 2,
		0x1_0000..=0xff_ffff => 3,
		_ => 4,
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum RecordError {
	MalformedStart,
	BadLength,
	BadAddress,
	BadType,
	BadData,
	BadChecksum,
}

impl fmt::Display for RecordError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let s = match self {
			RecordError::MalformedStart => "malformed record start",
			RecordError::BadLength => "bad record length",
			RecordError::BadAddress => "bad address field",
			RecordError::BadType => "bad record type",
			RecordError::BadData => "bad data field",
			RecordError::BadChecksum => "bad checksum",
		};
		f.write_str(s)
	}
}

/// A line that couldn't be parsed, with whatever fields were read before
/// the error.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
#[fail(display = "{} in hex record {:?}", error, line)]
pub struct ParseError {
	pub error: RecordError,
	pub line: String,
	pub format: Option<HexFormat>,
	pub length: Option<usize>,
	pub address: Option<u32>,
	pub type_code: Option<u8>,
}

/// One line of a hex file.
///
/// `base_address` is not part of the line; it is the running base set by
/// preceding extended address records of the same stream.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct HexRecord {
	pub record_type: RecordType,
	pub base_address: u32,
	pub offset_address: u32,
	pub address_mask: u32,
	pub bytes: Vec<u8>,
	pub checksum: u8,
	pub error: Option<RecordError>,
}

impl HexRecord {
	/// record with freshly computed checksum
	pub fn new(record_type: RecordType, offset_address: u32, bytes: Vec<u8>) -> Self {
		let mut record = HexRecord {
			record_type,
			base_address: 0,
			offset_address,
			address_mask: !0,
			bytes,
			checksum: 0,
			error: None,
		};
		record.checksum = record.compute_checksum();
		record
	}

	/// data record with the narrowest address field that holds the last
	/// byte's address; Intel records only carry the low 16 bits
	pub fn data(format: HexFormat, address: u32, bytes: Vec<u8>) -> Self {
		let end = address.wrapping_add(bytes.len().saturating_sub(1) as u32).max(address);
		let record_type = RecordType::data_for(format, address_bytes_for(end));
		let offset = match format {
			HexFormat::Intel => address & 0xffff,
			_ => address,
		};
		HexRecord::new(record_type, offset, bytes)
	}

	pub fn extended_linear_address(upper: u16) -> Self {
		HexRecord::new(RecordType::IntelExtendedLinearAddress, 0, upper.to_be_bytes().to_vec())
	}

	pub fn format(&self) -> HexFormat {
		self.record_type.format()
	}

	pub fn kind(&self) -> RecordKind {
		self.record_type.kind()
	}

	/// data that may be applied to a device
	pub fn is_data(&self) -> bool {
		self.kind() == RecordKind::Data
	}

	pub fn is_valid(&self) -> bool {
		self.error.is_none()
	}

	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}

	/// effective address of the first byte
	pub fn address(&self) -> u32 {
		self.base_address.wrapping_add(self.offset_address) & self.address_mask
	}

	/// base address this record sets for the following records
	pub fn extended_base(&self) -> Option<u32> {
		if self.bytes.len() != 2 {
			return None;
		}
		let value = u16::from_be_bytes([self.bytes[0], self.bytes[1]]) as u32;
		match self.record_type {
			RecordType::IntelExtendedSegmentAddress => Some(value << 4),
			RecordType::IntelExtendedLinearAddress => Some(value << 16),
			_ => None,
		}
	}

	/// execution start address carried by start/end records
	pub fn start_address(&self) -> Option<u32> {
		match self.record_type {
			RecordType::IntelStartSegmentAddress if self.bytes.len() == 4 => {
				let cs = u16::from_be_bytes([self.bytes[0], self.bytes[1]]) as u32;
				let ip = u16::from_be_bytes([self.bytes[2], self.bytes[3]]) as u32;
				Some((cs << 4).wrapping_add(ip))
			},
			RecordType::IntelStartLinearAddress if self.bytes.len() == 4 => {
				Some(u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]))
			},
			RecordType::MotorolaEnd16 | RecordType::MotorolaEnd24 | RecordType::MotorolaEnd32 => Some(self.offset_address),
			_ => None,
		}
	}

	fn address_field(&self) -> Vec<u8> {
		let n = self.record_type.address_bytes();
		self.offset_address.to_be_bytes()[4 - n..].to_vec()
	}

	pub fn compute_checksum(&self) -> u8 {
		let data_sum = self.address_field().iter()
			.chain(self.bytes.iter())
			.fold(0u8, |acc, b| acc.wrapping_add(*b));
		match self.format() {
			HexFormat::Intel => {
				(self.bytes.len() as u8)
					.wrapping_add(self.record_type.code())
					.wrapping_add(data_sum)
					.wrapping_neg()
			},
			HexFormat::Motorola => {
				!(self.motorola_count() as u8).wrapping_add(data_sum)
			},
			HexFormat::Xess => {
				(self.bytes.len() as u8).wrapping_add(data_sum).wrapping_neg()
			},
		}
	}

	fn motorola_count(&self) -> usize {
		self.record_type.address_bytes() + self.bytes.len() + 1
	}

	/// parse a line, detecting its format from the start character
	pub fn parse(line: &str) -> Result<Self, ParseError> {
		match HexFormat::detect(line) {
			Some(format) => HexRecord::parse_format(line, format),
			None => Err(ParseError {
				error: RecordError::MalformedStart,
				line: line.to_string(),
				format: None,
				length: None,
				address: None,
				type_code: None,
			}),
		}
	}

	/// parse a line of a known format; a checksum mismatch is not an error
	/// here but sets `error` on the returned record
	pub fn parse_format(line: &str, format: HexFormat) -> Result<Self, ParseError> {
		let trimmed = line.trim();
		let mut p = Parser {
			err: ParseError {
				error: RecordError::MalformedStart,
				line: trimmed.to_string(),
				format: Some(format),
				length: None,
				address: None,
				type_code: None,
			},
			digits: &[],
		};

		let mut chars = trimmed.chars();
		let first = chars.next();
		if first.map(|c| c.to_ascii_uppercase()) != Some(format.start_char()) {
			return Err(p.err);
		}
		p.digits = chars.as_str().as_bytes();

		let (record_type, offset_address, bytes, checksum) = match format {
			HexFormat::Intel => p.intel()?,
			HexFormat::Motorola => p.motorola()?,
			HexFormat::Xess => p.xess()?,
		};
		if !p.digits.is_empty() {
			return Err(p.fail(RecordError::BadLength));
		}
		if let Some(len) = record_type.fixed_len() {
			if bytes.len() != len {
				return Err(p.fail(RecordError::BadLength));
			}
		}

		let mut record = HexRecord {
			record_type,
			base_address: 0,
			offset_address,
			address_mask: !0,
			bytes,
			checksum,
			error: None,
		};
		if record.compute_checksum() != checksum {
			record.error = Some(RecordError::BadChecksum);
		}
		Ok(record)
	}

	/// render as a line (without line ending); the checksum is recomputed
	pub fn to_line(&self) -> String {
		let mut line = String::with_capacity(12 + 2 * self.bytes.len());
		line.push(self.format().start_char());
		match self.format() {
			HexFormat::Intel => {
				push_hex(&mut line, self.bytes.len() as u8);
				for b in self.address_field() {
					push_hex(&mut line, b);
				}
				push_hex(&mut line, self.record_type.code());
			},
			HexFormat::Motorola => {
				line.push((b'0' + self.record_type.code() - 0x10) as char);
				push_hex(&mut line, self.motorola_count() as u8);
				for b in self.address_field() {
					push_hex(&mut line, b);
				}
			},
			HexFormat::Xess => {
				push_hex(&mut line, self.bytes.len() as u8);
				for b in self.address_field() {
					push_hex(&mut line, b);
				}
			},
		}
		for &b in &self.bytes {
			push_hex(&mut line, b);
		}
		push_hex(&mut line, self.compute_checksum());
		line
	}
}

impl fmt::Display for HexRecord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(&self.to_line())
	}
}

fn push_hex(line: &mut String, byte: u8) {
	const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
	line.push(DIGITS[(byte >> 4) as usize] as char);
	line.push(DIGITS[(byte & 0xf) as usize] as char);
}

fn hex_digit(c: u8) -> Option<u8> {
	match c {
		b'0'..=b'9' => Some(c - b'0'),
		b'a'..=b'f' => Some(c - b'a' + 10),
		b'A'..=b'F' => Some(c - b'A' + 10),
		_ => None,
	}
}

struct Parser<'a> {
	err: ParseError,
	digits: &'a [u8],
}

type Fields = (RecordType, u32, Vec<u8>, u8);

impl<'a> Parser<'a> {
	fn fail(&self, error: RecordError) -> ParseError {
		ParseError {
			error,
			..self.err.clone()
		}
	}

	fn byte(&mut self) -> Option<u8> {
		if self.digits.len() < 2 {
			return None;
		}
		let hi = hex_digit(self.digits[0])?;
		let lo = hex_digit(self.digits[1])?;
		self.digits = &self.digits[2..];
		Some(hi << 4 | lo)
	}

	fn byte_or(&mut self, error: RecordError) -> Result<u8, ParseError> {
		match self.byte() {
			Some(b) => Ok(b),
			None => Err(self.fail(error)),
		}
	}

	fn bytes_or(&mut self, n: usize, error: RecordError) -> Result<Vec<u8>, ParseError> {
		let mut bytes = Vec::with_capacity(n);
		for _ in 0..n {
			bytes.push(self.byte_or(error)?);
		}
		Ok(bytes)
	}

	fn address(&mut self, n: usize) -> Result<u32, ParseError> {
		let bytes = self.bytes_or(n, RecordError::BadAddress)?;
		let address = bytes.iter().fold(0u32, |acc, b| acc << 8 | *b as u32);
		self.err.address = Some(address);
		Ok(address)
	}

	fn checksum(&mut self) -> Result<u8, ParseError> {
		// a missing checksum means the length field disagrees with the line
		self.byte_or(RecordError::BadLength)
	}

	fn intel(&mut self) -> Result<Fields, ParseError> {
		let len = self.byte_or(RecordError::BadLength)? as usize;
		self.err.length = Some(len);
		let address = self.address(2)?;
		let code = self.byte_or(RecordError::BadType)?;
		self.err.type_code = Some(code);
		let record_type = match RecordType::from_code(code) {
			Some(t) if t.format() == HexFormat::Intel => t,
			_ => return Err(self.fail(RecordError::BadType)),
		};
		let bytes = self.bytes_or(len, RecordError::BadData)?;
		let checksum = self.checksum()?;
		Ok((record_type, address, bytes, checksum))
	}

	fn motorola(&mut self) -> Result<Fields, ParseError> {
		let record_type = match self.digits.first() {
			Some(d @ b'0'..=b'9') => RecordType::from_code(0x10 + (d - b'0')),
			_ => None,
		};
		let record_type = match record_type {
			Some(t) => t,
			None => return Err(self.fail(RecordError::BadType)),
		};
		self.err.type_code = Some(record_type.code());
		self.digits = &self.digits[1..];

		let count = self.byte_or(RecordError::BadLength)? as usize;
		let address_bytes = record_type.address_bytes();
		if count < address_bytes + 1 {
			return Err(self.fail(RecordError::BadLength));
		}
		let len = count - address_bytes - 1;
		self.err.length = Some(len);
		let address = self.address(address_bytes)?;
		let bytes = self.bytes_or(len, RecordError::BadData)?;
		let checksum = self.checksum()?;
		Ok((record_type, address, bytes, checksum))
	}

	fn xess(&mut self) -> Result<Fields, ParseError> {
		let len = self.byte_or(RecordError::BadLength)? as usize;
		self.err.length = Some(len);
		// the address width is whatever is left besides data and checksum
		let address_digits = self.digits.len() as isize - 2 * len as isize - 2;
		let record_type = match address_digits {
			4 => RecordType::Xess16,
			6 => RecordType::Xess24,
			8 => RecordType::Xess32,
			_ => return Err(self.fail(RecordError::BadAddress)),
		};
		self.err.type_code = Some(record_type.code());
		let address = self.address(record_type.address_bytes())?;
		let bytes = self.bytes_or(len, RecordError::BadData)?;
		let checksum = self.checksum()?;
		Ok((record_type, address, bytes, checksum))
	}
}
