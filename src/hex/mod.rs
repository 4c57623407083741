//! Intel, Motorola and XESS hex files.

mod reader;
mod record;
mod writer;

pub use self::reader::HexReader;
pub use self::record::{
	address_bytes_for,
	HexFormat,
	HexRecord,
	ParseError,
	RecordError,
	RecordKind,
	RecordType,
};
pub use self::writer::{
	DEFAULT_RECORD_LEN,
	HexWriter,
};
