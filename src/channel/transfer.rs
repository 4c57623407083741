use std::io;

use super::word::{
	rearrange,
	word_from_bytes,
	word_to_bytes,
};
use super::WordAccess;
use crate::error::severity_of;
use crate::hex::{
	HexReader,
	HexRecord,
	HexWriter,
	RecordKind,
};
use crate::progress::TransferProgress;
use crate::{
	Severity,
	XferError,
};

/// handshake probes run after a failed unit
pub const SELF_TEST_ROUNDS: usize = 100;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct TransferStats {
	/// data records transferred completely
	pub records: usize,
	pub words: usize,
	/// records with a bad checksum, never applied
	pub skipped_records: usize,
	/// units that failed and were skipped after confirmation
	pub failed_units: usize,
	/// words that didn't match the file (verify only)
	pub mismatches: usize,
}

// Valid data records; bad checksums are reported and dropped if the sink
// agrees to go on. Data following a bad extended address record has an
// unknown base and is dropped up to the next good one.
fn data_records(
	records: Vec<HexRecord>,
	progress: &mut TransferProgress,
	stats: &mut TransferStats,
) -> crate::AResult<Vec<HexRecord>> {
	let mut data = Vec::new();
	let mut base_lost = false;
	for record in records {
		if !record.is_valid() {
			let e: failure::Error = XferError::Checksum {
				address: record.address(),
				expected: record.compute_checksum(),
				found: record.checksum,
			}.into();
			warn!("skipping {:?} record: {}", record.kind(), e);
			if !progress.confirm(&e) {
				return Err(e);
			}
			stats.skipped_records += 1;
			if record.kind() == RecordKind::ExtendedAddress {
				base_lost = true;
			}
			continue;
		}
		match record.kind() {
			RecordKind::ExtendedAddress => base_lost = false,
			RecordKind::Data if base_lost => {
				warn!("skipping record at offset 0x{:x}: its base address record was bad", record.offset_address);
				stats.skipped_records += 1;
			},
			RecordKind::Data => data.push(record),
			_ => (),
		}
	}
	Ok(data)
}

fn check_alignment<M: WordAccess>(mem: &M, records: &[HexRecord]) -> crate::AResult<()> {
	for record in records {
		mem.geometry().check_range(record.address(), record.len())?;
	}
	Ok(())
}

// Decides whether the transfer continues after a failed unit.
fn unit_failed<M: WordAccess>(
	mem: &mut M,
	e: failure::Error,
	progress: &mut TransferProgress,
	stats: &mut TransferStats,
) -> crate::AResult<()> {
	if severity_of(&e) == Severity::Fatal {
		return Err(e);
	}
	stats.failed_units += 1;
	let ratio = match mem.self_test(SELF_TEST_ROUNDS) {
		Ok(ratio) => ratio,
		Err(test_err) => {
			if severity_of(&test_err) == Severity::Fatal {
				return Err(test_err);
			}
			warn!("self test failed: {}", test_err);
			0.0
		},
	};
	warn!("{} (self test: {:.0}% of handshakes ok)", e, ratio * 100.0);
	if progress.confirm(&e) {
		Ok(())
	} else {
		Err(e)
	}
}

/// Write every data record of a hex file to the board.
///
/// The whole file is read and checked for alignment before the first word
/// is written.
pub fn download<M, B>(
	mem: &mut M,
	reader: HexReader<B>,
	progress: &mut TransferProgress,
) -> crate::AResult<TransferStats>
where
	M: WordAccess,
	B: io::BufRead,
{
	let mut stats = TransferStats::default();
	let records = data_records(reader.read_all()?, progress, &mut stats)?;
	check_alignment(mem, &records)?;

	let geometry = *mem.geometry();
	let total: usize = records.iter().map(HexRecord::len).sum();
	let mut done = 0;
	for record in &records {
		let mut address = geometry.word_address(record.address());
		let mut complete = true;
		for chunk in record.bytes.chunks(geometry.bytes_per_word()) {
			let value = rearrange(word_from_bytes(chunk), geometry.data_width, geometry.endian);
			if let Err(e) = mem.write_word(address, value) {
				unit_failed(mem, e, progress, &mut stats)?;
				complete = false;
				break;
			}
			stats.words += 1;
			address += 1;
		}
		if complete {
			stats.records += 1;
		}
		done += record.len();
		progress.update(done, total);
	}
	progress.finish();

	info!("downloaded {} words in {} records", stats.words, stats.records);
	Ok(stats)
}

/// Read the byte range `lo..=hi` from the board into hex records.
pub fn upload<M, W>(
	mem: &mut M,
	lo: u32,
	hi: u32,
	writer: &mut HexWriter<W>,
	progress: &mut TransferProgress,
) -> crate::AResult<TransferStats>
where
	M: WordAccess,
	W: io::Write,
{
	ensure!(lo <= hi, "empty upload range 0x{:x}..=0x{:x}", lo, hi);
	let geometry = *mem.geometry();
	let length = (hi - lo) as usize + 1;
	geometry.check_range(lo, length)?;

	let stride = geometry.bytes_per_word();
	let record_len = (writer.record_len() / stride * stride).max(stride);
	let mut stats = TransferStats::default();
	let mut offset = 0usize;
	while offset < length {
		// the last record may be short
		let len = record_len.min(length - offset);
		let address = lo + offset as u32;
		let first_word = geometry.word_address(address);

		let mut bytes = Vec::with_capacity(len);
		let mut complete = true;
		for i in 0..(len / stride) as u32 {
			match mem.read_word(first_word + i) {
				Ok(value) => {
					let value = rearrange(value, geometry.data_width, geometry.endian);
					bytes.extend(word_to_bytes(value, geometry.data_width));
					stats.words += 1;
				},
				Err(e) => {
					unit_failed(mem, e, progress, &mut stats)?;
					complete = false;
					break;
				},
			}
		}
		if complete {
			writer.write_data(address, &bytes)?;
			stats.records += 1;
		}

		offset += len;
		progress.update(offset, length);
	}
	progress.finish();

	info!("uploaded {} words in {} records", stats.words, stats.records);
	Ok(stats)
}

/// Compare the board's memory with the data records of a hex file.
pub fn verify<M, B>(
	mem: &mut M,
	reader: HexReader<B>,
	progress: &mut TransferProgress,
) -> crate::AResult<TransferStats>
where
	M: WordAccess,
	B: io::BufRead,
{
	let mut stats = TransferStats::default();
	let records = data_records(reader.read_all()?, progress, &mut stats)?;
	check_alignment(mem, &records)?;

	let geometry = *mem.geometry();
	let total: usize = records.iter().map(HexRecord::len).sum();
	let mut done = 0;
	for record in &records {
		let mut address = geometry.word_address(record.address());
		let mut complete = true;
		for chunk in record.bytes.chunks(geometry.bytes_per_word()) {
			let expected = word_from_bytes(chunk);
			let value = match mem.read_word(address) {
				Ok(v) => rearrange(v, geometry.data_width, geometry.endian),
				Err(e) => {
					unit_failed(mem, e, progress, &mut stats)?;
					complete = false;
					break;
				},
			};
			if value != expected {
				warn!("mismatch at byte address 0x{:x}: file 0x{:x}, board 0x{:x}",
					geometry.byte_address(address), expected, value);
				stats.mismatches += 1;
			}
			stats.words += 1;
			address += 1;
		}
		if complete {
			stats.records += 1;
		}
		done += record.len();
		progress.update(done, total);
	}
	progress.finish();

	info!("verified {} words, {} mismatches", stats.words, stats.mismatches);
	Ok(stats)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::channel::{
		ChannelKind,
		Endian,
		Geometry,
		NarrowChannel,
	};
	use crate::hex::HexFormat;
	use crate::port::BitChannel;
	use crate::testing::{
		test_layout,
		MockBoard,
	};

	fn board(address_width: u8, data_width: u8) -> (BitChannel<MockBoard>, Geometry) {
		let geometry = Geometry::new(address_width, data_width, ChannelKind::Ram).unwrap();
		let ch = BitChannel::new(MockBoard::new(test_layout(), geometry), 0).unwrap();
		(ch, geometry)
	}

	fn intel_file(chunks: &[(u32, Vec<u8>)]) -> String {
		let mut w = HexWriter::new(Vec::new(), HexFormat::Intel);
		for (address, data) in chunks {
			w.write_data(*address, data).unwrap();
		}
		String::from_utf8(w.finish().unwrap()).unwrap()
	}

	#[test]
	fn download_two_records() {
		let payload: Vec<u8> = (0..32).map(|i| (i * 7 + 3) as u8).collect();
		let file = intel_file(&[(0, payload.clone())]);
		assert_eq!(file.lines().count(), 3);

		let (mut ch, geometry) = board(16, 8);
		let stats = {
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new();
			download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap()
		};
		assert_eq!(stats.words, 32);
		assert_eq!(stats.records, 2);
		assert_eq!(stats.failed_units, 0);

		let board = ch.port();
		assert_eq!(board.word_writes, 32);
		let image: Vec<u8> = (0..32).map(|a| board.memory[&a] as u8).collect();
		assert_eq!(image, payload);
	}

	#[test]
	fn misaligned_rejected_before_io() {
		let (mut ch, geometry) = board(16, 16);
		let ops = ch.port().ops;
		{
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new();

			// second record starts at an odd address
			let file = intel_file(&[(0, vec![1, 2, 3, 4]), (0x11, vec![5, 6])]);
			let err = download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap_err();
			match err.downcast_ref::<XferError>() {
				Some(XferError::Alignment { address: 0x11, length: 2, stride: 2 }) => (),
				other => panic!("unexpected error {:?}", other),
			}

			// odd length
			let file = intel_file(&[(0x10, vec![5, 6, 7])]);
			assert!(verify(&mut nc, HexReader::new(file.as_bytes()), &mut progress).is_err());

			let mut w = HexWriter::new(Vec::new(), HexFormat::Intel);
			assert!(upload(&mut nc, 0x10, 0x12, &mut w, &mut progress).is_err());
			assert!(upload(&mut nc, 0x11, 0x14, &mut w, &mut progress).is_err());
		}
		assert_eq!(ch.port().ops, ops);
	}

	#[test]
	fn sixteen_bit_little_endian() {
		let (mut ch, geometry) = board(16, 16);
		let geometry = geometry.with_endian(Endian { big_bytes: false, big_bits: true });
		let file = intel_file(&[(0x20, vec![0x12, 0x34, 0x56, 0x78])]);
		{
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new();
			download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap();
			let stats = verify(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap();
			assert_eq!(stats.mismatches, 0);
		}
		assert_eq!(ch.port().memory[&0x10], 0x3412);
		assert_eq!(ch.port().memory[&0x11], 0x7856);
	}

	#[test]
	fn upload_inclusive_range() {
		let (mut ch, geometry) = board(16, 8);
		for a in 0..0x40u32 {
			ch.port().memory.insert(a, a ^ 0x5a);
		}
		let mut fractions = Vec::new();
		let text = {
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new().with_handler(|f| fractions.push(f));
			let mut w = HexWriter::new(Vec::new(), HexFormat::Intel);
			let stats = upload(&mut nc, 0x08, 0x1b, &mut w, &mut progress).unwrap();
			assert_eq!(stats.records, 2);
			assert_eq!(stats.words, 20);
			String::from_utf8(w.finish().unwrap()).unwrap()
		};
		let chunks = HexReader::new(text.as_bytes()).data_chunks().unwrap();
		assert_eq!(chunks.len(), 2);
		assert_eq!(chunks[0].0, 0x08);
		assert_eq!(chunks[0].1.len(), 16);
		// short trailing record ends at hi
		assert_eq!(chunks[1].0, 0x18);
		assert_eq!(chunks[1].1, vec![0x18 ^ 0x5a, 0x19 ^ 0x5a, 0x1a ^ 0x5a, 0x1b ^ 0x5a]);
		assert_eq!(fractions.last(), Some(&1.0));
	}

	#[test]
	fn bad_checksum_never_applied() {
		let file = ":0400100001020304E3\n:0400200001020304D2\n:00000001FF\n";

		let (mut ch, geometry) = board(16, 8);
		{
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new();
			assert!(download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).is_err());
		}
		assert_eq!(ch.port().word_writes, 0);

		let mut asked = Vec::new();
		let stats = {
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new().with_confirm(|e| {
				asked.push(format!("{}", e));
				true
			});
			download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap()
		};
		assert_eq!(asked.len(), 1);
		assert_eq!(stats.skipped_records, 1);
		assert_eq!(stats.words, 4);
		assert!(ch.port().memory.get(&0x10).is_none());
		assert_eq!(ch.port().memory[&0x20], 1);
	}

	#[test]
	fn desync_asks_to_continue() {
		let file = intel_file(&[(0, vec![0x11; 16]), (0x10, vec![0x22; 16])]);

		let (mut ch, geometry) = board(16, 8);
		ch.port().drop_clock = Some(1);
		let stats = {
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new().with_confirm(|e| {
				matches!(e.downcast_ref::<XferError>(), Some(XferError::Desync { .. }))
			});
			download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap()
		};
		assert_eq!(stats.failed_units, 1);
		assert_eq!(stats.records, 1);
		assert_eq!(stats.words, 16);
		assert!(ch.port().memory.get(&0).is_none());
		assert_eq!(ch.port().memory[&0x10], 0x22);

		let (mut ch, geometry) = board(16, 8);
		ch.port().drop_clock = Some(1);
		let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
		let err = download(&mut nc, HexReader::new(file.as_bytes()), &mut TransferProgress::new()).unwrap_err();
		assert_eq!(severity_of(&err), Severity::Major);
	}

	#[test]
	fn verify_counts_mismatches() {
		let file = intel_file(&[(0, vec![1, 2, 3, 4])]);
		let (mut ch, geometry) = board(16, 8);
		for (a, v) in [(0u32, 1u32), (1, 2), (2, 0xff), (3, 4)].iter() {
			ch.port().memory.insert(*a, *v);
		}
		let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
		let stats = verify(&mut nc, HexReader::new(file.as_bytes()), &mut TransferProgress::new()).unwrap();
		assert_eq!(stats.words, 4);
		assert_eq!(stats.mismatches, 1);
	}

	#[test]
	fn bad_base_address_drops_dependent_records() {
		// first extended address record has a bad checksum
		let file = "\
:020000040001F8
:0400100001020304E2
:020000040002F8
:0400200001020304D2
:00000001FF
";

		let (mut ch, geometry) = board(20, 8);
		let mut asked = 0;
		{
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new().with_confirm(|_| {
				asked += 1;
				false
			});
			let err = download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap_err();
			match err.downcast_ref::<XferError>() {
				Some(XferError::Checksum { expected: 0xf9, found: 0xf8, .. }) => (),
				other => panic!("unexpected error {:?}", other),
			}
		}
		assert_eq!(asked, 1);
		assert_eq!(ch.port().word_writes, 0);

		let (mut ch, geometry) = board(20, 8);
		let mut asked = 0;
		let stats = {
			let mut nc = NarrowChannel::new(&mut ch, test_layout(), geometry).unwrap();
			let mut progress = TransferProgress::new().with_confirm(|_| {
				asked += 1;
				true
			});
			download(&mut nc, HexReader::new(file.as_bytes()), &mut progress).unwrap()
		};
		assert_eq!(asked, 1);
		assert_eq!(stats.skipped_records, 2);
		assert_eq!(stats.words, 4);
		let mock = ch.port();
		assert!(mock.memory.get(&0x10).is_none());
		assert!(mock.memory.get(&0x1_0010).is_none());
		assert_eq!(mock.memory[&0x2_0020], 1);
		assert_eq!(mock.memory[&0x2_0023], 4);
	}

	// fails writes to one word; its self test fails too
	struct FailingMemory {
		geometry: Geometry,
		bad: u32,
		fatal_self_test: bool,
		written: Vec<u32>,
	}

	impl FailingMemory {
		fn new(bad: u32, fatal_self_test: bool) -> Self {
			FailingMemory {
				geometry: Geometry::new(16, 8, ChannelKind::Ram).unwrap(),
				bad,
				fatal_self_test,
				written: Vec::new(),
			}
		}
	}

	impl WordAccess for FailingMemory {
		fn geometry(&self) -> &Geometry {
			&self.geometry
		}

		fn write_word(&mut self, word_address: u32, _value: u32) -> crate::AResult<()> {
			if word_address == self.bad {
				return Err(XferError::Desync { expected: 3, actual: 2 }.into());
			}
			self.written.push(word_address);
			Ok(())
		}

		fn read_word(&mut self, _word_address: u32) -> crate::AResult<u32> {
			Ok(0)
		}

		fn self_test(&mut self, _rounds: usize) -> crate::AResult<f32> {
			if self.fatal_self_test {
				Err(XferError::TransportAbsent { written: 1, read: 0 }.into())
			} else {
				Err(format_err!("scan chain didn't answer"))
			}
		}
	}

	#[test]
	fn failed_self_test_still_asks() {
		let file = intel_file(&[(0, vec![1, 2]), (0x10, vec![3, 4])]);

		let mut mem = FailingMemory::new(0, false);
		let mut asked = 0;
		let stats = {
			let mut progress = TransferProgress::new().with_confirm(|_| {
				asked += 1;
				true
			});
			download(&mut mem, HexReader::new(file.as_bytes()), &mut progress).unwrap()
		};
		assert_eq!(asked, 1);
		assert_eq!(stats.failed_units, 1);
		assert_eq!(stats.records, 1);
		assert_eq!(mem.written, vec![0x10, 0x11]);

		let mut mem = FailingMemory::new(0, true);
		let mut progress = TransferProgress::new().with_confirm(|_| true);
		let err = download(&mut mem, HexReader::new(file.as_bytes()), &mut progress).unwrap_err();
		assert_eq!(severity_of(&err), Severity::Fatal);
		assert!(mem.written.is_empty());
	}
}
