#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate xstools;
use xstools::*;

use std::fs;
use std::io::{
	self,
	Write,
};
use std::process::exit;

use xstools::bits::BitVector;
use xstools::channel::{
	ChannelKind,
	ChannelLayout,
	Endian,
	Geometry,
	NarrowChannel,
	TransferStats,
	SELF_TEST_ROUNDS,
};
use xstools::hex::{
	HexFormat,
	HexReader,
	HexWriter,
	RecordKind,
};
use xstools::jtag::{
	ChannelTap,
	JtagLayout,
	Tap,
};
use xstools::port::{
	BitChannel,
	BitField,
	Registers,
	PC_PARPORT_INV_MASK,
};
use xstools::progress::TransferProgress;

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	param.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter {}: {}", name, e);
		e.context(msg).into()
	})
}

fn get_param_or<T>(matches: &clap::ArgMatches, name: &str, default: T) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	if matches.is_present(name) {
		get_param(matches, name)
	} else {
		Ok(default)
	}
}

// decimal or 0x-prefixed hex
fn get_number(matches: &clap::ArgMatches, name: &str) -> AResult<u32> {
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	with_number_context(name, param, if param.starts_with("0x") || param.starts_with("0X") {
		u32::from_str_radix(&param[2..], 16)
	} else {
		param.parse::<u32>()
	})
}

fn with_number_context(name: &str, param: &str, r: Result<u32, std::num::ParseIntError>) -> AResult<u32> {
	r.map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid number {:?} for {}: {}", param, name, e);
		e.context(msg).into()
	})
}

#[cfg(target_os = "linux")]
fn open_parport(matches: &clap::ArgMatches) -> AResult<Box<dyn Registers>> {
	let number: usize = get_param_or(matches, "port", 0)?;
	Ok(Box::new(port::ParPort::open_number(number)?))
}

#[cfg(not(target_os = "linux"))]
fn open_parport(_matches: &clap::ArgMatches) -> AResult<Box<dyn Registers>> {
	bail!("parallel port access is only supported on linux")
}

#[cfg(feature = "usb")]
fn open_usb(ids: &str) -> AResult<Box<dyn Registers>> {
	let sep = match ids.find(':') {
		Some(sep) => sep,
		None => bail!("USB device {:?} not in VID:PID form", ids),
	};
	let vendor = u16::from_str_radix(&ids[..sep], 16)?;
	let product = u16::from_str_radix(&ids[sep + 1..], 16)?;
	let link = port::UsbLink::open(vendor, product)?;
	Ok(Box::new(port::PacketPort::new(link)))
}

#[cfg(not(feature = "usb"))]
fn open_usb(_ids: &str) -> AResult<Box<dyn Registers>> {
	bail!("built without USB support (enable the \"usb\" feature)")
}

fn open_channel(matches: &clap::ArgMatches) -> AResult<BitChannel<Box<dyn Registers>>> {
	let port = match matches.value_of("usb") {
		Some(ids) => open_usb(ids)?,
		None => open_parport(matches)?,
	};
	let checks: usize = get_param_or(matches, "self_checks", port::DEFAULT_SELF_CHECKS)?;
	Ok(BitChannel::new(port, inv_mask(matches))?.with_self_checks(checks))
}

fn inv_mask(matches: &clap::ArgMatches) -> u32 {
	if matches.is_present("no_invert") { 0 } else { PC_PARPORT_INV_MASK }
}

fn channel_layout(matches: &clap::ArgMatches) -> AResult<ChannelLayout> {
	Ok(ChannelLayout {
		clock: get_param_or(matches, "clock", 4)?,
		reset: get_param_or(matches, "reset", 5)?,
		write: get_param_or(matches, "write", 6)?,
		data_out: get_param_or(matches, "data_out", BitField::new(0, 3))?,
		data_in: get_param_or(matches, "data_in", BitField::new(14, 15))?,
		state: get_param_or(matches, "state", BitField::new(11, 13))?,
	})
}

fn geometry(matches: &clap::ArgMatches) -> AResult<Geometry> {
	let geometry = Geometry::new(
		get_param_or(matches, "address_width", 16)?,
		get_param_or(matches, "data_width", 8)?,
		get_param_or(matches, "kind", ChannelKind::Ram)?,
	)?;
	Ok(geometry.with_endian(Endian {
		big_bytes: !matches.is_present("little_bytes"),
		big_bits: !matches.is_present("lsb_bits"),
	}))
}

fn get_path<'a>(matches: &'a clap::ArgMatches, name: &str) -> AResult<&'a str> {
	match matches.value_of(name) {
		Some(p) => Ok(p),
		None => bail!("missing parameter {}", name),
	}
}

fn io_context(e: io::Error, what: &str, path: &str) -> failure::Error {
	let msg = format!("couldn't {} {}: {}", what, path, e);
	failure::Error::from(e).context(msg).into()
}

fn create_hex(sub_m: &clap::ArgMatches, name: &str, format: HexFormat) -> AResult<HexWriter<io::BufWriter<fs::File>>> {
	let record_len: usize = get_param_or(sub_m, "record_len", hex::DEFAULT_RECORD_LEN)?;
	ensure!(record_len > 0 && record_len <= 250, "record length {} not in 1..=250", record_len);
	let path = get_path(sub_m, name)?;
	let file = fs::File::create(path).map_err(|e| io_context(e, "create", path))?;
	Ok(HexWriter::new(io::BufWriter::new(file), format).with_record_len(record_len))
}

fn open_hex(sub_m: &clap::ArgMatches) -> AResult<HexReader<io::BufReader<fs::File>>> {
	let path = get_path(sub_m, "FILE")?;
	let file = fs::File::open(path).map_err(|e| io_context(e, "open", path))?;
	let reader = HexReader::new(io::BufReader::new(file));
	Ok(match sub_m.value_of("format") {
		Some(_) => reader.with_format(get_param(sub_m, "format")?),
		None => reader,
	})
}

fn ask_continue(e: &failure::Error) -> bool {
	eprint!("{}\ncontinue with the next record? [y/N] ", e);
	let _ = io::stderr().flush();
	let mut answer = String::new();
	if io::stdin().read_line(&mut answer).is_err() {
		return false;
	}
	match answer.trim() {
		"y" | "Y" | "yes" => true,
		_ => false,
	}
}

fn progress<'a>(sub_m: &clap::ArgMatches) -> TransferProgress<'a> {
	let keep_going = sub_m.is_present("keep_going");
	let mut last_tenth = 0;
	TransferProgress::new()
		.with_handler(move |fraction| {
			let tenth = (fraction * 10.0) as u32;
			if tenth > last_tenth {
				last_tenth = tenth;
				info!("{}% done", tenth * 10);
			}
		})
		.with_confirm(move |e| keep_going || ask_continue(e))
}

fn report(what: &str, stats: &TransferStats) {
	println!("{}: {} records, {} words", what, stats.records, stats.words);
	if stats.skipped_records > 0 {
		println!("  {} records skipped (bad checksum)", stats.skipped_records);
	}
	if stats.failed_units > 0 {
		println!("  {} records failed", stats.failed_units);
	}
}

fn ram_download(matches: &clap::ArgMatches, sub_m: &clap::ArgMatches) -> AResult<()> {
	let reader = open_hex(sub_m)?;
	let mut ch = open_channel(matches)?;
	let mut nc = NarrowChannel::new(&mut ch, channel_layout(matches)?, geometry(matches)?)?;
	let stats = channel::download(&mut nc, reader, &mut progress(sub_m))?;
	report("downloaded", &stats);
	Ok(())
}

fn ram_upload(matches: &clap::ArgMatches, sub_m: &clap::ArgMatches) -> AResult<()> {
	let lo = get_number(sub_m, "LO")?;
	let hi = get_number(sub_m, "HI")?;
	let format: HexFormat = get_param_or(sub_m, "format", HexFormat::Intel)?;
	let mut writer = create_hex(sub_m, "FILE", format)?;

	let mut ch = open_channel(matches)?;
	let mut nc = NarrowChannel::new(&mut ch, channel_layout(matches)?, geometry(matches)?)?;
	let stats = channel::upload(&mut nc, lo, hi, &mut writer, &mut progress(sub_m))?;
	writer.finish()?;
	report("uploaded", &stats);
	Ok(())
}

fn ram_verify(matches: &clap::ArgMatches, sub_m: &clap::ArgMatches) -> AResult<()> {
	let reader = open_hex(sub_m)?;
	let mut ch = open_channel(matches)?;
	let mut nc = NarrowChannel::new(&mut ch, channel_layout(matches)?, geometry(matches)?)?;
	let stats = channel::verify(&mut nc, reader, &mut progress(sub_m))?;
	report("verified", &stats);
	if stats.mismatches > 0 {
		eprintln!("{} words differ", stats.mismatches);
		exit(2);
	}
	Ok(())
}

fn port_test(matches: &clap::ArgMatches, sub_m: &clap::ArgMatches) -> AResult<()> {
	let rounds: usize = get_param_or(sub_m, "rounds", SELF_TEST_ROUNDS)?;
	let mut ch = open_channel(matches)?;
	let mut nc = NarrowChannel::new(&mut ch, channel_layout(matches)?, geometry(matches)?)?;
	let ratio = nc.self_test(rounds)?;
	println!("{:.1}% of {} handshakes succeeded", ratio * 100.0, rounds);
	if ratio < 1.0 {
		exit(2);
	}
	Ok(())
}

fn jtag_id(matches: &clap::ArgMatches, sub_m: &clap::ArgMatches) -> AResult<()> {
	let layout = JtagLayout {
		tck: get_param_or(sub_m, "tck", 1)?,
		tms: get_param_or(sub_m, "tms", 2)?,
		tdi: get_param_or(sub_m, "tdi", 0)?,
		tdo: get_param_or(sub_m, "tdo", 15)?,
	};
	let ir_length: usize = get_param_or(sub_m, "ir_length", 6)?;
	ensure!(ir_length > 0 && ir_length <= 32, "instruction length {} not in 1..=32", ir_length);
	let instruction = if sub_m.is_present("idcode") { get_number(sub_m, "idcode")? } else { 0x09 };

	let mut ch = open_channel(matches)?;
	let mut tap = Tap::new(ChannelTap::new(&mut ch, layout));
	tap.init()?;
	let idcode = tap.read_idcode(&BitVector::from_value(instruction as u64, ir_length))?;
	println!("0x{:08x}", idcode);
	Ok(())
}

fn hex_check(sub_m: &clap::ArgMatches) -> AResult<()> {
	let mut data_bytes = 0usize;
	let mut counts = std::collections::BTreeMap::new();
	let mut bad = 0usize;
	for record in open_hex(sub_m)? {
		let record = record?;
		*counts.entry(record.kind()).or_insert(0usize) += 1;
		if !record.is_valid() {
			warn!("bad checksum in {} (0x{:02x}, expected 0x{:02x})", record, record.checksum, record.compute_checksum());
			bad += 1;
		} else if record.kind() == RecordKind::Data {
			data_bytes += record.len();
		}
	}
	for (kind, count) in &counts {
		println!("{:?}: {}", kind, count);
	}
	println!("{} data bytes", data_bytes);
	ensure!(bad == 0, "{} records with bad checksums", bad);
	Ok(())
}

fn hex_convert(sub_m: &clap::ArgMatches) -> AResult<()> {
	let to: HexFormat = get_param(sub_m, "to")?;
	let chunks = open_hex(sub_m)?.data_chunks()?;
	let mut writer = create_hex(sub_m, "OUTPUT", to)?;
	for (address, bytes) in chunks {
		writer.write_data(address, &bytes)?;
	}
	writer.finish()?;
	Ok(())
}

fn app() -> clap::App<'static, 'static> {
	clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg port: -p --port +takes_value "parallel port number (/dev/parportN)")
		(@arg usb: --usb +takes_value "use USB device VID:PID (hex) instead of the parallel port")
		(@arg no_invert: --no_invert "don't apply the PC parallel port inversion mask")
		(@arg self_checks: --self_checks +takes_value "number of writes verified by reading back")
		(@arg clock: --clock +takes_value "bit of the latch clock")
		(@arg reset: --reset +takes_value "bit of the state machine reset")
		(@arg write: --write +takes_value "bit of the transfer direction")
		(@arg data_out: --data_out +takes_value "output field (lo:hi)")
		(@arg data_in: --data_in +takes_value "input field (lo:hi)")
		(@arg state: --state +takes_value "state id field (lo:hi)")
		(@arg address_width: --address_width +takes_value "word address bits")
		(@arg data_width: --data_width +takes_value "bits per word (8, 16 or 32)")
		(@arg kind: --kind +takes_value "ram, bus or flash")
		(@arg little_bytes: --little_bytes "send the least significant byte of a word first")
		(@arg lsb_bits: --lsb_bits "send the least significant bit of a byte first")
		(@subcommand ram_download =>
			(about: "write a hex file to the board memory")
			(@arg format: -f --format +takes_value "hex format (default: detect per line)")
			(@arg keep_going: -k --keep_going "continue after failed records without asking")
			(@arg FILE: +required "hex file")
		)
		(@subcommand ram_upload =>
			(about: "read a byte range of the board memory into a hex file")
			(@arg format: -f --format +takes_value "hex format (default: intel)")
			(@arg record_len: --record_len +takes_value "data bytes per record")
			(@arg keep_going: -k --keep_going "continue after failed records without asking")
			(@arg FILE: +required "output hex file")
			(@arg LO: +required "first byte address")
			(@arg HI: +required "last byte address (inclusive)")
		)
		(@subcommand ram_verify =>
			(about: "compare the board memory with a hex file")
			(@arg format: -f --format +takes_value "hex format (default: detect per line)")
			(@arg keep_going: -k --keep_going "continue after failed records without asking")
			(@arg FILE: +required "hex file")
		)
		(@subcommand port_test =>
			(about: "run the channel handshake self test")
			(@arg rounds: -n --rounds +takes_value "number of probes")
		)
		(@subcommand jtag_id =>
			(about: "read the IDCODE of a single TAP")
			(@arg tck: --tck +takes_value "bit of TCK")
			(@arg tms: --tms +takes_value "bit of TMS")
			(@arg tdi: --tdi +takes_value "bit of TDI")
			(@arg tdo: --tdo +takes_value "bit of TDO")
			(@arg ir_length: --ir_length +takes_value "instruction register length")
			(@arg idcode: --idcode +takes_value "IDCODE instruction")
		)
		(@subcommand hex_check =>
			(about: "parse a hex file and verify its checksums")
			(@arg format: -f --format +takes_value "hex format (default: detect per line)")
			(@arg FILE: +required "hex file")
		)
		(@subcommand hex_convert =>
			(about: "convert the data of a hex file to another format")
			(@arg format: -f --format +takes_value "input format (default: detect per line)")
			(@arg to: -t --to +takes_value +required "output format (intel, motorola, xess)")
			(@arg record_len: --record_len +takes_value "data bytes per record")
			(@arg FILE: +required "input hex file")
			(@arg OUTPUT: +required "output hex file")
		)
	)
}

fn main_app() -> AResult<()> {
	let matches = app().get_matches();

	match matches.subcommand() {
		("ram_download", Some(sub_m)) => ram_download(&matches, sub_m),
		("ram_upload", Some(sub_m)) => ram_upload(&matches, sub_m),
		("ram_verify", Some(sub_m)) => ram_verify(&matches, sub_m),
		("port_test", Some(sub_m)) => port_test(&matches, sub_m),
		("jtag_id", Some(sub_m)) => jtag_id(&matches, sub_m),
		("hex_check", Some(sub_m)) => hex_check(sub_m),
		("hex_convert", Some(sub_m)) => hex_convert(sub_m),
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		for cause in e.iter_causes() {
			error!("  caused by: {}", cause);
		}
		if let Some(x) = error::find_xfer_error(&e) {
			error!("severity: {}", x.severity());
		}
		exit(1);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn flags_reach_settings() {
		let matches = app().get_matches_from(vec![
			"xsload", "--no_invert", "--little_bytes", "--lsb_bits", "ram_download", "--keep_going", "image.hex",
		]);
		assert_eq!(inv_mask(&matches), 0);
		let g = geometry(&matches).unwrap();
		assert!(!g.endian.big_bytes);
		assert!(!g.endian.big_bits);
		let sub_m = matches.subcommand_matches("ram_download").unwrap();
		assert!(progress(sub_m).confirm(&format_err!("word 0x10 failed")));
	}

	#[test]
	fn flag_defaults() {
		let matches = app().get_matches_from(vec!["xsload", "ram_verify", "image.hex"]);
		assert_eq!(inv_mask(&matches), PC_PARPORT_INV_MASK);
		let g = geometry(&matches).unwrap();
		assert!(g.endian.big_bytes);
		assert!(g.endian.big_bits);
	}
}
