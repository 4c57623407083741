//! Emulation of the 24-bit register over a command/response packet link,
//! for transports (USB) that can't touch port registers directly.
//!
//! Commands:
//! - `[0x10 | reg, value]`: write register `reg`; no response
//! - `[0x20 | reg]`: read register `reg`; answered by `[0x20 | reg, value]`

use std::time::Duration;

use super::{
	Register,
	Registers,
	reliable_sleep,
};

const CMD_WRITE: u8 = 0x10;
const CMD_READ: u8 = 0x20;
const CMD_MASK: u8 = 0xf0;

pub trait PacketLink {
	fn send(&mut self, packet: &[u8]) -> crate::AResult<()>;

	/// receive one packet of (at most) `max_len` bytes
	fn receive(&mut self, max_len: usize) -> crate::AResult<Vec<u8>>;

	/// receive one packet per entry of `lengths`, each of exactly that length
	fn receive_packets(&mut self, lengths: &[usize]) -> crate::AResult<Vec<Vec<u8>>> {
		let mut packets = Vec::with_capacity(lengths.len());
		for (i, &len) in lengths.iter().enumerate() {
			let packet = self.receive(len)?;
			ensure!(packet.len() == len, "response packet {}: expected {} bytes, got {}", i, len, packet.len());
			packets.push(packet);
		}
		Ok(packets)
	}
}

impl<'a, L: ?Sized + PacketLink> PacketLink for &'a mut L {
	fn send(&mut self, packet: &[u8]) -> crate::AResult<()> {
		L::send(*self, packet)
	}

	fn receive(&mut self, max_len: usize) -> crate::AResult<Vec<u8>> {
		L::receive(*self, max_len)
	}
}

pub struct PacketPort<L: PacketLink> {
	link: L,
}

impl<L: PacketLink> PacketPort<L> {
	pub fn new(link: L) -> Self {
		PacketPort { link }
	}

	pub fn link(&mut self) -> &mut L {
		&mut self.link
	}

	pub fn into_link(self) -> L {
		self.link
	}

	/// read several registers with one batch of commands
	pub fn read_registers(&mut self, regs: &[Register]) -> crate::AResult<Vec<u8>> {
		let command: Vec<u8> = regs.iter().map(|r| CMD_READ | r.index() as u8).collect();
		self.link.send(&command)?;
		let lengths = vec![2usize; regs.len()];
		let responses = self.link.receive_packets(&lengths)?;

		let mut values = Vec::with_capacity(regs.len());
		for (reg, response) in regs.iter().zip(responses) {
			let expected = CMD_READ | reg.index() as u8;
			ensure!(response[0] == expected,
				"unexpected response 0x{:02x} to read of {:?} (expected 0x{:02x})", response[0], reg, expected
			);
			values.push(response[1]);
		}
		Ok(values)
	}
}

impl<L: PacketLink> Registers for PacketPort<L> {
	fn write_register(&mut self, reg: Register, value: u8) -> crate::AResult<()> {
		ensure!(reg.is_writable(), "{:?} register is read-only", reg);
		self.link.send(&[CMD_WRITE | reg.index() as u8, value])
	}

	fn read_register(&mut self, reg: Register) -> crate::AResult<u8> {
		Ok(self.read_registers(&[reg])?[0])
	}

	fn delay(&mut self, duration: Duration) {
		reliable_sleep(duration)
	}
}

/// Answers `PacketPort` commands from a plain `Registers` implementation;
/// the firmware side of the protocol.
pub fn serve_packet<R: Registers + ?Sized>(regs: &mut R, packet: &[u8]) -> crate::AResult<Vec<Vec<u8>>> {
	let mut responses = Vec::new();
	let mut rest = packet;
	while let Some(&cmd) = rest.first() {
		let reg = match Register::from_index((cmd & !CMD_MASK) as usize) {
			Some(reg) => reg,
			None => bail!("invalid register in command 0x{:02x}", cmd),
		};
		match cmd & CMD_MASK {
			CMD_WRITE => {
				ensure!(rest.len() >= 2, "truncated write command");
				regs.write_register(reg, rest[1])?;
				rest = &rest[2..];
			},
			CMD_READ => {
				responses.push(vec![cmd, regs.read_register(reg)?]);
				rest = &rest[1..];
			},
			_ => bail!("invalid command 0x{:02x}", cmd),
		}
	}
	Ok(responses)
}
