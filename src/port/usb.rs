//! `PacketLink` over a pair of USB bulk endpoints.

use std::time::Duration;

use rusb::{
	DeviceHandle,
	Direction,
	GlobalContext,
	TransferType,
};

use super::PacketLink;

const TIMEOUT: Duration = Duration::from_millis(100);

pub struct UsbLink {
	device: DeviceHandle<GlobalContext>,
	interface: u8,
	read_endpoint: u8,
	write_endpoint: u8,
}

impl UsbLink {
	/// open the first device with the given ids that has a vendor interface
	/// with bulk IN and OUT endpoints
	pub fn open(vendor: u16, product: u16) -> crate::AResult<Self> {
		let mut device = match rusb::open_device_with_vid_pid(vendor, product) {
			Some(d) => d,
			None => bail!("no USB device {:04x}:{:04x} attached", vendor, product),
		};
		let descriptor = device.device().active_config_descriptor()?;

		for interface in descriptor.interfaces() {
			for d in interface.descriptors() {
				let mut read_endpoint = None;
				let mut write_endpoint = None;
				for e in d.endpoint_descriptors() {
					if e.transfer_type() != TransferType::Bulk {
						continue;
					}
					match e.direction() {
						Direction::In => read_endpoint = Some(e.address()),
						Direction::Out => write_endpoint = Some(e.address()),
					}
				}

				if let (Some(read_endpoint), Some(write_endpoint)) = (read_endpoint, write_endpoint) {
					let number = d.interface_number();
					device.claim_interface(number)?;
					info!("USB {:04x}:{:04x}: using interface {} (IN 0x{:02x}, OUT 0x{:02x})",
						vendor, product, number, read_endpoint, write_endpoint);
					return Ok(UsbLink {
						device,
						interface: number,
						read_endpoint,
						write_endpoint,
					});
				}
			}
		}

		bail!("USB device {:04x}:{:04x} has no bulk endpoint pair", vendor, product)
	}
}

impl Drop for UsbLink {
	fn drop(&mut self) {
		if let Err(e) = self.device.release_interface(self.interface) {
			warn!("couldn't release USB interface {}: {}", self.interface, e);
		}
	}
}

impl PacketLink for UsbLink {
	fn send(&mut self, packet: &[u8]) -> crate::AResult<()> {
		let written = self.device.write_bulk(self.write_endpoint, packet, TIMEOUT)?;
		ensure!(written == packet.len(), "short USB write: {} of {} bytes", written, packet.len());
		Ok(())
	}

	fn receive(&mut self, max_len: usize) -> crate::AResult<Vec<u8>> {
		let mut buf = vec![0u8; max_len];
		let len = self.device.read_bulk(self.read_endpoint, &mut buf, TIMEOUT)?;
		buf.truncate(len);
		Ok(buf)
	}
}
