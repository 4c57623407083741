mod channel;
mod hardware;
mod packet;

#[cfg(target_os = "linux")]
mod parport;

#[cfg(feature = "usb")]
mod usb;

pub use self::channel::{
	BitChannel,
	BitField,
	DEFAULT_SELF_CHECKS,
	PC_PARPORT_INV_MASK,
	REGISTER_BITS,
};

pub use self::hardware::{
	Register,
	Registers,
	reliable_sleep,
};

pub use self::packet::{
	PacketLink,
	PacketPort,
	serve_packet,
};

#[cfg(target_os = "linux")]
pub use self::parport::ParPort;

#[cfg(feature = "usb")]
pub use self::usb::UsbLink;
