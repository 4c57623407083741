//! JTAG: TAP controller sequencing and boundary-scan memory access.

mod bsdr;
mod hardware;
mod tap;

pub use self::bsdr::{
	BoundaryScan,
	BsdrLayout,
	PinCells,
	ScanPath,
};
pub use self::hardware::{
	ChannelTap,
	Hardware,
	JtagLayout,
	TapPins,
};
pub use self::tap::{
	Tap,
	TapState,
};
