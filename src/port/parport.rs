//! PC parallel port through the Linux `ppdev` driver (`/dev/parportN`).

use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{
	Path,
	PathBuf,
};

use libc::{
	c_int,
	c_ulong,
	c_void,
	ioctl,
};

use super::{
	Register,
	Registers,
};

// _IO/_IOR/_IOW('p', nr, type) from <linux/ppdev.h>
mod consts {
	use libc::c_ulong;

	const fn io(nr: c_ulong) -> c_ulong {
		(b'p' as c_ulong) << 8 | nr
	}
	const fn ior(nr: c_ulong, size: c_ulong) -> c_ulong {
		2 << 30 | size << 16 | io(nr)
	}
	const fn iow(nr: c_ulong, size: c_ulong) -> c_ulong {
		1 << 30 | size << 16 | io(nr)
	}

	pub const PPRSTATUS: c_ulong = ior(0x81, 1);
	pub const PPRCONTROL: c_ulong = ior(0x83, 1);
	pub const PPWCONTROL: c_ulong = iow(0x84, 1);
	pub const PPRDATA: c_ulong = ior(0x85, 1);
	pub const PPWDATA: c_ulong = iow(0x86, 1);
	pub const PPCLAIM: c_ulong = io(0x8b);
	pub const PPRELEASE: c_ulong = io(0x8c);
	pub const PPDATADIR: c_ulong = iow(0x90, 4);
}

use self::consts::*;

fn pp_ioctl(file: &fs::File, request: c_ulong, arg: *mut c_void) -> io::Result<()> {
	let res = unsafe { ioctl(file.as_raw_fd(), request as _, arg) };
	if res < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(())
}

/// A claimed parallel port; released again on drop.
#[derive(Debug)]
pub struct ParPort {
	file: fs::File,
	path: PathBuf,
}

impl ParPort {
	pub fn open<P: AsRef<Path>>(path: P) -> crate::AResult<Self> {
		let path = path.as_ref().to_path_buf();
		with_context!(("couldn't open parallel port {}", path.display()), {
			let file = fs::OpenOptions::new()
				.read(true)
				.write(true)
				.open(&path)?;
			pp_ioctl(&file, PPCLAIM, std::ptr::null_mut())?;
			let mut port = ParPort { file, path: path.clone() };
			// data lines are outputs
			let mut dir: c_int = 0;
			port.ioctl(PPDATADIR, &mut dir as *mut c_int as *mut c_void)?;
			info!("claimed parallel port {}", path.display());
			Ok(port)
		})
	}

	/// `/dev/parport<number>`
	pub fn open_number(number: usize) -> crate::AResult<Self> {
		ParPort::open(format!("/dev/parport{}", number))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn ioctl(&mut self, request: c_ulong, arg: *mut c_void) -> io::Result<()> {
		pp_ioctl(&self.file, request, arg)
	}

	fn release(&mut self) {
		if let Err(e) = self.ioctl(PPRELEASE, std::ptr::null_mut()) {
			warn!("couldn't release parallel port {}: {}", self.path.display(), e);
		}
	}
}

impl Drop for ParPort {
	fn drop(&mut self) {
		self.release();
	}
}

impl Registers for ParPort {
	fn write_register(&mut self, reg: Register, value: u8) -> crate::AResult<()> {
		let request = match reg {
			Register::Data => PPWDATA,
			Register::Control => PPWCONTROL,
			Register::Status => bail!("status register of {} is read-only", self.path.display()),
		};
		let mut value = value;
		self.ioctl(request, &mut value as *mut u8 as *mut c_void)?;
		Ok(())
	}

	fn read_register(&mut self, reg: Register) -> crate::AResult<u8> {
		let request = match reg {
			Register::Data => PPRDATA,
			Register::Status => PPRSTATUS,
			Register::Control => PPRCONTROL,
		};
		let mut value = 0u8;
		self.ioctl(request, &mut value as *mut u8 as *mut c_void)?;
		Ok(value)
	}
}
