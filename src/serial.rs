use std::{
    fs::File,
    os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd},
};

use nix::sys::termios::{self, SetArg};
use serialport::SerialPortInfo;
use tracing::debug;

use crate::{config::SerialConfig, error::Error};

/// Open the serial device and put the line in raw mode.
///
/// The returned handle is still blocking; the reactor switches it over.
pub fn open(config: &SerialConfig) -> Result<File, Error> {
    debug!(path = ?config.path, baud = config.baud, flow_control = ?config.flow_control, "Opening serial device");

    let port = serialport::new(config.path.to_string_lossy(), config.baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(config.flow_control)
        .open_native()
        .map_err(|source| Error::OpenSerial {
            path: config.path.clone(),
            source,
        })?;

    // Safety: the port gave up ownership of the descriptor.
    let file = unsafe { File::from_raw_fd(port.into_raw_fd()) };

    make_raw(file.as_raw_fd())?;

    Ok(file)
}

/// Disable echo, canonical input and output post-processing on a terminal device.
pub(crate) fn make_raw(fd: RawFd) -> Result<(), Error> {
    let mut attributes = termios::tcgetattr(fd).map_err(Error::LineDiscipline)?;
    termios::cfmakeraw(&mut attributes);
    termios::tcsetattr(fd, SetArg::TCSANOW, &attributes).map_err(Error::LineDiscipline)
}

/// Serial ports present on this machine.
pub fn available() -> Result<Vec<SerialPortInfo>, Error> {
    serialport::available_ports().map_err(Error::PortScan)
}
