use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
    os::unix::io::{AsRawFd, RawFd},
};

/// A connected network client.
#[derive(Debug)]
pub struct NetClient {
    stream: TcpStream,
    addr: SocketAddr,
}

impl NetClient {
    /// Wrap an accepted connection, switching it to non-blocking mode.
    pub fn new(stream: TcpStream, addr: SocketAddr) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        Ok(Self { stream, addr })
    }

    /// The remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Read for NetClient {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for NetClient {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl AsRawFd for NetClient {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
