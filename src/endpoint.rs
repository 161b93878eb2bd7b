use std::{
    fmt::Display,
    io::{self, Read, Write},
    os::unix::io::{AsRawFd, RawFd},
};

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::{error::Error, registry::ClientId};

/// What an endpoint is used for.
/// The reactor routes readiness notifications by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The serial device.
    Serial,

    /// The control side of the pseudo-terminal pair.
    PtyPeer,

    /// The TCP listening socket.
    Listener,

    /// A connected network client.
    Client(ClientId),
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Serial => write!(f, "serial"),
            Role::PtyPeer => write!(f, "pty peer"),
            Role::Listener => write!(f, "listener"),
            Role::Client(id) => write!(f, "client {id}"),
        }
    }
}

const TAG_BITS: u32 = 8;
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;
const SLOT_BITS: u32 = 24;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

const TAG_SERIAL: u64 = 0;
const TAG_PTY_PEER: u64 = 1;
const TAG_LISTENER: u64 = 2;
const TAG_CLIENT: u64 = 3;

/// The largest number of client slots a [`Token`] can address.
pub const MAX_SLOTS: usize = 1 << SLOT_BITS;

/// The identity handed to the readiness mechanism.
///
/// Layout, from the least significant bit:
/// 8 bits of role tag, 24 bits of client slot, 32 bits of slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    /// Recover the role this token was made from.
    /// Unknown tags give `None`.
    pub fn role(self) -> Option<Role> {
        match self.0 & TAG_MASK {
            TAG_SERIAL => Some(Role::Serial),
            TAG_PTY_PEER => Some(Role::PtyPeer),
            TAG_LISTENER => Some(Role::Listener),
            TAG_CLIENT => {
                let slot = ((self.0 >> TAG_BITS) & SLOT_MASK) as usize;
                let generation = (self.0 >> (TAG_BITS + SLOT_BITS)) as u32;
                Some(Role::Client(ClientId::new(slot, generation)))
            }
            _ => None,
        }
    }
}

impl From<Role> for Token {
    fn from(role: Role) -> Self {
        match role {
            Role::Serial => Token(TAG_SERIAL),
            Role::PtyPeer => Token(TAG_PTY_PEER),
            Role::Listener => Token(TAG_LISTENER),
            Role::Client(id) => {
                debug_assert!(id.slot() < MAX_SLOTS);
                let slot = (id.slot() as u64) & SLOT_MASK;
                let generation = u64::from(id.generation());
                Token(TAG_CLIENT | (slot << TAG_BITS) | (generation << (TAG_BITS + SLOT_BITS)))
            }
        }
    }
}

impl From<Token> for u64 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl From<u64> for Token {
    fn from(raw: u64) -> Self {
        Token(raw)
    }
}

/// A byte stream the reactor can watch.
///
/// Anything readable, writable and backed by a file descriptor qualifies.
pub trait Channel: Read + Write + AsRawFd + Send {}

impl<T: Read + Write + AsRawFd + Send> Channel for T {}

/// A handle monitored by the reactor, tagged with its [`Role`].
///
/// The handle is in non-blocking mode for as long as the endpoint exists.
#[derive(Debug)]
pub struct Endpoint<H> {
    handle: H,
    role: Role,
    fd: RawFd,
}

impl<H: AsRawFd> Endpoint<H> {
    /// Wrap a handle, switching it to non-blocking mode.
    pub fn new(handle: H, role: Role) -> Result<Self, Error> {
        let fd = handle.as_raw_fd();
        set_nonblocking(fd).map_err(|source| Error::NonBlocking { role, source })?;

        Ok(Self { handle, role, fd })
    }
}

/// An endpoint over any [`Channel`].
pub type ChannelEndpoint = Endpoint<Box<dyn Channel>>;

impl ChannelEndpoint {
    /// Wrap any [`Channel`] behind a box, switching it to non-blocking mode.
    pub fn boxed<C: Channel + 'static>(channel: C, role: Role) -> Result<Self, Error> {
        let Endpoint { handle, role, fd } = Endpoint::new(channel, role)?;

        Ok(Self {
            handle: Box::new(handle),
            role,
            fd,
        })
    }
}

impl<H> Endpoint<H> {
    /// What this endpoint is used for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Borrow the underlying handle.
    pub fn get_ref(&self) -> &H {
        &self.handle
    }
}

impl<H> AsRawFd for Endpoint<H> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl<H: Read> Read for Endpoint<H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle.read(buf)
    }
}

impl<H: Write> Write for Endpoint<H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle.flush()
    }
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

    Ok(())
}

/// How much of a block reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// All of it.
    Complete,

    /// The destination stopped accepting data after `written` bytes.
    /// The remainder was dropped.
    Short {
        /// Bytes that made it.
        written: usize,
    },
}

/// Read at most one block.
///
/// `Ok(None)` means nothing is available right now.
/// `Ok(Some(0))` means the source reached end-of-stream.
pub(crate) fn read_block<R: Read>(source: &mut R, block: &mut [u8]) -> io::Result<Option<usize>> {
    loop {
        match source.read(block) {
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Write a block, continuing for as long as the sink keeps accepting bytes.
///
/// A sink which would block ends the attempt. Nothing is queued for later.
pub(crate) fn write_block<W: Write>(sink: &mut W, block: &[u8]) -> io::Result<Delivery> {
    let mut written = 0;

    while written < block.len() {
        match sink.write(&block[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }

    if written == block.len() {
        Ok(Delivery::Complete)
    } else {
        Ok(Delivery::Short { written })
    }
}
