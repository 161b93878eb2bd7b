use std::{
    fs::File,
    io,
    net::TcpListener,
    os::unix::io::{AsRawFd, RawFd},
    time::Duration,
};

use nix::errno::Errno;
use tracing::{debug, error, info, trace, warn};

use crate::{
    client::NetClient,
    echo::EchoFilter,
    endpoint::{read_block, write_block, Channel, ChannelEndpoint, Delivery, Endpoint, Role},
    error::Error,
    poller::{Interest, Poller, Readiness},
    registry::{ClientId, ClientRegistry},
};

/// The default ceiling on concurrently connected clients.
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// The default size of a single read.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Sizing of the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Connections beyond this many are accepted and closed right away.
    pub max_clients: usize,

    /// The most bytes moved per read, and the most bytes the echo filter remembers.
    pub block_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Moves bytes between the serial line, the pseudo-terminal peer and network clients.
///
/// Everything runs on the calling thread.
/// The wait for readiness is the only place the reactor blocks.
pub struct Reactor {
    poller: Poller,
    ready: Vec<Readiness>,

    serial: ChannelEndpoint,
    pty: ChannelEndpoint,
    listener: Endpoint<TcpListener>,
    clients: ClientRegistry<NetClient>,

    echo: EchoFilter,
    block: Vec<u8>,

    // Given up to accept and shed a connection when out of descriptors.
    spare: Option<File>,
}

impl Reactor {
    /// Take ownership of the endpoints and register them for readability.
    ///
    /// All of them are switched to non-blocking mode.
    /// An endpoint which cannot be registered is logged and left idle.
    pub fn new<S, P>(serial: S, pty: P, listener: TcpListener, limits: Limits) -> Result<Self, Error>
    where
        S: Channel + 'static,
        P: Channel + 'static,
    {
        // Three fixed endpoints on top of the clients.
        let poller = Poller::new(limits.max_clients + 3).map_err(Error::Poller)?;

        let reactor = Self {
            poller,
            ready: Vec::with_capacity(limits.max_clients + 3),
            serial: ChannelEndpoint::boxed(serial, Role::Serial)?,
            pty: ChannelEndpoint::boxed(pty, Role::PtyPeer)?,
            listener: Endpoint::new(listener, Role::Listener)?,
            clients: ClientRegistry::new(limits.max_clients),
            echo: EchoFilter::new(limits.block_size),
            block: vec![0; limits.block_size],
            spare: open_spare(),
        };

        for (fd, role) in [
            (reactor.serial.as_raw_fd(), Role::Serial),
            (reactor.pty.as_raw_fd(), Role::PtyPeer),
            (reactor.listener.as_raw_fd(), Role::Listener),
        ] {
            if let Err(e) = reactor.poller.register(fd, role.into(), Interest::Readable) {
                error!(%role, %e, "Could not register endpoint, it will stay idle");
            }
        }

        Ok(reactor)
    }

    /// How many clients are connected.
    pub fn client_count(&self) -> usize {
        self.clients.active_count()
    }

    /// Run until a fatal error occurs.
    pub fn run(&mut self) -> Result<(), Error> {
        info!(
            max_clients = self.clients.capacity(),
            block_size = self.block.len(),
            "Starting event loop"
        );

        loop {
            self.turn(None)?;
        }
    }

    /// Wait once, then handle every notification of that wake-up.
    /// `None` waits forever.
    ///
    /// Returns how many notifications were handled.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();

        self.poller.wait(&mut ready, timeout).map_err(Error::Wait)?;

        let handled = ready.len();
        for readiness in ready.iter() {
            self.dispatch(*readiness)?;
        }

        self.ready = ready;

        Ok(handled)
    }

    fn dispatch(&mut self, readiness: Readiness) -> Result<(), Error> {
        match readiness.token.role() {
            Some(Role::Serial) => self.on_serial(),
            Some(Role::PtyPeer) => self.on_pty(),
            Some(Role::Listener) => {
                self.on_listener();
                Ok(())
            }
            Some(Role::Client(id)) => {
                self.on_client(id, readiness);
                Ok(())
            }
            None => {
                warn!(token = ?readiness.token, "Notification for unknown token");
                Ok(())
            }
        }
    }

    /// Serial line to pseudo-terminal peer and every client, minus echoes.
    fn on_serial(&mut self) -> Result<(), Error> {
        let Some(n) = read_fixed(&mut self.serial, &mut self.block)? else {
            return Ok(());
        };
        let block = &self.block[..n];

        if self.echo.should_suppress(block) {
            debug!(bytes = n, "Ignoring echo");
            return Ok(());
        }

        trace!(bytes = n, "Serial -> {:?}", preview(block));

        deliver(&mut self.pty, block);

        let report = self.clients.broadcast(block);
        trace!(?report, "Broadcast");

        self.reap_clients();

        Ok(())
    }

    /// Pseudo-terminal peer to serial line, remembering the block for echo suppression.
    fn on_pty(&mut self) -> Result<(), Error> {
        let Some(n) = read_fixed(&mut self.pty, &mut self.block)? else {
            return Ok(());
        };
        let block = &self.block[..n];

        trace!(bytes = n, "PTY -> {:?}", preview(block));

        self.echo.record_sent(block);
        deliver(&mut self.serial, block);

        Ok(())
    }

    /// Accept one pending connection.
    /// Any further pending connections keep the listener ready for the next wake-up.
    fn on_listener(&mut self) {
        let (stream, addr) = match self.listener.get_ref().accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if out_of_descriptors(&e) => {
                self.shed_connection(e);
                return;
            }
            Err(e) => {
                warn!(%e, "Accept failed");
                return;
            }
        };

        let client = match NetClient::new(stream, addr) {
            Ok(client) => client,
            Err(e) => {
                warn!(%addr, %e, "Could not prepare client socket, closing it");
                return;
            }
        };
        let fd = client.as_raw_fd();

        let id = match self.clients.add(client) {
            Ok(id) => id,
            Err(rejected) => {
                warn!(%addr, reason = %rejected.reason, "Closing connection");
                return;
            }
        };

        match self
            .poller
            .register(fd, Role::Client(id).into(), Interest::ReadableOrHangup)
        {
            Ok(()) => info!(
                %addr,
                %id,
                active = self.clients.active_count(),
                "Client connected"
            ),
            Err(e) => {
                error!(%addr, %e, "Could not register client, closing it");
                self.clients.remove(id);
            }
        }
    }

    /// Client to serial line. End-of-stream, errors and hangups disconnect the client.
    fn on_client(&mut self, id: ClientId, readiness: Readiness) {
        if !readiness.readable {
            if readiness.hangup || readiness.error {
                self.disconnect(id, "hangup");
            }
            return;
        }

        let Some(client) = self.clients.get_mut(id) else {
            trace!(%id, "Notification for departed client");
            return;
        };

        match read_block(client, &mut self.block) {
            Ok(None) => {}
            Ok(Some(0)) => self.disconnect(id, "closed by peer"),
            Ok(Some(n)) => {
                let block = &self.block[..n];
                trace!(%id, bytes = n, "Client -> {:?}", preview(block));
                deliver(&mut self.serial, block);
            }
            Err(e) => {
                debug!(%id, %e, "Read from client failed");
                self.disconnect(id, "read error");
            }
        }
    }

    /// Out of descriptors: the pending connection would keep the listener ready forever.
    /// Close the spare to make room, accept the connection and close it right away.
    fn shed_connection(&mut self, cause: io::Error) {
        if self.spare.take().is_none() {
            // Nothing to give up. Retry the spare so the next attempt can shed.
            self.spare = open_spare();
            debug!(%cause, "Out of descriptors and no spare to give up");
            return;
        }

        match self.listener.get_ref().accept() {
            Ok((stream, addr)) => {
                drop(stream);
                warn!(%addr, %cause, "Out of descriptors, closing connection");
            }
            Err(e) => debug!(%e, "Accept with spare descriptor failed"),
        }

        self.spare = open_spare();
    }

    fn disconnect(&mut self, id: ClientId, reason: &str) {
        if let Some(client) = self.clients.remove(id) {
            self.forget(client.as_raw_fd());
            info!(
                addr = %client.addr(),
                %id,
                reason,
                active = self.clients.active_count(),
                "Client disconnected"
            );
        }
    }

    fn reap_clients(&mut self) {
        for (id, client) in self.clients.reap() {
            self.forget(client.as_raw_fd());
            info!(
                addr = %client.addr(),
                %id,
                active = self.clients.active_count(),
                "Client dropped after failed send"
            );
        }
    }

    fn forget(&self, fd: RawFd) {
        if let Err(e) = self.poller.deregister(fd) {
            debug!(fd, %e, "Could not deregister");
        }
    }
}

/// Read a block from the serial line or the pseudo-terminal.
/// Both must stay up for the bridge to be useful, so end-of-stream and errors are fatal.
fn read_fixed(
    endpoint: &mut ChannelEndpoint,
    block: &mut [u8],
) -> Result<Option<usize>, Error> {
    let role = endpoint.role();

    match read_block(endpoint, block) {
        Ok(Some(0)) => Err(Error::EndpointClosed(role)),
        Ok(n) => Ok(n),
        Err(source) => Err(Error::EndpointIo { role, source }),
    }
}

/// Write a block to the serial line or the pseudo-terminal.
/// Failures lose the block but are not fatal.
fn deliver(endpoint: &mut ChannelEndpoint, block: &[u8]) {
    let role = endpoint.role();

    match write_block(endpoint, block) {
        Ok(Delivery::Complete) => trace!(%role, bytes = block.len(), "Delivered"),
        // Nobody drains the pseudo-terminal while the downstream program is away.
        Ok(Delivery::Short { written }) if role == Role::PtyPeer => debug!(
            %role,
            written,
            dropped = block.len() - written,
            "Partial write, remainder dropped"
        ),
        Ok(Delivery::Short { written }) => warn!(
            %role,
            written,
            dropped = block.len() - written,
            "Partial write, remainder dropped"
        ),
        Err(e) => warn!(%role, %e, bytes = block.len(), "Write failed, block dropped"),
    }
}

fn open_spare() -> Option<File> {
    match File::open("/dev/null") {
        Ok(file) => Some(file),
        Err(e) => {
            debug!(%e, "No spare descriptor");
            None
        }
    }
}

fn out_of_descriptors(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error().map(Errno::from_i32),
        Some(Errno::EMFILE | Errno::ENFILE)
    )
}

fn preview(block: &[u8]) -> String {
    String::from_utf8_lossy(&block[..block.len().min(32)]).into_owned()
}
