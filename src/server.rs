use std::{
    io,
    net::{SocketAddr, SocketAddrV4, TcpListener},
    os::unix::io::{AsRawFd, FromRawFd, OwnedFd},
    thread,
};

use nix::sys::socket::{
    bind as bind_socket, listen, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType,
    SockaddrIn,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    config::Config,
    error::Error,
    pty::{Pty, PtyLink},
    reactor::Reactor,
    serial,
};

/// Everything needed to run the bridge.
pub struct Bridge {
    /// Owns the serial device, the pseudo-terminal and the listener.
    pub reactor: Reactor,

    /// The stable pseudo-terminal path, if one could be made.
    /// Dropping it removes the link.
    pub link: Option<PtyLink>,
}

/// Bind a non-blocking TCP listener with an explicit backlog.
pub fn bind(addr: SocketAddrV4, backlog: usize) -> Result<TcpListener, Error> {
    let failed = |source| Error::Listen {
        addr: SocketAddr::V4(addr),
        source,
    };

    let fd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(failed)?;

    // Safety: socket() just handed us this descriptor and nothing else owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    setsockopt(fd.as_raw_fd(), sockopt::ReuseAddr, &true).map_err(failed)?;
    bind_socket(fd.as_raw_fd(), &SockaddrIn::from(addr)).map_err(failed)?;
    listen(fd.as_raw_fd(), backlog).map_err(failed)?;

    Ok(TcpListener::from(fd))
}

/// Open the serial device, allocate the pseudo-terminal and start listening.
///
/// Any failure here is fatal.
/// Only the pseudo-terminal link is optional; if it cannot be made the slave path is logged instead.
pub fn open(config: &Config) -> Result<Bridge, Error> {
    let serial = serial::open(&config.serial)?;
    info!(path = ?config.serial.path, baud = config.serial.baud, "Opened serial device");

    let pty = Pty::open()?;
    info!(path = ?pty.path(), "Created pseudo-terminal");

    let link = match &config.pty_link {
        Some(link_path) => match pty.link(link_path) {
            Ok(link) => {
                info!(link = ?link.path(), target = ?pty.path(), "Created link");
                Some(link)
            }
            Err(e) => {
                warn!(link = ?link_path, %e, "Could not create link (run as root?)");
                None
            }
        },
        None => None,
    };

    let downstream = link
        .as_ref()
        .map(|link| link.path().to_path_buf())
        .unwrap_or_else(|| pty.path().to_path_buf());
    info!(path = ?downstream, "Point the downstream program here");

    let addr = config.listen.socket_addr();
    let listener = bind(addr, config.listen.backlog)?;
    info!(%addr, backlog = config.listen.backlog, "Listening for clients");

    let reactor = Reactor::new(serial, pty, listener, config.limits())?;

    Ok(Bridge { reactor, link })
}

/// Run the reactor on its own thread.
///
/// The receiver resolves when the reactor stops, which only happens on a fatal error.
pub fn spawn(mut reactor: Reactor) -> io::Result<oneshot::Receiver<Result<(), Error>>> {
    let (outcome_tx, outcome_rx) = oneshot::channel();

    thread::Builder::new()
        .name("reactor".into())
        .spawn(move || {
            let _span = info_span!("reactor").entered();

            let outcome = reactor.run();
            if let Err(e) = &outcome {
                error!(%e, "Event loop stopped");
            }

            if outcome_tx.send(outcome).is_err() {
                debug!("Nobody waiting for the outcome");
            }
        })?;

    Ok(outcome_rx)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::{Ipv4Addr, TcpStream},
    };

    use super::*;

    #[test]
    fn bound_listener_accepts_connections() {
        let listener = bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 5).unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        client.write_all(b"hi").unwrap();

        listener.set_nonblocking(false).unwrap();
        let (mut accepted, _) = listener.accept().unwrap();
        let mut buf = [0; 2];
        accepted.read_exact(&mut buf).unwrap();

        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn port_in_use_is_an_error() {
        let first = bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 5).unwrap();
        let port = first.local_addr().unwrap().port();

        let second = bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), 5);

        assert!(matches!(second, Err(Error::Listen { .. })));
    }
}
