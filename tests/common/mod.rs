#![allow(dead_code)]

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};

use color_eyre::Result;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, UnixStream},
    sync::oneshot,
    time::timeout,
};
use tracing::{info, Level};
use uart_bridge::{
    error::Error,
    reactor::{Limits, Reactor},
    server,
};

/// How long to wait for bytes that should arrive.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// How long to listen for bytes that should not arrive.
pub const QUIET: Duration = Duration::from_millis(300);

/// A running bridge, with the far ends of its serial line and pseudo-terminal.
pub struct Harness {
    /// Plays the serial hardware.
    pub device: UnixStream,

    /// Plays the program attached to the pseudo-terminal.
    pub gui: UnixStream,

    /// Where clients connect.
    pub port: u16,

    /// Resolves if the event loop stops.
    pub outcome: oneshot::Receiver<Result<(), Error>>,
}

pub async fn start_bridge() -> Result<Harness> {
    start_bridge_with_limits(Limits::default()).await
}

pub async fn start_bridge_with_limits(limits: Limits) -> Result<Harness> {
    uart_bridge::logging::init(Level::DEBUG, None).await;

    let (device, serial_side) = std::os::unix::net::UnixStream::pair()?;
    let (gui, pty_side) = std::os::unix::net::UnixStream::pair()?;

    let listener = server::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), 5)?;
    let port = listener.local_addr()?.port();

    let reactor = Reactor::new(serial_side, pty_side, listener, limits)?;
    let outcome = server::spawn(reactor)?;

    device.set_nonblocking(true)?;
    gui.set_nonblocking(true)?;

    info!(port, "Bridge started");

    Ok(Harness {
        device: UnixStream::from_std(device)?,
        gui: UnixStream::from_std(gui)?,
        port,
        outcome,
    })
}

pub async fn connect(port: u16) -> Result<TcpStream> {
    info!("Connecting to bridge on port {port}");
    Ok(TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?)
}

/// Connect `n` clients and make sure the bridge has registered all of them,
/// by pushing a marker through the serial line.
pub async fn connect_registered(harness: &mut Harness, n: usize) -> Result<Vec<TcpStream>> {
    let mut clients = vec![];
    for _ in 0..n {
        clients.push(connect(harness.port).await?);
    }

    // Clients are accepted in connection order, one per wake-up.
    // Retry the marker until the last one has it.
    let mut attempts = 0;
    loop {
        attempts += 1;
        send(&mut harness.device, b"sync").await?;

        let mut got = vec![false; n];
        for (client, got) in clients.iter_mut().zip(got.iter_mut()) {
            *got = receive_within(client, 4, Duration::from_millis(200)).await? == b"sync";
        }
        receive(&mut harness.gui, 4).await?;

        if got.iter().all(|&g| g) || attempts > 20 {
            break;
        }
    }

    Ok(clients)
}

pub async fn send<W: AsyncWrite + Unpin>(stream: &mut W, bytes: &[u8]) -> Result<()> {
    stream.write_all(bytes).await?;
    Ok(())
}

/// Receive exactly `len` bytes.
pub async fn receive<R: AsyncRead + Unpin>(stream: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    timeout(PATIENCE, stream.read_exact(&mut buf)).await??;
    Ok(buf)
}

/// Receive up to `len` bytes, giving whatever arrived once `wait` runs out.
pub async fn receive_within<R: AsyncRead + Unpin>(
    stream: &mut R,
    len: usize,
    wait: Duration,
) -> Result<Vec<u8>> {
    let mut buf = vec![0; len];
    let mut filled = 0;

    while filled < len {
        match timeout(wait, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

/// True if nothing arrives for a while.
pub async fn stays_silent<R: AsyncRead + Unpin>(stream: &mut R) -> bool {
    let mut buf = [0; 64];
    timeout(QUIET, stream.read(&mut buf)).await.is_err()
}

/// True if the peer closed the connection (or reset it).
pub async fn is_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0; 64];
    matches!(
        timeout(PATIENCE, stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

/// True while the event loop has not stopped.
pub fn is_running(harness: &mut Harness) -> bool {
    matches!(
        harness.outcome.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}
