//! Readiness notification on top of Linux epoll.
//!
//! Registrations are level-triggered: a descriptor with unread data is reported
//! again on every wait until it has been drained.

use std::{
    os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::epoll::{
        epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp,
    },
};

use crate::endpoint::Token;

/// What to be woken up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Data to read. Hangups and errors are reported regardless.
    Readable,

    /// Data to read, or the peer shutting down its writing half.
    ReadableOrHangup,
}

impl Interest {
    fn flags(self) -> EpollFlags {
        match self {
            Interest::Readable => EpollFlags::EPOLLIN,
            Interest::ReadableOrHangup => EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP,
        }
    }
}

/// One notification: which endpoint, and what happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// The endpoint, as registered.
    pub token: Token,

    /// There is data (or end-of-stream) to read.
    pub readable: bool,

    /// The peer hung up, fully or its writing half.
    pub hangup: bool,

    /// An error is pending on the descriptor.
    pub error: bool,
}

impl From<&EpollEvent> for Readiness {
    fn from(event: &EpollEvent) -> Self {
        let flags = event.events();

        Self {
            token: Token::from(event.data()),
            readable: flags.contains(EpollFlags::EPOLLIN),
            hangup: flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP),
            error: flags.contains(EpollFlags::EPOLLERR),
        }
    }
}

/// An epoll instance.
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
    events: Vec<EpollEvent>,
}

impl Poller {
    /// Create a poller which reports at most `max_events` notifications per wait.
    pub fn new(max_events: usize) -> nix::Result<Self> {
        let fd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC)?;

        // Safety: epoll_create1 just handed us this descriptor and nothing else owns it.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };

        Ok(Self {
            epoll,
            events: vec![EpollEvent::empty(); max_events.max(1)],
        })
    }

    /// Start watching a descriptor.
    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> nix::Result<()> {
        let mut event = EpollEvent::new(interest.flags(), token.into());

        epoll_ctl(self.epoll.as_raw_fd(), EpollOp::EpollCtlAdd, fd, &mut event)
    }

    /// Stop watching a descriptor.
    pub fn deregister(&self, fd: RawFd) -> nix::Result<()> {
        epoll_ctl(self.epoll.as_raw_fd(), EpollOp::EpollCtlDel, fd, None)
    }

    /// Block until at least one registered descriptor is ready, or the timeout passes.
    /// `None` waits forever.
    ///
    /// Notifications are appended to `ready` in the order the kernel reports them.
    /// An interrupted wait reports nothing.
    pub fn wait(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> nix::Result<()> {
        let timeout_ms = match timeout {
            Some(timeout) => timeout.as_millis().min(isize::MAX as u128) as isize,
            None => -1,
        };

        let n = match epoll_wait(self.epoll.as_raw_fd(), &mut self.events, timeout_ms) {
            Ok(n) => n,
            Err(Errno::EINTR) => 0,
            Err(e) => return Err(e),
        };

        ready.extend(self.events[..n].iter().map(Readiness::from));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, os::unix::net::UnixStream};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::endpoint::Role;

    const SHORT: Option<Duration> = Some(Duration::from_millis(50));

    #[test]
    fn nothing_ready_times_out() {
        let mut poller = Poller::new(4).unwrap();
        let (ours, _theirs) = UnixStream::pair().unwrap();
        poller
            .register(ours.as_raw_fd(), Role::Serial.into(), Interest::Readable)
            .unwrap();

        let mut ready = vec![];
        poller.wait(&mut ready, SHORT).unwrap();

        assert!(ready.is_empty());
    }

    #[test]
    fn readable_descriptor_is_reported_with_its_token() {
        let mut poller = Poller::new(4).unwrap();
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        poller
            .register(ours.as_raw_fd(), Role::PtyPeer.into(), Interest::Readable)
            .unwrap();

        theirs.write_all(b"hi").unwrap();

        let mut ready = vec![];
        poller.wait(&mut ready, SHORT).unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].token.role(), Some(Role::PtyPeer));
        assert!(ready[0].readable);
        assert!(!ready[0].hangup);
    }

    #[test]
    fn undrained_descriptor_stays_ready() {
        let mut poller = Poller::new(4).unwrap();
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        poller
            .register(ours.as_raw_fd(), Role::Serial.into(), Interest::Readable)
            .unwrap();
        theirs.write_all(b"unread").unwrap();

        for _ in 0..3 {
            let mut ready = vec![];
            poller.wait(&mut ready, SHORT).unwrap();
            assert_eq!(ready.len(), 1);
        }
    }

    #[test]
    fn peer_close_is_a_hangup() {
        let mut poller = Poller::new(4).unwrap();
        let (ours, theirs) = UnixStream::pair().unwrap();
        poller
            .register(
                ours.as_raw_fd(),
                Role::Listener.into(),
                Interest::ReadableOrHangup,
            )
            .unwrap();
        drop(theirs);

        let mut ready = vec![];
        poller.wait(&mut ready, SHORT).unwrap();

        assert_eq!(ready.len(), 1);
        assert!(ready[0].hangup);
    }

    #[test]
    fn deregistered_descriptor_is_silent() {
        let mut poller = Poller::new(4).unwrap();
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        poller
            .register(ours.as_raw_fd(), Role::Serial.into(), Interest::Readable)
            .unwrap();
        poller.deregister(ours.as_raw_fd()).unwrap();
        theirs.write_all(b"hi").unwrap();

        let mut ready = vec![];
        poller.wait(&mut ready, SHORT).unwrap();

        assert!(ready.is_empty());
    }
}
