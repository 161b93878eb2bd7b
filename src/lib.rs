#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Endpoint identity: roles, tokens and the non-blocking byte pipes.
pub mod endpoint;

/// Readiness notification.
pub mod poller;

/// Suppression of serial line echoes.
pub mod echo;

/// The bounded set of network clients and broadcasting to them.
pub mod registry;

/// A connected network client.
pub mod client;

/// The event loop tying the serial line, the pseudo-terminal and the clients together.
pub mod reactor;

/// Serial device setup.
pub mod serial;

/// Pseudo-terminal allocation and linking.
pub mod pty;

/// Startup of the whole bridge, and running it in the background.
pub mod server;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
