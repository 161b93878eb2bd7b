use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

use crate::endpoint::Role;

/// Errors that may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// A configuration file could not be read.
    #[error("Could not read the configuration file at {path:?}")]
    ConfigIo {
        /// Where we looked.
        path: PathBuf,

        /// The underlying problem.
        #[source]
        source: io::Error,
    },

    /// A configuration file was not valid RON.
    #[error("Could not parse the configuration")]
    ConfigParse(#[from] ron::error::SpannedError),

    /// A configuration could not be turned into RON.
    #[error("Could not serialize the configuration")]
    ConfigSerialize(#[from] ron::Error),

    /// The readiness poller could not be created.
    #[error("Could not create the readiness poller")]
    Poller(#[source] nix::Error),

    /// The serial device could not be opened.
    #[error("Could not open the serial device at {path:?}")]
    OpenSerial {
        /// The device path.
        path: PathBuf,

        /// The underlying problem.
        #[source]
        source: serialport::Error,
    },

    /// Serial ports could not be enumerated.
    #[error("Could not list serial ports")]
    PortScan(#[source] serialport::Error),

    /// Raw mode could not be applied to a terminal device.
    #[error("Could not configure the terminal line discipline")]
    LineDiscipline(#[source] nix::Error),

    /// A pseudo-terminal pair could not be allocated.
    #[error("Could not allocate a pseudo-terminal")]
    Pty(#[source] nix::Error),

    /// The slave side of a fresh pseudo-terminal could not be opened.
    #[error("Could not open the pseudo-terminal slave at {path:?}")]
    PtySlave {
        /// The slave device path.
        path: PathBuf,

        /// The underlying problem.
        #[source]
        source: io::Error,
    },

    /// The TCP listener could not be set up.
    #[error("Could not listen on {addr}")]
    Listen {
        /// The address we tried to bind.
        addr: SocketAddr,

        /// The underlying problem.
        #[source]
        source: nix::Error,
    },

    /// An endpoint could not be switched to non-blocking mode.
    #[error("Could not make the {role} endpoint non-blocking")]
    NonBlocking {
        /// Which endpoint.
        role: Role,

        /// The underlying problem.
        #[source]
        source: nix::Error,
    },

    /// Waiting for readiness failed. The reactor cannot continue.
    #[error("Waiting for readiness failed")]
    Wait(#[source] nix::Error),

    /// The serial line or the pseudo-terminal reached end-of-stream.
    #[error("The {0} endpoint closed")]
    EndpointClosed(Role),

    /// Reading the serial line or the pseudo-terminal failed.
    #[error("I/O failure on the {role} endpoint")]
    EndpointIo {
        /// Which endpoint.
        role: Role,

        /// The underlying problem.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Get the message of a [`Error::BadConfig`], if that is what this is.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(message) = self {
            Some(message)
        } else {
            None
        }
    }
}
