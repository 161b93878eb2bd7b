use std::{
    net::{Ipv4Addr, SocketAddrV4},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serialport::FlowControl;

use crate::{
    error::Error,
    reactor::{Limits, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CLIENTS},
};

/// The port clients connect to unless configured otherwise.
pub const DEFAULT_PORT: u16 = 5000;

/// The listen backlog unless configured otherwise.
pub const DEFAULT_BACKLOG: usize = 5;

/// The highest client ceiling accepted.
/// Slots are scanned linearly, so this stays modest.
pub const MAX_CLIENTS_CEILING: usize = 1024;

/// The largest block size accepted.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// How to open the serial device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Likely "/dev/ttySx", "/dev/ttyUSBx" or "/dev/ttyACMx".
    pub path: PathBuf,

    /// Line speed.
    pub baud: u32,

    /// Flow control on the line.
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/ttyS1"),
            baud: 115_200,
            flow_control: FlowControl::None,
        }
    }
}

/// Where network clients connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Interface address. All interfaces by default.
    pub address: Ipv4Addr,

    /// TCP port.
    pub port: u16,

    /// How many connections the kernel queues before we accept them.
    pub backlog: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl ListenConfig {
    /// The address to bind.
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }
}

/// The configuration used for running the bridge.
/// Every field may be omitted from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The serial device.
    pub serial: SerialConfig,

    /// A stable path pointing at the pseudo-terminal, for the downstream program.
    /// No link is made if this is `None`.
    pub pty_link: Option<PathBuf>,

    /// The TCP listener.
    pub listen: ListenConfig,

    /// The most clients connected at once.
    pub max_clients: usize,

    /// Bytes moved per read.
    pub block_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            pty_link: Some(PathBuf::from("/dev/ttyAS1")),
            listen: ListenConfig::default(),
            max_clients: DEFAULT_MAX_CLIENTS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Ok(Self::ron().from_str::<Config>(input)?)
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            serial: SerialConfig {
                path: PathBuf::from("/dev/ttyUSB0"),
                baud: 9600,
                flow_control: FlowControl::Hardware,
            },
            pty_link: Some(PathBuf::from("/tmp/ttyBridge0")),
            listen: ListenConfig {
                address: Ipv4Addr::LOCALHOST,
                port: 5001,
                backlog: DEFAULT_BACKLOG,
            },
            max_clients: 4,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Ok(Self::ron().to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;

        Self::deserialize(&s)
    }

    /// The sizing the reactor should use.
    pub fn limits(&self) -> Limits {
        Limits {
            max_clients: self.max_clients,
            block_size: self.block_size,
        }
    }

    fn check_max_clients(&self) -> Result<(), Error> {
        if (1..=MAX_CLIENTS_CEILING).contains(&self.max_clients) {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "max_clients is {}, it must be between 1 and {MAX_CLIENTS_CEILING}.",
                self.max_clients
            )))
        }
    }

    fn check_block_size(&self) -> Result<(), Error> {
        if (1..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "block_size is {}, it must be between 1 and {MAX_BLOCK_SIZE}.",
                self.block_size
            )))
        }
    }

    fn check_backlog(&self) -> Result<(), Error> {
        if self.listen.backlog == 0 {
            return Err(Error::BadConfig(
                "listen.backlog must be at least 1.".to_string(),
            ));
        }

        Ok(())
    }

    /// Check the configuration makes sense before anything is opened.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_max_clients()?;
        self.check_block_size()?;
        self.check_backlog()?;

        Ok(())
    }
}
