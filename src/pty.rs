use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    os::unix::{
        fs::{symlink, OpenOptionsExt},
        io::{AsRawFd, FromRawFd, IntoRawFd, RawFd},
    },
    path::{Path, PathBuf},
};

use nix::{
    fcntl::OFlag,
    pty::{grantpt, posix_openpt, ptsname_r, unlockpt},
};
use tracing::{debug, warn};

use crate::{error::Error, serial::make_raw};

/// A pseudo-terminal pair.
///
/// Reads and writes go to the master side.
/// The slave side is held open so the master does not see a hangup
/// while no downstream program has the device open.
#[derive(Debug)]
pub struct Pty {
    master: File,
    _slave: File,
    path: PathBuf,
}

impl Pty {
    /// Allocate a pair and put the slave side in raw mode.
    pub fn open() -> Result<Self, Error> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(Error::Pty)?;
        grantpt(&master).map_err(Error::Pty)?;
        unlockpt(&master).map_err(Error::Pty)?;
        let path = PathBuf::from(ptsname_r(&master).map_err(Error::Pty)?);

        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits())
            .open(&path)
            .map_err(|source| Error::PtySlave {
                path: path.clone(),
                source,
            })?;
        make_raw(slave.as_raw_fd())?;

        // Safety: the master gave up ownership of the descriptor.
        let master = unsafe { File::from_raw_fd(master.into_raw_fd()) };

        debug!(?path, "Allocated pseudo-terminal");

        Ok(Self {
            master,
            _slave: slave,
            path,
        })
    }

    /// The slave device path, for example `/dev/pts/3`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point `link` at the slave device, replacing whatever was there.
    pub fn link<P: AsRef<Path>>(&self, link: P) -> io::Result<PtyLink> {
        let link = link.as_ref();

        match fs::remove_file(link) {
            Ok(()) => debug!(?link, "Removed stale link"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        symlink(&self.path, link)?;

        Ok(PtyLink {
            path: link.to_path_buf(),
        })
    }
}

impl Read for Pty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.master.read(buf)
    }
}

impl Write for Pty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.master.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.master.flush()
    }
}

impl AsRawFd for Pty {
    fn as_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}

/// A symlink to a pseudo-terminal slave. Removed on drop.
#[derive(Debug)]
pub struct PtyLink {
    path: PathBuf,
}

impl PtyLink {
    /// Where the link lives.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PtyLink {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Removed link"),
            Err(e) => warn!(path = ?self.path, %e, "Could not remove link"),
        }
    }
}
