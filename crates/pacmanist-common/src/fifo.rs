// fifo.rs — named-pipe plumbing shared by the server and the client
//
// Both sides open FIFOs read-write where a blocking open would otherwise
// wait for an absent peer; see the session handshake in the server crate.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

fn nix_err(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Remove any stale file at `path` and create a fresh FIFO, mode 0666.
pub fn create(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    unistd::mkfifo(path, Mode::from_bits_truncate(0o666)).map_err(nix_err)
}

/// Open a FIFO for both reading and writing. Unlike a read-only or
/// write-only open this never blocks waiting for the other end.
pub fn open_read_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Toggle `O_NONBLOCK` on an already-open descriptor.
pub fn set_nonblocking(file: &File, nonblocking: bool) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let bits = fcntl(fd, FcntlArg::F_GETFL).map_err(nix_err)?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.set(OFlag::O_NONBLOCK, nonblocking);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(nix_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_create_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg");
        std::fs::write(&path, b"stale").unwrap();

        create(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(std::os::unix::fs::FileTypeExt::is_fifo(&meta.file_type()));
    }

    #[test]
    fn test_read_write_open_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe");
        create(&path).unwrap();

        // No peer exists; a read-only or write-only open would park here.
        let mut a = open_read_write(&path).unwrap();
        let mut b = open_read_write(&path).unwrap();
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_nonblocking_read_returns_would_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe");
        create(&path).unwrap();

        let f = open_read_write(&path).unwrap();
        set_nonblocking(&f, true).unwrap();
        let mut buf = [0u8; 1];
        let err = (&f).read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
