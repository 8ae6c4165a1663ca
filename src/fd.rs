use std::mem::ManuallyDrop;
use std::os::unix::io::RawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::error::Error;
use crate::util::eintr_retry;

/// An owned file descriptor.
///
/// The descriptor is closed exactly once, when the value is dropped. Close
/// failures cannot be handled meaningfully by the caller, so they are logged
/// and swallowed.
pub(crate) struct Fd(RawFd);

impl Fd {
    pub fn new(raw: RawFd) -> Fd {
        Fd(raw)
    }

    pub fn as_raw(&self) -> RawFd {
        self.0
    }

    /// Releases ownership without closing.
    #[allow(dead_code)]
    pub fn into_raw(self) -> RawFd {
        let this = ManuallyDrop::new(self);
        this.0
    }

    pub fn read(&self, buf: &mut [u8]) -> nix::Result<usize> {
        eintr_retry(|| nix::unistd::read(self.0, buf))
    }

    pub fn write(&self, buf: &[u8]) -> nix::Result<usize> {
        eintr_retry(|| nix::unistd::write(self.0, buf))
    }

    pub fn set_nonblocking(&self) -> Result<(), Error> {
        let flags = eintr_retry(|| fcntl(self.0, FcntlArg::F_GETFL))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        eintr_retry(|| fcntl(self.0, FcntlArg::F_SETFL(flags)))?;
        Ok(())
    }
}

impl std::fmt::Debug for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Fd").field(&self.0).finish()
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        if let Err(err) = eintr_retry(|| nix::unistd::close(self.0)) {
            tracing::error!(fd = self.0, error = %err, "unable to close a file descriptor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owns_and_closes() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let read = Fd::new(read_fd);
        let write = Fd::new(write_fd);

        assert_eq!(write.write(b"ab").unwrap(), 2);
        let mut buf = [0u8; 8];
        assert_eq!(read.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ab");

        drop(write);
        assert_eq!(read.read(&mut buf).unwrap(), 0);

        drop(read);
        let mut probe = [0u8; 1];
        assert!(nix::unistd::read(read_fd, &mut probe).is_err());
    }

    #[test]
    fn nonblocking_read_fails_with_eagain() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let read = Fd::new(read_fd);
        let _write = Fd::new(write_fd);

        read.set_nonblocking().unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(
            read.read(&mut buf),
            Err(nix::Error::Sys(nix::errno::Errno::EAGAIN))
        );
    }
}
