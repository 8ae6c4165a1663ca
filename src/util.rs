use std::io;

use nix::errno::Errno;

/// I/O preferred buffer size.
pub(crate) const BUFSIZE: usize = 4096;

/// Retries a syscall wrapper until it completes with anything but EINTR.
///
/// Every interruptible syscall in the crate goes through this combinator, so
/// EINTR is never observable above this module.
pub(crate) fn eintr_retry<T, F>(mut call: F) -> nix::Result<T>
where
    F: FnMut() -> nix::Result<T>,
{
    loop {
        match call() {
            Err(err) if err.as_errno() == Some(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

pub(crate) fn io_error(err: nix::Error) -> io::Error {
    match err.as_errno() {
        Some(errno) => io::Error::from_raw_os_error(errno as i32),
        None => io::Error::new(io::ErrorKind::Other, err),
    }
}

pub(crate) fn errno_of(err: &nix::Error) -> Option<Errno> {
    err.as_errno()
}
