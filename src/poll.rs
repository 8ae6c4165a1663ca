//! Waiting for I/O readiness.
//!
//! The communication loop and the output iterator depend only on the
//! [`Readiness`] contract; the concrete facility is chosen at runtime:
//! epoll where the host provides it, a select-based equivalent otherwise.

use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::error::Error;

/// What to watch a descriptor for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
}

/// What a descriptor became ready for.
///
/// Both flags may be false: error and hangup conditions are reported as an
/// event with an empty mask, and the caller decides what to do by the
/// descriptor's role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Ready {
    pub read: bool,
    pub write: bool,
}

pub(crate) trait Readiness: Send {
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error>;

    fn unregister(&mut self, fd: RawFd) -> Result<(), Error>;

    /// Waits for events, transparently retrying on EINTR with the remaining
    /// timeout. `None` blocks until at least one descriptor is ready.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Ready)>, Error>;
}

pub(crate) fn new_poller() -> Result<Box<dyn Readiness>, Error> {
    #[cfg(target_os = "linux")]
    {
        match epoll::EpollPoller::new() {
            Ok(poller) => return Ok(Box::new(poller)),
            Err(err) => {
                tracing::debug!(error = %err, "epoll is unavailable, falling back to select")
            }
        }
    }
    Ok(Box::new(select::SelectPoller::new()))
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

#[cfg(target_os = "linux")]
mod epoll {
    use super::*;
    use crate::fd::Fd;
    use nix::errno::Errno;
    use nix::sys::epoll::{
        epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp,
    };

    pub(super) struct EpollPoller {
        epfd: Fd,
    }

    impl EpollPoller {
        pub fn new() -> Result<EpollPoller, Error> {
            let epfd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC)?;
            Ok(EpollPoller {
                epfd: Fd::new(epfd),
            })
        }
    }

    impl Readiness for EpollPoller {
        fn register(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
            let mut flags = EpollFlags::empty();
            if interest.read {
                flags |= EpollFlags::EPOLLIN;
            }
            if interest.write {
                flags |= EpollFlags::EPOLLOUT;
            }
            let mut event = EpollEvent::new(flags, fd as u64);
            epoll_ctl(self.epfd.as_raw(), EpollOp::EpollCtlAdd, fd, &mut event)?;
            Ok(())
        }

        fn unregister(&mut self, fd: RawFd) -> Result<(), Error> {
            epoll_ctl(
                self.epfd.as_raw(),
                EpollOp::EpollCtlDel,
                fd,
                None::<&mut EpollEvent>,
            )?;
            Ok(())
        }

        fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Ready)>, Error> {
            let deadline = timeout.map(|timeout| Instant::now() + timeout);
            let mut events = vec![EpollEvent::empty(); 16];

            loop {
                let timeout_ms = match remaining(deadline) {
                    None => -1,
                    Some(left) => left.as_millis() as isize,
                };

                match epoll_wait(self.epfd.as_raw(), &mut events, timeout_ms) {
                    Err(err) if err.as_errno() == Some(Errno::EINTR) => continue,
                    Err(err) => return Err(err.into()),
                    Ok(count) => {
                        return Ok(events[..count]
                            .iter()
                            .map(|event| {
                                let flags = event.events();
                                let ready = Ready {
                                    read: flags.contains(EpollFlags::EPOLLIN),
                                    write: flags.contains(EpollFlags::EPOLLOUT),
                                };
                                (event.data() as RawFd, ready)
                            })
                            .collect());
                    }
                }
            }
        }
    }
}

mod select {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::select::{select, FdSet};
    use nix::sys::time::{TimeVal, TimeValLike};

    /// Bit-set based fallback over select(2).
    ///
    /// The descriptor sets are rebuilt on every call, so EINTR retries and
    /// kernel-modified sets need no special handling.
    pub(super) struct SelectPoller {
        read_fds: Vec<RawFd>,
        write_fds: Vec<RawFd>,
    }

    impl SelectPoller {
        pub fn new() -> SelectPoller {
            SelectPoller {
                read_fds: Vec::new(),
                write_fds: Vec::new(),
            }
        }
    }

    impl Readiness for SelectPoller {
        fn register(&mut self, fd: RawFd, interest: Interest) -> Result<(), Error> {
            if interest.read && !self.read_fds.contains(&fd) {
                self.read_fds.push(fd);
            }
            if interest.write && !self.write_fds.contains(&fd) {
                self.write_fds.push(fd);
            }
            Ok(())
        }

        fn unregister(&mut self, fd: RawFd) -> Result<(), Error> {
            self.read_fds.retain(|&registered| registered != fd);
            self.write_fds.retain(|&registered| registered != fd);
            Ok(())
        }

        fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<(RawFd, Ready)>, Error> {
            let deadline = timeout.map(|timeout| Instant::now() + timeout);

            loop {
                let mut read_set = FdSet::new();
                for &fd in &self.read_fds {
                    read_set.insert(fd);
                }
                let mut write_set = FdSet::new();
                for &fd in &self.write_fds {
                    write_set.insert(fd);
                }

                let nfds = self
                    .read_fds
                    .iter()
                    .chain(self.write_fds.iter())
                    .max()
                    .map(|&fd| fd + 1)
                    .unwrap_or(0);

                let mut timeval =
                    remaining(deadline).map(|left| TimeVal::milliseconds(left.as_millis() as i64));

                let result = select(
                    Some(nfds),
                    Some(&mut read_set),
                    Some(&mut write_set),
                    None::<&mut FdSet>,
                    timeval.as_mut(),
                );
                match result {
                    Err(err) if err.as_errno() == Some(Errno::EINTR) => continue,
                    Err(err) => return Err(err.into()),
                    Ok(_) => {
                        let mut events = Vec::new();
                        for &fd in &self.read_fds {
                            if read_set.contains(fd) {
                                events.push((
                                    fd,
                                    Ready {
                                        read: true,
                                        write: write_set.contains(fd),
                                    },
                                ));
                            }
                        }
                        for &fd in &self.write_fds {
                            if write_set.contains(fd) && !read_set.contains(fd) {
                                events.push((
                                    fd,
                                    Ready {
                                        read: false,
                                        write: true,
                                    },
                                ));
                            }
                        }
                        return Ok(events);
                    }
                }
            }
        }
    }
}
