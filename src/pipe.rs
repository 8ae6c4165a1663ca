use std::os::unix::io::RawFd;

use nix::fcntl::OFlag;

use crate::error::Error;
use crate::fd::Fd;
use crate::util::eintr_retry;

/// Which way the bytes flow, seen from the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// The child reads from the pipe (stdin).
    ChildReads,
    /// The child writes to the pipe (stdout/stderr).
    ChildWrites,
}

/// A one-directional pipe destined for one of the child's standard
/// descriptors.
///
/// `target` names which of {0, 1, 2} the child-side end replaces after the
/// fork. Each end is independently closable and is closed at most once; a
/// pipe dropped without an explicit close still releases whatever ends it
/// holds.
#[derive(Debug)]
pub(crate) struct Pipe {
    pub target: RawFd,
    pub dir: Direction,
    pub read: Option<Fd>,
    pub write: Option<Fd>,
}

impl Pipe {
    /// Creates a fresh OS pipe.
    pub fn new(target: RawFd, dir: Direction) -> Result<Pipe, Error> {
        let (read, write) = eintr_retry(|| nix::unistd::pipe2(OFlag::O_CLOEXEC))?;
        Ok(Pipe {
            target,
            dir,
            read: Some(Fd::new(read)),
            write: Some(Fd::new(write)),
        })
    }

    /// Builds a pipe by transferring one end out of `donor`.
    ///
    /// Used for inter-process pipes: the downstream process creates the pipe
    /// and the upstream process adopts the write end as its stdout, so each
    /// process releases its own side independently.
    pub fn adopt(target: RawFd, dir: Direction, donor: &mut Pipe) -> Pipe {
        match dir {
            Direction::ChildWrites => Pipe {
                target,
                dir,
                read: None,
                write: donor.write.take(),
            },
            Direction::ChildReads => Pipe {
                target,
                dir,
                read: donor.read.take(),
                write: None,
            },
        }
    }

    /// The end the child will dup2 onto `target`.
    pub fn child_raw(&self) -> Option<RawFd> {
        match self.dir {
            Direction::ChildReads => self.read.as_ref().map(Fd::as_raw),
            Direction::ChildWrites => self.write.as_ref().map(Fd::as_raw),
        }
    }

    /// The end the parent keeps for communication.
    pub fn parent(&self) -> Option<&Fd> {
        match self.dir {
            Direction::ChildReads => self.write.as_ref(),
            Direction::ChildWrites => self.read.as_ref(),
        }
    }

    pub fn parent_raw(&self) -> Option<RawFd> {
        self.parent().map(Fd::as_raw)
    }

    /// Closes the requested ends. Idempotent.
    pub fn close(&mut self, read: bool, write: bool) {
        if read {
            self.read.take();
        }
        if write {
            self.write.take();
        }
    }

    /// Drops the parent's copy of the child-side end.
    pub fn close_child(&mut self) {
        match self.dir {
            Direction::ChildReads => self.close(true, false),
            Direction::ChildWrites => self.close(false, true),
        }
    }

    /// Closes whichever end the parent communicates through.
    pub fn close_parent(&mut self) {
        match self.dir {
            Direction::ChildReads => self.close(false, true),
            Direction::ChildWrites => self.close(true, false),
        }
    }

    /// Raw numbers of all ends still held, for the child's close list.
    pub fn held_raw(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.read
            .as_ref()
            .map(Fd::as_raw)
            .into_iter()
            .chain(self.write.as_ref().map(Fd::as_raw))
    }
}
