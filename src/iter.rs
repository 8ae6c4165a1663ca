//! Lazy iteration over a running process's stdout.

use std::sync::{Arc, Mutex};

use nix::errno::Errno;

use crate::error::{invalid_operation, Error};
use crate::pipe::{Direction, Pipe};
use crate::poll::{new_poller, Interest, Readiness};
use crate::process::Inner;
use crate::util::{errno_of, BUFSIZE};

/// One block of iterated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    /// A decoded block, in text mode.
    Text(String),
    /// A raw block, in raw mode.
    Bytes(Vec<u8>),
}

impl OutputChunk {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            OutputChunk::Text(text) => text.as_bytes(),
            OutputChunk::Bytes(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            OutputChunk::Text(text) => text.into_bytes(),
            OutputChunk::Bytes(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutputChunk::Text(text) => Some(text),
            OutputChunk::Bytes(_) => None,
        }
    }
}

struct IterIo {
    pipe: Pipe,
    poller: Box<dyn Readiness>,
}

/// The closable half of an output iterator.
///
/// Shared between the iterator itself and the process's scoped-cleanup
/// list, so the descriptors are released exactly once no matter which side
/// closes first.
pub(crate) struct IterShared {
    io: Mutex<Option<IterIo>>,
}

impl IterShared {
    pub(crate) fn close(&self) {
        // Dropping the pipe and the poller releases them; the slot makes it
        // idempotent.
        self.io.lock().unwrap().take();
    }

    fn is_closed(&self) -> bool {
        self.io.lock().unwrap().is_none()
    }

    /// Blocks until the pipe is readable, then reads one buffer. An empty
    /// result is EOF.
    fn read_some(&self) -> Result<Vec<u8>, Error> {
        let mut io = self.io.lock().unwrap();
        let io = match io.as_mut() {
            Some(io) => io,
            None => return Err(invalid_operation("the iterator is closed")),
        };
        loop {
            io.poller.poll(None)?;
            let parent = match io.pipe.parent() {
                Some(parent) => parent,
                None => return Err(invalid_operation("the iterator is closed")),
            };
            let mut buf = [0u8; BUFSIZE];
            match parent.read(&mut buf) {
                Ok(count) => return Ok(buf[..count].to_vec()),
                Err(err) if errno_of(&err) == Some(Errno::EAGAIN) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// A lazy block iterator over a process's stdout.
///
/// With a non-empty delimiter every step yields the next block up to and
/// including the delimiter; with an empty delimiter (raw mode only) every
/// step yields the next non-empty read. The iterator owns the stdout pipe:
/// the communication worker does not see stdout for this process.
pub struct OutputIterator {
    shared: Arc<IterShared>,
    process: Arc<Inner>,
    delimiter: Vec<u8>,
    raw: bool,
    buf: Vec<u8>,
    /// Offset up to which `buf` is known not to contain the delimiter.
    searched: usize,
    eof: bool,
}

impl OutputIterator {
    /// Attaches an iterator to a pending process and starts the process.
    pub(crate) fn attach(inner: &Arc<Inner>) -> Result<OutputIterator, Error> {
        let delimiter = inner.iter_delimiter.clone();
        let raw = inner.iter_raw;
        if delimiter.is_empty() && !raw {
            return Err(invalid_operation(
                "text iteration requires a non-empty delimiter",
            ));
        }

        let mut pipe = Pipe::new(1, Direction::ChildWrites)?;
        let mut poller = new_poller()?;
        {
            let parent = match pipe.parent() {
                Some(parent) => parent,
                None => return Err(invalid_operation("the iterator pipe has no read end")),
            };
            parent.set_nonblocking()?;
            poller.register(parent.as_raw(), Interest::READ)?;
        }

        inner.attach_iterator()?;

        // The child gets the write end directly; our half keeps the read
        // end. On a start failure everything above is simply dropped.
        Inner::start(inner, Some(&mut pipe), true)?;

        let shared = Arc::new(IterShared {
            io: Mutex::new(Some(IterIo { pipe, poller })),
        });
        inner.register_scoped(&shared);

        Ok(OutputIterator {
            shared,
            process: inner.clone(),
            delimiter,
            raw,
            buf: Vec::new(),
            searched: 0,
            eof: false,
        })
    }

    /// Closes the iterator's descriptors and poller. Idempotent; does not
    /// wait for the process.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Closes the iterator and waits for the process.
    fn finalize(&mut self, check_status: bool) -> Result<(), Error> {
        self.shared.close();
        Inner::wait(&self.process, check_status, None).map(drop)
    }

    fn transform(&mut self, block: Vec<u8>) -> Result<OutputChunk, Error> {
        if self.raw {
            return Ok(OutputChunk::Bytes(block));
        }
        match String::from_utf8(block) {
            Ok(text) => Ok(OutputChunk::Text(text)),
            Err(err) => {
                self.finalize(true)?;
                Err(Error::from(err))
            }
        }
    }

    /// Takes the next delimited block out of the accumulator, reading more
    /// as needed. `Ok(None)` is exhaustion.
    fn next_block(&mut self) -> Result<Option<Vec<u8>>, Error> {
        loop {
            if let Some(position) = find(&self.buf, &self.delimiter, self.searched) {
                let rest = self.buf.split_off(position + self.delimiter.len());
                let block = std::mem::replace(&mut self.buf, rest);
                self.searched = 0;
                return Ok(Some(block));
            }
            self.searched = self
                .buf
                .len()
                .saturating_sub(self.delimiter.len() - 1);

            let data = match self.shared.read_some() {
                Ok(data) => data,
                Err(err) => {
                    if let Err(wait_err) = self.finalize(false) {
                        tracing::error!(error = %wait_err, "finalizing a failed iterator failed");
                    }
                    return Err(err);
                }
            };
            if data.is_empty() {
                self.eof = true;
                let block = std::mem::take(&mut self.buf);
                self.finalize(true)?;
                if block.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(block));
            }
            self.buf.extend_from_slice(&data);
        }
    }

    /// One raw read per step.
    fn next_raw(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let data = match self.shared.read_some() {
            Ok(data) => data,
            Err(err) => {
                if let Err(wait_err) = self.finalize(false) {
                    tracing::error!(error = %wait_err, "finalizing a failed iterator failed");
                }
                return Err(err);
            }
        };
        if data.is_empty() {
            self.eof = true;
            self.finalize(true)?;
            return Ok(None);
        }
        Ok(Some(data))
    }
}

impl Iterator for OutputIterator {
    type Item = Result<OutputChunk, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof {
            return None;
        }
        if self.shared.is_closed() {
            return Some(Err(invalid_operation("the iterator is closed")));
        }

        let block = if self.delimiter.is_empty() {
            self.next_raw()
        } else {
            self.next_block()
        };
        match block {
            Ok(Some(block)) => Some(self.transform(block)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl Drop for OutputIterator {
    /// Dropping the iterator releases its descriptors without waiting for
    /// the process; scope exit on the process handle does the waiting.
    fn drop(&mut self) {
        self.shared.close();
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&index| &haystack[index..index + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::find;

    #[test]
    fn finds_across_offsets() {
        assert_eq!(find(b"a\nb\n", b"\n", 0), Some(1));
        assert_eq!(find(b"a\nb\n", b"\n", 2), Some(3));
        assert_eq!(find(b"ab", b"\n", 0), None);
        assert_eq!(find(b"a--b", b"--", 0), Some(1));
        assert_eq!(find(b"a-", b"--", 0), None);
        assert_eq!(find(b"", b"\n", 0), None);
    }
}
