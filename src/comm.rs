//! The per-process communication worker.
//!
//! One worker per started process. It multiplexes non-blocking I/O on the
//! process's standard descriptors and a termination-signal descriptor, and
//! it is the sole writer of the captured output buffers, the error slot and
//! the `Terminated` state transition.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::errno::Errno;

use crate::error::Error;
use crate::fd::Fd;
use crate::pipe::{Direction, Pipe};
use crate::poll::{Interest, Readiness};
use crate::process::Inner;
use crate::stdio::ChunkProducer;
use crate::util::{errno_of, BUFSIZE};

/// Maximum output read from one descriptor after the child was reaped, when
/// not waiting for EOF. A reaped child's descendant may have inherited the
/// descriptor and keep it open indefinitely, so the drain must terminate;
/// the cap is far larger than any pipe capacity.
const DRAIN_LIMIT: usize = 1024 * 1024;

pub(crate) struct CommWorker {
    inner: Arc<Inner>,
    pipes: Vec<Pipe>,
    termination: Fd,
    poller: Box<dyn Readiness>,
    producer: Option<ChunkProducer>,
    /// Unwritten suffix of the current stdin chunk.
    pending: Option<Vec<u8>>,
}

impl CommWorker {
    pub fn new(
        inner: Arc<Inner>,
        pipes: Vec<Pipe>,
        termination: Fd,
        poller: Box<dyn Readiness>,
        producer: Option<ChunkProducer>,
    ) -> CommWorker {
        CommWorker {
            inner,
            pipes,
            termination,
            poller,
            producer,
            pending: None,
        }
    }

    /// Runs the communication loop to completion and publishes the final
    /// state.
    ///
    /// Errors never escape the worker thread: they are stored in the
    /// process's error slot and surfaced by a checked wait. `Terminated`
    /// becomes observable only after every owned descriptor is closed.
    pub fn run(self) {
        let mut worker = self;
        if let Err(err) = worker.communicate() {
            tracing::error!(error = %err, "communication worker failed");
            worker.inner.store_error(err);
        }

        let CommWorker {
            inner,
            mut pipes,
            termination,
            poller,
            producer,
            ..
        } = worker;
        for pipe in &mut pipes {
            pipe.close(true, true);
        }
        drop(pipes);
        drop(termination);
        drop(poller);
        drop(producer);

        inner.publish_terminated();
    }

    fn communicate(&mut self) -> Result<(), Error> {
        let termination_fd = self.termination.as_raw();
        self.poller.register(termination_fd, Interest::READ)?;
        let mut active = 1usize;

        // Index the parent-side ends and release our copies of the
        // child-side ends.
        let mut by_fd: HashMap<RawFd, usize> = HashMap::new();
        for (index, pipe) in self.pipes.iter_mut().enumerate() {
            let parent = match pipe.parent() {
                Some(parent) => parent,
                None => continue,
            };
            parent.set_nonblocking()?;
            let interest = match pipe.dir {
                Direction::ChildWrites => Interest::READ,
                Direction::ChildReads => Interest::WRITE,
            };
            self.poller.register(parent.as_raw(), interest)?;
            by_fd.insert(parent.as_raw(), index);
            active += 1;
            pipe.close_child();
        }

        let wait_for_output = self.inner.wait_for_output;
        let mut reaped = false;

        'communicate: while active > 0 {
            let events = self.poller.poll(None)?;

            for (fd, _ready) in events {
                if fd == termination_fd {
                    // The child has been reaped. Either keep reading until
                    // every output pipe hits EOF, or switch to the bounded
                    // drain.
                    reaped = true;
                    self.poller.unregister(termination_fd)?;
                    active -= 1;
                    if !wait_for_output {
                        break 'communicate;
                    }
                    continue;
                }

                let index = match by_fd.get(&fd) {
                    Some(&index) => index,
                    None => continue,
                };

                let closed = if self.pipes[index].target == 0 {
                    self.feed_stdin(index)?
                } else {
                    self.read_output(index)?
                };
                if closed {
                    self.poller.unregister(fd)?;
                    by_fd.remove(&fd);
                    active -= 1;
                }
            }
        }

        if reaped && !wait_for_output {
            self.drain()?;
        }

        Ok(())
    }

    /// Writes stdin chunks while the descriptor is writable.
    ///
    /// Returns true when the stdin pipe is finished and must be
    /// unregistered.
    fn feed_stdin(&mut self, index: usize) -> Result<bool, Error> {
        if self.pending.is_none() {
            let producer = match self.producer.as_mut() {
                Some(producer) => producer,
                None => {
                    self.pipes[index].close(true, true);
                    return Ok(true);
                }
            };
            loop {
                match producer.next() {
                    None => {
                        self.pipes[index].close(true, true);
                        return Ok(true);
                    }
                    Some(Err(err)) => {
                        self.inner.store_error(err);
                        self.pipes[index].close(true, true);
                        return Ok(true);
                    }
                    Some(Ok(chunk)) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        self.pending = Some(chunk);
                        break;
                    }
                }
            }
        }

        let chunk = match self.pending.take() {
            Some(chunk) => chunk,
            None => return Ok(false),
        };
        let parent = match self.pipes[index].parent() {
            Some(parent) => parent,
            None => return Ok(true),
        };
        match parent.write(&chunk) {
            Ok(written) if written == chunk.len() => Ok(false),
            Ok(written) => {
                self.pending = Some(chunk[written..].to_vec());
                Ok(false)
            }
            Err(err) if errno_of(&err) == Some(Errno::EPIPE) => {
                // The child closed its stdin. Not an error.
                self.pipes[index].close(true, true);
                Ok(true)
            }
            Err(err) if errno_of(&err) == Some(Errno::EAGAIN) => {
                self.pending = Some(chunk);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads one buffer of output. Returns true on EOF.
    fn read_output(&mut self, index: usize) -> Result<bool, Error> {
        let pipe = &self.pipes[index];
        let parent = match pipe.parent() {
            Some(parent) => parent,
            None => return Ok(true),
        };
        let mut buf = [0u8; BUFSIZE];
        match parent.read(&mut buf) {
            Ok(0) => Ok(true),
            Ok(count) => {
                self.inner.append_output(pipe.target, &buf[..count]);
                Ok(false)
            }
            Err(err) if errno_of(&err) == Some(Errno::EAGAIN) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Bounded reads of whatever output is already buffered in the kernel
    /// after the child was reaped.
    fn drain(&mut self) -> Result<(), Error> {
        let mut truncated = false;

        for pipe in &self.pipes {
            if pipe.dir != Direction::ChildWrites {
                continue;
            }
            let parent = match pipe.parent() {
                Some(parent) => parent,
                None => continue,
            };

            let mut total = 0;
            loop {
                if total >= DRAIN_LIMIT {
                    truncated = true;
                    break;
                }
                let mut buf = [0u8; BUFSIZE];
                let want = std::cmp::min(BUFSIZE, DRAIN_LIMIT - total);
                match parent.read(&mut buf[..want]) {
                    Ok(0) => break,
                    Ok(count) => {
                        total += count;
                        self.inner.append_output(pipe.target, &buf[..count]);
                    }
                    Err(err) if errno_of(&err) == Some(Errno::EAGAIN) => {
                        // The descriptor is still open somewhere, so there
                        // may be output we are abandoning.
                        truncated = true;
                        break;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        if truncated {
            self.inner.mark_truncated();
        }

        Ok(())
    }
}
