//! Process handles and their lifecycle.

use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{ForkResult, Pid};

use crate::comm::CommWorker;
use crate::error::{invalid_argument, invalid_operation, invalid_state, Error};
use crate::fd::Fd;
use crate::iter::{IterShared, OutputIterator};
use crate::pipe::{Direction, Pipe};
use crate::poll::new_poller;
use crate::spawn::{self, ChildPlan};
use crate::stdio::{ChunkProducer, OutTarget, StdinKind, DEV_NULL};
use crate::util::{eintr_retry, errno_of};

/// A hook invoked with the process just before it is started.
pub type OnStart = Box<dyn FnMut(&Process) + Send>;

/// Process lifecycle states. Monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum State {
    Pending,
    Spawning,
    Running,
    Terminated,
}

pub(crate) struct ProcessConfig {
    pub program: OsString,
    pub argv: Vec<OsString>,
    pub env: Option<Vec<(OsString, OsString)>>,
    pub ok_statuses: Vec<i32>,
    pub iter_delimiter: Vec<u8>,
    pub iter_raw: bool,
    pub wait_for_output: bool,
    pub truncate_output: bool,
    pub stdin: Option<StdinKind>,
    pub stdout: OutTarget,
    pub stderr: OutTarget,
    pub on_start: Option<OnStart>,
}

/// The state shared between process handles and the two worker threads.
pub(crate) struct Inner {
    program: OsString,
    pub(crate) argv: Vec<OsString>,
    env: Option<Vec<(OsString, OsString)>>,
    pub(crate) ok_statuses: Vec<i32>,
    pub(crate) iter_delimiter: Vec<u8>,
    pub(crate) iter_raw: bool,
    pub(crate) wait_for_output: bool,
    pub(crate) truncate_output: bool,
    on_start: Mutex<Option<OnStart>>,

    state: Mutex<State>,
    state_cond: Condvar,
    pub(crate) stdin: Mutex<Option<StdinKind>>,
    pub(crate) stdout: Mutex<OutTarget>,
    pub(crate) stderr: Mutex<OutTarget>,

    pid: Mutex<Option<Pid>>,
    comm_worker: Mutex<Option<thread::JoinHandle<()>>>,
    wait_worker: Mutex<Option<thread::JoinHandle<()>>>,
    /// Output iterators to close when a handle leaves scope.
    scoped: Mutex<Vec<Weak<IterShared>>>,

    stdout_buf: Mutex<Vec<u8>>,
    stderr_buf: Mutex<Vec<u8>>,
    status: Mutex<Option<i32>>,
    error: Mutex<Option<Error>>,
    truncated: AtomicBool,
}

impl Inner {
    fn new(config: ProcessConfig) -> Inner {
        Inner {
            program: config.program,
            argv: config.argv,
            env: config.env,
            ok_statuses: config.ok_statuses,
            iter_delimiter: config.iter_delimiter,
            iter_raw: config.iter_raw,
            wait_for_output: config.wait_for_output,
            truncate_output: config.truncate_output,
            on_start: Mutex::new(config.on_start),
            state: Mutex::new(State::Pending),
            state_cond: Condvar::new(),
            stdin: Mutex::new(config.stdin),
            stdout: Mutex::new(config.stdout),
            stderr: Mutex::new(config.stderr),
            pid: Mutex::new(None),
            comm_worker: Mutex::new(None),
            wait_worker: Mutex::new(None),
            scoped: Mutex::new(Vec::new()),
            stdout_buf: Mutex::new(Vec::new()),
            stderr_buf: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            error: Mutex::new(None),
            truncated: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, new: State) {
        *self.state.lock().unwrap() = new;
    }

    /// Publishes `Terminated`. Called by the communication worker only,
    /// after every owned descriptor has been closed.
    pub(crate) fn publish_terminated(&self) {
        let mut state = self.state.lock().unwrap();
        *state = State::Terminated;
        self.state_cond.notify_all();
    }

    fn await_terminated(&self) {
        let mut state = self.state.lock().unwrap();
        while *state < State::Terminated {
            state = self.state_cond.wait(state).unwrap();
        }
    }

    pub(crate) fn append_output(&self, target: i32, data: &[u8]) {
        let buf = if target == 1 {
            &self.stdout_buf
        } else {
            &self.stderr_buf
        };
        buf.lock().unwrap().extend_from_slice(data);
    }

    /// Stores a worker-side error. The first error wins; it is consumed by
    /// the next checked wait.
    pub(crate) fn store_error(&self, err: Error) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::error!(error = %err, "dropping a subsequent process error");
        }
    }

    pub(crate) fn mark_truncated(&self) {
        self.truncated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn upstream(&self) -> Option<Arc<Inner>> {
        match self.stdin.lock().unwrap().as_ref() {
            Some(StdinKind::Upstream(upstream)) => Some(upstream.clone()),
            _ => None,
        }
    }

    fn piped_to(&self) -> bool {
        matches!(*self.stdout.lock().unwrap(), OutTarget::Downstream(_))
    }

    /// Renders the command line for messages. Very lazy formatting.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        for (index, arg) in self.argv.iter().enumerate() {
            if index > 0 {
                out.push(' ');
            }
            let arg = arg.to_string_lossy();
            if !arg.is_empty()
                && !arg
                    .chars()
                    .any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '\\')
            {
                out.push_str(&arg);
            } else {
                out.push('\'');
                out.push_str(&arg.replace('\\', r"\\").replace('\'', r"\'"));
                out.push('\'');
            }
        }
        out
    }

    fn ensure_terminated(&self) -> Result<(), Error> {
        if self.state() != State::Terminated {
            return Err(invalid_state("the process is not terminated"));
        }
        Ok(())
    }

    fn recorded_status(&self) -> Result<i32, Error> {
        self.status
            .lock()
            .unwrap()
            .ok_or_else(|| invalid_state("the process status was not recorded"))
    }

    /// Registers an output iterator for deterministic close on scope exit.
    pub(crate) fn register_scoped(&self, iterator: &Arc<IterShared>) {
        self.scoped.lock().unwrap().push(Arc::downgrade(iterator));
    }

    /// Claims the process's stdout for an output iterator.
    pub(crate) fn attach_iterator(&self) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        if *state != State::Pending {
            return Err(invalid_state("the process has been started already"));
        }
        let mut stdout = self.stdout.lock().unwrap();
        match *stdout {
            OutTarget::Capture => {
                *stdout = OutTarget::Iterator;
                Ok(())
            }
            _ => Err(invalid_operation("the process stdout is already redirected")),
        }
    }

    pub(crate) fn pipe_to(this: &Arc<Inner>, downstream: &Arc<Inner>) -> Result<(), Error> {
        {
            let state = this.state.lock().unwrap();
            if *state != State::Pending {
                return Err(invalid_state("a process cannot be piped after it was started"));
            }
            let mut stdout = this.stdout.lock().unwrap();
            if !matches!(*stdout, OutTarget::Capture) {
                return Err(invalid_operation("the process stdout is already redirected"));
            }
            *stdout = OutTarget::Downstream(Arc::downgrade(downstream));
        }

        // The downstream half runs outside our locks; roll our side back if
        // it cannot accept the pipe.
        if let Err(err) = downstream.accept_upstream(this) {
            *this.stdout.lock().unwrap() = OutTarget::Capture;
            return Err(err);
        }

        tracing::debug!(
            upstream = %this.render(),
            downstream = %downstream.render(),
            "creating a pipe",
        );
        Ok(())
    }

    fn accept_upstream(&self, upstream: &Arc<Inner>) -> Result<(), Error> {
        let state = self.state.lock().unwrap();
        if *state != State::Pending {
            return Err(invalid_state("a process cannot be piped after it was started"));
        }
        let mut stdin = self.stdin.lock().unwrap();
        if stdin.is_some() {
            return Err(invalid_operation("the process stdin is already redirected"));
        }
        *stdin = Some(StdinKind::Upstream(upstream.clone()));
        Ok(())
    }

    pub(crate) fn start(
        this: &Arc<Inner>,
        stdout_donor: Option<&mut Pipe>,
        check_pipes: bool,
    ) -> Result<(), Error> {
        {
            let mut state = this.state.lock().unwrap();
            if *state != State::Pending {
                return Err(invalid_operation("the process has been started already"));
            }
            if check_pipes && this.piped_to() {
                return Err(invalid_operation(
                    "only the last process of a pipeline can be started",
                ));
            }
            *state = State::Spawning;
        }

        let hook = this.on_start.lock().unwrap().take();
        if let Some(mut hook) = hook {
            hook(&Process {
                inner: this.clone(),
            });
        }

        tracing::debug!(command = %this.render(), "executing");

        match Inner::do_start(this, stdout_donor) {
            Ok(()) => Ok(()),
            Err(err) => {
                this.join_workers();
                if let Some(upstream) = this.upstream() {
                    if upstream.state() >= State::Running {
                        if let Err(err) = Inner::wait(&upstream, false, Some(Signal::SIGTERM)) {
                            tracing::error!(error = %err, "failed to stop the upstream process");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    fn do_start(this: &Arc<Inner>, stdout_donor: Option<&mut Pipe>) -> Result<(), Error> {
        let mut pipes: Vec<Pipe> = Vec::new();
        let mut producer: Option<ChunkProducer> = None;

        let mut plan = ChildPlan {
            dup2s: Vec::new(),
            pipe_fds: Vec::new(),
            stdin_file: None,
            stdout_file: None,
            stderr_file: None,
            stdout_to_stderr: false,
            stderr_to_stdout: false,
            program: cstring(&this.program)?,
            argv: this
                .argv
                .iter()
                .map(|arg| cstring(arg))
                .collect::<Result<_, _>>()?,
            envp: match &this.env {
                None => None,
                Some(vars) => Some(
                    vars.iter()
                        .map(|(name, value)| {
                            let mut entry = name.as_bytes().to_vec();
                            entry.push(b'=');
                            entry.extend_from_slice(value.as_bytes());
                            CString::new(entry).map_err(|_| {
                                invalid_argument("environment contains a NUL byte")
                            })
                        })
                        .collect::<Result<_, _>>()?,
                ),
            },
        };

        // Reify stdin.
        let mut upstream = None;
        {
            let mut stdin = this.stdin.lock().unwrap();
            match stdin.as_mut() {
                None | Some(StdinKind::Null) => {
                    plan.stdin_file = Some(cstring(OsStr::new(DEV_NULL))?)
                }
                Some(StdinKind::Inherit) => {}
                Some(StdinKind::File(path)) => {
                    plan.stdin_file = Some(cstring(path.as_os_str())?)
                }
                Some(StdinKind::Bytes(bytes)) => {
                    let bytes = std::mem::take(bytes);
                    producer = Some(Box::new(std::iter::once(Ok(bytes))));
                }
                Some(StdinKind::Producer(chunks)) => {
                    producer = Some(std::mem::replace(chunks, Box::new(std::iter::empty())));
                }
                Some(StdinKind::Upstream(up)) => upstream = Some(up.clone()),
            }
        }
        if producer.is_some() {
            pipes.push(Pipe::new(0, Direction::ChildReads)?);
        }
        if let Some(upstream) = upstream {
            // Connect and start the whole upstream chain: the upstream
            // adopts the write end of our stdin pipe as its stdout.
            let mut stdin_pipe = Pipe::new(0, Direction::ChildReads)?;
            Inner::start(&upstream, Some(&mut stdin_pipe), false)?;
            pipes.push(stdin_pipe);
        }

        // Reify stdout.
        let stdout_target = this.stdout.lock().unwrap().clone();
        match (stdout_donor, stdout_target) {
            (Some(donor), OutTarget::Downstream(_)) | (Some(donor), OutTarget::Iterator) => {
                pipes.push(Pipe::adopt(1, Direction::ChildWrites, donor));
            }
            (None, OutTarget::Capture) => pipes.push(Pipe::new(1, Direction::ChildWrites)?),
            (None, OutTarget::ToStdout) => {}
            (None, OutTarget::ToStderr) => plan.stdout_to_stderr = true,
            (None, OutTarget::File { path, append }) => {
                plan.stdout_file = Some((cstring(path.as_os_str())?, append))
            }
            (None, OutTarget::Iterator) => {
                return Err(invalid_operation(
                    "the process stdout is owned by an output iterator",
                ))
            }
            _ => unreachable!("inconsistent stdout wiring"),
        }

        // Reify stderr.
        match this.stderr.lock().unwrap().clone() {
            OutTarget::Capture => pipes.push(Pipe::new(2, Direction::ChildWrites)?),
            OutTarget::ToStderr => {}
            OutTarget::ToStdout => plan.stderr_to_stdout = true,
            OutTarget::File { path, append } => {
                plan.stderr_file = Some((cstring(path.as_os_str())?, append))
            }
            OutTarget::Downstream(_) | OutTarget::Iterator => {
                unreachable!("stderr cannot be piped")
            }
        }

        for pipe in &pipes {
            if let Some(fd) = pipe.child_raw() {
                plan.dup2s.push((fd, pipe.target));
            }
            plan.pipe_fds.extend(pipe.held_raw());
        }

        // Allocate everything else before the fork, so the fork cannot leave
        // the process half-constructed: the termination pipe, the poller and
        // both workers.
        let (term_read, term_write) = {
            let (read, write) = eintr_retry(|| nix::unistd::pipe2(OFlag::O_CLOEXEC))?;
            (Fd::new(read), Fd::new(write))
        };
        let poller = new_poller()?;

        // Both workers block on the fork barrier until the fork outcome is
        // published, so they observe a consistent PID (or give up).
        let barrier: Arc<Mutex<Option<Pid>>> = Arc::new(Mutex::new(None));
        let mut barrier_guard = barrier.lock().unwrap();

        let comm = CommWorker::new(this.clone(), pipes, term_read, poller, producer);
        let comm_barrier = barrier.clone();
        let comm_handle = thread::Builder::new()
            .name("chute-comm".into())
            .spawn(move || {
                let forked = comm_barrier.lock().unwrap().is_some();
                if forked {
                    comm.run();
                }
            })?;
        *this.comm_worker.lock().unwrap() = Some(comm_handle);

        let reaper = this.clone();
        let wait_barrier = barrier.clone();
        let wait_handle = thread::Builder::new()
            .name("chute-wait".into())
            .spawn(move || {
                let pid = match *wait_barrier.lock().unwrap() {
                    Some(pid) => pid,
                    None => return,
                };
                reaper.reap(pid, term_write);
            })?;
        *this.wait_worker.lock().unwrap() = Some(wait_handle);

        match unsafe { nix::unistd::fork() } {
            Err(err) => Err(err.into()),
            Ok(ForkResult::Child) => spawn::run_child(&plan),
            Ok(ForkResult::Parent { child }) => {
                *barrier_guard = Some(child);
                *this.pid.lock().unwrap() = Some(child);
                this.set_state(State::Running);
                drop(barrier_guard);
                tracing::debug!(pid = child.as_raw(), command = %this.render(), "process started");
                Ok(())
            }
        }
    }

    /// The wait worker: reaps the child and records its status, then closes
    /// the termination-signal write end so the communication worker notices.
    fn reap(&self, pid: Pid, termination: Fd) {
        let status = match eintr_retry(|| waitpid(pid, None)) {
            Ok(WaitStatus::Exited(_, code)) => {
                tracing::debug!(pid = pid.as_raw(), code, "process exited");
                code
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::debug!(pid = pid.as_raw(), signal = ?signal, "process was killed");
                128 + signal as i32
            }
            Ok(status) => {
                tracing::error!(pid = pid.as_raw(), ?status, "process terminated for an unknown reason");
                127
            }
            Err(err) => {
                tracing::error!(pid = pid.as_raw(), error = %err, "unable to waitpid the process");
                127
            }
        };
        *self.status.lock().unwrap() = Some(status);
        // Recorded; only now signal the communication worker.
        drop(termination);
    }

    pub(crate) fn wait(
        this: &Arc<Inner>,
        check_status: bool,
        kill: Option<Signal>,
    ) -> Result<i32, Error> {
        if this.state() < State::Running {
            return Err(invalid_state("the process is not running"));
        }

        tracing::debug!(command = %this.render(), signal = ?kill, "waiting for termination");

        if let Some(signal) = kill {
            while this.kill_with(signal)? {
                if this.join_workers_within(Duration::from_millis(100)) {
                    break;
                }
            }
        }

        this.join_workers();
        this.await_terminated();

        if let Some(upstream) = this.upstream() {
            Inner::wait(&upstream, check_status, kill)?;
        }

        let status = this.recorded_status()?;
        if check_status {
            if let Some(err) = this.error.lock().unwrap().take() {
                return Err(err);
            }
            if this.truncated.load(Ordering::SeqCst) && !this.truncate_output {
                return Err(Error::OutputTruncated {
                    command: this.render(),
                    status,
                    stdout: this.stdout_buf.lock().unwrap().clone(),
                    stderr: this.stderr_buf.lock().unwrap().clone(),
                });
            }
            if !this.ok_statuses.contains(&status) {
                return Err(Error::Execution {
                    command: this.render(),
                    status,
                    stdout: this.stdout_buf.lock().unwrap().clone(),
                    stderr: this.stderr_buf.lock().unwrap().clone(),
                });
            }
        }
        Ok(status)
    }

    pub(crate) fn kill_with(&self, signal: Signal) -> Result<bool, Error> {
        let state = self.state();
        if state < State::Running {
            return Err(invalid_state("the process is not running"));
        }

        if state == State::Running {
            let pid = match *self.pid.lock().unwrap() {
                Some(pid) => pid,
                None => return Ok(false),
            };
            tracing::debug!(pid = pid.as_raw(), signal = ?signal, "sending a signal");
            match signal::kill(pid, signal) {
                Ok(()) => return Ok(true),
                Err(err) if errno_of(&err) == Some(Errno::ESRCH) => return Ok(false),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(false)
    }

    fn join_workers(&self) {
        // The wait worker first: it unblocks the communication worker.
        for slot in &[&self.wait_worker, &self.comm_worker] {
            let handle = slot.lock().unwrap().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    tracing::error!("a process worker panicked");
                }
            }
        }
    }

    fn workers_finished(&self) -> bool {
        for slot in &[&self.wait_worker, &self.comm_worker] {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                if !handle.is_finished() {
                    return false;
                }
            }
        }
        true
    }

    fn join_workers_within(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.workers_finished() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

fn cstring(value: &OsStr) -> Result<CString, Error> {
    CString::new(value.as_bytes()).map_err(|_| invalid_argument("argument contains a NUL byte"))
}

/// A handle to an external process.
///
/// Handles are cheap to clone; all of them refer to the same process. A
/// handle going out of scope closes the process's output iterators and, if
/// the process was started, waits for it to terminate.
#[derive(Clone)]
pub struct Process {
    inner: Arc<Inner>,
}

impl Process {
    pub(crate) fn from_config(config: ProcessConfig) -> Process {
        Process {
            inner: Arc::new(Inner::new(config)),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    /// Starts the process without waiting for it.
    ///
    /// If the process is the tail of a pipeline, the whole chain is started,
    /// upstream first. Starting a process twice, or a process that is not
    /// the tail of its pipeline, is an error.
    pub fn start(&self) -> Result<(), Error> {
        Inner::start(&self.inner, None, true)
    }

    /// Starts the process and waits for it, surfacing worker errors and
    /// non-OK exit statuses.
    pub fn execute(&self) -> Result<&Process, Error> {
        Inner::start(&self.inner, None, true)?;
        Inner::wait(&self.inner, true, None)?;
        Ok(self)
    }

    /// Waits for termination and returns the exit status without checking
    /// it.
    pub fn wait(&self) -> Result<i32, Error> {
        Inner::wait(&self.inner, false, None)
    }

    /// Waits for termination; surfaces stored errors and raises
    /// [`Error::Execution`] when the status is outside the OK set.
    pub fn wait_checked(&self) -> Result<i32, Error> {
        Inner::wait(&self.inner, true, None)
    }

    /// Repeatedly delivers `signal` until the process disappears, then joins
    /// it. Propagates the kill across the whole pipeline.
    pub fn wait_kill(&self, signal: Signal) -> Result<i32, Error> {
        Inner::wait(&self.inner, false, Some(signal))
    }

    /// Sends `signal` to the process once.
    ///
    /// Returns true iff the signal was delivered; a process that no longer
    /// exists yields false.
    pub fn kill(&self, signal: Signal) -> Result<bool, Error> {
        self.inner.kill_with(signal)
    }

    /// Creates a pipe `self | downstream`.
    ///
    /// Both processes must be pending, `self` must not already have a
    /// downstream, and `downstream` must not already have a stdin source.
    /// On failure neither process is modified.
    pub fn pipe_to(&self, downstream: &Process) -> Result<(), Error> {
        Inner::pipe_to(&self.inner, &downstream.inner)
    }

    /// Executes the process and returns a lazy iterator over its stdout.
    pub fn iter_output(&self) -> Result<OutputIterator, Error> {
        OutputIterator::attach(&self.inner)
    }

    /// The process's PID. The process must have been started.
    pub fn pid(&self) -> Result<i32, Error> {
        if self.inner.state() < State::Running {
            return Err(invalid_state("the process is not running"));
        }
        let pid = *self.inner.pid.lock().unwrap();
        pid.map(Pid::as_raw)
            .ok_or_else(|| invalid_state("the process is not running"))
    }

    /// The exit status. The process must be terminated.
    pub fn status(&self) -> Result<i32, Error> {
        self.inner.ensure_terminated()?;
        self.inner.recorded_status()
    }

    /// The captured stdout. The process must be terminated.
    pub fn raw_stdout(&self) -> Result<Vec<u8>, Error> {
        self.inner.ensure_terminated()?;
        Ok(self.inner.stdout_buf.lock().unwrap().clone())
    }

    /// The captured stderr. The process must be terminated.
    pub fn raw_stderr(&self) -> Result<Vec<u8>, Error> {
        self.inner.ensure_terminated()?;
        Ok(self.inner.stderr_buf.lock().unwrap().clone())
    }

    /// The captured stdout, UTF-8 decoded.
    pub fn stdout(&self) -> Result<String, Error> {
        Ok(String::from_utf8(self.raw_stdout()?)?)
    }

    /// The captured stderr, UTF-8 decoded.
    pub fn stderr(&self) -> Result<String, Error> {
        Ok(String::from_utf8(self.raw_stderr()?)?)
    }

    /// The argv the child is (or will be) executed with.
    pub fn command(&self) -> Vec<OsString> {
        self.inner.argv.clone()
    }

    /// The rendered command line.
    pub fn command_line(&self) -> String {
        self.inner.render()
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.inner.render())
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Process")
            .field("command", &self.inner.render())
            .field("state", &self.inner.state())
            .finish()
    }
}

impl std::ops::BitOr for Process {
    type Output = Process;

    /// Shell-style pipelines: `a | b` wires `a`'s stdout to `b`'s stdin and
    /// returns `b`, the tail.
    ///
    /// # Panics
    ///
    /// Panics when the processes cannot be piped; use [`Process::pipe_to`]
    /// for the fallible form.
    fn bitor(self, downstream: Process) -> Process {
        match self.pipe_to(&downstream) {
            Ok(()) => downstream,
            Err(err) => panic!("cannot pipe processes: {}", err),
        }
    }
}

impl Drop for Process {
    /// Scope exit: closes every output iterator registered on the process,
    /// then waits for the process if it was started. Failures are logged;
    /// the stored error slot is only ever surfaced by a checked wait.
    fn drop(&mut self) {
        let scoped: Vec<_> = std::mem::take(&mut *self.inner.scoped.lock().unwrap());
        for iterator in scoped {
            if let Some(iterator) = iterator.upgrade() {
                iterator.close();
            }
        }

        if self.inner.state() >= State::Running {
            if let Err(err) = Inner::wait(&self.inner, false, None) {
                tracing::error!(error = %err, "waiting for the process on scope exit failed");
            }
        }
    }
}
