//! The child side of the fork.
//!
//! Everything here runs between fork() and exec() (or _exit()), so the code
//! sticks to plain syscalls on data prepared by the parent: no locks, no
//! panics, no unwinding. Failures are reported on whatever descriptor 2
//! currently is and turn into the child's exit code.

use std::ffi::{CStr, CString};
use std::fs::{self, File};
use std::io::Write;
use std::mem::ManuallyDrop;
use std::os::unix::io::{FromRawFd, RawFd};
use std::ptr;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use crate::util::eintr_retry;

/// Everything the child needs, prepared before the fork so that the fork
/// itself cannot fail half-way through resource construction.
pub(crate) struct ChildPlan {
    /// (pipe end, standard descriptor) rewirings, applied first.
    pub dup2s: Vec<(RawFd, RawFd)>,
    /// Original pipe ends to close once rewired.
    pub pipe_fds: Vec<RawFd>,
    pub stdin_file: Option<CString>,
    pub stdout_file: Option<(CString, bool)>,
    pub stderr_file: Option<(CString, bool)>,
    pub stdout_to_stderr: bool,
    pub stderr_to_stdout: bool,
    pub program: CString,
    pub argv: Vec<CString>,
    pub envp: Option<Vec<CString>>,
}

fn fd_name(fd: RawFd) -> &'static str {
    match fd {
        0 => "stdin",
        1 => "stdout",
        _ => "stderr",
    }
}

/// Reports a failure on the current descriptor 2 and exits.
fn fail(code: i32, message: &str) -> ! {
    let mut stderr = ManuallyDrop::new(unsafe { File::from_raw_fd(2) });
    writeln!(&mut *stderr, "{}", message).ok();
    stderr.flush().ok();
    unsafe { libc::_exit(code) }
}

pub(crate) fn run_child(plan: &ChildPlan) -> ! {
    // Connect the pipes.
    for &(source, target) in &plan.dup2s {
        if let Err(err) = eintr_retry(|| nix::unistd::dup2(source, target)) {
            fail(
                127,
                &format!("Unable to connect a pipe to {}: {}", fd_name(target), err),
            );
        }
    }
    for &fd in &plan.pipe_fds {
        eintr_retry(|| nix::unistd::close(fd)).ok();
    }

    if let Err(message) = close_extra_fds() {
        fail(127, &message);
    }

    // File redirections.
    if let Some(path) = &plan.stdin_file {
        if let Err(message) = redirect_from_file(path, 0) {
            fail(127, &message);
        }
    }
    if plan.stdout_to_stderr {
        if let Err(err) = eintr_retry(|| nix::unistd::dup2(2, 1)) {
            fail(127, &format!("Unable to redirect stdout to stderr: {}", err));
        }
    } else if let Some((path, append)) = &plan.stdout_file {
        if let Err(message) = redirect_to_file(path, 1, *append) {
            fail(127, &message);
        }
    }
    if plan.stderr_to_stdout {
        if let Err(err) = eintr_retry(|| nix::unistd::dup2(1, 2)) {
            fail(127, &format!("Unable to redirect stderr to stdout: {}", err));
        }
    } else if let Some((path, append)) = &plan.stderr_file {
        if let Err(message) = redirect_to_file(path, 2, *append) {
            fail(127, &message);
        }
    }

    // The Rust runtime ignores SIGPIPE; the program we are about to become
    // must not inherit that.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let argv: Vec<*const libc::c_char> = plan
        .argv
        .iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect();

    match &plan.envp {
        Some(env) => {
            let envp: Vec<*const libc::c_char> = env
                .iter()
                .map(|var| var.as_ptr())
                .chain(std::iter::once(ptr::null()))
                .collect();
            unsafe {
                libc::execvpe(plan.program.as_ptr(), argv.as_ptr(), envp.as_ptr());
            }
        }
        None => unsafe {
            libc::execvp(plan.program.as_ptr(), argv.as_ptr());
        },
    }

    // exec returned, so it failed.
    let err = errno::errno();
    let code = if err.0 == libc::EACCES { 126 } else { 127 };
    fail(
        code,
        &format!(
            "Failed to execute '{}': {}.",
            plan.program.to_string_lossy(),
            err
        ),
    );
}

/// Closes every descriptor above stderr.
///
/// Prefers enumerating the per-process fd directory; falls back to sweeping
/// up to the descriptor limit when it is unavailable.
fn close_extra_fds() -> Result<(), String> {
    let fd_dir = if cfg!(target_os = "macos") {
        "/dev/fd"
    } else {
        "/proc/self/fd"
    };

    let open_fds: Vec<RawFd> = match fs::read_dir(fd_dir) {
        Ok(entries) => entries
            .filter_map(|entry| {
                entry
                    .ok()
                    .and_then(|entry| entry.file_name().into_string().ok())
                    .and_then(|name| name.parse().ok())
            })
            .collect(),
        Err(_) => {
            let mut limit: libc::rlim_t = 1024;
            let mut rlimit = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlimit) } == 0
                && rlimit.rlim_max != libc::RLIM_INFINITY
            {
                limit = rlimit.rlim_max;
            }
            (0..limit as RawFd).collect()
        }
    };

    for fd in open_fds {
        if fd <= 2 {
            continue;
        }
        match eintr_retry(|| nix::unistd::close(fd)) {
            Ok(()) => {}
            Err(err) if err.as_errno() == Some(Errno::EBADF) => {}
            Err(err) => return Err(format!("Unable to close a file descriptor: {}", err)),
        }
    }

    Ok(())
}

fn redirect_from_file(path: &CStr, target: RawFd) -> Result<(), String> {
    let fd = eintr_retry(|| nix::fcntl::open(path, OFlag::O_RDONLY, Mode::empty())).map_err(
        |err| {
            format!(
                "Unable to redirect '{}' to {}: {}",
                path.to_string_lossy(),
                fd_name(target),
                err
            )
        },
    )?;
    finish_redirect(fd, target, path)
}

fn redirect_to_file(path: &CStr, target: RawFd, append: bool) -> Result<(), String> {
    let mut flags = OFlag::O_WRONLY | OFlag::O_CREAT;
    if append {
        flags |= OFlag::O_APPEND;
    }
    let fd = eintr_retry(|| nix::fcntl::open(path, flags, Mode::from_bits_truncate(0o666)))
        .map_err(|err| {
            format!(
                "Unable to redirect {} to '{}': {}",
                fd_name(target),
                path.to_string_lossy(),
                err
            )
        })?;
    finish_redirect(fd, target, path)
}

fn finish_redirect(fd: RawFd, target: RawFd, path: &CStr) -> Result<(), String> {
    let result = eintr_retry(|| nix::unistd::dup2(fd, target));
    eintr_retry(|| nix::unistd::close(fd)).ok();
    result.map(drop).map_err(|err| {
        format!(
            "Unable to redirect '{}' to {}: {}",
            path.to_string_lossy(),
            fd_name(target),
            err
        )
    })
}
