//! Resource-leak invariants.
//!
//! The snapshots below compare the whole process's descriptor, thread and
//! child sets, so this file holds a single test and runs in its own test
//! binary.

use std::collections::HashSet;
use std::fs;

use anyhow::Result;
use chute::{cmd, Stdin};

mod common;

fn open_fds() -> HashSet<String> {
    fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
        .collect()
}

fn thread_count() -> usize {
    fs::read_dir("/proc/self/task").unwrap().count()
}

#[cfg(target_os = "linux")]
#[test]
fn terminated_processes_leak_nothing() -> Result<()> {
    common::init();

    // Warm up lazy initialization.
    cmd("true").build()?.execute()?;

    let fds_before = open_fds();
    let threads_before = thread_count();

    let process = cmd("sh")
        .arg("-c")
        .arg("echo out; echo err 1>&2")
        .stdin(Stdin::text("ignored"))
        .build()?;
    process.execute()?;
    drop(process);

    let pipeline = cmd("cat").stdin(Stdin::text("aaa\n")).build()?
        | cmd("wc").flag("l").build()?;
    pipeline.execute()?;
    drop(pipeline);

    let iterated = cmd("cat").stdin(Stdin::text("a\nb\n")).build()?;
    for line in iterated.iter_output()? {
        line?;
    }
    drop(iterated);

    assert_eq!(open_fds(), fds_before);
    assert_eq!(thread_count(), threads_before);

    // And no child process is left behind.
    let err = nix::sys::wait::waitpid(
        nix::unistd::Pid::from_raw(-1),
        Some(nix::sys::wait::WaitPidFlag::WNOHANG),
    )
    .unwrap_err();
    assert_eq!(err.as_errno(), Some(nix::errno::Errno::ECHILD));
    Ok(())
}
