use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chute::{cmd, Error, Signal};

mod common;

#[test]
fn successful_command() -> Result<()> {
    common::init();

    let process = cmd("true").build()?;
    process.execute()?;

    assert_eq!(process.status()?, 0);
    assert_eq!(process.stdout()?, "");
    assert_eq!(process.stderr()?, "");
    Ok(())
}

#[test]
fn failing_command() -> Result<()> {
    common::init();

    let process = cmd("false").build()?;
    let err = process.execute().unwrap_err();

    assert!(matches!(err, Error::Execution { status: 1, .. }));
    assert_eq!(process.status()?, 1);
    Ok(())
}

#[test]
fn captures_stdout_and_stderr_separately() -> Result<()> {
    common::init();

    let process = cmd("sh")
        .arg("-c")
        .arg("echo A1; echo A2 1>&2; sleep 1; echo A3; echo A4 1>&2")
        .build()?;
    process.execute()?;

    assert_eq!(process.status()?, 0);
    assert_eq!(process.stdout()?, "A1\nA3\n");
    assert_eq!(process.stderr()?, "A2\nA4\n");
    Ok(())
}

#[test]
fn reports_the_child_pid() -> Result<()> {
    common::init();

    let process = cmd("sh").arg("-c").arg("echo $$").build()?;
    process.start()?;
    let pid = process.pid()?;
    process.wait_checked()?;

    assert_eq!(process.stdout()?.trim(), pid.to_string());
    Ok(())
}

#[test]
fn kill_wait_terminates_quickly() -> Result<()> {
    common::init();

    let process = cmd("sleep").arg(3).build()?;
    process.start()?;

    let started = Instant::now();
    let status = process.wait_kill(Signal::SIGTERM)?;

    assert_eq!(status, 128 + Signal::SIGTERM as i32);
    assert!(started.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[test]
fn kill_reports_delivery() -> Result<()> {
    common::init();

    let process = cmd("sleep").arg(10).build()?;
    process.start()?;

    assert!(process.kill(Signal::SIGTERM)?);
    process.wait()?;

    // The process is gone; killing it again is not an error, but nothing is
    // delivered.
    assert!(!process.kill(Signal::SIGTERM)?);
    Ok(())
}

#[test]
fn accessors_require_matching_states() -> Result<()> {
    common::init();

    let process = cmd("sleep").arg(10).build()?;

    assert!(matches!(process.status(), Err(Error::InvalidProcessState(_))));
    assert!(matches!(process.stdout(), Err(Error::InvalidProcessState(_))));
    assert!(matches!(process.pid(), Err(Error::InvalidProcessState(_))));
    assert!(matches!(process.wait(), Err(Error::InvalidProcessState(_))));
    assert!(matches!(
        process.kill(Signal::SIGTERM),
        Err(Error::InvalidProcessState(_))
    ));

    process.start()?;
    process.pid()?;
    assert!(matches!(process.status(), Err(Error::InvalidProcessState(_))));
    assert!(matches!(
        process.raw_stdout(),
        Err(Error::InvalidProcessState(_))
    ));

    process.wait_kill(Signal::SIGKILL)?;
    process.status()?;
    Ok(())
}

#[test]
fn starting_twice_is_an_error() -> Result<()> {
    common::init();

    let process = cmd("true").build()?;
    process.execute()?;

    assert!(matches!(process.start(), Err(Error::InvalidOperation(_))));
    assert!(matches!(
        process.execute(),
        Err(Error::InvalidOperation(_))
    ));
    Ok(())
}

#[test]
fn waiting_twice_returns_the_status() -> Result<()> {
    common::init();

    let process = cmd("true").build()?;
    process.start()?;
    assert_eq!(process.wait()?, 0);
    assert_eq!(process.wait()?, 0);
    assert_eq!(process.wait_checked()?, 0);
    Ok(())
}

#[test]
fn ok_statuses_control_checking() -> Result<()> {
    common::init();

    let process = cmd("false").ok_statuses(vec![0, 1]).build()?;
    process.execute()?;
    assert_eq!(process.status()?, 1);

    let process = cmd("true").ok_statuses(vec![1]).build()?;
    let err = process.execute().unwrap_err();
    assert!(matches!(err, Error::Execution { status: 0, .. }));
    Ok(())
}

#[test]
fn execution_error_carries_captured_output() -> Result<()> {
    common::init();

    let process = cmd("sh")
        .arg("-c")
        .arg("echo out; echo err 1>&2; exit 7")
        .build()?;
    let err = process.execute().unwrap_err();

    assert_eq!(err.status(), Some(7));
    assert_eq!(err.stdout(), Some(&b"out\n"[..]));
    assert_eq!(err.stderr(), Some(&b"err\n"[..]));
    Ok(())
}

#[test]
fn replacement_environment_is_exact() -> Result<()> {
    common::init();

    std::env::set_var("CHUTE_LEAKED_VAR", "should-not-be-seen");

    let process = cmd("/bin/sh")
        .arg("-c")
        .arg("env")
        .env(vec![
            ("CHUTE_TEST_VAR", "value"),
            ("PATH", "/usr/bin:/bin"),
        ])
        .build()?;
    process.execute()?;

    let output = process.stdout()?;
    assert!(output.lines().any(|line| line == "CHUTE_TEST_VAR=value"));
    assert!(!output.contains("CHUTE_LEAKED_VAR"));
    Ok(())
}

#[test]
fn environment_is_inherited_by_default() -> Result<()> {
    common::init();

    std::env::set_var("CHUTE_INHERITED_VAR", "inherited");

    let process = cmd("sh").arg("-c").arg("echo $CHUTE_INHERITED_VAR").build()?;
    process.execute()?;

    assert_eq!(process.stdout()?, "inherited\n");
    Ok(())
}

#[test]
fn missing_program_exits_127() -> Result<()> {
    common::init();

    let process = cmd("chute-no-such-program").build()?;
    let err = process.execute().unwrap_err();

    assert_eq!(err.status(), Some(127));
    assert!(!process.stderr()?.is_empty());
    Ok(())
}

#[test]
fn non_executable_program_exits_126() -> Result<()> {
    common::init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("not-executable");
    fs::write(&path, "#!/bin/sh\necho hi\n")?;

    let process = cmd(&path).build()?;
    let err = process.execute().unwrap_err();

    assert_eq!(err.status(), Some(126));
    Ok(())
}

#[test]
fn on_start_hook_runs_before_the_process() -> Result<()> {
    common::init();

    let hook_ran = Arc::new(AtomicBool::new(false));
    let flag = hook_ran.clone();

    let process = cmd("true")
        .on_start(move |process| {
            assert_eq!(process.command_line(), "true");
            flag.store(true, Ordering::SeqCst);
        })
        .build()?;
    process.execute()?;

    assert!(hook_ran.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn builder_shortcuts_run_and_start() -> Result<()> {
    common::init();

    // Immediate execution, the opposite of the deferred default.
    let process = cmd("echo").arg("ran").run()?;
    assert_eq!(process.stdout()?, "ran\n");

    let process = cmd("sleep").arg(5).start()?;
    process.pid()?;
    process.wait_kill(Signal::SIGKILL)?;
    Ok(())
}

#[test]
fn command_rendering() -> Result<()> {
    common::init();

    let process = cmd("grep").opt("e", "a b").arg("input.txt").build()?;
    assert_eq!(process.command_line(), "grep -e 'a b' input.txt");
    assert_eq!(format!("{}", process), "grep -e 'a b' input.txt");
    Ok(())
}

