use std::fs;

use anyhow::Result;
use chute::{cmd, script, Error, Process, Stdin, Target};

mod common;

/// Runs a serialized script the way a remote side would: as a single
/// command-line argument handed to a shell.
fn run_script(script: Vec<u8>) -> Result<Process, Error> {
    let wrapper = cmd("sh").arg("-c").arg(script).build()?;
    wrapper.start()?;
    wrapper.wait()?;
    Ok(wrapper)
}

/// Executes the pipeline directly and through its serialized form, and
/// checks that status, stdout and stderr agree.
fn assert_round_trip(direct: Process, serialized: Process) -> Result<()> {
    let script = script(&serialized)?;

    let direct_status = {
        direct.start()?;
        direct.wait()?
    };
    let replayed = run_script(script)?;

    assert_eq!(replayed.status()?, direct_status);
    assert_eq!(replayed.raw_stdout()?, direct.raw_stdout()?);
    assert_eq!(replayed.raw_stderr()?, direct.raw_stderr()?);
    Ok(())
}

fn echo_pipeline() -> Result<Process, Error> {
    Ok(cmd("echo").arg("aaa").build()?
        | cmd("grep").arg("aaa").build()?
        | cmd("wc").flag("l").build()?)
}

#[test]
fn round_trips_a_single_command() -> Result<()> {
    common::init();
    assert_round_trip(
        cmd("echo").arg("some test").build()?,
        cmd("echo").arg("some test").build()?,
    )
}

#[test]
fn round_trips_a_failing_command() -> Result<()> {
    common::init();
    assert_round_trip(cmd("false").build()?, cmd("false").build()?)
}

#[test]
fn round_trips_a_pipeline() -> Result<()> {
    common::init();
    assert_round_trip(echo_pipeline()?, echo_pipeline()?)
}

#[test]
fn a_failing_stage_decides_the_script_status() -> Result<()> {
    common::init();

    let pipeline = cmd("echo").arg("aaa").build()?
        | cmd("grep").arg("bbb").build()?
        | cmd("wc").flag("l").build()?;
    let replayed = run_script(script(&pipeline)?)?;

    // The PIPESTATUS epilogue surfaces grep's no-match status even though
    // wc exited successfully.
    assert_eq!(replayed.status()?, 1);
    Ok(())
}

#[test]
fn stage_ok_statuses_are_encoded_in_the_script() -> Result<()> {
    common::init();

    let pipeline = cmd("echo").arg("aaa").build()?
        | cmd("grep").arg("bbb").ok_statuses(vec![0, 1]).build()?
        | cmd("wc").flag("l").build()?;
    let replayed = run_script(script(&pipeline)?)?;

    assert_eq!(replayed.status()?, 0);
    assert_eq!(replayed.stdout()?.trim(), "0");
    Ok(())
}

#[test]
fn round_trips_file_redirections() -> Result<()> {
    common::init();

    let dir = tempfile::tempdir()?;
    let input = dir.path().join("input");
    fs::write(&input, "b\na\n")?;
    let direct_out = dir.path().join("direct");
    let replayed_out = dir.path().join("replayed");

    let build = |out: &std::path::Path| -> Result<Process, Error> {
        cmd("sort")
            .stdin(Stdin::file(&input))
            .stdout(Target::file(out))
            .build()
    };

    build(&direct_out)?.execute()?;
    run_script(script(&build(&replayed_out)?)?)?;

    assert_eq!(fs::read_to_string(&direct_out)?, "a\nb\n");
    assert_eq!(fs::read_to_string(&replayed_out)?, "a\nb\n");
    Ok(())
}

#[test]
fn embeds_a_process_argument_in_shell_mode() -> Result<()> {
    common::init();

    let embedded = cmd("echo").arg("embedded output").build()?;
    let outer = cmd("sh")
        .arg("-c")
        .shell(true)
        .arg_process(&embedded)
        .build()?;
    outer.execute()?;

    assert_eq!(outer.stdout()?, "embedded output\n");
    Ok(())
}

#[test]
fn serialization_requires_pending_processes() -> Result<()> {
    common::init();

    let process = cmd("true").build()?;
    process.execute()?;

    assert!(matches!(
        script(&process),
        Err(Error::InvalidProcessState(_))
    ));
    Ok(())
}

#[test]
fn buffer_stdin_is_not_serializable() -> Result<()> {
    common::init();

    let process = cmd("cat").stdin(Stdin::text("data")).build()?;
    assert!(matches!(script(&process), Err(Error::InvalidOperation(_))));

    let pipeline = cmd("cat").stdin(Stdin::chunks(vec![b"x".to_vec()])).build()?
        | cmd("wc").flag("l").build()?;
    assert!(matches!(script(&pipeline), Err(Error::InvalidOperation(_))));
    Ok(())
}
