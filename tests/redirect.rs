use std::fs;

use anyhow::Result;
use chute::{cmd, Stdin, Target};

mod common;

#[test]
fn redirects_stdout_to_a_file() -> Result<()> {
    common::init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stdout");

    let process = cmd("echo")
        .arg("test")
        .stdout(Target::file(&path))
        .build()?;
    process.execute()?;

    assert_eq!(fs::read_to_string(&path)?, "test\n");
    // Redirected output is not captured.
    assert_eq!(process.stdout()?, "");
    Ok(())
}

#[test]
fn append_mode_keeps_existing_contents() -> Result<()> {
    common::init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stdout");

    cmd("echo")
        .arg("one")
        .stdout(Target::file(&path))
        .build()?
        .execute()?;
    cmd("echo")
        .arg("two")
        .stdout(Target::append(&path))
        .build()?
        .execute()?;
    assert_eq!(fs::read_to_string(&path)?, "one\ntwo\n");

    // Without append the file is reused from the start.
    cmd("echo")
        .arg("three")
        .stdout(Target::file(&path))
        .build()?
        .execute()?;
    assert!(fs::read_to_string(&path)?.starts_with("three\n"));
    Ok(())
}

#[test]
fn redirects_stderr_to_a_file() -> Result<()> {
    common::init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stderr");

    let process = cmd("sh")
        .arg("-c")
        .arg("echo err 1>&2")
        .stderr(Target::file(&path))
        .build()?;
    process.execute()?;

    assert_eq!(fs::read_to_string(&path)?, "err\n");
    assert_eq!(process.stderr()?, "");
    Ok(())
}

#[test]
fn redirects_stdin_from_a_file() -> Result<()> {
    common::init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stdin");
    fs::write(&path, "file data")?;

    let process = cmd("cat").stdin(Stdin::file(&path)).build()?;
    process.execute()?;

    assert_eq!(process.stdout()?, "file data");
    Ok(())
}

#[test]
fn explicit_null_stdin_reads_nothing() -> Result<()> {
    common::init();

    let process = cmd("cat").stdin(Stdin::null()).build()?;
    process.execute()?;

    assert_eq!(process.stdout()?, "");
    Ok(())
}

#[test]
fn merges_stdout_into_stderr() -> Result<()> {
    common::init();

    let process = cmd("echo")
        .arg("swapped")
        .stdout(Target::to_stderr())
        .build()?;
    process.execute()?;

    assert_eq!(process.stdout()?, "");
    assert_eq!(process.stderr()?, "swapped\n");
    Ok(())
}

#[test]
fn merges_stderr_into_stdout() -> Result<()> {
    common::init();

    let process = cmd("sh")
        .arg("-c")
        .arg("echo err 1>&2")
        .stderr(Target::to_stdout())
        .build()?;
    process.execute()?;

    assert_eq!(process.stdout()?, "err\n");
    assert_eq!(process.stderr()?, "");
    Ok(())
}

#[test]
fn creates_redirection_targets() -> Result<()> {
    common::init();

    let dir = tempfile::tempdir()?;
    let out_path = dir.path().join("out");
    let err_path = dir.path().join("err");

    let process = cmd("sh")
        .arg("-c")
        .arg("echo out; echo err 1>&2")
        .stdout(Target::file(&out_path))
        .stderr(Target::append(&err_path))
        .build()?;
    process.execute()?;

    assert_eq!(fs::read_to_string(&out_path)?, "out\n");
    assert_eq!(fs::read_to_string(&err_path)?, "err\n");
    Ok(())
}
