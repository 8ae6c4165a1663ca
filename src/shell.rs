//! Serialization of pending processes and pipelines to shell scripts.
//!
//! The produced command is a `bash -c '…'` byte string whose execution is
//! equivalent to executing the process directly: same redirections, same
//! pipeline, and for multi-stage pipelines a `PIPESTATUS` epilogue that
//! reproduces the per-stage OK-status checking.

use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;

use crate::error::{invalid_operation, invalid_state, Error};
use crate::process::{Inner, Process, State};
use crate::stdio::{OutTarget, StdinKind};

/// Serializes the pipeline ending at `process` to a `bash -c '…'` command.
///
/// Byte and producer stdin cannot be represented in a script and is
/// rejected; the processes must not have been started.
pub fn script(process: &Process) -> Result<Vec<u8>, Error> {
    script_for(process.inner())
}

pub(crate) fn script_for(tail: &Arc<Inner>) -> Result<Vec<u8>, Error> {
    // Head first.
    let mut stages = vec![tail.clone()];
    let mut cursor = tail.clone();
    while let Some(upstream) = cursor.upstream() {
        stages.push(upstream.clone());
        cursor = upstream;
    }
    stages.reverse();

    let mut command = Vec::new();
    let mut stage_ok_statuses = Vec::with_capacity(stages.len());
    for (index, stage) in stages.iter().enumerate() {
        if index > 0 {
            command.extend_from_slice(b" | ");
        }
        write_stage(&mut command, stage)?;
        stage_ok_statuses.push(stage.ok_statuses.clone());
    }

    if stage_ok_statuses.len() > 1 {
        write_pipestatus_epilogue(&mut command, &stage_ok_statuses);
    }

    let mut script = b"bash -c '".to_vec();
    script.extend_from_slice(&escape_single_quotes(&command));
    script.push(b'\'');
    Ok(script)
}

fn write_stage(out: &mut Vec<u8>, stage: &Arc<Inner>) -> Result<(), Error> {
    if stage.state() != State::Pending {
        return Err(invalid_state(
            "a command cannot be serialized to a shell script after it was started",
        ));
    }

    for (index, arg) in stage.argv.iter().enumerate() {
        if index > 0 {
            out.push(b' ');
        }
        write_arg(out, arg.as_bytes());
    }

    // Stdin redirection.
    match stage.stdin.lock().unwrap().as_ref() {
        None | Some(StdinKind::Inherit) | Some(StdinKind::Upstream(_)) => {}
        Some(StdinKind::Null) => {
            out.extend_from_slice(b" < ");
            write_arg(out, crate::stdio::DEV_NULL.as_bytes());
        }
        Some(StdinKind::File(path)) => {
            out.extend_from_slice(b" < ");
            write_arg(out, path.as_os_str().as_bytes());
        }
        Some(StdinKind::Bytes(_)) | Some(StdinKind::Producer(_)) => {
            return Err(invalid_operation(
                "buffer and producer input is not supported for serialization to a shell script",
            ));
        }
    }

    // Stdout redirection.
    match &*stage.stdout.lock().unwrap() {
        OutTarget::Capture | OutTarget::ToStdout | OutTarget::Downstream(_) => {}
        OutTarget::ToStderr => out.extend_from_slice(b" >&2"),
        OutTarget::File { path, append } => {
            out.extend_from_slice(if *append { b" >> " } else { b" > " });
            write_arg(out, path.as_os_str().as_bytes());
        }
        OutTarget::Iterator => {
            return Err(invalid_operation(
                "an iterated process cannot be serialized to a shell script",
            ));
        }
    }

    // Stderr redirection.
    match &*stage.stderr.lock().unwrap() {
        OutTarget::Capture | OutTarget::ToStderr => {}
        OutTarget::ToStdout => out.extend_from_slice(b" 2>&1"),
        OutTarget::File { path, append } => {
            out.extend_from_slice(if *append { b" 2>> " } else { b" 2> " });
            write_arg(out, path.as_os_str().as_bytes());
        }
        OutTarget::Downstream(_) | OutTarget::Iterator => {
            unreachable!("stderr cannot be piped")
        }
    }

    Ok(())
}

/// Exits with a stage's own status when it is outside that stage's OK set,
/// else with the tail's status.
fn write_pipestatus_epilogue(out: &mut Vec<u8>, stage_ok_statuses: &[Vec<i32>]) {
    out.extend_from_slice(b"; statuses=(${PIPESTATUS[@]});");

    let mut buffer = itoa::Buffer::new();
    for (index, ok_statuses) in stage_ok_statuses.iter().enumerate() {
        let index_text = itoa::Buffer::new().format(index).to_string();
        if index == stage_ok_statuses.len() - 1 {
            out.extend_from_slice(b" exit ${statuses[");
            out.extend_from_slice(index_text.as_bytes());
            out.extend_from_slice(b"]};");
        } else {
            out.extend_from_slice(b" case ${statuses[");
            out.extend_from_slice(index_text.as_bytes());
            out.extend_from_slice(b"]} in");
            if !ok_statuses.is_empty() {
                out.push(b' ');
                for (status_index, status) in ok_statuses.iter().enumerate() {
                    if status_index > 0 {
                        out.push(b'|');
                    }
                    out.extend_from_slice(buffer.format(*status).as_bytes());
                }
                out.extend_from_slice(b");;");
            }
            out.extend_from_slice(b" *) exit ${statuses[");
            out.extend_from_slice(index_text.as_bytes());
            out.extend_from_slice(b"]};; esac;");
        }
    }
}

fn is_simple_arg(arg: &[u8]) -> bool {
    !arg.is_empty()
        && arg.iter().all(|&byte| {
            byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'/' | b'_' | b'.' | b':' | b'=' | b'+')
        })
}

fn write_arg(out: &mut Vec<u8>, arg: &[u8]) {
    if is_simple_arg(arg) {
        out.extend_from_slice(arg);
    } else {
        out.push(b'\'');
        out.extend_from_slice(&escape_single_quotes(arg));
        out.push(b'\'');
    }
}

/// Replaces `'` with `'"'"'`, the portable way to embed a single quote in a
/// single-quoted shell word.
fn escape_single_quotes(data: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(data.len());
    for &byte in data {
        if byte == b'\'' {
            escaped.extend_from_slice(br#"'"'"'"#);
        } else {
            escaped.push(byte);
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::cmd;

    fn script_text(process: &Process) -> String {
        String::from_utf8(script(process).unwrap()).unwrap()
    }

    #[test]
    fn simple_args_stay_bare() {
        assert!(is_simple_arg(b"/usr/bin/grep"));
        assert!(is_simple_arg(b"--max-depth=2"));
        assert!(!is_simple_arg(b"a b"));
        assert!(!is_simple_arg(b"it's"));
        assert!(!is_simple_arg(b""));
    }

    #[test]
    fn serializes_a_single_command() {
        let process = cmd("echo").arg("test").build().unwrap();
        assert_eq!(script_text(&process), "bash -c 'echo test'");
    }

    #[test]
    fn quotes_special_arguments() {
        let process = cmd("echo").arg("a b").build().unwrap();
        assert_eq!(script_text(&process), r#"bash -c 'echo '"'"'a b'"'"''"#);
    }

    #[test]
    fn serializes_redirections() {
        use crate::stdio::{Stdin, Target};
        let process = cmd("sort")
            .stdin(Stdin::file("/tmp/in"))
            .stdout(Target::append("/tmp/out"))
            .stderr(Target::file("/tmp/err"))
            .build()
            .unwrap();
        assert_eq!(
            script_text(&process),
            "bash -c 'sort < /tmp/in >> /tmp/out 2> /tmp/err'"
        );
    }

    #[test]
    fn serializes_merges() {
        use crate::stdio::Target;
        let process = cmd("true")
            .stdout(Target::to_stderr())
            .build()
            .unwrap();
        assert_eq!(script_text(&process), "bash -c 'true >&2'");

        let process = cmd("true")
            .stdout(Target::capture())
            .stderr(Target::to_stdout())
            .build()
            .unwrap();
        assert_eq!(script_text(&process), "bash -c 'true 2>&1'");
    }

    #[test]
    fn serializes_a_pipeline_with_pipestatus() {
        let head = cmd("echo").arg("aaa").build().unwrap();
        let tail = cmd("wc").flag("l").build().unwrap();
        let tail = head | tail;
        assert_eq!(
            script_text(&tail),
            "bash -c 'echo aaa | wc -l; statuses=(${PIPESTATUS[@]}); \
             case ${statuses[0]} in 0);; *) exit ${statuses[0]};; esac; \
             exit ${statuses[1]};'"
        );
    }

    #[test]
    fn rejects_buffer_stdin() {
        use crate::stdio::Stdin;
        let process = cmd("cat").stdin(Stdin::text("data")).build().unwrap();
        assert!(matches!(
            script(&process),
            Err(Error::InvalidOperation(_))
        ));
    }
}
