//! The process builder.
//!
//! A [`Command`] collects a program name, positional arguments, rendered
//! option flags and the reserved options, and builds a pending
//! [`Process`]. Arguments end up in the child's argv as bytes: text is
//! UTF-8, integers and floats are decimal-formatted, bytes pass through.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use crate::error::{invalid_argument, Error};
use crate::process::{OnStart, Process, ProcessConfig};
use crate::shell;
use crate::stdio::{OutTarget, Stdin, Target};

/// A value convertible to a command-line argument.
pub trait IntoArg {
    fn into_arg(self) -> OsString;
}

impl IntoArg for OsString {
    fn into_arg(self) -> OsString {
        self
    }
}

impl IntoArg for &OsStr {
    fn into_arg(self) -> OsString {
        self.to_os_string()
    }
}

impl IntoArg for String {
    fn into_arg(self) -> OsString {
        self.into()
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> OsString {
        self.into()
    }
}

impl IntoArg for PathBuf {
    fn into_arg(self) -> OsString {
        self.into_os_string()
    }
}

impl IntoArg for &Path {
    fn into_arg(self) -> OsString {
        self.as_os_str().to_os_string()
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> OsString {
        OsString::from_vec(self)
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> OsString {
        OsString::from_vec(self.to_vec())
    }
}

macro_rules! integer_args {
    ($($kind:ty),*) => {
        $(
            impl IntoArg for $kind {
                fn into_arg(self) -> OsString {
                    itoa::Buffer::new().format(self).into()
                }
            }
        )*
    };
}

integer_args!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoArg for f32 {
    fn into_arg(self) -> OsString {
        format!("{}", self).into()
    }
}

impl IntoArg for f64 {
    fn into_arg(self) -> OsString {
        format!("{}", self).into()
    }
}

enum RawArg {
    Plain(OsString),
    /// A whole process, serialized to a shell script at build time.
    Process(Process),
}

/// Builds a [`Process`].
pub struct Command {
    program: OsString,
    args: Vec<RawArg>,
    env: Option<Vec<(OsString, OsString)>>,
    ok_statuses: Vec<i32>,
    iter_delimiter: Vec<u8>,
    iter_raw: bool,
    wait_for_output: bool,
    truncate_output: bool,
    shell: bool,
    stdin: Option<Stdin>,
    stdout: Option<Target>,
    stderr: Option<Target>,
    on_start: Option<OnStart>,
}

/// Builds a command for a program found by name in `PATH`.
pub fn cmd(program: impl AsRef<OsStr>) -> Command {
    Command::new(program)
}

impl Command {
    pub fn new(program: impl AsRef<OsStr>) -> Command {
        Command {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: None,
            ok_statuses: vec![0],
            iter_delimiter: b"\n".to_vec(),
            iter_raw: false,
            wait_for_output: true,
            truncate_output: false,
            shell: false,
            stdin: None,
            stdout: None,
            stderr: None,
            on_start: None,
        }
    }

    /// Appends a positional argument.
    pub fn arg(mut self, arg: impl IntoArg) -> Command {
        self.args.push(RawArg::Plain(arg.into_arg()));
        self
    }

    /// Appends several positional arguments.
    pub fn args<I>(mut self, args: I) -> Command
    where
        I: IntoIterator,
        I::Item: IntoArg,
    {
        self.args
            .extend(args.into_iter().map(|arg| RawArg::Plain(arg.into_arg())));
        self
    }

    /// Appends an option flag: `v` renders as `-v`, `no_color` as
    /// `--no-color`.
    pub fn flag(mut self, name: &str) -> Command {
        self.args.push(RawArg::Plain(render_option_name(name)));
        self
    }

    /// Appends the flag when `enabled` is true, otherwise nothing.
    pub fn flag_if(self, name: &str, enabled: bool) -> Command {
        if enabled {
            self.flag(name)
        } else {
            self
        }
    }

    /// Appends an option with a value: `opt("l", 5)` renders as `-l 5`,
    /// `opt("max_depth", 2)` as `--max-depth 2`.
    pub fn opt(mut self, name: &str, value: impl IntoArg) -> Command {
        self.args.push(RawArg::Plain(render_option_name(name)));
        self.args.push(RawArg::Plain(value.into_arg()));
        self
    }

    /// Appends a process as an argument, serialized to a shell script.
    /// Requires [`Command::shell`] to be enabled.
    pub fn arg_process(mut self, process: &Process) -> Command {
        self.args.push(RawArg::Process(process.clone()));
        self
    }

    /// Accept processes as arguments by serializing them into shell
    /// scripts.
    pub fn shell(mut self, shell: bool) -> Command {
        self.shell = shell;
        self
    }

    /// Replaces the child's entire environment. Without this the child
    /// inherits the caller's environment.
    pub fn env<I, K, V>(mut self, vars: I) -> Command
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        );
        self
    }

    /// The exit statuses treated as success. Defaults to `[0]`.
    pub fn ok_statuses(mut self, statuses: impl IntoIterator<Item = i32>) -> Command {
        self.ok_statuses = statuses.into_iter().collect();
        self
    }

    /// The delimiter used by the output iterator. Defaults to `\n`.
    pub fn iter_delimiter(mut self, delimiter: impl Into<Vec<u8>>) -> Command {
        self.iter_delimiter = delimiter.into();
        self
    }

    /// Iterate raw byte blocks instead of decoded text.
    pub fn iter_raw(mut self, raw: bool) -> Command {
        self.iter_raw = raw;
        self
    }

    pub fn stdin(mut self, stdin: Stdin) -> Command {
        self.stdin = Some(stdin);
        self
    }

    pub fn stdout(mut self, target: Target) -> Command {
        self.stdout = Some(target);
        self
    }

    pub fn stderr(mut self, target: Target) -> Command {
        self.stderr = Some(target);
        self
    }

    /// Whether to keep reading output after the child was reaped, until
    /// every output pipe hits EOF. Defaults to true. When disabled, the
    /// remaining output is drained with a bound, and abandoned output
    /// surfaces as [`Error::OutputTruncated`] unless
    /// [`Command::truncate_output`] allows it. An output iterator owns
    /// stdout, so for an iterated process this policy governs stderr only.
    pub fn wait_for_output(mut self, wait: bool) -> Command {
        self.wait_for_output = wait;
        self
    }

    /// Allow silently truncated output when not waiting for it. Defaults
    /// to false.
    pub fn truncate_output(mut self, truncate: bool) -> Command {
        self.truncate_output = truncate;
        self
    }

    /// A hook invoked with the process just before it starts.
    pub fn on_start(mut self, hook: impl FnMut(&Process) + Send + 'static) -> Command {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Validates the configuration and returns a pending [`Process`].
    pub fn build(self) -> Result<Process, Error> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        for arg in self.args {
            match arg {
                RawArg::Plain(arg) => argv.push(arg),
                RawArg::Process(process) => {
                    if !self.shell {
                        return Err(invalid_argument(
                            "process arguments require the shell mode",
                        ));
                    }
                    argv.push(OsString::from_vec(shell::script_for(process.inner())?));
                }
            }
        }

        Ok(Process::from_config(ProcessConfig {
            program: self.program,
            argv,
            env: self.env,
            ok_statuses: self.ok_statuses,
            iter_delimiter: self.iter_delimiter,
            iter_raw: self.iter_raw,
            wait_for_output: self.wait_for_output,
            truncate_output: self.truncate_output,
            stdin: self.stdin.map(|stdin| stdin.0),
            stdout: self
                .stdout
                .map(OutTarget::from_config)
                .unwrap_or(OutTarget::Capture),
            stderr: self
                .stderr
                .map(OutTarget::from_config)
                .unwrap_or(OutTarget::Capture),
            on_start: self.on_start,
        }))
    }

    /// Builds the process and executes it to completion, checking the exit
    /// status.
    pub fn run(self) -> Result<Process, Error> {
        let process = self.build()?;
        process.execute()?;
        Ok(process)
    }

    /// Builds the process and starts it without waiting.
    pub fn start(self) -> Result<Process, Error> {
        let process = self.build()?;
        process.start()?;
        Ok(process)
    }
}

fn render_option_name(name: &str) -> OsString {
    if name.chars().count() == 1 {
        format!("-{}", name).into()
    } else {
        format!("--{}", name.replace('_', "-")).into()
    }
}
