/*!
 * This crate provides shell-like process execution without a shell:
 * commands compose into pipelines with the `|` operator, I/O redirection is
 * declarative, and the library owns all of the descriptor and thread
 * bookkeeping needed to avoid deadlocks and leaks.
 *
 * # Platform support
 * POSIX only: the implementation relies on fork/exec, file-descriptor
 * inheritance control and a readiness-notification facility.
 *
 * # Example
 * ```no_run
 * use chute::cmd;
 *
 * # fn main() -> Result<(), chute::Error> {
 * let pipeline = cmd("cat").arg("access.log").build()?
 *     | cmd("grep").arg("GET").build()?
 *     | cmd("wc").flag("l").build()?;
 * pipeline.execute()?;
 * println!("{}", pipeline.stdout()?.trim());
 * # Ok(())
 * # }
 * ```
 */

mod comm;
mod command;
mod error;
mod fd;
mod iter;
mod pipe;
mod poll;
mod process;
mod shell;
mod spawn;
mod stdio;
mod util;

pub use crate::command::{cmd, Command, IntoArg};
pub use crate::error::Error;
pub use crate::iter::{OutputChunk, OutputIterator};
pub use crate::process::{OnStart, Process};
pub use crate::shell::script;
pub use crate::stdio::{Stdin, Target};

/// Signals deliverable to a process, re-exported for `kill` and
/// `wait_kill`.
pub use nix::sys::signal::Signal;

pub type Result<T, E = Error> = std::result::Result<T, E>;
