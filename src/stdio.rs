use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::error::Error;
use crate::process::Inner;

/// The system null device, used for the default stdin redirection.
pub(crate) const DEV_NULL: &str = "/dev/null";

pub(crate) type ChunkProducer = Box<dyn Iterator<Item = Result<Vec<u8>, Error>> + Send>;

/// Where the child's stdin comes from.
pub struct Stdin(pub(crate) StdinKind);

pub(crate) enum StdinKind {
    /// Redirect from the null device.
    Null,
    /// Inherit the caller's stdin; no pipe is created.
    Inherit,
    /// Redirect from a file.
    File(PathBuf),
    /// A byte buffer fed through a pipe.
    Bytes(Vec<u8>),
    /// A lazy byte-chunk producer fed through a pipe.
    Producer(ChunkProducer),
    /// Another process whose stdout is wired directly to this stdin.
    Upstream(Arc<Inner>),
}

impl Stdin {
    pub fn null() -> Stdin {
        Stdin(StdinKind::Null)
    }

    pub fn inherit() -> Stdin {
        Stdin(StdinKind::Inherit)
    }

    pub fn file(path: impl Into<PathBuf>) -> Stdin {
        Stdin(StdinKind::File(path.into()))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Stdin {
        Stdin(StdinKind::Bytes(bytes.into()))
    }

    /// Text input; encoded as UTF-8.
    pub fn text(text: impl Into<String>) -> Stdin {
        Stdin(StdinKind::Bytes(text.into().into_bytes()))
    }

    /// A lazy producer of byte chunks. A yielded error aborts the feed and is
    /// surfaced by the next checked wait.
    pub fn producer<I>(chunks: I) -> Stdin
    where
        I: IntoIterator<Item = Result<Vec<u8>, Error>>,
        I::IntoIter: Send + 'static,
    {
        Stdin(StdinKind::Producer(Box::new(chunks.into_iter())))
    }

    /// An infallible producer of byte chunks.
    pub fn chunks<I>(chunks: I) -> Stdin
    where
        I: IntoIterator<Item = Vec<u8>>,
        I::IntoIter: Send + 'static,
    {
        Stdin(StdinKind::Producer(Box::new(chunks.into_iter().map(Ok))))
    }
}

impl fmt::Debug for StdinKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StdinKind::Null => f.write_str("Null"),
            StdinKind::Inherit => f.write_str("Inherit"),
            StdinKind::File(path) => f.debug_tuple("File").field(path).finish(),
            StdinKind::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            StdinKind::Producer(_) => f.write_str("Producer"),
            StdinKind::Upstream(_) => f.write_str("Upstream"),
        }
    }
}

/// Where the child's stdout or stderr goes.
#[derive(Debug, Clone)]
pub struct Target(pub(crate) TargetKind);

#[derive(Debug, Clone)]
pub(crate) enum TargetKind {
    Capture,
    ToStdout,
    ToStderr,
    File { path: PathBuf, append: bool },
}

impl Target {
    /// Capture into an internal buffer. The default for both streams.
    pub fn capture() -> Target {
        Target(TargetKind::Capture)
    }

    /// For stdout: inherit the caller's stdout. For stderr: redirect into
    /// the child's stdout (`2>&1`).
    pub fn to_stdout() -> Target {
        Target(TargetKind::ToStdout)
    }

    /// For stderr: inherit the caller's stderr. For stdout: redirect into
    /// the child's stderr (`>&2`).
    pub fn to_stderr() -> Target {
        Target(TargetKind::ToStderr)
    }

    /// Redirect to a file, truncating it.
    pub fn file(path: impl Into<PathBuf>) -> Target {
        Target(TargetKind::File {
            path: path.into(),
            append: false,
        })
    }

    /// Redirect to a file, appending.
    pub fn append(path: impl Into<PathBuf>) -> Target {
        Target(TargetKind::File {
            path: path.into(),
            append: true,
        })
    }
}

/// The reified output target, including the internally-assigned variants.
#[derive(Debug, Clone)]
pub(crate) enum OutTarget {
    Capture,
    ToStdout,
    ToStderr,
    File { path: PathBuf, append: bool },
    /// Stdout is wired to the next process of a pipeline.
    Downstream(Weak<Inner>),
    /// Stdout is owned by an output iterator.
    Iterator,
}

impl OutTarget {
    pub fn from_config(target: Target) -> OutTarget {
        match target.0 {
            TargetKind::Capture => OutTarget::Capture,
            TargetKind::ToStdout => OutTarget::ToStdout,
            TargetKind::ToStderr => OutTarget::ToStderr,
            TargetKind::File { path, append } => OutTarget::File { path, append },
        }
    }
}
