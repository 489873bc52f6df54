use std::io;
use std::panic::Location;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while writing or restoring a
/// snapshot.
///
/// None of these are recoverable at this layer: the caller is
/// expected to stop the run. They are returned rather than aborting
/// so every participant gets a chance to unwind instead of hanging in
/// the next collective call.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed checkpoint version marker {path}: {reason}")]
    MalformedVersion { path: PathBuf, reason: String },

    #[error("body state incompatible with checkpointed version: stored {found} components, expected {expected}")]
    BodyStateMismatch { expected: usize, found: usize },

    #[error("diagnostics file {path} holds {found} values, expected {expected}")]
    DiagnosticsLength {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("must specify at least one valid data item to plot")]
    NoPlotVariables,

    #[error("field `{0}` is absent from the checkpoint and has no antecedent field to copy")]
    NoAntecedent(String),

    #[error("malformed array data: {0}")]
    MalformedFab(String),

    #[error("malformed header {path}: {reason}")]
    MalformedHeader { path: PathBuf, reason: String },

    #[error("checkpoint does not match the field schema: {0}")]
    SchemaMismatch(String),

    #[error("collective operation failed: {0}")]
    Collective(String),

    #[error("coordinator failed: {0}")]
    Coordinator(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("({location}) {msg}\nCaused by => {source}")]
    Context {
        location: &'static Location<'static>,
        msg: String,
        #[source]
        source: Box<SnapshotError>,
    },
}

pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;

impl SnapshotError {
    /// Strip any re-raise context and return the original error.
    pub fn root_cause(&self) -> &SnapshotError {
        match self {
            SnapshotError::Context { source, .. } => source.root_cause(),
            err => err,
        }
    }
}

/// Build a closure that attaches a path to an [`io::Error`].
///
/// Example:
///     fs::read_to_string(&path).map_err(io_at(&path))?;
pub(crate) fn io_at(path: &Path) -> impl FnOnce(io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A trait to wrap an error with the caller location and a message
/// from anything that can be converted into a [`Result`].
pub(crate) trait TrackedError<T> {
    /// Only this needs to be implemented.
    fn into_result(self) -> Result<T>;

    /// Make the existing error part of the chain and add a message
    /// with the location of the call.
    ///
    /// Example:
    ///     store.write(comm, &mf, &path).reraise("error writing level data")?;
    #[track_caller]
    fn reraise(self, msg: &str) -> Result<T>
    where
        Self: Sized,
    {
        let location = Location::caller();
        self.into_result().map_err(|err| SnapshotError::Context {
            location,
            msg: msg.to_string(),
            source: Box::new(err),
        })
    }
}

impl<T> TrackedError<T> for Result<T> {
    fn into_result(self) -> Result<T> {
        self
    }
}

/// Prepend the name of the current thread to each line,
/// if present.
pub(crate) fn prepend_tname(msg: String) -> String {
    let tname = std::thread::current()
        .name()
        .unwrap_or("unnamed-thread")
        .to_string();
    msg.lines()
        .map(|line| format!("<{tname}> {line}\n"))
        .collect()
}

#[test]
fn reraise_keeps_root_cause() {
    let res: Result<()> = Err(SnapshotError::NoPlotVariables);
    let err = res.reraise("error writing plot file").unwrap_err();
    assert!(matches!(err.root_cause(), SnapshotError::NoPlotVariables));
    let msg = err.to_string();
    assert!(msg.contains("error writing plot file"));
    assert!(msg.contains("errors.rs"));
}

#[test]
fn prepend_tname_prefixes_every_line() {
    let msg = std::thread::Builder::new()
        .name("participant-3".to_string())
        .spawn(|| prepend_tname("first\nsecond".to_string()))
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(msg, "<participant-3> first\n<participant-3> second\n");
}
