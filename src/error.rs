use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by index, namespace and command operations.
///
/// All of these are local, synchronous conditions reported straight to the
/// caller; nothing is retried or recovered internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Insert of a key that is already present in the index.
    #[error("an entry with this key already exists")]
    DuplicateKey,

    /// Lookup, update or removal of an absent key or name.
    #[error("entry not found")]
    NotFound,

    /// Restore of malformed persisted data.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The command dispatcher received an unrecognized verb.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    /// The command dispatcher received too few arguments for a verb.
    #[error("not enough arguments for command `{0}`")]
    MissingArguments(String),
}

impl Error {
    /// Shorthand for a [`Error::CorruptSnapshot`] with a static reason.
    pub(crate) fn corrupt(message: &str) -> Self {
        Error::CorruptSnapshot(message.to_string())
    }
}
