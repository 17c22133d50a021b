pub mod api;
pub mod hints;
pub mod ledger;
pub mod model;
pub mod schedulers;
pub mod snapshot;
pub mod store;
pub mod timing;

use miette::Diagnostic;
use strum_macros::Display;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Io Error: {description}, {source}")]
    Io {
        description: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    #[diagnostic(transparent)]
    Library(#[from] LibraryError),
}

// Note that `LibraryError` is `Clone` while `Error` is not.
#[derive(Clone, Debug, Diagnostic, Error)]
pub enum LibraryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreErrorKind),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerErrorKind),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Snapshot(#[from] SnapshotErrorKind),
    #[error("{0}")]
    InvalidConfig(String),
}

impl From<StoreErrorKind> for Error {
    fn from(kind: StoreErrorKind) -> Self {
        Error::Library(LibraryError::Store(kind))
    }
}

impl From<SchedulerErrorKind> for Error {
    fn from(kind: SchedulerErrorKind) -> Self {
        Error::Library(LibraryError::Scheduler(kind))
    }
}

impl From<SnapshotErrorKind> for Error {
    fn from(kind: SnapshotErrorKind) -> Self {
        Error::Library(LibraryError::Snapshot(kind))
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Card,
    Note,
    Model,
    Deck,
    DeckConfig,
}

#[derive(Clone, Debug, Diagnostic, Error)]
pub enum StoreErrorKind {
    #[error("No {entity} with id `{id}` was found.")]
    NotFound { entity: EntityKind, id: i64 },
    #[error("A deck named `{0}` already exists.")]
    DuplicateDeckName(String),
    #[error("The default deck cannot be removed.")]
    DefaultDeckProtected,
    #[error("{description}")]
    InvariantViolation {
        description: String,
        #[help]
        advice: Option<String>,
    },
}

#[derive(Clone, Debug, Diagnostic, Error)]
pub enum SchedulerErrorKind {
    #[error("Invalid grade. Received `{0}`.")]
    InvalidGrade(u32),
    #[error("Card `{card_id}` has type `{ctype}` but queue `{queue}`.")]
    InvalidState {
        card_id: i64,
        ctype: String,
        queue: String,
    },
    #[error("Card is already buried.")]
    AlreadyBuried,
    #[error("Cannot bury a suspended card.")]
    Suspended,
    #[error("Cannot answer a card in queue `{queue}`.")]
    NotAnswerable { queue: String },
}

#[derive(Clone, Debug, Diagnostic, Error)]
pub enum SnapshotErrorKind {
    #[error("Unsupported snapshot schema version `{found}`. Expected `{expected}`.")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("Failed to parse snapshot: {description}")]
    Parse { description: String },
}
