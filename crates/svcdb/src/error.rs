use rusqlite::ErrorCode;
use svcmeta::Version;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The store was closed or could not be opened.
    #[error("registry store is not open")]
    NotOpen,
    #[error("no matching service or interface")]
    NotFound,
    /// The service name or its location is already claimed in this scope.
    #[error("service `{service}` or its location is already registered")]
    LocationAlreadyRegistered { service: String },
    /// Another service already implements this interface version.
    #[error("interface `{interface}` {version} is already implemented")]
    IfaceImplAlreadyRegistered { interface: String, version: Version },
    /// Owner token mismatch, or a mutation on a read-only store.
    #[error("no write permission on the registry")]
    NoWritePermissions,
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    /// The store stayed locked longer than the busy timeout.
    #[error("timed out waiting for the registry store")]
    Timeout,
    #[error("storage failure: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => return Error::Timeout,
                ErrorCode::CannotOpen => return Error::NotOpen,
                ErrorCode::ReadOnly => return Error::NoWritePermissions,
                _ => {}
            }
        }
        Error::Storage(err.to_string())
    }
}
