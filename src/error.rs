//! Crate-wide error kind, shared by every component so callers see one exit contract
//! regardless of which layer (pager, btree, writer, executor) raised it.

/// One of the error kinds enumerated in the external interface contract.
///
/// Components raise their own `thiserror` enums internally (see [`crate::pager`],
/// [`crate::journal`], [`crate::schema`]) and convert into this crate-wide kind at the
/// boundary so callers never need to match on a per-module error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("object disposed")]
    ObjectDisposed,
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("corrupt page: {0}")]
    CorruptPage(String),
    #[error("wrong password")]
    WrongPassword,
    #[error("password required")]
    PasswordRequired,
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<crate::pager::Error> for Error {
    fn from(e: crate::pager::Error) -> Error {
        use crate::pager::Error as P;
        match e {
            P::PageNumberBeyondLimits(n) => Error::OutOfRange(format!("page {n} is beyond the supported limit")),
            P::CorruptPage(n) => Error::CorruptPage(format!("page {n} has an unknown or corrupt page type")),
            P::Io(io) => Error::Io(io),
            P::DbHdr(e) => Error::CorruptPage(e.to_string()),
            P::TransactionAlreadyOpen => Error::InvalidOperation("a transaction is already in progress".to_string()),
            P::NoTransaction => Error::InvalidOperation("no transaction is in progress".to_string()),
            P::ReadOnly => Error::InvalidOperation("database is read-only".to_string()),
            P::WrongPassword(_) => Error::WrongPassword,
            P::PasswordRequired => Error::PasswordRequired,
            P::SizeGuardExceeded => Error::InvalidOperation("image exceeds the configured size guard".to_string()),
        }
    }
}

impl From<crate::btree::Error> for Error {
    fn from(e: crate::btree::Error) -> Error {
        match e {
            crate::btree::Error::Pager(p) => Error::from(p),
            crate::btree::Error::DuplicateKey => Error::Constraint("duplicate key".to_string()),
            crate::btree::Error::NotFound => Error::NotFound("row not found".to_string()),
            crate::btree::Error::CellTooLarge => Error::InvalidArgument("record too large to store".to_string()),
        }
    }
}

impl From<crate::schema::Error> for Error {
    fn from(e: crate::schema::Error) -> Error {
        Error::InvalidArgument(e.to_string())
    }
}

impl From<crate::typed_row::Error> for Error {
    fn from(e: crate::typed_row::Error) -> Error {
        Error::Constraint(e.to_string())
    }
}

impl From<crate::project::Error> for Error {
    fn from(e: crate::project::Error) -> Error {
        Error::InvalidArgument(e.to_string())
    }
}

impl Error {
    /// Stable name of the error kind, matching the exit contract in the external
    /// interface (useful for callers that branch on kind rather than message text).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not-found",
            Error::InvalidArgument(_) => "invalid-argument",
            Error::OutOfRange(_) => "out-of-range",
            Error::ObjectDisposed => "object-disposed",
            Error::Constraint(_) => "constraint",
            Error::CorruptPage(_) => "corrupt-page",
            Error::WrongPassword => "wrong-password",
            Error::PasswordRequired => "password-required",
            Error::InvalidOperation(_) => "invalid-operation",
            Error::Unauthorized(_) => "unauthorized",
            Error::Io(_) => "invalid-operation",
        }
    }
}
