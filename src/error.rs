use std::collections::BTreeMap;
use std::io;

use thiserror::Error;

/// The five-kind anomaly taxonomy shared by every layer (C8).
///
/// Every fallible operation in this crate returns `Result<T, Error>`. Callers that
/// need to react differently to different failure classes match on the variant
/// rather than inspecting message text.
#[derive(Error, Debug)]
pub enum Error {
    /// The network peer is gone, refused the connection, or a frame was truncated.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// TLS negotiation or SASL verification failed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The caller asked for something the wire protocol cannot express right now
    /// (bad parameter encoding, a call on a closed client). Wire state is untouched.
    #[error("incorrect: {0}")]
    Incorrect(String),

    /// A message, auth method, or feature this client does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Protocol desynchronization: a decode/encode bug or I/O error while mid-message.
    /// The connection that raised this is no longer usable and must be closed.
    #[error("protocol desynchronization: {0}")]
    Fault(String),

    /// A clean `ErrorResponse` from the backend. Wire state is preserved; the
    /// connection remains usable once `ReadyForQuery` is observed.
    #[error("server error {code}: {message}")]
    Server(Box<ServerError>),
}

impl Error {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn incorrect(msg: impl Into<String>) -> Self {
        Self::Incorrect(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        Self::Fault(msg.into())
    }

    /// Whether a `SqlClient` that raised this error is still usable afterwards.
    /// Per §7: `Incorrect`, `Unsupported` and `Server` leave the client usable;
    /// everything else (I/O faults, desync, auth failures) closes it.
    pub fn leaves_client_usable(&self) -> bool {
        matches!(self, Error::Incorrect(_) | Error::Unsupported(_) | Error::Server(_))
    }

    /// `true` for a server `ErrorResponse` whose SQLSTATE is `42710`
    /// (duplicate_object), used by `ignoring_dupes`.
    pub fn is_duplicate_object(&self) -> bool {
        matches!(self, Error::Server(err) if err.code == "42710")
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Unavailable(err.to_string())
    }
}

/// The field mapping from §4.3: `ErrorResponse`/`NoticeResponse` decode into this
/// structured shape instead of an opaque string, keyed by the semantic field names
/// from the PostgreSQL protocol docs (`https://www.postgresql.org/docs/current/protocol-error-fields.html`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    pub file: Option<String>,
    pub line: Option<String>,
    pub routine: Option<String>,
}

impl ServerError {
    /// Builds a `ServerError` from the raw byte-tagged field list carried by
    /// `ErrorResponse`/`NoticeResponse` (see `message::decode_fields`).
    pub fn from_fields(fields: &BTreeMap<u8, String>) -> Self {
        let get = |tag: u8| fields.get(&tag).cloned();
        ServerError {
            severity: get(b'S').or_else(|| get(b'V')).unwrap_or_default(),
            code: get(b'C').unwrap_or_default(),
            message: get(b'M').unwrap_or_default(),
            detail: get(b'D'),
            hint: get(b'H'),
            position: get(b'P'),
            schema: get(b's'),
            table: get(b't'),
            column: get(b'c'),
            data_type: get(b'd'),
            constraint: get(b'n'),
            file: get(b'F'),
            line: get(b'L'),
            routine: get(b'R'),
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.code, self.message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
