//! PostGuard mail errors.

use core::{array::TryFromSliceError, num::TryFromIntError};
use futures::io::Error as FuturesIOError;

/// A precondition that was not met when starting an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Another message is being decrypted.
    ConcurrentDecryption,
    /// The message is not in an inbox-like folder.
    WrongFolder,
    /// Zero or more than one message is selected.
    AmbiguousSelection,
    /// The selection happened too close to a folder change or window focus.
    NotDeliberate,
    /// There is nobody to seal for.
    NoRecipients,
    /// No compose session is known for this tab.
    UnknownTab,
    /// Encryption is toggled off for this compose session.
    EncryptionDisabled,
}

/// Why key acquisition failed, as reported to callers of the key state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Nothing usable in the cache.
    CacheMiss,
    /// The artifact or session expired.
    Expired,
    /// The user dismissed the session.
    SessionCancelled,
    /// The server rejected the proof.
    ServerRejected,
    /// The server could not be reached.
    NetworkError,
}

impl FailureReason {
    /// The kebab-case name of this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheMiss => "cache-miss",
            Self::Expired => "expired",
            Self::SessionCancelled => "session-cancelled",
            Self::ServerRejected => "server-rejected",
            Self::NetworkError => "network-error",
        }
    }
}

/// A PostGuard mail error.
#[derive(Debug)]
pub enum Error {
    /// The relay was cancelled before it was finalized.
    RelayCancelled,
    /// The bytestream does not start with the expected prelude.
    NotPostGuard,
    /// The wrong version specifier was found in the header.
    IncorrectVersion {
        /// The expected version specifier.
        expected: u16,
        /// The found version specifier.
        found: u16,
    },
    /// Serde JSON error.
    Json(serde_json::Error),
    /// Bincode serialization/deserialization error.
    Bincode(bincode::Error),
    /// The recipient identifier was not found in the policies.
    UnknownIdentifier(String),
    /// Constraint violation.
    ConstraintViolation,
    /// Format violation.
    FormatViolation(String),
    /// Opaque symmetric encryption error.
    Symmetric,
    /// Opaque key encapsulation error.
    KEM,
    /// Opaque asynchronous IO error from the futures crate.
    FuturesIO(FuturesIOError),
    /// No usable artifact was cached and interactive sessions are disabled.
    CacheMiss,
    /// The user dismissed the authorization session.
    SessionCancelled,
    /// The authorization artifact or session expired.
    SessionExpired,
    /// The server rejected the authorization.
    AuthorizationRejected,
    /// An operation was started while its preconditions did not hold.
    PreconditionViolation(Precondition),
    /// The authorization server could not be reached.
    Network(String),
    /// An operation did not finish in time.
    Timeout(&'static str),
}

impl Error {
    /// Whether this error was raised by the crypto engine.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Self::NotPostGuard
                | Self::IncorrectVersion { .. }
                | Self::Bincode(_)
                | Self::UnknownIdentifier(_)
                | Self::ConstraintViolation
                | Self::FormatViolation(_)
                | Self::Symmetric
                | Self::KEM
        )
    }

    /// The key acquisition failure reason, if this error is one.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::CacheMiss => Some(FailureReason::CacheMiss),
            Self::SessionCancelled => Some(FailureReason::SessionCancelled),
            Self::SessionExpired | Self::Timeout(_) => Some(FailureReason::Expired),
            Self::AuthorizationRejected => Some(FailureReason::ServerRejected),
            Self::Network(_) => Some(FailureReason::NetworkError),
            _ => None,
        }
    }

    /// Converts this error into a user-visible notice.
    ///
    /// Failures of automatically started operations are never shown, neither is a
    /// dismissed session: closing the popup is not an error.
    pub fn notice(&self, trigger: Trigger) -> Option<Notice> {
        if trigger == Trigger::Automatic || matches!(self, Self::SessionCancelled) {
            return None;
        }

        Some(Notice {
            message: self.to_string(),
            dismissible: true,
        })
    }
}

/// What started an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Started as a side effect, e.g. a message being displayed.
    Automatic,
    /// Started explicitly by the user.
    User,
}

/// A message for the user, shown as a banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// The text of the banner.
    pub message: String,
    /// Whether the banner can be dismissed.
    pub dismissible: bool,
}

impl core::fmt::Display for Precondition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ConcurrentDecryption => write!(f, "another message is being decrypted"),
            Self::WrongFolder => write!(f, "message is not in an inbox"),
            Self::AmbiguousSelection => write!(f, "not exactly one message selected"),
            Self::NotDeliberate => write!(f, "message was not deliberately selected"),
            Self::NoRecipients => write!(f, "no recipients"),
            Self::UnknownTab => write!(f, "no compose session for this tab"),
            Self::EncryptionDisabled => write!(f, "encryption is disabled"),
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::RelayCancelled => write!(f, "relay cancelled"),
            Self::NotPostGuard => {
                write!(f, "the bytestream does not start with the expected prelude")
            }
            Self::IncorrectVersion { expected, found } => {
                write!(f, "wrong version, expected: {expected}, found: {found}")
            }
            Self::Json(e) => write!(f, "JSON error: {e}"),
            Self::Bincode(e) => write!(f, "Bincode error: {e}"),
            Self::UnknownIdentifier(ident) => write!(f, "recipient unknown: {ident}"),
            Self::ConstraintViolation => write!(f, "constraint violation"),
            Self::FormatViolation(s) => write!(f, "{s} not (correctly) found in format"),
            Self::Symmetric => write!(f, "symmetric encryption operation error"),
            Self::KEM => write!(f, "KEM error"),
            Self::FuturesIO(e) => write!(f, "futures IO error: {e}"),
            Self::CacheMiss => write!(f, "no cached authorization"),
            Self::SessionCancelled => write!(f, "session cancelled"),
            Self::SessionExpired => write!(f, "session expired"),
            Self::AuthorizationRejected => write!(f, "authorization rejected by the server"),
            Self::PreconditionViolation(p) => write!(f, "precondition violated: {p}"),
            Self::Network(s) => write!(f, "network error: {s}"),
            Self::Timeout(what) => write!(f, "timeout exceeded: {what}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::Bincode(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<FuturesIOError> for Error {
    fn from(e: FuturesIOError) -> Self {
        // Relays surface a cancellation through the IO traits, unwrap it again.
        match e.get_ref().and_then(|inner| inner.downcast_ref::<Error>()) {
            Some(Error::RelayCancelled) => Self::RelayCancelled,
            _ => Self::FuturesIO(e),
        }
    }
}

impl From<aead::Error> for Error {
    fn from(_: aead::Error) -> Self {
        Self::Symmetric
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Self {
        Self::ConstraintViolation
    }
}

impl From<TryFromSliceError> for Error {
    fn from(_: TryFromSliceError) -> Self {
        Self::ConstraintViolation
    }
}

impl From<Precondition> for Error {
    fn from(p: Precondition) -> Self {
        Self::PreconditionViolation(p)
    }
}
