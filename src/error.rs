//! The crate's structured error type.
//!
//! The teacher's application binary collapses everything into `anyhow::Error`,
//! which is the right choice for a top-level `main`, but a library needs an
//! error type callers can match on. This enum covers every error kind listed
//! in the engine's error handling design: transport I/O, idle timeouts,
//! protocol-level syntax/sequence errors, authentication, SASL transport
//! errors, TLS handshake failure, size-policy violations, backend delivery
//! failures, and the unknown-command threshold.

use std::fmt;

/// Errors that can terminate a connection or a single protocol operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying transport failed to read or write.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write exceeded the configured idle deadline.
    #[error("idle timeout")]
    Timeout,

    /// A command's arguments did not parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A command was sent out of the order the state machine requires.
    #[error("bad sequence of commands")]
    Sequence,

    /// The client exceeded the unrecognized-command threshold.
    #[error("too many unrecognized commands")]
    TooManyUnknownCommands,

    /// A SASL mechanism rejected credentials or failed internally.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The DATA body exceeded `max_message_bytes`.
    #[error("message exceeds the configured size limit")]
    SizeExceeded,

    /// The transport closed before the DATA terminator was seen.
    #[error("connection closed before end of message data")]
    UnexpectedEof,

    /// The TLS handshake failed during STARTTLS.
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    /// The backend rejected delivery of a completed message.
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// The outcome of a failed `Backend::login` call.
///
/// Carries an explanatory reason only; the SASL sub-loop always reports this
/// back to the client as a `454` per the engine's AUTH error policy.
#[derive(Debug, Clone)]
pub struct AuthError(pub String);

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The outcome of a failed `User::send` call.
///
/// A delivery error may carry a specific SMTP `code`/`text` pair that the
/// engine reports verbatim; otherwise the engine falls back to a generic
/// `554`.
#[derive(Debug, Clone)]
pub struct DeliveryError {
    pub code: Option<u16>,
    pub text: String,
}

impl DeliveryError {
    /// A delivery failure with no opinion on the SMTP code; the engine will
    /// report `554 <text>`.
    pub fn generic(text: impl Into<String>) -> Self {
        Self {
            code: None,
            text: text.into(),
        }
    }

    /// A delivery failure that dictates its own SMTP reply code.
    pub fn with_code(code: u16, text: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            text: text.into(),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.text),
            None => write!(f, "{}", self.text),
        }
    }
}

impl std::error::Error for DeliveryError {}

pub type Result<T> = std::result::Result<T, Error>;
