//! The contract the protocol engine consumes to authenticate users and
//! deliver completed messages.
//!
//! A host application implements [`Backend`] and [`User`] and hands a
//! `Backend` into [`crate::ServerConfig`]; the engine never knows what a
//! mailbox, a queue, or a credential store actually is.

use async_trait::async_trait;

use crate::data::DataReader;
use crate::error::{AuthError, DeliveryError};
use crate::transport::BoxedStream;

/// Credentials extracted and decoded by a SASL mechanism, handed to
/// [`Backend::login`] for verification.
pub enum Credentials<'a> {
    /// `PLAIN` (RFC 4616): an authorization identity, an authentication
    /// identity, and a password.
    Plain {
        authorization_id: &'a str,
        authentication_id: &'a str,
        password: &'a str,
    },
    /// `LOGIN`: a username and a password, collected over two challenges.
    Login { username: &'a str, password: &'a str },
    /// Raw, mechanism-defined bytes, for a host-supplied custom mechanism
    /// that wants the backend to interpret its own credential format.
    Raw(&'a [u8]),
}

/// The completed envelope handed to [`User::send`] on `DATA` completion.
///
/// `data` is a lazy, finite, non-restartable byte stream: it is only valid
/// for the duration of the `send` call, and the engine discards whatever
/// the backend did not read once `send` returns.
pub struct Message<'c> {
    pub from: String,
    pub to: Vec<String>,
    pub data: DataReader<'c, tokio::io::BufStream<BoxedStream>>,
}

/// Authenticates users and hands them off once logged in.
///
/// Implementations are shared read-only state across every connection
/// (`Send + Sync + 'static`), matching the server configuration's own
/// read-only-once-serving lifetime.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// The principal produced by a successful login, and the handle the
    /// engine uses for the rest of the session (delivery, logout).
    type User: User;

    /// Verifies `credentials` for the named mechanism and returns the
    /// logged-in principal.
    async fn login(&self, mechanism: &str, credentials: Credentials<'_>) -> Result<Self::User, AuthError>;
}

/// An authenticated principal: the handle the engine uses to deliver a
/// completed message and to log out.
#[async_trait]
pub trait User: Send + Sync + 'static {
    /// Delivers a completed message envelope.
    async fn send(&self, message: Message<'_>) -> Result<(), DeliveryError>;

    /// Called on RSET, STARTTLS, and connection close.
    async fn logout(&self);
}
