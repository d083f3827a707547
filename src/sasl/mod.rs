//! The pluggable SASL layer: a stepwise challenge/response mechanism
//! exposed to the engine as a single `step` operation, with a base64
//! envelope on the wire.
//!
//! `MechanismKind` is the capability-set shape called for by the crate's
//! design notes: tagged variants for the two built-in mechanisms, plus a
//! single polymorphic slot (`Custom`) for a host-supplied one. The engine's
//! command loop (in `connection.rs`) only ever calls `step`.

mod login;
mod plain;

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::backend::Backend;
use crate::error::AuthError;
use crate::io_util::IdleTimer;
use crate::reply::write_reply;
use tokio::io::{AsyncBufRead, AsyncWrite};

/// The result of one `step` call.
#[derive(Debug)]
pub enum SaslStep<U> {
    /// The mechanism needs more input from the client; send this (possibly
    /// empty) challenge and read the next response line.
    Challenge(Vec<u8>),
    /// The mechanism is satisfied and has logged the user in.
    Done(U),
}

/// A single mechanism's challenge/response state machine.
///
/// `step` is called once per exchange round. The first call's `response` is
/// the (already base64-decoded) initial response from the `AUTH` command
/// line, or `None` if the client didn't send one.
#[async_trait]
pub trait SaslMechanism<B: Backend>: Send {
    async fn step(
        &mut self,
        backend: &B,
        response: Option<&[u8]>,
    ) -> Result<SaslStep<B::User>, AuthError>;
}

/// A mechanism factory: either a built-in (`Plain`, `Login`) or a
/// host-supplied polymorphic mechanism.
pub enum MechanismKind<B: Backend> {
    Plain,
    Login,
    Custom(Arc<dyn Fn() -> Box<dyn SaslMechanism<B>> + Send + Sync>),
}

impl<B: Backend> MechanismKind<B> {
    pub(crate) fn instantiate(&self) -> Box<dyn SaslMechanism<B>> {
        match self {
            MechanismKind::Plain => Box::new(self::plain::PlainMechanism::default()),
            MechanismKind::Login => Box::new(self::login::LoginMechanism::default()),
            MechanismKind::Custom(factory) => factory(),
        }
    }
}

/// The outcome of running the `AUTH` sub-loop to completion.
pub(crate) enum SaslOutcome<U> {
    /// The mechanism logged the user in; the engine should reply `235` and
    /// open an envelope.
    Authenticated(U),
    /// The exchange ended without authenticating (an error reply was
    /// already sent, or the spec's documented silent-failure path was
    /// taken). The command loop simply continues.
    Aborted,
    /// The transport closed mid-exchange; the connection must close.
    ConnectionClosed,
}

/// The longest an `AUTH` continuation line may be before the engine gives
/// up on it as a hostile client.
const MAX_AUTH_LINE_BYTES: usize = 16 * 1024;

/// Runs the `AUTH` sub-loop described in the engine's SASL design: decode
/// the optional initial response, then repeatedly step the mechanism,
/// sending `334` challenges and reading base64-encoded responses until the
/// mechanism is done or errors.
pub(crate) async fn run_auth_exchange<B, S>(
    backend: &B,
    mechanism: &mut dyn SaslMechanism<B>,
    stream: &mut S,
    idle: &IdleTimer,
    initial_response_b64: Option<&str>,
) -> SaslOutcome<B::User>
where
    B: Backend,
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let mut pending_response: Option<Vec<u8>> = match initial_response_b64 {
        None => None,
        Some(encoded) => match BASE64.decode(encoded) {
            Ok(bytes) => Some(bytes),
            // Spec-documented anomaly: a bad initial response silently
            // terminates AUTH with no reply at all.
            Err(_) => return SaslOutcome::Aborted,
        },
    };

    loop {
        let step = mechanism.step(backend, pending_response.as_deref()).await;
        match step {
            Err(auth_err) => {
                let _ = write_reply(stream, idle, 454, &[&auth_err.0]).await;
                return SaslOutcome::Aborted;
            }
            Ok(SaslStep::Done(user)) => return SaslOutcome::Authenticated(user),
            Ok(SaslStep::Challenge(challenge)) => {
                let encoded = BASE64.encode(challenge);
                if write_reply(stream, idle, 334, &[&encoded]).await.is_err() {
                    return SaslOutcome::ConnectionClosed;
                }

                let line = match idle
                    .guard(crate::io_util::read_line_bounded(stream, MAX_AUTH_LINE_BYTES))
                    .await
                {
                    Ok(Some(line)) => line,
                    Ok(None) | Err(_) => return SaslOutcome::ConnectionClosed,
                };
                let line = trim_crlf(&line);

                pending_response = match BASE64.decode(line) {
                    Ok(bytes) => Some(bytes),
                    Err(_) => {
                        let _ = write_reply(stream, idle, 454, &["Invalid base64 response"]).await;
                        return SaslOutcome::Aborted;
                    }
                };
            }
        }
    }
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))
        .unwrap_or(line)
}
