//! An embeddable ESMTP server engine.
//!
//! This crate implements the RFC 5321 command/reply grammar for a single
//! connection, including `AUTH` (RFC 4954), `STARTTLS`, `PIPELINING`, and
//! `SIZE`. It does not provide an accept loop, delivery, DNS resolution, or
//! policy enforcement beyond the protocol itself — a host application
//! implements [`Backend`] and [`User`] to plug those in, builds a
//! [`ServerConfig`], and either uses [`Server`] to accept TCP connections or
//! drives [`Connection`] directly over any `AsyncRead + AsyncWrite + Send`
//! stream.
//!
//! See `demos/main.rs` in the repository for a runnable example against an
//! in-memory backend.

pub mod backend;
mod command;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
mod io_util;
mod reply;
pub mod sasl;
pub mod server;
pub mod tls;
pub mod transport;

pub use backend::{Backend, Credentials, Message, User};
pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{AuthError, DeliveryError, Error};
pub use server::Server;
pub use tls::TlsConfig;
pub use transport::{AsyncStream, BoxedStream, DebugSink};
