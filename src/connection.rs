//! The protocol state machine: reads commands, enforces ordering, drives
//! `AUTH` and `STARTTLS`, and hands completed envelopes to the backend.
//!
//! There is no explicit state enum. As spec'd, the connection's state is a
//! conceptual label over four pieces of data — `helo_domain`, `user`,
//! `envelope.from`, `envelope.to.len()` — so the dispatch table below reads
//! those fields directly rather than matching on a `GREET_SENT` /
//! `WAIT_RCPT` / ... tag.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::io::BufStream;

use crate::backend::{Backend, Message, User};
use crate::command::{self, Verb};
use crate::config::ServerConfig;
use crate::data::DataReader;
use crate::error::{DeliveryError, Result};
use crate::io_util::{read_line_bounded, IdleTimer};
use crate::reply::write_reply;
use crate::sasl::{run_auth_exchange, SaslOutcome};
use crate::transport::{BoxedStream, Tee};

/// The longest a single command line may be before it is treated as
/// hostile input and the connection is closed.
const MAX_COMMAND_LINE_BYTES: usize = 8 * 1024;

/// The in-progress envelope, present once a user has authenticated.
#[derive(Default)]
struct Envelope {
    from: Option<String>,
    to: Vec<String>,
}

/// A single accepted connection, driving the command loop to completion.
pub struct Connection<B: Backend> {
    config: Arc<ServerConfig<B>>,
    stream: BufStream<BoxedStream>,
    idle: IdleTimer,
    peer_addr: Option<SocketAddr>,
    is_tls: bool,
    helo_domain: Option<String>,
    user: Option<B::User>,
    envelope: Option<Envelope>,
    unknown_cmd_count: u32,
}

impl<B: Backend> Connection<B> {
    /// Builds a connection over an already-accepted transport. `peer_addr`
    /// is used only for log correlation.
    pub fn new(config: Arc<ServerConfig<B>>, transport: BoxedStream, peer_addr: Option<SocketAddr>) -> Self {
        let idle = IdleTimer::new(config.idle_timeout);
        let transport: BoxedStream = match config.debug_sink.clone() {
            Some(sink) => Box::new(Tee::new(transport, sink)),
            None => transport,
        };
        Self {
            config,
            stream: BufStream::new(transport),
            idle,
            peer_addr,
            is_tls: false,
            helo_domain: None,
            user: None,
            envelope: None,
            unknown_cmd_count: 0,
        }
    }

    /// Runs the greeting and command loop to completion. Returns once the
    /// client sends `QUIT`, the transport closes, or an unrecoverable error
    /// occurs.
    pub async fn serve(mut self) -> Result<()> {
        trace!("connection from {:?}: sending greeting", self.peer_addr);
        self.reply(220, &[&format!("{} ESMTP Service Ready", self.config.hostname)])
            .await?;

        loop {
            let Some(raw) = self.read_command_line().await? else {
                debug!("connection from {:?}: transport closed", self.peer_addr);
                break;
            };
            let line = strip_crlf(&raw);
            let cmd = command::parse_command_line(line);
            debug!("connection from {:?}: {:?} {:?}", self.peer_addr, cmd.verb, cmd.arg);

            if self.dispatch(cmd).await?.is_quit() {
                break;
            }
        }

        if let Some(user) = &self.user {
            user.logout().await;
        }
        Ok(())
    }

    async fn read_command_line(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .idle
            .guard(read_line_bounded(&mut self.stream, MAX_COMMAND_LINE_BYTES))
            .await?)
    }

    async fn reply(&mut self, code: u16, lines: &[&str]) -> Result<()> {
        write_reply(&mut self.stream, &self.idle, code, lines).await?;
        Ok(())
    }

    async fn dispatch(&mut self, cmd: command::CommandLine) -> Result<Outcome> {
        match cmd.verb {
            Verb::Helo => self.handle_helo(&cmd.arg).await,
            Verb::Ehlo => self.handle_ehlo(&cmd.arg).await,
            Verb::Mail => self.handle_mail(&cmd.arg).await,
            Verb::Rcpt => self.handle_rcpt(&cmd.arg).await,
            Verb::Data => self.handle_data(&cmd.arg).await,
            Verb::Rset => self.handle_rset().await,
            Verb::Noop => {
                self.reply(250, &["Ok"]).await?;
                Ok(Outcome::Continue)
            }
            Verb::Vrfy => {
                self.reply(252, &["Cannot verify user, but will accept message"]).await?;
                Ok(Outcome::Continue)
            }
            Verb::Quit => {
                self.reply(221, &[&format!("{} closing connection", self.config.hostname)])
                    .await?;
                Ok(Outcome::Quit)
            }
            Verb::Auth => self.handle_auth(&cmd.arg).await,
            Verb::StartTls => self.handle_starttls().await,
            Verb::NotImplemented => {
                self.reply(502, &["Command not implemented"]).await?;
                Ok(Outcome::Continue)
            }
            Verb::Empty => {
                self.reply(500, &["Speak up"]).await?;
                Ok(Outcome::Continue)
            }
            Verb::Unknown => self.handle_unknown().await,
        }
    }

    async fn handle_helo(&mut self, arg: &str) -> Result<Outcome> {
        match command::parse_domain_arg(arg) {
            None => {
                self.reply(501, &["Syntax: HELO <domain>"]).await?;
            }
            Some(domain) => {
                self.helo_domain = Some(domain.clone());
                self.reply(250, &[&format!("Hello {domain}")]).await?;
            }
        }
        Ok(Outcome::Continue)
    }

    async fn handle_ehlo(&mut self, arg: &str) -> Result<Outcome> {
        match command::parse_domain_arg(arg) {
            None => {
                self.reply(501, &["Syntax: EHLO <domain>"]).await?;
            }
            Some(domain) => {
                self.helo_domain = Some(domain.clone());
                let mut lines = vec![format!("Hello {domain}")];
                lines.extend(self.config.extra_caps.iter().cloned());
                if self.config.tls.is_some() && !self.is_tls {
                    lines.push("STARTTLS".to_string());
                }
                if (self.is_tls || self.config.allow_insecure_auth) && !self.config.auth_mechanisms.is_empty() {
                    let mut names: Vec<&str> =
                        self.config.auth_mechanisms.keys().map(String::as_str).collect();
                    names.sort_unstable();
                    lines.push(format!("AUTH {}", names.join(" ")));
                }
                if let Some(max) = self.config.max_message_bytes {
                    lines.push(format!("SIZE {max}"));
                }
                let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
                self.reply(250, &refs).await?;
            }
        }
        Ok(Outcome::Continue)
    }

    async fn handle_mail(&mut self, arg: &str) -> Result<Outcome> {
        if self.helo_domain.is_none() || self.user.is_none() {
            self.reply(502, &["Bad sequence of commands"]).await?;
            return Ok(Outcome::Continue);
        }

        let Some(parsed) = command::parse_mail_from(arg) else {
            self.reply(501, &["Syntax error in MAIL FROM parameters"]).await?;
            return Ok(Outcome::Continue);
        };

        if let Some(size_param) = parsed.params.get("SIZE") {
            // Already validated as a u32 by the parser; re-parse for the
            // comparison against the configured cap.
            let requested: usize = size_param.parse().unwrap_or(usize::MAX);
            if let Some(max) = self.config.max_message_bytes {
                if requested > max {
                    self.reply(552, &["Max message size exceeded"]).await?;
                    return Ok(Outcome::Continue);
                }
            }
        }

        let envelope = self.envelope.get_or_insert_with(Envelope::default);
        envelope.from = Some(parsed.address);
        self.reply(250, &["Ok"]).await?;
        Ok(Outcome::Continue)
    }

    async fn handle_rcpt(&mut self, arg: &str) -> Result<Outcome> {
        let has_from = self.envelope.as_ref().is_some_and(|e| e.from.is_some());
        if !has_from {
            self.reply(502, &["Bad sequence of commands"]).await?;
            return Ok(Outcome::Continue);
        }

        let Some(address) = command::parse_rcpt_to(arg) else {
            self.reply(501, &["Syntax error in RCPT TO parameters"]).await?;
            return Ok(Outcome::Continue);
        };

        let envelope = self.envelope.as_mut().expect("checked above");
        if let Some(max) = self.config.max_recipients {
            if envelope.to.len() >= max {
                self.reply(552, &["Too many recipients"]).await?;
                return Ok(Outcome::Continue);
            }
        }
        envelope.to.push(address);
        self.reply(250, &["Ok"]).await?;
        Ok(Outcome::Continue)
    }

    async fn handle_data(&mut self, arg: &str) -> Result<Outcome> {
        if !arg.is_empty() {
            self.reply(501, &["Syntax: DATA"]).await?;
            return Ok(Outcome::Continue);
        }

        let has_rcpt = self.envelope.as_ref().is_some_and(|e| !e.to.is_empty());
        if !has_rcpt {
            self.reply(502, &["Bad sequence of commands"]).await?;
            return Ok(Outcome::Continue);
        }

        self.reply(354, &["Start mail input; end with <CRLF>.<CRLF>"]).await?;

        let envelope = self.envelope.take().expect("checked above");
        let from = envelope.from.expect("MAIL always precedes RCPT");
        let to = envelope.to;

        let data_reader = DataReader::new(&mut self.stream, self.config.max_message_bytes);
        let message = Message {
            from,
            to,
            data: data_reader,
        };

        let user = self.user.as_ref().expect("DATA requires an authenticated user");
        let delivery = user.send(message).await;

        // The backend's handle into the body may not have read every byte;
        // drain whatever's left so the next command line starts cleanly.
        // `message` was moved into `send`, so re-borrow a fresh reader over
        // the same stream to finish the drain. The size cap already did its
        // job on the backend's reader; this one just hunts the terminator.
        let mut trailing = DataReader::new(&mut self.stream, None);
        let _ = trailing.drain().await;

        match delivery {
            Ok(()) => {
                self.reply(250, &["Ok: queued"]).await?;
            }
            Err(DeliveryError { code: Some(code), text }) => {
                self.reply(code, &[&text]).await?;
            }
            Err(DeliveryError { code: None, text }) => {
                self.reply(554, &[&text]).await?;
            }
        }

        Ok(Outcome::Continue)
    }

    async fn handle_rset(&mut self) -> Result<Outcome> {
        self.reset_transaction().await;
        self.reply(250, &["Ok"]).await?;
        Ok(Outcome::Continue)
    }

    async fn reset_transaction(&mut self) {
        self.helo_domain = None;
        if let Some(user) = self.user.take() {
            user.logout().await;
        }
        self.envelope = None;
    }

    async fn handle_auth(&mut self, arg: &str) -> Result<Outcome> {
        if self.helo_domain.is_none() {
            self.reply(502, &["Bad sequence of commands"]).await?;
            return Ok(Outcome::Continue);
        }
        if !(self.is_tls || self.config.allow_insecure_auth) {
            self.reply(502, &["AUTH not available without TLS"]).await?;
            return Ok(Outcome::Continue);
        }
        if self.envelope.is_some() {
            self.reply(502, &["Already authenticated"]).await?;
            return Ok(Outcome::Continue);
        }

        let Some((mechanism_name, initial_response)) = command::parse_auth_arg(arg) else {
            self.reply(501, &["Syntax: AUTH <mechanism> [initial-response]"]).await?;
            return Ok(Outcome::Continue);
        };

        let Some(kind) = self.config.auth_mechanisms.get(&mechanism_name) else {
            self.reply(504, &["Unrecognized authentication mechanism"]).await?;
            return Ok(Outcome::Continue);
        };

        let mut mechanism = kind.instantiate();
        let outcome = run_auth_exchange(
            self.config.backend.as_ref(),
            mechanism.as_mut(),
            &mut self.stream,
            &self.idle,
            initial_response.as_deref(),
        )
        .await;

        match outcome {
            SaslOutcome::Authenticated(user) => {
                self.user = Some(user);
                self.envelope = Some(Envelope::default());
                self.reply(235, &["Authentication succeeded"]).await?;
            }
            SaslOutcome::Aborted => {}
            SaslOutcome::ConnectionClosed => return Ok(Outcome::Quit),
        }

        Ok(Outcome::Continue)
    }

    async fn handle_starttls(&mut self) -> Result<Outcome> {
        let Some(tls) = self.config.tls.clone() else {
            self.reply(502, &["TLS not available"]).await?;
            return Ok(Outcome::Continue);
        };
        if self.is_tls {
            self.reply(502, &["Already running under TLS"]).await?;
            return Ok(Outcome::Continue);
        }

        self.reply(220, &["Ready to start TLS"]).await?;

        // RFC 3207 forbids pipelining past STARTTLS; a client that ignores
        // this and sends plaintext bytes immediately after has its buffered
        // command discarded along with the rest of the old BufStream.
        let placeholder: BoxedStream = Box::new(tokio::io::join(tokio::io::empty(), tokio::io::sink()));
        let plaintext = std::mem::replace(&mut self.stream, BufStream::new(placeholder));
        let raw = plaintext.into_inner();

        match tls.upgrade(raw).await {
            Ok(encrypted) => {
                self.stream = BufStream::new(encrypted);
                self.is_tls = true;
                self.reset_transaction().await;
                Ok(Outcome::Continue)
            }
            Err(e) => {
                // Spec calls for a `550` reply here, but `TlsAcceptor::accept`
                // consumes `raw` and drops it along with the failed handshake
                // on error, leaving no transport left to write to. Acknowledged
                // deviation — see DESIGN.md.
                warn!("connection from {:?}: TLS handshake failed: {e}", self.peer_addr);
                Ok(Outcome::Quit)
            }
        }
    }

    async fn handle_unknown(&mut self) -> Result<Outcome> {
        if self.unknown_cmd_count > self.config.max_unknown_commands {
            self.reply(500, &["Too many unrecognized commands"]).await?;
            return Ok(Outcome::Quit);
        }
        self.unknown_cmd_count += 1;
        self.reply(500, &["Command not recognized"]).await?;
        Ok(Outcome::Continue)
    }
}

enum Outcome {
    Continue,
    Quit,
}

impl Outcome {
    fn is_quit(&self) -> bool {
        matches!(self, Outcome::Quit)
    }
}

fn strip_crlf(raw: &[u8]) -> &str {
    let trimmed = raw
        .strip_suffix(b"\r\n")
        .or_else(|| raw.strip_suffix(b"\n"))
        .unwrap_or(raw);
    std::str::from_utf8(trimmed).unwrap_or("")
}
