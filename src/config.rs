//! Server-wide configuration: policy knobs the host application sets once
//! and the engine reads for the lifetime of the listener.
//!
//! Unlike the teacher's `Config::from_env`, this is a plain struct with no
//! environment-variable loading: binding configuration to a process's
//! environment, CLI flags, or a config file is the host application's
//! concern, not this library's.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::sasl::MechanismKind;
use crate::tls::TlsConfig;
use crate::transport::DebugSink;

/// Server-wide settings the engine consults while driving a connection.
pub struct ServerConfig<B: Backend> {
    /// The domain name this server announces in its greeting and `EHLO`
    /// response.
    pub hostname: String,

    /// The delivery/authentication backend, shared read-only across every
    /// connection.
    pub backend: Arc<B>,

    /// SASL mechanisms this server advertises and accepts, keyed by their
    /// wire name (e.g. `"PLAIN"`, `"LOGIN"`).
    pub auth_mechanisms: HashMap<String, MechanismKind<B>>,

    /// TLS configuration for `STARTTLS`. `None` disables the capability
    /// entirely — the engine will not advertise or accept it.
    pub tls: Option<TlsConfig>,

    /// Whether `AUTH` may be advertised and accepted on a plaintext
    /// connection. When `false`, `AUTH` is only offered once the
    /// connection is running over TLS.
    pub allow_insecure_auth: bool,

    /// The largest `DATA` body the engine will accept, advertised via the
    /// `SIZE` capability. `None` means no limit is enforced or advertised.
    pub max_message_bytes: Option<usize>,

    /// The largest number of `RCPT TO` recipients a single envelope may
    /// carry. `None` means no limit.
    pub max_recipients: Option<usize>,

    /// How long a connection may go without a read or write completing
    /// before the engine closes it. `None` disables the idle timer.
    pub idle_timeout: Option<Duration>,

    /// How many consecutive unrecognized commands a client may send before
    /// the engine closes the connection.
    pub max_unknown_commands: u32,

    /// Additional capability lines advertised verbatim on `EHLO` (e.g.
    /// `PIPELINING`, `8BITMIME`), in order, before `STARTTLS`/`AUTH`/`SIZE`.
    pub extra_caps: Vec<String>,

    /// An optional sink that observes every byte crossing every
    /// connection's transport, for diagnostics.
    pub debug_sink: Option<Arc<dyn DebugSink>>,
}

impl<B: Backend> ServerConfig<B> {
    /// A `ServerConfig` with the engine's baseline defaults: no TLS, no
    /// message size limit, a five-minute idle timeout, and a threshold of
    /// three unrecognized commands.
    pub fn new(hostname: impl Into<String>, backend: Arc<B>) -> Self {
        Self {
            hostname: hostname.into(),
            backend,
            auth_mechanisms: HashMap::new(),
            tls: None,
            allow_insecure_auth: false,
            max_message_bytes: None,
            max_recipients: None,
            idle_timeout: Some(Duration::from_secs(5 * 60)),
            max_unknown_commands: 3,
            extra_caps: Vec::new(),
            debug_sink: None,
        }
    }

    /// Registers a mechanism under the given wire name, overwriting any
    /// existing registration with that name.
    pub fn with_mechanism(mut self, name: impl Into<String>, mechanism: MechanismKind<B>) -> Self {
        self.auth_mechanisms.insert(name.into(), mechanism);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = Some(max);
        self
    }

    pub fn with_max_recipients(mut self, max: usize) -> Self {
        self.max_recipients = Some(max);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_allow_insecure_auth(mut self, allow: bool) -> Self {
        self.allow_insecure_auth = allow;
        self
    }

    pub fn with_extra_cap(mut self, cap: impl Into<String>) -> Self {
        self.extra_caps.push(cap.into());
        self
    }

    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }
}
