//! A runnable example: an in-memory backend that accepts any `PLAIN`
//! credentials and prints delivered messages to stdout.

use std::sync::Arc;

use async_trait::async_trait;
use esmtp_engine::sasl::MechanismKind;
use esmtp_engine::{AuthError, Backend, Credentials, DeliveryError, Message, Server, ServerConfig, User};
use log::error;

struct MemoryBackend;

#[async_trait]
impl Backend for MemoryBackend {
    type User = MemoryUser;

    async fn login(&self, _mechanism: &str, credentials: Credentials<'_>) -> Result<MemoryUser, AuthError> {
        let name = match credentials {
            Credentials::Plain { authentication_id, .. } => authentication_id.to_string(),
            Credentials::Login { username, .. } => username.to_string(),
            Credentials::Raw(_) => return Err(AuthError::new("unsupported credential shape")),
        };
        Ok(MemoryUser { name })
    }
}

struct MemoryUser {
    name: String,
}

#[async_trait]
impl User for MemoryUser {
    async fn send(&self, mut message: Message<'_>) -> Result<(), DeliveryError> {
        let body = message.data.read_to_end().await?;
        println!(
            "[{}] {} -> {:?} ({} bytes)",
            self.name,
            message.from,
            message.to,
            body.len()
        );
        Ok(())
    }

    async fn logout(&self) {}
}

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let backend = Arc::new(MemoryBackend);

    let config = ServerConfig::new("mail.example.com", backend)
        .with_mechanism("PLAIN", MechanismKind::Plain)
        .with_mechanism("LOGIN", MechanismKind::Login)
        .with_allow_insecure_auth(true)
        .with_extra_cap("PIPELINING")
        .with_max_message_bytes(10 * 1024 * 1024);

    if let Err(e) = Server::new(config).run("127.0.0.1:2525").await {
        error!("server error: {e}");
        std::process::exit(1);
    }
}
