//! A thin TCP accept loop, in the shape of the teacher's `smtp::Server`.
//!
//! This is a convenience, not part of the core engine: a host application
//! is free to accept connections itself (from a Unix socket, a pre-existing
//! listener, or anything else implementing `AsyncRead + AsyncWrite + Send`)
//! and drive a [`crate::connection::Connection`] directly.

use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

use crate::backend::Backend;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::transport::BoxedStream;

/// Accepts connections on `addr` and spawns one task per connection,
/// running each to completion.
pub struct Server<B: Backend> {
    config: Arc<ServerConfig<B>>,
}

impl<B: Backend> Server<B> {
    pub fn new(config: ServerConfig<B>) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Binds `addr` and serves connections until the listener itself fails.
    pub async fn run(self, addr: impl tokio::net::ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("esmtp-engine listening on {:?}", listener.local_addr());

        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let config = self.config.clone();
            tokio::spawn(async move {
                let transport: BoxedStream = Box::new(socket);
                let connection = Connection::new(config, transport, Some(peer_addr));
                if let Err(e) = connection.serve().await {
                    error!("connection from {peer_addr}: {e}");
                }
            });
        }
    }
}
