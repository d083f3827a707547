//! End-to-end conversations driven against an in-memory backend over
//! `tokio::io::duplex`, plus a `STARTTLS` handshake using a self-signed
//! certificate generated with `rcgen`.

use std::sync::Arc;

use async_trait::async_trait;
use esmtp_engine::sasl::MechanismKind;
use esmtp_engine::{AuthError, Backend, Connection, Credentials, DeliveryError, Message, ServerConfig, TlsConfig, User};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct RecordingBackend;

impl RecordingBackend {
    fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    type User = RecordingUser;

    async fn login(&self, _mechanism: &str, credentials: Credentials<'_>) -> Result<RecordingUser, AuthError> {
        match credentials {
            Credentials::Plain {
                authentication_id,
                password,
                ..
            } if authentication_id == "alice" && password == "hunter2" => Ok(RecordingUser),
            _ => Err(AuthError::new("invalid credentials")),
        }
    }
}

struct RecordingUser;

#[async_trait]
impl User for RecordingUser {
    async fn send(&self, mut message: Message<'_>) -> Result<(), DeliveryError> {
        let body = message.data.read_to_end().await?;
        let _ = (message.from, message.to, body);
        Ok(())
    }

    async fn logout(&self) {}
}

async fn read_reply(client: &mut (impl tokio::io::AsyncRead + Unpin)) -> String {
    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[tokio::test]
async fn full_conversation_with_auth_plain() {
    let backend = Arc::new(RecordingBackend::new());
    let config = Arc::new(
        ServerConfig::new("mail.example.com", backend)
            .with_mechanism("PLAIN", MechanismKind::Plain)
            .with_allow_insecure_auth(true),
    );

    let (mut client, server_half) = tokio::io::duplex(8192);
    let connection = Connection::new(config, Box::new(server_half), None);
    let handle = tokio::spawn(connection.serve());

    assert!(read_reply(&mut client).await.starts_with("220 "));

    client.write_all(b"EHLO client.example\r\n").await.unwrap();
    let reply = read_reply(&mut client).await;
    assert!(reply.contains("250-Hello client.example"));
    assert!(reply.contains("250 AUTH PLAIN"));

    // base64("\0alice\0hunter2")
    client.write_all(b"AUTH PLAIN AGFsaWNlAGh1bnRlcjI=\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("235 "));

    client.write_all(b"MAIL FROM:<alice@example.com>\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("250"));

    client.write_all(b"RCPT TO:<bob@example.com>\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("250"));

    client.write_all(b"DATA\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("354"));

    client
        .write_all(b"Subject: hi\r\n\r\nHello, world.\r\n.\r\n")
        .await
        .unwrap();
    assert!(read_reply(&mut client).await.starts_with("250"));

    client.write_all(b"QUIT\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("221"));

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn mail_before_auth_is_rejected() {
    let backend = Arc::new(RecordingBackend::new());
    let config = Arc::new(ServerConfig::new("mail.example.com", backend));

    let (mut client, server_half) = tokio::io::duplex(4096);
    let connection = Connection::new(config, Box::new(server_half), None);
    tokio::spawn(connection.serve());

    let _ = read_reply(&mut client).await; // 220
    client.write_all(b"HELO client\r\n").await.unwrap();
    let _ = read_reply(&mut client).await; // 250

    client.write_all(b"MAIL FROM:<a@b.com>\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("502"));
}

#[tokio::test]
async fn unrecognized_commands_close_after_threshold() {
    let backend = Arc::new(RecordingBackend::new());
    let config = Arc::new(ServerConfig::new("mail.example.com", backend));

    let (mut client, server_half) = tokio::io::duplex(4096);
    let connection = Connection::new(config, Box::new(server_half), None);
    let handle = tokio::spawn(connection.serve());

    let _ = read_reply(&mut client).await; // 220

    for _ in 0..4 {
        client.write_all(b"FOOBAR\r\n").await.unwrap();
        assert!(read_reply(&mut client).await.starts_with("500"));
    }

    client.write_all(b"FOOBAR\r\n").await.unwrap();
    let reply = read_reply(&mut client).await;
    assert!(reply.starts_with("500"));
    assert!(reply.contains("Too many"));

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversize_data_body_is_rejected_with_552() {
    let backend = Arc::new(RecordingBackend::new());
    let config = Arc::new(
        ServerConfig::new("mail.example.com", backend)
            .with_allow_insecure_auth(true)
            .with_mechanism("PLAIN", MechanismKind::Plain)
            .with_max_message_bytes(8),
    );

    let (mut client, server_half) = tokio::io::duplex(8192);
    let connection = Connection::new(config, Box::new(server_half), None);
    let handle = tokio::spawn(connection.serve());

    let _ = read_reply(&mut client).await; // 220

    // base64("\0alice\0hunter2")
    client.write_all(b"AUTH PLAIN AGFsaWNlAGh1bnRlcjI=\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("235"));

    client.write_all(b"MAIL FROM:<alice@example.com>\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("250"));

    client.write_all(b"RCPT TO:<bob@example.com>\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("250"));

    client.write_all(b"DATA\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("354"));

    client
        .write_all(b"this line alone is already past the cap\r\n.\r\n")
        .await
        .unwrap();
    let reply = read_reply(&mut client).await;
    assert!(reply.starts_with("552"), "expected 552, got: {reply}");

    client.write_all(b"QUIT\r\n").await.unwrap();
    assert!(read_reply(&mut client).await.starts_with("221"));

    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn starttls_upgrades_transport_and_requires_fresh_helo() {
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::ServerConfig as RustlsServerConfig;
    use tokio_rustls::TlsConnector;

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = CertificateDer::from(cert.cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der()));

    let rustls_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .unwrap();

    let backend = Arc::new(RecordingBackend::new());
    let config = Arc::new(
        ServerConfig::new("mail.example.com", backend).with_tls(TlsConfig::new(Arc::new(rustls_config))),
    );

    let (client_half, server_half) = tokio::io::duplex(8192);
    let connection = Connection::new(config, Box::new(server_half), None);
    tokio::spawn(connection.serve());

    let mut client_half = client_half;
    let _ = read_reply(&mut client_half).await; // 220

    client_half.write_all(b"EHLO client.example\r\n").await.unwrap();
    let reply = read_reply(&mut client_half).await;
    assert!(reply.contains("STARTTLS"));

    client_half.write_all(b"STARTTLS\r\n").await.unwrap();
    let reply = read_reply(&mut client_half).await;
    assert!(reply.starts_with("220"));

    let mut root_store = rustls::RootCertStore::empty();
    root_store.add(cert_der).unwrap();
    let client_tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_tls_config));
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut tls_client = connector.connect(server_name, client_half).await.unwrap();

    tls_client.write_all(b"MAIL FROM:<a@b.com>\r\n").await.unwrap();
    let reply = read_reply(&mut tls_client).await;
    assert!(
        reply.starts_with("502"),
        "MAIL before a fresh HELO over the upgraded transport should be rejected: {reply}"
    );
}
