//! Internal module for establishing plain or TLS connections to IMAP servers.

use crate::error::{Error, Result};
use rustls::ClientConfig;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use webpki_roots::TLS_SERVER_ROOTS;

/// A TLS stream over TCP.
type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Transport carrying the IMAP conversation.
#[derive(Debug)]
pub(crate) enum MailStream {
    /// Implicit TLS (IMAPS, usually port 993).
    Tls(Box<TlsStream>),
    /// Unencrypted TCP, for local test servers.
    Plain(TcpStream),
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            MailStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            MailStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            MailStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            MailStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens a connection to the IMAP server, wrapping it in TLS when `use_tls` is set.
#[instrument(
    name = "connection::establish",
    skip_all,
    fields(imap_host = %imap_host, target_addr = %target_addr, use_tls)
)]
pub(crate) async fn establish_connection(
    imap_host: &str,
    target_addr: &str,
    use_tls: bool,
) -> Result<MailStream> {
    let tcp_stream = connect_direct(target_addr).await?;

    if !use_tls {
        debug!("Using plain TCP transport");
        return Ok(MailStream::Plain(tcp_stream));
    }

    let connector = create_tls_connector();
    let server_name = parse_server_name(imap_host)?;

    debug!("Performing TLS handshake");

    connector
        .connect(server_name, tcp_stream)
        .await
        .map(|stream| MailStream::Tls(Box::new(stream)))
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Creates a TLS connector with the webpki root certificates.
fn create_tls_connector() -> TlsConnector {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}

/// Parses server name for TLS SNI.
fn parse_server_name(host: &str) -> Result<rustls::ServerName> {
    rustls::ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

async fn connect_direct(target_addr: &str) -> Result<TcpStream> {
    debug!(target = %target_addr, "Establishing TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_server_name() {
        assert!(parse_server_name("imap.gmail.com").is_ok());
    }

    #[test]
    fn test_parse_invalid_server_name() {
        assert!(parse_server_name("").is_err());
    }

    #[tokio::test]
    async fn test_plain_connection_refused_is_tcp_error() {
        // Port 1 on loopback is essentially never listening.
        let err = establish_connection("127.0.0.1", "127.0.0.1:1", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TcpConnect { .. }));
        assert!(err.is_retryable());
    }
}
