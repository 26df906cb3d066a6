//! Frame I/O (C1): the transport layer underneath every other module. Adapted
//! from the teacher's `pg::stream::Stream`, extended with `certificate_hash`
//! for SCRAM channel binding (§4.4) and a generic `write_message` so callers
//! build frames without repeating the tag/length dance at every call site.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

#[cfg(feature = "ssl")]
use openssl::ssl::SslConnector;
#[cfg(feature = "ssl")]
use tokio_openssl::SslStream;

use crate::error::{Error, Result};

const SSL_HANDSHAKE_CODE: i32 = 80877103;

#[derive(Debug)]
pub enum Stream {
    Tcp((BufStream<TcpStream>, Vec<SocketAddr>)),
    Unix((BufStream<UnixStream>, PathBuf)),
    #[cfg(feature = "ssl")]
    Ssl((SslStream<BufStream<TcpStream>>, Vec<SocketAddr>, String, SslConnector)),
}

impl Stream {
    pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>) -> Result<Self> {
        let addrs = addrs.into();
        let s = TcpStream::connect(addrs.as_slice()).await.map(BufStream::new)?;
        Ok(Self::Tcp((s, addrs)))
    }

    pub async fn connect_unix(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let s = UnixStream::connect(&path).await.map(BufStream::new)?;
        Ok(Self::Unix((s, path)))
    }

    #[cfg(feature = "ssl")]
    pub async fn connect_ssl(
        addrs: impl Into<Vec<SocketAddr>>,
        domain: impl Into<String>,
        ssl_connector: SslConnector,
    ) -> Result<Self> {
        let addrs = addrs.into();
        let domain = domain.into();
        let mut s = TcpStream::connect(addrs.as_slice()).await.map(BufStream::new)?;

        s.write_i32(8).await?;
        s.write_i32(SSL_HANDSHAKE_CODE).await?;
        s.flush().await?;

        match s.read_u8().await? {
            b'S' => {
                let connect_configuration = ssl_connector
                    .configure()
                    .map_err(|err| Error::forbidden(format!("failed to create SSL configuration: {err}")))?;

                let ssl = connect_configuration
                    .into_ssl(domain.as_str())
                    .map_err(|err| Error::forbidden(format!("failed to create SSL context: {err}")))?;

                let mut ssl_stream =
                    SslStream::new(ssl, s).map_err(|err| Error::forbidden(format!("failed to create SSL stream: {err}")))?;

                Pin::new(&mut ssl_stream)
                    .connect()
                    .await
                    .map_err(|err| Error::forbidden(format!("SSL handshake failed: {err}")))?;

                Ok(Self::Ssl((ssl_stream, addrs, domain, ssl_connector)))
            }
            b'N' => Err(Error::forbidden("server does not support SSL")),
            code => Err(Error::fault(format!("unexpected byte in SSL negotiation response: {:?}", char::from(code)))),
        }
    }

    pub async fn read_packet(&mut self) -> Result<(u8, Bytes)> {
        read_packet(self).await
    }

    /// Writes `{tag, len:int32, body}` (or just `{len, body}` when `tag` is
    /// `None`, as used by `StartupMessage` and SSL/cancel requests which carry
    /// no leading tag byte).
    pub async fn write_message(&mut self, tag: Option<u8>, body: &[u8]) -> Result<()> {
        write_message(self, tag, body).await
    }

    pub async fn flush_writes(&mut self) -> Result<()> {
        self.flush().await?;
        Ok(())
    }

    pub async fn duplicate(&self) -> Result<Self> {
        match self {
            Stream::Tcp((_, addrs)) => Self::connect_tcp(addrs.clone()).await,
            Stream::Unix((_, path)) => Self::connect_unix(path.clone()).await,
            #[cfg(feature = "ssl")]
            Stream::Ssl((_, addrs, domain, ssl_connector)) => {
                Self::connect_ssl(addrs.clone(), domain.clone(), ssl_connector.clone()).await
            }
        }
    }

    /// SHA-256 of the peer certificate's DER encoding, used as the
    /// `tls-server-end-point` channel-binding data for SCRAM-SHA-256-PLUS
    /// (§4.4 "Channel binding"). `None` over non-TLS transports.
    #[cfg(feature = "ssl")]
    pub fn certificate_hash(&self) -> Option<Vec<u8>> {
        use openssl::hash::{hash, MessageDigest};
        match self {
            Stream::Ssl((s, ..)) => {
                let cert = s.ssl().peer_certificate()?;
                let der = cert.to_der().ok()?;
                hash(MessageDigest::sha256(), &der).ok().map(|d| d.to_vec())
            }
            _ => None,
        }
    }

    #[cfg(not(feature = "ssl"))]
    pub fn certificate_hash(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Frame read, generic over the transport half (the whole `Stream`, or a
/// `tokio::io::ReadHalf<Stream>` once a subscriber's primary connection is
/// split between its reader task and its flusher/keepalive writer).
pub async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> Result<(u8, Bytes)> {
    let op = r.read_u8().await?;
    let declared_len = r.read_i32().await?;
    let len: usize = declared_len
        .checked_sub(4)
        .filter(|n| *n >= 0)
        .ok_or_else(|| Error::fault(format!("invalid frame length {declared_len}")))?
        .try_into()
        .map_err(|_| Error::fault("frame length overflowed usize"))?;
    let mut buffer = BytesMut::with_capacity(len);
    if len > 0 {
        while buffer.len() < len {
            if r.read_buf(&mut buffer).await? == 0 {
                return Err(Error::unavailable("connection closed mid-frame"));
            }
        }
    }
    Ok((op, buffer.freeze()))
}

/// Frame write, generic over the transport half. See `read_packet`.
pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, tag: Option<u8>, body: &[u8]) -> Result<()> {
    let len = body.len() + 4;
    if let Some(tag) = tag {
        w.write_u8(tag).await?;
    }
    w.write_i32(len as i32).await?;
    w.write_all(body).await?;
    Ok(())
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp((s, _)) => Pin::new(s).poll_read(cx, buf),
            Stream::Unix((s, _)) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "ssl")]
            Stream::Ssl((s, _, _, _)) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp((s, _)) => Pin::new(s).poll_write(cx, buf),
            Stream::Unix((s, _)) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "ssl")]
            Stream::Ssl((s, _, _, _)) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp((s, _)) => Pin::new(s).poll_flush(cx),
            Stream::Unix((s, _)) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "ssl")]
            Stream::Ssl((s, _, _, _)) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp((s, _)) => Pin::new(s).poll_shutdown(cx),
            Stream::Unix((s, _)) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "ssl")]
            Stream::Ssl((s, _, _, _)) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
