//! SQL client (C5): simple query and extended query/pipeline over a single
//! authenticated `Session`, serialized by a connection-scoped mutex so
//! `sq`/`eq` calls from concurrent callers never interleave their frames.
//! Adapted from the teacher's `pg::conn::Connection::query`, restructured
//! around the shared `message`/`codec` layers instead of inline parsing.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::codec::oid::Oid;
use crate::codec::value::Value;
use crate::codec::{self, DecoderRegistry};
use crate::error::{Error, Result};
use crate::message::{self, Backend, CommandTag, DescribeTarget};
use crate::session::{ConnectionOptions, Session};

/// A single query's decoded result. `SELECT`-shaped statements populate `rows`;
/// everything else only carries the command tag.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub tag: Option<CommandTag>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn rows_affected(&self) -> Option<u64> {
        self.tag.as_ref().and_then(|t| t.rows)
    }
}

/// A SQL connection driving simple-query (`sq`) and extended-query/pipeline
/// (`eq`) exchanges. Wraps a `Session` behind a mutex (§5) so the frame
/// sequence for one call is never interleaved with another.
pub struct SqlClient {
    session: Mutex<Session>,
    registry: DecoderRegistry,
    closed: std::sync::atomic::AtomicBool,
}

impl SqlClient {
    pub async fn connect_tcp(addrs: impl Into<Vec<std::net::SocketAddr>>, options: ConnectionOptions) -> Result<Arc<Self>> {
        Self::from_session(Session::connect_tcp(addrs, options).await?)
    }

    pub async fn connect_from_url(url: &url::Url) -> Result<Arc<Self>> {
        Self::from_session(Session::connect_from_url(url).await?)
    }

    /// Wraps an already-authenticated `Session` (e.g. one whose `cancel_handle()`
    /// was captured before queries began) in a `SqlClient`.
    pub fn from_session(session: Session) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            session: Mutex::new(session),
            registry: DecoderRegistry::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Installs a decoder for a non-built-in OID (e.g. after looking it up in
    /// `pg_type`). Mirrors §4.2's "unknown user types" retry path.
    pub fn register_decoder(&mut self, oid: Oid, decoder: fn(&[u8]) -> Result<Value>) {
        self.registry.register(oid, decoder);
    }

    /// Runs a query with no parameters through the simple-query subprotocol.
    #[tracing::instrument(skip(self), err)]
    pub async fn sq(&self, query: impl AsRef<str> + std::fmt::Debug) -> Result<QueryResult> {
        if self.is_closed() {
            return Err(Error::incorrect("Disconnected from server"));
        }
        let mut session = self.session.lock().await;
        match self.run_simple_query(&mut session, query.as_ref()).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if !err.leaves_client_usable() {
                    self.closed.store(true, std::sync::atomic::Ordering::Release);
                }
                Err(err)
            }
        }
    }

    /// `sq`, but a server `42710` (duplicate_object) error is swallowed —
    /// convenient for idempotent `CREATE ... IF NOT EXISTS`-style DDL that
    /// doesn't support that clause (e.g. `CREATE_REPLICATION_SLOT`).
    pub async fn ignoring_dupes(&self, query: impl AsRef<str> + std::fmt::Debug) -> Result<Option<QueryResult>> {
        match self.sq(query).await {
            Ok(result) => Ok(Some(result)),
            Err(err) if err.is_duplicate_object() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn run_simple_query(&self, session: &mut Session, query: &str) -> Result<QueryResult> {
        let (tag, body) = message::encode_query(query);
        session.write_message(tag, &body).await?;
        session.flush().await?;

        let mut result = QueryResult::default();
        let mut field_oids: Vec<Oid> = Vec::new();
        let mut pending_error: Option<Error> = None;

        loop {
            let (tag, body) = session.read_packet().await.map_err(fault_wrap)?;
            let message = message::decode(tag, body).map_err(fault_wrap)?;
            match message {
                Backend::RowDescription { fields } => {
                    result.columns = fields.iter().map(|f| f.name.clone()).collect();
                    field_oids = fields.iter().map(|f| f.type_oid).collect();
                }
                Backend::DataRow { values } => {
                    let mut row = Vec::with_capacity(values.len());
                    for (value, oid) in values.into_iter().zip(field_oids.iter()) {
                        row.push(match value {
                            None => Value::Null,
                            Some(bytes) => self.registry.decode(*oid, &bytes).map_err(fault_wrap)?,
                        });
                    }
                    result.rows.push(row);
                }
                Backend::CommandComplete { tag } => {
                    result.tag = Some(tag);
                }
                Backend::EmptyQueryResponse => {}
                Backend::CopyInResponse { .. } => {
                    // CopyIn is unsupported (§4.5): bail out of copy mode immediately.
                    let (tag, body) = message::encode_copy_done();
                    session.write_message(tag, &body).await.map_err(fault_wrap)?;
                    session.flush().await.map_err(fault_wrap)?;
                    pending_error.get_or_insert_with(|| Error::unsupported("CopyIn is not supported"));
                }
                Backend::CopyOutResponse { .. } | Backend::CopyData(_) | Backend::CopyDone => {}
                Backend::NoticeResponse(notice) => {
                    tracing::warn!(message = %notice.message, code = %notice.code, "server notice");
                }
                Backend::ParameterStatus { .. } => {}
                Backend::ErrorResponse(err) => {
                    pending_error.get_or_insert(Error::Server(Box::new(err)));
                }
                Backend::ReadyForQuery { .. } => {
                    return match pending_error {
                        Some(err) => Err(err),
                        None => Ok(result),
                    };
                }
                other => return Err(Error::fault(format!("unexpected message {other:?} during simple query"))),
            }
        }
    }

    /// Extended-query pipeline: each `[sql, params...]` is sent as
    /// `Parse/Describe/Bind/Execute`, followed by a single trailing `Sync`.
    #[tracing::instrument(skip(self, queries), err)]
    pub async fn eq(&self, queries: &[(&str, &[Value])]) -> Result<Vec<QueryResult>> {
        if self.is_closed() {
            return Err(Error::incorrect("Disconnected from server"));
        }
        let mut session = self.session.lock().await;
        match self.run_pipeline(&mut session, queries).await {
            Ok(results) => Ok(results),
            Err(err) => {
                if !err.leaves_client_usable() {
                    self.closed.store(true, std::sync::atomic::Ordering::Release);
                }
                Err(err)
            }
        }
    }

    async fn run_pipeline(&self, session: &mut Session, queries: &[(&str, &[Value])]) -> Result<Vec<QueryResult>> {
        // Encode every query's parameters before writing any frame: a later
        // query's encode failure must not leave earlier queries' frames sitting
        // in the write buffer (§4.5 — encoding happens before any frame is sent).
        let mut encoded = Vec::with_capacity(queries.len());
        for (sql, params) in queries {
            let mut oids = Vec::with_capacity(params.len());
            let mut encoded_params = Vec::with_capacity(params.len());
            for value in params.iter() {
                if value.is_null() {
                    oids.push(0);
                    encoded_params.push(None);
                    continue;
                }
                let oid = codec::value_default_oid(value).unwrap_or(0);
                let bytes = codec::encode(value, oid)?;
                oids.push(oid);
                encoded_params.push(Some(bytes));
            }
            encoded.push((*sql, oids, encoded_params));
        }

        for (sql, oids, encoded_params) in &encoded {
            let (tag, body) = message::encode_parse("", sql, oids);
            session.write_message(tag, &body).await?;
            let (tag, body) = message::encode_describe(DescribeTarget::Statement, "");
            session.write_message(tag, &body).await?;
            let (tag, body) = message::encode_bind("", "", encoded_params);
            session.write_message(tag, &body).await?;
            let (tag, body) = message::encode_execute("", 0);
            session.write_message(tag, &body).await?;
        }
        let (tag, body) = message::encode_sync();
        session.write_message(tag, &body).await?;
        session.flush().await?;

        let mut results = Vec::with_capacity(queries.len());
        let mut current = QueryResult::default();
        let mut field_oids: Vec<Oid> = Vec::new();
        let mut errored: Option<Error> = None;

        loop {
            let (tag, body) = session.read_packet().await.map_err(fault_wrap)?;
            let message = message::decode(tag, body).map_err(fault_wrap)?;
            match message {
                Backend::ParseComplete | Backend::BindComplete | Backend::NoData => {}
                Backend::ParameterDescription { .. } => {}
                Backend::RowDescription { fields } => {
                    current.columns = fields.iter().map(|f| f.name.clone()).collect();
                    field_oids = fields.iter().map(|f| f.type_oid).collect();
                }
                Backend::DataRow { values } => {
                    let mut row = Vec::with_capacity(values.len());
                    for (value, oid) in values.into_iter().zip(field_oids.iter()) {
                        row.push(match value {
                            None => Value::Null,
                            Some(bytes) => self.registry.decode(*oid, &bytes).map_err(fault_wrap)?,
                        });
                    }
                    current.rows.push(row);
                }
                Backend::CommandComplete { tag } => {
                    current.tag = Some(tag);
                    results.push(std::mem::take(&mut current));
                    field_oids.clear();
                }
                Backend::PortalSuspended | Backend::EmptyQueryResponse => {
                    results.push(std::mem::take(&mut current));
                    field_oids.clear();
                }
                Backend::NoticeResponse(notice) => {
                    tracing::warn!(message = %notice.message, code = %notice.code, "server notice");
                }
                Backend::ErrorResponse(err) => {
                    errored.get_or_insert(Error::Server(Box::new(err)));
                }
                Backend::ReadyForQuery { .. } => {
                    return match errored {
                        Some(err) => Err(err),
                        None => Ok(results),
                    };
                }
                other => return Err(Error::fault(format!("unexpected message {other:?} during extended query"))),
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut session = self.session.lock().await;
        let (tag, body) = message::encode_terminate();
        let _ = session.write_message(tag, &body).await;
        let _ = session.flush().await;
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}

/// §4.5's "fatal desynchronization" policy: any I/O or decode failure during
/// response parsing is re-raised as a `Fault`, since the wire protocol cannot
/// be resumed mid-message.
fn fault_wrap(err: Error) -> Error {
    match err {
        Error::Server(_) => err,
        other => Error::fault(format!("protocol desynchronization: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_result_rows_affected_reads_command_tag() {
        let result = QueryResult {
            tag: Some(CommandTag::parse("UPDATE 7")),
            columns: vec![],
            rows: vec![],
        };
        assert_eq!(result.rows_affected(), Some(7));
    }

    #[test]
    fn fault_wrap_preserves_server_errors() {
        let server_err = Error::Server(Box::new(crate::error::ServerError::default()));
        assert!(matches!(fault_wrap(server_err), Error::Server(_)));
    }

    #[test]
    fn fault_wrap_reclassifies_other_errors_as_fault() {
        assert!(matches!(fault_wrap(Error::unavailable("x")), Error::Fault(_)));
    }
}
