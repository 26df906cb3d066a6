//! Logical-decoding subscriber (C6): wires a replication-mode primary
//! connection, an auxiliary SQL connection, a handler executor, and a
//! periodic LSN flusher into the task model from §5. Grounded on the
//! teacher's `pg::wal::ReplicationStream` for the wire exchange and
//! `gcp::Credential::spawn`/`sink::RowEventSink::spawn` for the
//! spawn-a-task-around-a-channel shape.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::executor::{FlowControlledExecutor, DEFAULT_QUEUE_CAPACITY};
use crate::lsn::Lsn;
use crate::message::{self, Backend};
use crate::pgoutput::Streaming;
use crate::replication::{self, Ack, HandlerFn, ReplicationMessage, ReplicationState, WalDecoder};
use crate::row::{default_key_fn, KeyFn};
use crate::session::{ConnectionOptions, Session};
use crate::sql::SqlClient;
use crate::stream::{self, Stream};

/// No unflushed ack has been recorded yet.
const NO_UNFLUSHED: i64 = -1;

pub struct SubscriberOptions {
    pub publications: Vec<String>,
    pub handler: HandlerFn,
    pub executor_queue_capacity: usize,
    pub executor_backpressure_timeout: Option<Duration>,
    pub start_lsn: Lsn,
    pub protocol_version: u8,
    pub ack_interval: Duration,
    pub key_fn: KeyFn,
    pub messages: bool,
    pub streaming: Streaming,
    /// Placeholder for source parity (§4.10's `log` option); `NoticeResponse`s
    /// and anomalies already go through `tracing` regardless of this field.
    pub log: Option<tracing::Level>,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            publications: Vec::new(),
            handler: Arc::new(|_event, _ack| -> crate::replication::BoxFuture<Result<()>> { Box::pin(async { Ok(()) }) }),
            executor_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            executor_backpressure_timeout: None,
            start_lsn: Lsn::ZERO,
            protocol_version: 2,
            ack_interval: Duration::from_secs(10),
            key_fn: default_key_fn,
            messages: true,
            streaming: Streaming::Off,
            log: None,
        }
    }
}

impl std::fmt::Debug for SubscriberOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberOptions")
            .field("publications", &self.publications)
            .field("start_lsn", &self.start_lsn)
            .field("protocol_version", &self.protocol_version)
            .field("ack_interval", &self.ack_interval)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

impl Streaming {
    fn as_option_str(self) -> &'static str {
        match self {
            Streaming::Off => "off",
            Streaming::On => "on",
            Streaming::Parallel => "parallel",
        }
    }
}

/// A running logical-decoding subscription. Owns the replication connection's
/// write half (shared by the flusher and the keepalive-reply path, the "flush
/// lock" of §5) and the auxiliary SQL connection; the read half lives inside
/// the reader task.
pub struct Subscriber {
    aux: Arc<SqlClient>,
    writer: Mutex<WriteHalf<Stream>>,
    replicating: AtomicBool,
    closed: AtomicBool,
    unflushed_lsn: Arc<AtomicI64>,
    flushed_lsn: AtomicI64,
    reader: Mutex<Option<JoinHandle<()>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    executor: Mutex<Option<FlowControlledExecutor>>,
    outcome_tx: watch::Sender<Option<Outcome>>,
    outcome_rx: watch::Receiver<Option<Outcome>>,
}

#[derive(Clone)]
enum Outcome {
    Ok,
    Err(Arc<Error>),
}

impl Subscriber {
    #[tracing::instrument(skip(slot_name, primary_addrs, primary_options, aux_addrs, aux_options, opts), fields(slot = %slot_name.as_ref()))]
    pub async fn connect(
        slot_name: impl AsRef<str>,
        primary_addrs: impl Into<Vec<SocketAddr>>,
        primary_options: ConnectionOptions,
        aux_addrs: impl Into<Vec<SocketAddr>>,
        aux_options: ConnectionOptions,
        opts: SubscriberOptions,
    ) -> Result<Arc<Self>> {
        let slot_name = slot_name.as_ref();

        let mut primary_options = primary_options;
        primary_options.replication = true;
        let mut primary = Session::connect_tcp(primary_addrs, primary_options).await?;

        let aux_session = Session::connect_tcp(aux_addrs, aux_options).await?;
        let aux = SqlClient::from_session(aux_session)?;

        let publication_names = opts.publications.join(",");
        let command = format!(
            "START_REPLICATION SLOT \"{slot}\" LOGICAL {lsn} (proto_version '{proto}', publication_names '{pubs}', streaming '{streaming}', binary 'true', messages '{messages}')",
            slot = slot_name,
            lsn = opts.start_lsn,
            proto = opts.protocol_version,
            pubs = publication_names,
            streaming = opts.streaming.as_option_str(),
            messages = opts.messages,
        );
        start_replication(&mut primary, &command).await?;

        let (pid, _secret_key) = primary.backend_key();
        tracing::debug!(pid, "replication connection established");

        let unflushed_lsn = Arc::new(AtomicI64::new(NO_UNFLUSHED));
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let stream = primary.into_stream();
        let (read_half, write_half) = tokio::io::split(stream);

        let executor = FlowControlledExecutor::spawn_with_timeout(opts.executor_queue_capacity, opts.executor_backpressure_timeout);

        let subscriber = Arc::new(Self {
            aux,
            writer: Mutex::new(write_half),
            replicating: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            unflushed_lsn,
            flushed_lsn: AtomicI64::new(u64::from(opts.start_lsn) as i64),
            reader: Mutex::new(None),
            flusher: Mutex::new(None),
            executor: Mutex::new(Some(executor)),
            outcome_tx,
            outcome_rx,
        });

        let reader_handle = tokio::task::spawn(Self::run_reader(subscriber.clone(), read_half, opts.protocol_version, opts.streaming, opts.key_fn, opts.handler));
        *subscriber.reader.lock().await = Some(reader_handle);

        let flusher_handle = tokio::task::spawn(Self::run_flusher(subscriber.clone(), opts.ack_interval));
        *subscriber.flusher.lock().await = Some(flusher_handle);

        Ok(subscriber)
    }

    /// Blocks until the subscription completes (via `close()`) or fails.
    /// Named `wait` rather than `await` since the latter is a reserved word.
    pub async fn wait(&self) -> std::result::Result<(), Arc<Error>> {
        let mut rx = self.outcome_rx.clone();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return match outcome {
                    Outcome::Ok => Ok(()),
                    Outcome::Err(err) => Err(err),
                };
            }
            if rx.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome_rx.borrow().is_some()
    }

    pub fn is_replicating(&self) -> bool {
        self.replicating.load(Ordering::Acquire)
    }

    /// Idempotent shutdown ladder (§5): cancel the reader first so it can
    /// never be blocked submitting to the executor while we wait on the same
    /// executor lock below, then drain the executor, force a final flush,
    /// stop the flusher, close both connections.
    pub async fn close(self: &Arc<Self>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }

        if let Some(executor) = self.executor.lock().await.take() {
            executor.close().await;
        }

        if let Err(err) = self.flush_once().await {
            tracing::warn!(error = %err, "final flush on close failed");
        }

        if let Some(flusher) = self.flusher.lock().await.take() {
            flusher.abort();
        }

        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        let _ = self.aux.close().await;

        self.replicating.store(false, Ordering::Release);
        let _ = self.outcome_tx.send(Some(Outcome::Ok));
        Ok(())
    }

    fn fail(&self, err: Error) {
        let _ = self.outcome_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(Outcome::Err(Arc::new(err)));
            true
        });
    }

    async fn flush_once(&self) -> Result<()> {
        let unflushed = self.unflushed_lsn.swap(NO_UNFLUSHED, Ordering::AcqRel);
        let lsn = if unflushed == NO_UNFLUSHED {
            self.flushed_lsn.load(Ordering::Acquire)
        } else {
            unflushed
        };
        self.write_status_update(lsn, false).await?;
        self.flushed_lsn.store(lsn, Ordering::Release);
        Ok(())
    }

    async fn write_status_update(&self, lsn: i64, reply_asap: bool) -> Result<()> {
        let lsn = Lsn::from(lsn as u64);
        let (tag, body) = replication::encode_status_update(lsn, lsn, lsn, replication::pg_epoch_micros_now(), reply_asap);
        let mut writer = self.writer.lock().await;
        stream::write_message(&mut *writer, Some(tag), &body).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn run_flusher(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            if let Err(err) = self.flush_once().await {
                self.fail(err);
                return;
            }
        }
    }

    async fn run_reader(
        self: Arc<Self>,
        mut read_half: ReadHalf<Stream>,
        protocol_version: u8,
        streaming: Streaming,
        key_fn: KeyFn,
        handler: HandlerFn,
    ) {
        let mut decoder = WalDecoder::new(protocol_version, streaming);
        let mut state = ReplicationState::new(key_fn);

        loop {
            let (tag, body) = match stream::read_packet(&mut read_half).await {
                Ok(frame) => frame,
                Err(err) => {
                    if !self.closed.load(Ordering::Acquire) {
                        self.fail(err);
                    }
                    return;
                }
            };

            let decoded = match message::decode(tag, body) {
                Ok(decoded) => decoded,
                Err(err) => {
                    self.fail(Error::fault(format!("protocol desynchronization: {err}")));
                    return;
                }
            };

            match decoded {
                Backend::CopyData(payload) => {
                    let replication_message = match replication::decode_copy_data(payload) {
                        Ok(m) => m,
                        Err(err) => {
                            self.fail(err);
                            return;
                        }
                    };
                    match replication_message {
                        ReplicationMessage::WalData { section, .. } => {
                            let message = match decoder.decode(section) {
                                Ok(m) => m,
                                Err(err) => {
                                    self.fail(err);
                                    return;
                                }
                            };
                            let (event, ack_lsn) = match state.translate(&self.aux, message).await {
                                Ok(t) => t,
                                Err(err) => {
                                    self.fail(err);
                                    return;
                                }
                            };
                            if let Err(err) = self.dispatch(&handler, event, ack_lsn).await {
                                self.fail(err);
                                return;
                            }
                        }
                        ReplicationMessage::PrimaryKeepAlive { reply_asap, .. } => {
                            if reply_asap {
                                let lsn = self.flushed_lsn.load(Ordering::Acquire);
                                if let Err(err) = self.write_status_update(lsn, false).await {
                                    self.fail(err);
                                    return;
                                }
                            }
                        }
                    }
                }
                Backend::ErrorResponse(err) => {
                    self.fail(Error::Server(Box::new(err)));
                    return;
                }
                Backend::NoticeResponse(notice) => {
                    tracing::info!(message = %notice.message, code = %notice.code, "server notice");
                }
                other => {
                    self.fail(Error::fault(format!("unexpected message {other:?} during replication")));
                    return;
                }
            }

            if self.closed.load(Ordering::Acquire) {
                return;
            }
        }
    }

    async fn dispatch(&self, handler: &HandlerFn, event: crate::replication::Event, ack_lsn: Option<Lsn>) -> Result<()> {
        let unflushed_lsn = self.unflushed_lsn.clone();
        let handler = handler.clone();
        // Clone the handle and drop the executor lock before awaiting `submit`:
        // submitting to a full queue can block indefinitely on a stuck handler,
        // and `close()` needs this same lock to tear the executor down.
        let handle = {
            let executor = self.executor.lock().await;
            let executor = executor.as_ref().ok_or_else(|| Error::unavailable("handler executor has been closed"))?;
            executor.handle()
        };
        handle
            .submit(move || async move {
                let ack = ack_lsn.map(|lsn| Ack::new(unflushed_lsn, lsn));
                if let Err(err) = (*handler)(event, ack).await {
                    tracing::error!(error = %err, "replication handler failed");
                }
            })
            .await
    }
}

/// Issues `START_REPLICATION` over the simple-query subprotocol and consumes
/// the `CopyBothResponse` that puts the connection into replication mode
/// (§4.6 step 3, grounded on `pg::conn::Connection::start_replication_stream`).
async fn start_replication(session: &mut Session, command: &str) -> Result<()> {
    let (tag, body) = message::encode_query(command);
    session.write_message(tag, &body).await?;
    session.flush().await?;

    loop {
        let (tag, body) = session.read_packet().await?;
        match message::decode(tag, body)? {
            Backend::CopyBothResponse { .. } => return Ok(()),
            Backend::ErrorResponse(err) => return Err(Error::Server(Box::new(err))),
            Backend::NoticeResponse(_) => {}
            Backend::ParameterStatus { .. } => {}
            other => return Err(Error::fault(format!("unexpected message {other:?} while starting replication"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_option_strings_match_the_wire_keywords() {
        assert_eq!(Streaming::Off.as_option_str(), "off");
        assert_eq!(Streaming::On.as_option_str(), "on");
        assert_eq!(Streaming::Parallel.as_option_str(), "parallel");
    }

    #[tokio::test]
    async fn outcome_channel_starts_unset() {
        let (tx, rx) = watch::channel::<Option<Outcome>>(None);
        assert!(rx.borrow().is_none());
        tx.send(Some(Outcome::Ok)).unwrap();
        assert!(matches!(*rx.borrow(), Some(Outcome::Ok)));
    }
}
