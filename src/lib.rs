//! A PostgreSQL wire-protocol client and logical-decoding (CDC) subscriber.
//!
//! The stack is layered bottom-up: [`stream`] frames bytes, [`message`]
//! gives the frames wire-protocol meaning, [`session`] drives the startup
//! and authentication handshake (with [`scram`] for SCRAM-SHA-256), [`sql`]
//! runs simple and extended queries over an authenticated session, and
//! [`subscriber`] drives `START_REPLICATION`, translating decoded
//! [`pgoutput`] messages ([`replication`]) into handler-facing events
//! dispatched through a bounded [`executor`].

pub mod buf_ext;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod lsn;
pub mod message;
pub mod pgoutput;
pub mod replication;
pub mod row;
pub mod scram;
pub mod session;
pub mod sql;
pub mod stream;
pub mod subscriber;

pub use error::{Error, Result};
pub use lsn::Lsn;
pub use session::{ConnectionOptions, Session};
pub use sql::SqlClient;
pub use subscriber::{Subscriber, SubscriberOptions};
