//! Configuration (C10, ambient): typed connection/subscriber options built
//! from URLs and a small CLI, mirroring the teacher's `src/bin/pg.rs`
//! thin-argument-parsing-over-the-library pattern. `SubscriberOptions`
//! itself lives in [`crate::subscriber`]; this module is the CLI binding
//! and the defaults from §6.4.

use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::error::{Error, Result};
use crate::lsn::Lsn;
use crate::pgoutput::Streaming;
use crate::session::ConnectionOptions;
use crate::subscriber::SubscriberOptions;

/// Demonstration plumbing for the example binary, not part of the tested
/// library surface (§4.10).
#[derive(Debug, Parser)]
#[command(name = "pg", version, author = "pgreplica")]
pub struct Cli {
    /// postgres:// URL for the replication connection.
    #[arg(short, long)]
    pub url: Url,

    /// Logical replication slot name.
    #[arg(short, long)]
    pub slot: String,

    /// Comma-separated publication names.
    #[arg(short, long, value_delimiter = ',')]
    pub publications: Vec<String>,

    /// Starting LSN as `<hex>/<hex>`; defaults to the slot's confirmed position (0/0 here).
    #[arg(long, default_value = "0/0")]
    pub start_lsn: String,

    #[arg(long, default_value_t = 2)]
    pub protocol_version: u8,

    #[arg(long, default_value = "off")]
    pub streaming: String,

    #[arg(long, default_value_t = 10)]
    pub ack_interval_secs: u64,
}

impl Cli {
    pub fn connection_options(&self) -> Result<ConnectionOptions> {
        ConnectionOptions::try_from(&self.url)
    }

    pub fn subscriber_options(&self, handler: crate::replication::HandlerFn) -> Result<SubscriberOptions> {
        let start_lsn = Lsn::from_str(&self.start_lsn)?;
        let streaming = parse_streaming(&self.streaming)?;
        Ok(SubscriberOptions {
            publications: self.publications.clone(),
            handler,
            start_lsn,
            protocol_version: self.protocol_version,
            ack_interval: Duration::from_secs(self.ack_interval_secs),
            streaming,
            ..SubscriberOptions::default()
        })
    }
}

fn parse_streaming(value: &str) -> Result<Streaming> {
    match value {
        "off" => Ok(Streaming::Off),
        "on" => Ok(Streaming::On),
        "parallel" => Ok(Streaming::Parallel),
        other => Err(Error::incorrect(format!("invalid streaming mode {other:?}: expected off, on, or parallel"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_streaming_modes() {
        assert_eq!(parse_streaming("off").unwrap(), Streaming::Off);
        assert_eq!(parse_streaming("on").unwrap(), Streaming::On);
        assert_eq!(parse_streaming("parallel").unwrap(), Streaming::Parallel);
    }

    #[test]
    fn rejects_unknown_streaming_mode() {
        assert!(parse_streaming("turbo").is_err());
    }
}
