//! `CancelRequest` (§4.4): a standalone connection that sends the 16-byte
//! cancel request and disconnects, mirroring the teacher's `pg::cancel`.

use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::stream::Stream;

const CANCEL_REQUEST_CODE: i32 = 80877102;

#[derive(Debug)]
pub struct CancelHandle {
    stream: Stream,
    pid: i32,
    secret_key: i32,
}

impl CancelHandle {
    pub(crate) fn new(stream: Stream, pid: i32, secret_key: i32) -> Self {
        Self { stream, pid, secret_key }
    }

    pub async fn cancel(mut self) -> Result<()> {
        self.stream.write_i32(16).await?;
        self.stream.write_i32(CANCEL_REQUEST_CODE).await?;
        self.stream.write_i32(self.pid).await?;
        self.stream.write_i32(self.secret_key).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
