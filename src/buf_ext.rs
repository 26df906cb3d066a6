use std::collections::BTreeMap;

use bytes::Buf;

use crate::error::{Error, ServerError};

/// Cursor helpers shared by the message decoder and the binary codec.
///
/// Grounded on `pg/src/buf_ext.rs` from the teacher: same null-terminated-string and
/// error-field parsing shape, but returning `crate::error::Error` instead of
/// `io::Error`, and with panics on malformed input replaced by `Result`s (the teacher
/// trusts a local, cooperative test server; a CDC client reading a production stream
/// cannot).
pub trait BufExt: Buf {
    fn pg_get_null_terminated_string(&mut self) -> crate::error::Result<String> {
        match self.chunk().iter().position(|b| *b == 0x00) {
            Some(len) => {
                let mut buffer = vec![0; len];
                self.copy_to_slice(buffer.as_mut_slice());
                self.advance(1);
                String::from_utf8(buffer).map_err(|err| Error::fault(format!("invalid utf8 string: {err}")))
            }
            None => Err(Error::fault("missing null terminator")),
        }
    }

    fn pg_get_fixed_length_bytes(&mut self, len: usize) -> crate::error::Result<Vec<u8>> {
        if self.remaining() < len {
            return Err(Error::fault("frame shorter than declared length"));
        }
        let mut bytes = vec![0; len];
        self.copy_to_slice(bytes.as_mut_slice());
        Ok(bytes)
    }

    fn pg_get_fixed_length_string(&mut self, len: usize) -> crate::error::Result<String> {
        let bytes = self.pg_get_fixed_length_bytes(len)?;
        String::from_utf8(bytes).map_err(|err| Error::fault(format!("invalid utf8 string: {err}")))
    }

    /// Reads the `Byte1 | String` repeated-field list shared by `ErrorResponse` and
    /// `NoticeResponse`, terminated by a zero byte.
    fn pg_get_fields(&mut self) -> crate::error::Result<BTreeMap<u8, String>> {
        let mut fields = BTreeMap::new();
        loop {
            if !self.has_remaining() {
                return Err(Error::fault("truncated field list"));
            }
            match self.get_u8() {
                0 => break,
                tag => {
                    let value = self.pg_get_null_terminated_string()?;
                    fields.insert(tag, value);
                }
            }
        }
        Ok(fields)
    }

    fn pg_get_backend_error(&mut self) -> crate::error::Result<ServerError> {
        let fields = self.pg_get_fields()?;
        if fields.is_empty() {
            return Err(Error::fault("missing error fields from server"));
        }
        Ok(ServerError::from_fields(&fields))
    }

    fn pg_get_backend_notice(&mut self) -> crate::error::Result<ServerError> {
        self.pg_get_backend_error()
    }

    /// A length-prefixed value as used by `Bind`/`DataRow`/array and range elements:
    /// `Int32` length (`-1` = SQL NULL) followed by that many bytes.
    fn pg_get_length_prefixed(&mut self) -> crate::error::Result<Option<Vec<u8>>> {
        if self.remaining() < 4 {
            return Err(Error::fault("truncated length prefix"));
        }
        let len = self.get_i32();
        if len < 0 {
            return Ok(None);
        }
        self.pg_get_fixed_length_bytes(len as usize).map(Some)
    }
}

impl<T: Buf> BufExt for T {}
