//! Message encoder/decoder (C3): a pure, stateless translation between frame
//! bodies and tagged messages. Frontend messages are built as `(tag, body)`
//! pairs for `Stream::write_message`; backend messages are decoded from the
//! `(tag, Bytes)` pairs `Stream::read_packet` returns.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::buf_ext::BufExt;
use crate::codec::oid::Oid;
use crate::error::{Error, Result, ServerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    KerberosV5,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    ScmCredential,
    Gss,
    GssContinue { data: Bytes },
    Sspi,
    Sasl { mechanisms: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: Oid,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_len: i16,
    pub type_modifier: i32,
    /// 0 = text, 1 = binary.
    pub format: i16,
}

/// `CommandComplete`'s tag parsed per §4.5's rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    pub command: String,
    pub rows: Option<u64>,
}

impl CommandTag {
    pub fn parse(tag: &str) -> Self {
        let mut parts = tag.split_whitespace();
        let command = parts.next().unwrap_or_default().to_string();
        let rest: Vec<&str> = parts.collect();

        let rows = match command.as_str() {
            "INSERT" => rest.get(1).and_then(|v| v.parse().ok()),
            "UPDATE" | "DELETE" | "MERGE" | "SELECT" | "MOVE" | "FETCH" | "COPY" => rest.first().and_then(|v| v.parse().ok()),
            _ => None,
        };

        if rows.is_some() {
            CommandTag { command, rows }
        } else {
            CommandTag {
                command: tag.to_string(),
                rows: None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Authentication(AuthRequest),
    BackendKeyData { pid: i32, secret_key: i32 },
    ParameterStatus { name: String, value: String },
    ReadyForQuery { status: u8 },
    CommandComplete { tag: CommandTag },
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    EmptyQueryResponse,
    ErrorResponse(ServerError),
    NoticeResponse(ServerError),
    ParameterDescription { oids: Vec<Oid> },
    ParseComplete,
    BindComplete,
    NoData,
    PortalSuspended,
    CopyInResponse { binary: bool, column_formats: Vec<i16> },
    CopyOutResponse { binary: bool, column_formats: Vec<i16> },
    CopyBothResponse { binary: bool, column_formats: Vec<i16> },
    CopyData(Bytes),
    CopyDone,
}

pub fn decode(tag: u8, mut body: Bytes) -> Result<Backend> {
    Ok(match tag {
        b'R' => Backend::Authentication(decode_auth_request(&mut body)?),
        b'K' => Backend::BackendKeyData {
            pid: body.get_i32(),
            secret_key: body.get_i32(),
        },
        b'S' => {
            let name = body.pg_get_null_terminated_string()?;
            let value = body.pg_get_null_terminated_string()?;
            Backend::ParameterStatus { name, value }
        }
        b'Z' => Backend::ReadyForQuery { status: body.get_u8() },
        b'C' => {
            let tag = body.pg_get_null_terminated_string()?;
            Backend::CommandComplete {
                tag: CommandTag::parse(&tag),
            }
        }
        b'T' => Backend::RowDescription {
            fields: decode_row_description(&mut body)?,
        },
        b'D' => Backend::DataRow {
            values: decode_data_row(&mut body)?,
        },
        b'I' => Backend::EmptyQueryResponse,
        b'E' => Backend::ErrorResponse(ServerError::from_fields(&body.pg_get_fields()?)),
        b'N' => Backend::NoticeResponse(ServerError::from_fields(&body.pg_get_fields()?)),
        b't' => {
            let n = body.get_i16();
            let oids = (0..n).map(|_| body.get_i32()).collect();
            Backend::ParameterDescription { oids }
        }
        b'1' => Backend::ParseComplete,
        b'2' => Backend::BindComplete,
        b'n' => Backend::NoData,
        b's' => Backend::PortalSuspended,
        b'G' => {
            let (binary, column_formats) = decode_copy_response(&mut body);
            Backend::CopyInResponse { binary, column_formats }
        }
        b'H' => {
            let (binary, column_formats) = decode_copy_response(&mut body);
            Backend::CopyOutResponse { binary, column_formats }
        }
        b'W' => {
            let (binary, column_formats) = decode_copy_response(&mut body);
            Backend::CopyBothResponse { binary, column_formats }
        }
        b'd' => Backend::CopyData(body),
        b'c' => Backend::CopyDone,
        other => return Err(Error::unsupported(format!("unrecognized backend message tag {:?}", char::from(other)))),
    })
}

fn decode_auth_request(body: &mut Bytes) -> Result<AuthRequest> {
    Ok(match body.get_i32() {
        0 => AuthRequest::Ok,
        2 => AuthRequest::KerberosV5,
        3 => AuthRequest::CleartextPassword,
        5 => {
            let mut salt = [0u8; 4];
            body.copy_to_slice(&mut salt);
            AuthRequest::Md5Password { salt }
        }
        6 => AuthRequest::ScmCredential,
        7 => AuthRequest::Gss,
        8 => AuthRequest::GssContinue { data: body.split_off(0) },
        9 => AuthRequest::Sspi,
        10 => {
            let mut mechanisms = Vec::new();
            loop {
                match body.pg_get_null_terminated_string()? {
                    m if m.is_empty() => break,
                    m => mechanisms.push(m),
                }
            }
            AuthRequest::Sasl { mechanisms }
        }
        11 => AuthRequest::SaslContinue { data: body.split_off(0) },
        12 => AuthRequest::SaslFinal { data: body.split_off(0) },
        other => return Err(Error::unsupported(format!("unrecognized AuthenticationRequest subtype {other}"))),
    })
}

fn decode_row_description(body: &mut Bytes) -> Result<Vec<FieldDescription>> {
    let n = body.get_i16();
    let mut fields = Vec::with_capacity(n.max(0) as usize);
    for _ in 0..n {
        fields.push(FieldDescription {
            name: body.pg_get_null_terminated_string()?,
            table_oid: body.get_i32(),
            column_attr: body.get_i16(),
            type_oid: body.get_i32(),
            type_len: body.get_i16(),
            type_modifier: body.get_i32(),
            format: body.get_i16(),
        });
    }
    Ok(fields)
}

fn decode_data_row(body: &mut Bytes) -> Result<Vec<Option<Bytes>>> {
    let n = body.get_i16();
    let mut values = Vec::with_capacity(n.max(0) as usize);
    for _ in 0..n {
        let len = body.get_i32();
        if len < 0 {
            values.push(None);
        } else {
            values.push(Some(body.split_to(len as usize)));
        }
    }
    Ok(values)
}

fn decode_copy_response(body: &mut Bytes) -> (bool, Vec<i16>) {
    let format = body.get_u8();
    let n = body.get_i16();
    let column_formats = (0..n).map(|_| body.get_i16()).collect();
    (format == 1, column_formats)
}

/// `Startup{user, database, replication, application_name}` — no leading tag byte.
pub fn encode_startup(protocol_version: i32, params: &[(&str, &str)]) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_i32(protocol_version);
    for (key, value) in params {
        out.put_slice(key.as_bytes());
        out.put_u8(0);
        out.put_slice(value.as_bytes());
        out.put_u8(0);
    }
    out.put_u8(0);
    out.to_vec()
}

pub fn encode_password(password: &[u8]) -> (u8, Vec<u8>) {
    let mut out = BytesMut::new();
    out.put_slice(password);
    out.put_u8(0);
    (b'p', out.to_vec())
}

pub fn encode_sasl_initial_response(mechanism: &str, client_first_message: &str) -> (u8, Vec<u8>) {
    let mut out = BytesMut::new();
    out.put_slice(mechanism.as_bytes());
    out.put_u8(0);
    out.put_i32(client_first_message.len() as i32);
    out.put_slice(client_first_message.as_bytes());
    (b'p', out.to_vec())
}

pub fn encode_sasl_response(client_final_message: &str) -> (u8, Vec<u8>) {
    (b'p', client_final_message.as_bytes().to_vec())
}

pub fn encode_query(sql: &str) -> (u8, Vec<u8>) {
    let mut out = BytesMut::new();
    out.put_slice(sql.as_bytes());
    out.put_u8(0);
    (b'Q', out.to_vec())
}

pub fn encode_parse(statement: &str, sql: &str, param_oids: &[Oid]) -> (u8, Vec<u8>) {
    let mut out = BytesMut::new();
    out.put_slice(statement.as_bytes());
    out.put_u8(0);
    out.put_slice(sql.as_bytes());
    out.put_u8(0);
    out.put_i16(param_oids.len() as i16);
    for oid in param_oids {
        out.put_i32(*oid);
    }
    (b'P', out.to_vec())
}

pub enum DescribeTarget {
    Statement,
    Portal,
}

pub fn encode_describe(target: DescribeTarget, name: &str) -> (u8, Vec<u8>) {
    let mut out = BytesMut::new();
    out.put_u8(match target {
        DescribeTarget::Statement => b'S',
        DescribeTarget::Portal => b'P',
    });
    out.put_slice(name.as_bytes());
    out.put_u8(0);
    (b'D', out.to_vec())
}

/// `Bind{portal, statement, param_formats=[1] (all binary), params, result_formats=[1]}`.
pub fn encode_bind(portal: &str, statement: &str, params: &[Option<Vec<u8>>]) -> (u8, Vec<u8>) {
    let mut out = BytesMut::new();
    out.put_slice(portal.as_bytes());
    out.put_u8(0);
    out.put_slice(statement.as_bytes());
    out.put_u8(0);
    out.put_i16(1);
    out.put_i16(1); // all parameters are binary
    out.put_i16(params.len() as i16);
    for param in params {
        match param {
            Some(bytes) => {
                out.put_i32(bytes.len() as i32);
                out.put_slice(bytes);
            }
            None => out.put_i32(-1),
        }
    }
    out.put_i16(1);
    out.put_i16(1); // all results are binary
    (b'B', out.to_vec())
}

pub fn encode_execute(portal: &str, max_rows: i32) -> (u8, Vec<u8>) {
    let mut out = BytesMut::new();
    out.put_slice(portal.as_bytes());
    out.put_u8(0);
    out.put_i32(max_rows);
    (b'E', out.to_vec())
}

pub fn encode_sync() -> (u8, Vec<u8>) {
    (b'S', Vec::new())
}

pub fn encode_copy_done() -> (u8, Vec<u8>) {
    (b'c', Vec::new())
}

pub fn encode_terminate() -> (u8, Vec<u8>) {
    (b'X', Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select_command_tag() {
        let tag = CommandTag::parse("SELECT 3");
        assert_eq!(tag.command, "SELECT");
        assert_eq!(tag.rows, Some(3));
    }

    #[test]
    fn parses_insert_command_tag_skipping_oid() {
        let tag = CommandTag::parse("INSERT 0 5");
        assert_eq!(tag.command, "INSERT");
        assert_eq!(tag.rows, Some(5));
    }

    #[test]
    fn falls_back_to_raw_tag_for_unrecognized_commands() {
        let tag = CommandTag::parse("BEGIN");
        assert_eq!(tag.command, "BEGIN");
        assert_eq!(tag.rows, None);
    }

    #[test]
    fn decodes_ready_for_query() {
        let body = Bytes::from_static(b"I");
        let msg = decode(b'Z', body).unwrap();
        assert_eq!(msg, Backend::ReadyForQuery { status: b'I' });
    }

    #[test]
    fn decodes_data_row_with_nulls() {
        let mut buf = BytesMut::new();
        buf.put_i16(2);
        buf.put_i32(-1);
        buf.put_i32(3);
        buf.put_slice(b"abc");
        let msg = decode(b'D', buf.freeze()).unwrap();
        assert_eq!(
            msg,
            Backend::DataRow {
                values: vec![None, Some(Bytes::from_static(b"abc"))]
            }
        );
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(decode(b'?', Bytes::new()).is_err());
    }
}
