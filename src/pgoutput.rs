//! pgoutput logical-decoding message parser (§4.6, §6.2). Consumes the bytes
//! that follow a `WalData` frame's `{start, end, system_clock}` header —
//! see `replication::read_wal_data`, grounded on the teacher's `pg::wal`
//! (which only ever decoded wal2json text; this decodes the binary protocol
//! the teacher never implemented).

use bytes::{Buf, Bytes};

use crate::codec::oid::Oid;
use crate::error::{Error, Result};
use crate::lsn::Lsn;
use crate::row::{Attribute, ReplicaIdentity, Relation, TupleColumn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Streaming {
    Off,
    On,
    Parallel,
}

/// Context the caller must track across messages to parse unambiguously
/// (§4.3's "side contract"): whether we are between `StreamStart`/`StreamStop`
/// (leading `Xid` fields appear on DML messages only then), the negotiated
/// `streaming` mode, and the protocol version (`StreamAbort`'s trailer only
/// appears at `protocol_version = 4` with `streaming = parallel`).
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub protocol_version: u8,
    pub streaming: Streaming,
    pub in_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OldRow {
    /// Only the replica-identity key columns were sent.
    Key(Vec<TupleColumn>),
    /// The full pre-image was sent (`REPLICA IDENTITY FULL`).
    Full(Vec<TupleColumn>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Begin {
        final_lsn: Lsn,
        commit_timestamp: i64,
        xid: i32,
    },
    Commit {
        commit_lsn: Lsn,
        end_lsn: Lsn,
        commit_timestamp: i64,
    },
    Origin {
        lsn: Lsn,
        name: String,
    },
    Relation(Relation),
    Type {
        oid: Oid,
        namespace: String,
        name: String,
    },
    Insert {
        xid: Option<i32>,
        relation_oid: Oid,
        new: Vec<TupleColumn>,
    },
    Update {
        xid: Option<i32>,
        relation_oid: Oid,
        old: Option<OldRow>,
        new: Vec<TupleColumn>,
    },
    Delete {
        xid: Option<i32>,
        relation_oid: Oid,
        old: OldRow,
    },
    Truncate {
        xid: Option<i32>,
        options: u8,
        relation_oids: Vec<Oid>,
    },
    LogicalMessage {
        xid: Option<i32>,
        transactional: bool,
        lsn: Lsn,
        prefix: String,
        content: Vec<u8>,
    },
    StreamStart {
        xid: i32,
        first_segment: bool,
    },
    StreamStop,
    StreamCommit {
        xid: i32,
        commit_lsn: Lsn,
        end_lsn: Lsn,
        commit_timestamp: i64,
    },
    StreamAbort {
        xid: i32,
        subxid: i32,
        abort_lsn: Option<Lsn>,
        tx_timestamp: Option<i64>,
    },
}

pub fn decode(ctx: &DecodeContext, mut buf: Bytes) -> Result<Message> {
    if buf.is_empty() {
        return Err(Error::fault("empty pgoutput message"));
    }
    let tag = buf.get_u8();
    Ok(match tag {
        b'B' => Message::Begin {
            final_lsn: Lsn::from(buf.get_u64() as u64),
            commit_timestamp: buf.get_i64(),
            xid: buf.get_i32(),
        },
        b'C' => {
            let _flags = buf.get_u8();
            Message::Commit {
                commit_lsn: Lsn::from(buf.get_u64()),
                end_lsn: Lsn::from(buf.get_u64()),
                commit_timestamp: buf.get_i64(),
            }
        }
        b'O' => Message::Origin {
            lsn: Lsn::from(buf.get_u64()),
            name: read_cstr(&mut buf)?,
        },
        b'R' => Message::Relation(decode_relation(&mut buf)?),
        b'Y' => Message::Type {
            oid: buf.get_i32(),
            namespace: read_cstr(&mut buf)?,
            name: read_cstr(&mut buf)?,
        },
        b'I' => {
            let xid = read_optional_xid(ctx, &mut buf);
            let relation_oid = buf.get_i32();
            expect_byte(&mut buf, b'N')?;
            Message::Insert {
                xid,
                relation_oid,
                new: decode_tuple_data(&mut buf)?,
            }
        }
        b'U' => {
            let xid = read_optional_xid(ctx, &mut buf);
            let relation_oid = buf.get_i32();
            let marker = buf.get_u8();
            let old = match marker {
                b'K' => Some(OldRow::Key(decode_tuple_data(&mut buf)?)),
                b'O' => Some(OldRow::Full(decode_tuple_data(&mut buf)?)),
                b'N' => None,
                other => return Err(Error::fault(format!("unexpected Update sub-tag {:?}", char::from(other)))),
            };
            if old.is_some() {
                expect_byte(&mut buf, b'N')?;
            }
            Message::Update {
                xid,
                relation_oid,
                old,
                new: decode_tuple_data(&mut buf)?,
            }
        }
        b'D' => {
            let xid = read_optional_xid(ctx, &mut buf);
            let relation_oid = buf.get_i32();
            let marker = buf.get_u8();
            let old = match marker {
                b'K' => OldRow::Key(decode_tuple_data(&mut buf)?),
                b'O' => OldRow::Full(decode_tuple_data(&mut buf)?),
                other => return Err(Error::fault(format!("unexpected Delete sub-tag {:?}", char::from(other)))),
            };
            Message::Delete { xid, relation_oid, old }
        }
        b'T' => {
            let xid = read_optional_xid(ctx, &mut buf);
            let n = buf.get_i32();
            let options = buf.get_u8();
            let relation_oids = (0..n).map(|_| buf.get_i32()).collect();
            Message::Truncate {
                xid,
                options,
                relation_oids,
            }
        }
        b'M' => {
            let xid = read_optional_xid(ctx, &mut buf);
            let flags = buf.get_u8();
            let lsn = Lsn::from(buf.get_u64());
            let prefix = read_cstr(&mut buf)?;
            let len = buf.get_i32();
            let content = buf.copy_to_bytes(len.max(0) as usize).to_vec();
            Message::LogicalMessage {
                xid,
                transactional: flags & 0x1 != 0,
                lsn,
                prefix,
                content,
            }
        }
        b'S' => Message::StreamStart {
            xid: buf.get_i32(),
            first_segment: buf.get_u8() != 0,
        },
        b'E' => Message::StreamStop,
        b'c' => {
            let _flags = buf.get_u8();
            Message::StreamCommit {
                xid: buf.get_i32(),
                commit_lsn: Lsn::from(buf.get_u64()),
                end_lsn: Lsn::from(buf.get_u64()),
                commit_timestamp: buf.get_i64(),
            }
        }
        b'A' => {
            let xid = buf.get_i32();
            let subxid = buf.get_i32();
            let (abort_lsn, tx_timestamp) = if ctx.protocol_version >= 4 && matches!(ctx.streaming, Streaming::Parallel) {
                (Some(Lsn::from(buf.get_u64())), Some(buf.get_i64()))
            } else {
                (None, None)
            };
            Message::StreamAbort {
                xid,
                subxid,
                abort_lsn,
                tx_timestamp,
            }
        }
        other => return Err(Error::unsupported(format!("unrecognized pgoutput message tag {:?}", char::from(other)))),
    })
}

fn read_optional_xid(ctx: &DecodeContext, buf: &mut Bytes) -> Option<i32> {
    if ctx.in_stream {
        Some(buf.get_i32())
    } else {
        None
    }
}

fn expect_byte(buf: &mut Bytes, expected: u8) -> Result<()> {
    let got = buf.get_u8();
    if got != expected {
        return Err(Error::fault(format!(
            "expected tuple marker {:?}, got {:?}",
            char::from(expected),
            char::from(got)
        )));
    }
    Ok(())
}

fn read_cstr(buf: &mut Bytes) -> Result<String> {
    use crate::buf_ext::BufExt;
    buf.pg_get_null_terminated_string()
}

fn decode_relation(buf: &mut Bytes) -> Result<Relation> {
    let oid = buf.get_i32();
    let namespace = read_cstr(buf)?;
    let name = read_cstr(buf)?;
    let replica_identity = ReplicaIdentity::from_byte(buf.get_u8())?;
    let n = buf.get_i16();
    let mut attributes = Vec::with_capacity(n.max(0) as usize);
    for _ in 0..n {
        let flags = buf.get_u8();
        let name = read_cstr(buf)?;
        let type_oid = buf.get_i32();
        let type_modifier = buf.get_i32();
        attributes.push(Attribute {
            name,
            type_oid,
            type_modifier,
            is_key: flags & 0x1 != 0,
        });
    }
    Ok(Relation {
        oid,
        namespace,
        name,
        replica_identity,
        attributes,
    })
}

fn decode_tuple_data(buf: &mut Bytes) -> Result<Vec<TupleColumn>> {
    let n = buf.get_i16();
    let mut columns = Vec::with_capacity(n.max(0) as usize);
    for _ in 0..n {
        let kind = buf.get_u8();
        columns.push(match kind {
            b'n' => TupleColumn::Null,
            b'u' => TupleColumn::UnchangedToast,
            b't' => {
                let len = buf.get_i32();
                TupleColumn::Text(buf.copy_to_bytes(len.max(0) as usize).to_vec())
            }
            b'b' => {
                let len = buf.get_i32();
                TupleColumn::Binary(buf.copy_to_bytes(len.max(0) as usize).to_vec())
            }
            other => return Err(Error::fault(format!("unrecognized tuple column kind {:?}", char::from(other)))),
        });
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn ctx(in_stream: bool) -> DecodeContext {
        DecodeContext {
            protocol_version: 2,
            streaming: Streaming::Off,
            in_stream,
        }
    }

    #[test]
    fn decodes_begin() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'B');
        buf.put_u64(0x1234);
        buf.put_i64(555);
        buf.put_i32(42);
        let msg = decode(&ctx(false), buf.freeze()).unwrap();
        assert_eq!(
            msg,
            Message::Begin {
                final_lsn: Lsn::from(0x1234u64),
                commit_timestamp: 555,
                xid: 42,
            }
        );
    }

    #[test]
    fn decodes_insert_without_stream_xid() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'I');
        buf.put_i32(7); // relation oid
        buf.put_u8(b'N');
        buf.put_i16(1); // 1 column
        buf.put_u8(b'n'); // NULL
        let msg = decode(&ctx(false), buf.freeze()).unwrap();
        assert_eq!(
            msg,
            Message::Insert {
                xid: None,
                relation_oid: 7,
                new: vec![TupleColumn::Null],
            }
        );
    }

    #[test]
    fn decodes_insert_with_stream_xid() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'I');
        buf.put_i32(99); // xid
        buf.put_i32(7);
        buf.put_u8(b'N');
        buf.put_i16(0);
        let msg = decode(&ctx(true), buf.freeze()).unwrap();
        assert_eq!(
            msg,
            Message::Insert {
                xid: Some(99),
                relation_oid: 7,
                new: vec![],
            }
        );
    }

    #[test]
    fn decodes_update_with_full_old_row() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'U');
        buf.put_i32(7);
        buf.put_u8(b'O');
        buf.put_i16(1);
        buf.put_u8(b't');
        buf.put_i32(1);
        buf.put_slice(b"1");
        buf.put_u8(b'N');
        buf.put_i16(1);
        buf.put_u8(b't');
        buf.put_i32(1);
        buf.put_slice(b"2");
        let msg = decode(&ctx(false), buf.freeze()).unwrap();
        assert_eq!(
            msg,
            Message::Update {
                xid: None,
                relation_oid: 7,
                old: Some(OldRow::Full(vec![TupleColumn::Text(b"1".to_vec())])),
                new: vec![TupleColumn::Text(b"2".to_vec())],
            }
        );
    }

    #[test]
    fn stream_abort_trailer_requires_v4_parallel() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'A');
        buf.put_i32(1);
        buf.put_i32(2);
        let msg = decode(
            &DecodeContext {
                protocol_version: 2,
                streaming: Streaming::On,
                in_stream: true,
            },
            buf.freeze(),
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::StreamAbort {
                xid: 1,
                subxid: 2,
                abort_lsn: None,
                tx_timestamp: None,
            }
        );

        let mut buf = BytesMut::new();
        buf.put_u8(b'A');
        buf.put_i32(1);
        buf.put_i32(2);
        buf.put_u64(10);
        buf.put_i64(20);
        let msg = decode(
            &DecodeContext {
                protocol_version: 4,
                streaming: Streaming::Parallel,
                in_stream: true,
            },
            buf.freeze(),
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::StreamAbort {
                xid: 1,
                subxid: 2,
                abort_lsn: Some(Lsn::from(10u64)),
                tx_timestamp: Some(20),
            }
        );
    }
}
