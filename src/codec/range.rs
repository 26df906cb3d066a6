//! Range wire format (§4.2 "Range"): one flags byte followed by the lower and
//! upper bounds in order, each as `{len:int32, bytes}` when present (omitted
//! entirely when the corresponding infinite flag is set).

use bytes::{Buf, BufMut, BytesMut};

use super::oid::Oid;
use super::value::{Range, RangeFlags, Value};
use crate::error::{Error, Result};

pub fn encode(range: &Range, mut encode_bound: impl FnMut(&Value) -> Result<(Oid, Vec<u8>)>) -> Result<Vec<u8>> {
    let mut out = BytesMut::new();
    out.put_u8(range.flags.bits());

    if range.is_empty() {
        return Ok(out.to_vec());
    }

    if !range.flags.contains(RangeFlags::LOWER_INFINITE) {
        let lower = range
            .lower
            .as_ref()
            .ok_or_else(|| Error::incorrect("range lower bound missing but not marked infinite"))?;
        let (_, bytes) = encode_bound(lower)?;
        out.put_i32(bytes.len() as i32);
        out.put_slice(&bytes);
    }
    if !range.flags.contains(RangeFlags::UPPER_INFINITE) {
        let upper = range
            .upper
            .as_ref()
            .ok_or_else(|| Error::incorrect("range upper bound missing but not marked infinite"))?;
        let (_, bytes) = encode_bound(upper)?;
        out.put_i32(bytes.len() as i32);
        out.put_slice(&bytes);
    }

    Ok(out.to_vec())
}

pub fn decode(mut buf: &[u8], mut decode_bound: impl FnMut(&[u8]) -> Result<Value>) -> Result<Range> {
    if buf.remaining() < 1 {
        return Err(Error::fault("truncated range flags"));
    }
    let flags = RangeFlags::from_bits_truncate(buf.get_u8());

    if flags.contains(RangeFlags::EMPTY) {
        return Ok(Range {
            flags,
            lower: None,
            upper: None,
        });
    }

    let read_bound = |buf: &mut &[u8]| -> Result<Value> {
        if buf.remaining() < 4 {
            return Err(Error::fault("truncated range bound length"));
        }
        let len = buf.get_i32();
        if len < 0 {
            return Err(Error::fault("negative range bound length"));
        }
        let len = len as usize;
        if buf.remaining() < len {
            return Err(Error::fault("truncated range bound"));
        }
        let (head, rest) = buf.split_at(len);
        let value = decode_bound(head)?;
        *buf = rest;
        Ok(value)
    };

    let lower = if flags.contains(RangeFlags::LOWER_INFINITE) {
        None
    } else {
        Some(read_bound(&mut buf)?)
    };
    let upper = if flags.contains(RangeFlags::UPPER_INFINITE) {
        None
    } else {
        Some(read_bound(&mut buf)?)
    };

    Ok(Range { flags, lower, upper })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bounded_range() {
        let range = Range {
            flags: RangeFlags::LOWER_INCLUSIVE,
            lower: Some(Value::Int4(1)),
            upper: Some(Value::Int4(10)),
        };
        let encoded = encode(&range, |v| match v {
            Value::Int4(n) => Ok((super::super::oid::INT4, n.to_be_bytes().to_vec())),
            _ => unreachable!(),
        })
        .unwrap();
        let decoded = decode(&encoded, |bytes| Ok(Value::Int4(i32::from_be_bytes(bytes.try_into().unwrap())))).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn empty_range_round_trips() {
        let range = Range {
            flags: RangeFlags::EMPTY,
            lower: None,
            upper: None,
        };
        let encoded = encode(&range, |_| unreachable!()).unwrap();
        let decoded = decode(&encoded, |_| unreachable!()).unwrap();
        assert_eq!(decoded, range);
    }

    #[test]
    fn unbounded_range_round_trips() {
        let range = Range {
            flags: RangeFlags::LOWER_INFINITE | RangeFlags::UPPER_INFINITE,
            lower: None,
            upper: None,
        };
        let encoded = encode(&range, |_| unreachable!()).unwrap();
        let decoded = decode(&encoded, |_| unreachable!()).unwrap();
        assert_eq!(decoded, range);
    }
}
