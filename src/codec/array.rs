//! Array wire format (§4.2 "Arrays"): `{ndim:int32, has_nulls:int32,
//! element_oid:int32, dim_len:int32, lower_bound:int32}` followed by
//! `{len:int32, bytes}` per element (`len = -1` for a NULL element).
//!
//! The spec models a single dimension/lower-bound pair, so this codec supports
//! `ndim ∈ {0, 1}` — the shapes a CDC client actually observes for scalar-array
//! columns. No teacher precedent (the teacher never decoded binary columns at all).

use bytes::{Buf, BufMut, BytesMut};

use super::oid::Oid;
use super::value::Value;
use crate::error::{Error, Result};

pub fn encode(
    elements: &[Value],
    element_oid: Oid,
    mut encode_elem: impl FnMut(&Value) -> Result<(Oid, Vec<u8>)>,
) -> Result<Vec<u8>> {
    let mut out = BytesMut::new();
    if elements.is_empty() {
        out.put_i32(0); // ndim
        out.put_i32(0); // has_nulls
        out.put_i32(element_oid);
        return Ok(out.to_vec());
    }

    let has_nulls = elements.iter().any(Value::is_null);
    out.put_i32(1);
    out.put_i32(has_nulls as i32);
    out.put_i32(element_oid);
    out.put_i32(elements.len() as i32);
    out.put_i32(1); // lower_bound

    for el in elements {
        if el.is_null() {
            out.put_i32(-1);
            continue;
        }
        let (_, bytes) = encode_elem(el)?;
        out.put_i32(bytes.len() as i32);
        out.put_slice(&bytes);
    }

    Ok(out.to_vec())
}

pub fn decode(mut buf: &[u8], mut decode_elem: impl FnMut(Oid, &[u8]) -> Result<Value>) -> Result<Vec<Value>> {
    if buf.remaining() < 12 {
        return Err(Error::fault("truncated array header"));
    }
    let ndim = buf.get_i32();
    let _has_nulls = buf.get_i32();
    let element_oid = buf.get_i32();

    if ndim == 0 {
        return Ok(Vec::new());
    }
    if ndim != 1 {
        return Err(Error::unsupported(format!(
            "arrays of {ndim} dimensions are not supported"
        )));
    }
    if buf.remaining() < 8 {
        return Err(Error::fault("truncated array dimension header"));
    }
    let dim_len = buf.get_i32();
    let _lower_bound = buf.get_i32();

    let mut elements = Vec::with_capacity(dim_len.max(0) as usize);
    for _ in 0..dim_len {
        if buf.remaining() < 4 {
            return Err(Error::fault("truncated array element length"));
        }
        let len = buf.get_i32();
        if len < 0 {
            elements.push(Value::Null);
            continue;
        }
        let len = len as usize;
        if buf.remaining() < len {
            return Err(Error::fault("truncated array element"));
        }
        let (head, rest) = buf.split_at(len);
        elements.push(decode_elem(element_oid, head)?);
        buf = rest;
    }

    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_nulls() {
        let elements = vec![Value::Int4(1), Value::Null, Value::Int4(3)];
        let encoded = encode(&elements, super::super::oid::INT4, |v| match v {
            Value::Int4(n) => Ok((super::super::oid::INT4, n.to_be_bytes().to_vec())),
            _ => unreachable!(),
        })
        .unwrap();

        let decoded = decode(&encoded, |_oid, bytes| {
            Ok(Value::Int4(i32::from_be_bytes(bytes.try_into().unwrap())))
        })
        .unwrap();

        assert_eq!(decoded, elements);
    }

    #[test]
    fn empty_array_has_zero_ndim() {
        let encoded = encode(&[], super::super::oid::TEXT, |_| unreachable!()).unwrap();
        let decoded = decode(&encoded, |_, _| unreachable!()).unwrap();
        assert!(decoded.is_empty());
    }
}
