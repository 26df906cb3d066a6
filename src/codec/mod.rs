//! Binary codec (C2): converts between this crate's `Value` and the wire bytes
//! tagged by a type OID, plus a registry so callers can teach it about types it
//! does not ship built-in support for (§4.2 "Unknown user types").

pub mod array;
pub mod geometric;
pub mod numeric;
pub mod oid;
pub mod range;
pub mod temporal;
pub mod value;

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lsn::Lsn;
use oid::Oid;
use value::{Inet, Value};

const JSONB_VERSION: u8 = 1;
const AF_INET: u8 = 2;
const AF_INET6: u8 = 3;

/// Encodes a `Value` to its binary wire representation, returning the OID it
/// was encoded as (the OID the caller should advertise in `Bind`/`RowDescription`).
pub fn encode(value: &Value, oid: Oid) -> Result<Vec<u8>> {
    let mut out = BytesMut::new();
    match value {
        Value::Null => return Err(Error::incorrect("cannot encode a NULL value body; omit the field instead")),
        Value::Bool(b) => out.put_u8(*b as u8),
        Value::Int2(n) => out.put_i16(*n),
        Value::Int4(n) => out.put_i32(*n),
        Value::Int8(n) => out.put_i64(*n),
        Value::Float4(f) => out.put_f32(*f),
        Value::Float8(f) => out.put_f64(*f),
        Value::Numeric(d) => numeric::encode(d, &mut out)?,
        Value::Text(s) => out.put_slice(s.as_bytes()),
        Value::Bytes(b) => out.put_slice(b),
        Value::Json(v) => out.put_slice(serde_json::to_vec(v).map_err(|e| Error::incorrect(e.to_string()))?.as_slice()),
        Value::Jsonb(v) => {
            out.put_u8(JSONB_VERSION);
            out.put_slice(serde_json::to_vec(v).map_err(|e| Error::incorrect(e.to_string()))?.as_slice());
        }
        Value::Uuid(u) => out.put_slice(u.as_bytes()),
        Value::Date(d) => temporal::encode_date(*d, &mut out),
        Value::Time(t) => temporal::encode_time(*t, &mut out),
        Value::TimeTz(t, offset) => temporal::encode_timetz(*t, *offset, &mut out),
        Value::Timestamp(ts) => temporal::encode_timestamp(*ts, &mut out),
        Value::TimestampTz(ts) => temporal::encode_timestamptz(*ts, &mut out),
        Value::Interval(iv) => temporal::encode_interval(*iv, &mut out),
        Value::Money(cents) => out.put_i64(*cents),
        Value::Inet(inet) => encode_inet(inet, &mut out),
        Value::Point(p) => geometric::encode_point(p, &mut out),
        Value::LSeg(points) => geometric::encode_lseg(points, &mut out),
        Value::Path { closed, points } => geometric::encode_path(*closed, points, &mut out),
        Value::BoxType { high, low } => geometric::encode_box(high, low, &mut out),
        Value::Polygon(points) => geometric::encode_polygon(points, &mut out),
        Value::Line { a, b, c } => geometric::encode_line(*a, *b, *c, &mut out),
        Value::Circle { center, radius } => geometric::encode_circle(center, *radius, &mut out),
        Value::PgLsn(lsn) => out.put_u64(u64::from(*lsn)),
        Value::TsVector(lexemes) => encode_tsvector(lexemes, &mut out),
        Value::Range(range) => {
            let bytes = range::encode(range, |v| {
                let elem_oid = value_default_oid(v)?;
                Ok((elem_oid, encode(v, elem_oid)?))
            })?;
            out.put_slice(&bytes);
        }
        Value::Array(elements) => {
            let element_oid = oid::element_oid_of(oid).unwrap_or(oid::TEXT);
            let bytes = array::encode(elements, element_oid, |v| Ok((element_oid, encode(v, element_oid)?)))?;
            out.put_slice(&bytes);
        }
        Value::Record(_) => return Err(Error::unsupported("encoding composite/record values is not supported")),
    }
    Ok(out.to_vec())
}

/// Decodes a binary value body tagged with `oid` into a `Value`.
pub fn decode(oid: Oid, buf: &[u8]) -> Result<Value> {
    Ok(match oid {
        oid::BOOL => Value::Bool(require(buf, 1, "bool")?[0] != 0),
        oid::INT2 => Value::Int2(i16::from_be_bytes(require(buf, 2, "int2")?.try_into().unwrap())),
        oid::INT4 | oid::OID | oid::XID => {
            Value::Int4(i32::from_be_bytes(require(buf, 4, "int4")?.try_into().unwrap()))
        }
        oid::INT8 => Value::Int8(i64::from_be_bytes(require(buf, 8, "int8")?.try_into().unwrap())),
        oid::FLOAT4 => Value::Float4(f32::from_be_bytes(require(buf, 4, "float4")?.try_into().unwrap())),
        oid::FLOAT8 => Value::Float8(f64::from_be_bytes(require(buf, 8, "float8")?.try_into().unwrap())),
        oid::NUMERIC => Value::Numeric(numeric::decode(buf)?),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR => {
            Value::Text(String::from_utf8(buf.to_vec()).map_err(|e| Error::fault(e.to_string()))?)
        }
        oid::BYTEA => Value::Bytes(buf.to_vec()),
        oid::JSON => Value::Json(serde_json::from_slice(buf).map_err(|e| Error::incorrect(e.to_string()))?),
        oid::JSONB => {
            let body = require(buf, 1, "jsonb version byte")?;
            if body[0] != JSONB_VERSION {
                return Err(Error::unsupported(format!("unknown jsonb wire version {}", body[0])));
            }
            Value::Jsonb(serde_json::from_slice(&buf[1..]).map_err(|e| Error::incorrect(e.to_string()))?)
        }
        oid::UUID => Value::Uuid(Uuid::from_slice(require(buf, 16, "uuid")?).map_err(|e| Error::fault(e.to_string()))?),
        oid::DATE => Value::Date(temporal::decode_date(buf)?),
        oid::TIME => Value::Time(temporal::decode_time(buf)?),
        oid::TIMETZ => {
            let (time, offset) = temporal::decode_timetz(buf)?;
            Value::TimeTz(time, offset)
        }
        oid::TIMESTAMP => Value::Timestamp(temporal::decode_timestamp(buf)?),
        oid::TIMESTAMPTZ => Value::TimestampTz(temporal::decode_timestamptz(buf)?),
        oid::INTERVAL => Value::Interval(temporal::decode_interval(buf)?),
        oid::MONEY => Value::Money(i64::from_be_bytes(require(buf, 8, "money")?.try_into().unwrap())),
        oid::INET => Value::Inet(decode_inet(buf)?),
        oid::POINT => {
            let mut slice = buf;
            Value::Point(geometric::decode_point(&mut slice)?)
        }
        oid::LSEG => Value::LSeg(geometric::decode_lseg(buf)?),
        oid::PATH => {
            let (closed, points) = geometric::decode_path(buf)?;
            Value::Path { closed, points }
        }
        oid::BOX => {
            let (high, low) = geometric::decode_box(buf)?;
            Value::BoxType { high, low }
        }
        oid::POLYGON => Value::Polygon(geometric::decode_polygon(buf)?),
        oid::LINE => {
            let (a, b, c) = geometric::decode_line(buf)?;
            Value::Line { a, b, c }
        }
        oid::CIRCLE => {
            let (center, radius) = geometric::decode_circle(buf)?;
            Value::Circle { center, radius }
        }
        oid::PG_LSN => Value::PgLsn(Lsn::from(u64::from_be_bytes(require(buf, 8, "pg_lsn")?.try_into().unwrap()))),
        oid::TSVECTOR => Value::TsVector(decode_tsvector(buf)?),
        oid::INT4RANGE | oid::INT8RANGE | oid::NUMRANGE | oid::TSRANGE | oid::TSTZRANGE | oid::DATERANGE => {
            let element_oid = range_element_oid(oid);
            Value::Range(Box::new(range::decode(buf, |bytes| decode(element_oid, bytes))?))
        }
        _ => {
            if oid::element_oid_of(oid).is_some() {
                Value::Array(array::decode(buf, |elem_oid, bytes| decode(elem_oid, bytes))?)
            } else {
                return Err(Error::unsupported(format!("no built-in decoder for type OID {oid}")));
            }
        }
    })
}

fn range_element_oid(range_oid: Oid) -> Oid {
    match range_oid {
        oid::INT4RANGE => oid::INT4,
        oid::INT8RANGE => oid::INT8,
        oid::NUMRANGE => oid::NUMERIC,
        oid::TSRANGE => oid::TIMESTAMP,
        oid::TSTZRANGE => oid::TIMESTAMPTZ,
        oid::DATERANGE => oid::DATE,
        _ => oid::TEXT,
    }
}

/// Best-effort OID to tag a `Value` with when encoding array/range elements
/// whose element OID was not supplied by the caller's `RowDescription`.
pub(crate) fn value_default_oid(value: &Value) -> Result<Oid> {
    Ok(match value {
        Value::Bool(_) => oid::BOOL,
        Value::Int2(_) => oid::INT2,
        Value::Int4(_) => oid::INT4,
        Value::Int8(_) => oid::INT8,
        Value::Float4(_) => oid::FLOAT4,
        Value::Float8(_) => oid::FLOAT8,
        Value::Numeric(_) => oid::NUMERIC,
        Value::Text(_) => oid::TEXT,
        Value::Date(_) => oid::DATE,
        Value::Timestamp(_) => oid::TIMESTAMP,
        Value::TimestampTz(_) => oid::TIMESTAMPTZ,
        _ => return Err(Error::unsupported("cannot infer a default OID for this value type")),
    })
}

fn require<'a>(buf: &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(Error::fault(format!("truncated {what}")));
    }
    Ok(&buf[..len])
}

fn encode_inet(inet: &Inet, out: &mut BytesMut) {
    let (family, addr_len) = match inet.addr {
        std::net::IpAddr::V4(_) => (AF_INET, 4),
        std::net::IpAddr::V6(_) => (AF_INET6, 16),
    };
    out.put_u8(family);
    out.put_u8(inet.netmask_bits);
    out.put_u8(inet.is_cidr as u8);
    out.put_u8(addr_len);
    match inet.addr {
        std::net::IpAddr::V4(v4) => out.put_slice(&v4.octets()),
        std::net::IpAddr::V6(v6) => out.put_slice(&v6.octets()),
    }
}

fn decode_inet(buf: &[u8]) -> Result<Inet> {
    let header = require(buf, 4, "inet header")?;
    let family = header[0];
    let netmask_bits = header[1];
    let is_cidr = header[2] != 0;
    let addr_len = header[3] as usize;
    let addr_bytes = require(&buf[4..], addr_len, "inet address")?;
    let addr = match family {
        AF_INET if addr_len == 4 => std::net::IpAddr::V4(std::net::Ipv4Addr::new(
            addr_bytes[0],
            addr_bytes[1],
            addr_bytes[2],
            addr_bytes[3],
        )),
        AF_INET6 if addr_len == 16 => {
            let octets: [u8; 16] = addr_bytes.try_into().unwrap();
            std::net::IpAddr::V6(std::net::Ipv6Addr::from(octets))
        }
        _ => return Err(Error::fault(format!("unrecognized inet family/length {family}/{addr_len}"))),
    };
    Ok(Inet {
        addr,
        netmask_bits,
        is_cidr,
    })
}

/// `tsvector` carries per-lexeme position/weight lists; this crate only surfaces
/// the lexeme text (§9), so positions are parsed and discarded.
fn encode_tsvector(lexemes: &[String], out: &mut BytesMut) {
    out.put_i32(lexemes.len() as i32);
    for lexeme in lexemes {
        out.put_slice(lexeme.as_bytes());
        out.put_u8(0);
        out.put_u16(0); // npos
    }
}

fn decode_tsvector(mut buf: &[u8]) -> Result<Vec<String>> {
    if buf.remaining() < 4 {
        return Err(Error::fault("truncated tsvector header"));
    }
    let nentries = buf.get_i32();
    let mut lexemes = Vec::with_capacity(nentries.max(0) as usize);
    for _ in 0..nentries {
        let nul = buf.iter().position(|&b| b == 0).ok_or_else(|| Error::fault("unterminated tsvector lexeme"))?;
        let lexeme = String::from_utf8(buf[..nul].to_vec()).map_err(|e| Error::fault(e.to_string()))?;
        buf.advance(nul + 1);
        if buf.remaining() < 2 {
            return Err(Error::fault("truncated tsvector position count"));
        }
        let npos = buf.get_u16();
        let skip = npos as usize * 2;
        if buf.remaining() < skip {
            return Err(Error::fault("truncated tsvector positions"));
        }
        buf.advance(skip);
        lexemes.push(lexeme);
    }
    Ok(lexemes)
}

/// Maps OIDs this crate has no built-in decoder for to a caller-supplied decode
/// function, keyed by OID (§4.2 "Unknown user types": looked up once per
/// session after a catalog query resolves the type's base representation).
#[derive(Default)]
pub struct DecoderRegistry {
    extra: HashMap<Oid, Box<dyn Fn(&[u8]) -> Result<Value> + Send + Sync>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, oid: Oid, decoder: impl Fn(&[u8]) -> Result<Value> + Send + Sync + 'static) {
        self.extra.insert(oid, Box::new(decoder));
    }

    /// Installs `oid` as a plain alias of `base_oid`'s built-in wire format
    /// (e.g. `citext` aliasing `text`, per §4.2's "unknown user types").
    pub fn register_alias(&mut self, oid: Oid, base_oid: Oid) {
        self.register(oid, move |buf| decode(base_oid, buf));
    }

    pub fn decode(&self, oid: Oid, buf: &[u8]) -> Result<Value> {
        match decode(oid, buf) {
            Ok(value) => Ok(value),
            Err(Error::Unsupported(_)) => match self.extra.get(&oid) {
                Some(decoder) => decoder(buf),
                None => Err(Error::unsupported(format!("no decoder registered for type OID {oid}"))),
            },
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_bool_int_and_text() {
        for (value, oid) in [
            (Value::Bool(true), oid::BOOL),
            (Value::Int4(42), oid::INT4),
            (Value::Text("hello".to_string()), oid::TEXT),
        ] {
            let bytes = encode(&value, oid).unwrap();
            assert_eq!(decode(oid, &bytes).unwrap(), value);
        }
    }

    #[test]
    fn round_trips_numeric_via_dispatch() {
        let value = Value::Numeric(rust_decimal::Decimal::from_str("12.50").unwrap());
        let bytes = encode(&value, oid::NUMERIC).unwrap();
        assert_eq!(decode(oid::NUMERIC, &bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_uuid() {
        let value = Value::Uuid(Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0));
        let bytes = encode(&value, oid::UUID).unwrap();
        assert_eq!(decode(oid::UUID, &bytes).unwrap(), value);
    }

    #[test]
    fn round_trips_inet_v4() {
        let value = Value::Inet(Inet {
            addr: std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1)),
            netmask_bits: 24,
            is_cidr: false,
        });
        let bytes = encode(&value, oid::INET).unwrap();
        assert_eq!(decode(oid::INET, &bytes).unwrap(), value);
    }

    #[test]
    fn unknown_oid_is_unsupported_without_registry_entry() {
        let err = decode(999_999, &[]).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn registry_falls_back_to_registered_decoder() {
        let mut registry = DecoderRegistry::new();
        registry.register(999_999, |_buf| Ok(Value::Text("custom".to_string())));
        assert_eq!(registry.decode(999_999, &[]).unwrap(), Value::Text("custom".to_string()));
    }
}
