use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::oid::Oid;
use crate::lsn::Lsn;

/// A decoded/encodable PostgreSQL value (Design Notes: "Polymorphic value encoding").
///
/// Replaces protocol-specific dispatch with a single tagged variant; `encode`
/// becomes one `match` over `Value` instead of per-type overloads scattered across
/// call sites.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Jsonb(serde_json::Value),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Time-of-day with a UTC offset in seconds, west-negative per `chrono` convention
    /// (the wire format stores it sign-inverted, east-negative; see `codec::temporal`).
    TimeTz(NaiveTime, i32),
    Timestamp(Timestamp),
    TimestampTz(TimestampTz),
    Interval(Interval),
    /// Cents, i.e. the wire int64 divided by 100 is the major currency unit.
    Money(i64),
    Inet(Inet),
    Point(Point),
    LSeg([Point; 2]),
    Path { closed: bool, points: Vec<Point> },
    BoxType { high: Point, low: Point },
    Polygon(Vec<Point>),
    Line { a: f64, b: f64, c: f64 },
    Circle { center: Point, radius: f64 },
    PgLsn(Lsn),
    TsVector(Vec<String>),
    Range(Box<Range>),
    Array(Vec<Value>),
    /// A composite/record value installed via `typtype = 'c'` fallback (§4.2):
    /// decoded as an ordered list of (already-decoded) field values.
    Record(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// `timestamp` (no time zone), with the ±infinity sentinels PostgreSQL represents
/// as `INT64_MIN`/`INT64_MAX` on the wire (§4.2 "+∞/−∞ timestamps").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    NegInfinity,
    PosInfinity,
    Value(NaiveDateTime),
}

/// `timestamptz`, same infinity handling as `Timestamp` but UTC-anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampTz {
    NegInfinity,
    PosInfinity,
    Value(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

impl Interval {
    /// §9: "zero-period interval collapses to zero-duration" — all three
    /// components collapse independently; there is no canonicalization across
    /// months/days/microseconds (PostgreSQL does not canonicalize either).
    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.days == 0 && self.microseconds == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inet {
    pub addr: std::net::IpAddr,
    pub netmask_bits: u8,
    /// `true` for `cidr`, `false` for `inet`. This crate only encodes/decodes the
    /// `inet` OID (869); the field is retained because the wire format is shared.
    pub is_cidr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

bitflags::bitflags! {
    /// Range flags byte (§4.2 "Range"): bit layout is part of the wire format, not
    /// an internal design choice, hence the explicit bit values rather than an enum.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RangeFlags: u8 {
        const EMPTY          = 0b0000_0001;
        const LOWER_INCLUSIVE = 0b0000_0010;
        const UPPER_INCLUSIVE = 0b0000_0100;
        const LOWER_INFINITE  = 0b0000_1000;
        const UPPER_INFINITE  = 0b0001_0000;
        const CONTAINS_EMPTY  = 0b1000_0000;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub flags: RangeFlags,
    pub lower: Option<Value>,
    pub upper: Option<Value>,
}

impl Range {
    pub fn is_empty(&self) -> bool {
        self.flags.contains(RangeFlags::EMPTY)
    }
}
