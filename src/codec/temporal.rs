//! Date/time wire formats (§4.2 "Date/time types"). All of PostgreSQL's binary
//! date/time types are integer offsets from the Postgres epoch (2000-01-01),
//! not the Unix epoch `chrono` otherwise assumes, so every function here first
//! re-bases against `PG_EPOCH`.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::value::{Interval, Timestamp, TimestampTz};
use crate::error::{Error, Result};

fn pg_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

pub fn encode_date(date: NaiveDate, out: &mut BytesMut) {
    let days = (date - pg_epoch_date()).num_days();
    out.put_i32(days as i32);
}

pub fn decode_date(buf: &[u8]) -> Result<NaiveDate> {
    if buf.len() < 4 {
        return Err(Error::fault("truncated date"));
    }
    let days = i32::from_be_bytes(buf[..4].try_into().unwrap());
    pg_epoch_date()
        .checked_add_signed(Duration::days(days as i64))
        .ok_or_else(|| Error::fault("date out of range"))
}

pub fn encode_time(time: NaiveTime, out: &mut BytesMut) {
    let micros = time_to_micros(time);
    out.put_i64(micros);
}

pub fn decode_time(buf: &[u8]) -> Result<NaiveTime> {
    if buf.len() < 8 {
        return Err(Error::fault("truncated time"));
    }
    let micros = i64::from_be_bytes(buf[..8].try_into().unwrap());
    micros_to_time(micros)
}

fn time_to_micros(time: NaiveTime) -> i64 {
    let since_midnight = time - NaiveTime::from_hms_opt(0, 0, 0).unwrap();
    since_midnight.num_microseconds().unwrap_or(0)
}

fn micros_to_time(micros: i64) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(0, 0, 0)
        .unwrap()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| Error::fault("time out of range"))
}

/// `timetz`: `{time:int64 micros, zone:int32 seconds}`. The wire's zone is
/// west-positive (sign-inverted from `chrono`'s east-positive
/// `FixedOffset::local_minus_utc`), matching `Value::TimeTz`'s documented convention.
pub fn encode_timetz(time: NaiveTime, offset_east_seconds: i32, out: &mut BytesMut) {
    out.put_i64(time_to_micros(time));
    out.put_i32(-offset_east_seconds);
}

pub fn decode_timetz(buf: &[u8]) -> Result<(NaiveTime, i32)> {
    if buf.len() < 12 {
        return Err(Error::fault("truncated timetz"));
    }
    let micros = i64::from_be_bytes(buf[..8].try_into().unwrap());
    let wire_zone = i32::from_be_bytes(buf[8..12].try_into().unwrap());
    Ok((micros_to_time(micros)?, -wire_zone))
}

pub fn encode_timestamp(ts: Timestamp, out: &mut BytesMut) {
    let micros = match ts {
        Timestamp::NegInfinity => i64::MIN,
        Timestamp::PosInfinity => i64::MAX,
        Timestamp::Value(dt) => datetime_to_micros(dt),
    };
    out.put_i64(micros);
}

pub fn decode_timestamp(buf: &[u8]) -> Result<Timestamp> {
    if buf.len() < 8 {
        return Err(Error::fault("truncated timestamp"));
    }
    let micros = i64::from_be_bytes(buf[..8].try_into().unwrap());
    Ok(match micros {
        i64::MIN => Timestamp::NegInfinity,
        i64::MAX => Timestamp::PosInfinity,
        _ => Timestamp::Value(micros_to_datetime(micros)?),
    })
}

pub fn encode_timestamptz(ts: TimestampTz, out: &mut BytesMut) {
    let micros = match ts {
        TimestampTz::NegInfinity => i64::MIN,
        TimestampTz::PosInfinity => i64::MAX,
        TimestampTz::Value(dt) => datetime_to_micros(dt.naive_utc()),
    };
    out.put_i64(micros);
}

pub fn decode_timestamptz(buf: &[u8]) -> Result<TimestampTz> {
    if buf.len() < 8 {
        return Err(Error::fault("truncated timestamptz"));
    }
    let micros = i64::from_be_bytes(buf[..8].try_into().unwrap());
    Ok(match micros {
        i64::MIN => TimestampTz::NegInfinity,
        i64::MAX => TimestampTz::PosInfinity,
        _ => TimestampTz::Value(Utc.from_utc_datetime(&micros_to_datetime(micros)?)),
    })
}

fn datetime_to_micros(dt: NaiveDateTime) -> i64 {
    (dt - pg_epoch()).num_microseconds().unwrap_or(0)
}

fn micros_to_datetime(micros: i64) -> Result<NaiveDateTime> {
    pg_epoch()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| Error::fault("timestamp out of range"))
}

/// `interval`: `{microseconds:int64, days:int32, months:int32}`, the three
/// components stored independently with no canonicalization (§9).
pub fn encode_interval(interval: Interval, out: &mut BytesMut) {
    out.put_i64(interval.microseconds);
    out.put_i32(interval.days);
    out.put_i32(interval.months);
}

pub fn decode_interval(buf: &[u8]) -> Result<Interval> {
    if buf.len() < 16 {
        return Err(Error::fault("truncated interval"));
    }
    let microseconds = i64::from_be_bytes(buf[..8].try_into().unwrap());
    let days = i32::from_be_bytes(buf[8..12].try_into().unwrap());
    let months = i32::from_be_bytes(buf[12..16].try_into().unwrap());
    Ok(Interval { months, days, microseconds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn round_trips_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let mut buf = BytesMut::new();
        encode_date(date, &mut buf);
        assert_eq!(decode_date(&buf).unwrap(), date);
    }

    #[test]
    fn round_trips_timestamp_value() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_micro_opt(12, 30, 0, 500_000)
            .unwrap();
        let mut buf = BytesMut::new();
        encode_timestamp(Timestamp::Value(dt), &mut buf);
        assert_eq!(decode_timestamp(&buf).unwrap(), Timestamp::Value(dt));
    }

    #[test]
    fn timestamp_infinity_sentinels_round_trip() {
        let mut buf = BytesMut::new();
        encode_timestamp(Timestamp::PosInfinity, &mut buf);
        assert_eq!(decode_timestamp(&buf).unwrap(), Timestamp::PosInfinity);

        let mut buf = BytesMut::new();
        encode_timestamp(Timestamp::NegInfinity, &mut buf);
        assert_eq!(decode_timestamp(&buf).unwrap(), Timestamp::NegInfinity);
    }

    #[test]
    fn round_trips_interval() {
        let interval = Interval {
            months: 14,
            days: 3,
            microseconds: 1_500_000,
        };
        let mut buf = BytesMut::new();
        encode_interval(interval, &mut buf);
        assert_eq!(decode_interval(&buf).unwrap(), interval);
        assert!(!interval.is_zero());
        assert!(Interval::default().is_zero());
    }
}
