//! PostgreSQL `numeric` binary codec (§4.2 "Numeric").
//!
//! Wire format: `int16 ndigits | int16 weight | int16 sign | int16 dscale |
//! int16[ndigits] digits`, digits in base 10000, `weight` is the base-10000
//! exponent of the first digit, `sign` is `0x0000` positive / `0x4000` negative /
//! `0xC000` NaN. A value of `ndigits = 0` is the canonical zero.
//!
//! This crate has no teacher precedent for binary numeric handling (the teacher
//! only ever saw text-decoded rows), so the digit-grouping math here is written
//! directly from the wire format description in §4.2 and PostgreSQL's own
//! `src/backend/utils/adt/numeric.c` layout, using `rust_decimal::Decimal` as the
//! application-level representation (§9, Open Question 3: arbitrary-precision
//! `numeric` beyond `Decimal`'s ~28 digits is `Unsupported` on encode).

use bytes::{Buf, BufMut, BytesMut};
use rust_decimal::Decimal;

use crate::error::{Error, Result};

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;

pub fn decode(mut buf: &[u8]) -> Result<Decimal> {
    if buf.len() < 8 {
        return Err(Error::fault("truncated numeric header"));
    }
    let ndigits = buf.get_u16();
    let weight = buf.get_i16();
    let sign = buf.get_u16();
    let dscale = buf.get_u16();

    if sign == SIGN_NAN {
        return Err(Error::unsupported("numeric NaN has no Decimal representation"));
    }
    if sign != SIGN_POSITIVE && sign != SIGN_NEGATIVE {
        return Err(Error::fault(format!("invalid numeric sign byte {sign:#06x}")));
    }

    if buf.len() < ndigits as usize * 2 {
        return Err(Error::fault("truncated numeric digits"));
    }
    let digits: Vec<i16> = (0..ndigits).map(|_| buf.get_i16()).collect();

    if digits.is_empty() {
        return Ok(Decimal::new(0, dscale.min(28) as u32));
    }

    let mut unscaled: i128 = 0;
    for &d in &digits {
        if !(0..10000).contains(&d) {
            return Err(Error::fault(format!("invalid numeric digit {d}")));
        }
        unscaled = unscaled
            .checked_mul(10_000)
            .and_then(|v| v.checked_add(d as i128))
            .ok_or_else(|| Error::fault("numeric value overflowed i128"))?;
    }

    let dscale_clamped = dscale.min(28) as i32;
    let exp = 4 * (weight as i32 - digits.len() as i32 + 1) + dscale_clamped;
    if exp >= 0 {
        for _ in 0..exp {
            unscaled = unscaled
                .checked_mul(10)
                .ok_or_else(|| Error::fault("numeric value overflowed i128"))?;
        }
    } else {
        for _ in 0..(-exp) {
            unscaled /= 10;
        }
    }

    if unscaled.unsigned_abs() > i64::MAX as u128 {
        return Err(Error::fault("numeric value exceeds Decimal's 96-bit range"));
    }

    Ok(Decimal::new(unscaled as i64, dscale_clamped as u32))
}

pub fn encode(value: &Decimal, out: &mut BytesMut) -> Result<()> {
    let scale = value.scale();
    if scale > 28 {
        return Err(Error::unsupported("numeric scale beyond Decimal's supported range"));
    }

    let mantissa = value.mantissa();
    if mantissa == 0 {
        out.put_u16(0);
        out.put_i16(0);
        out.put_u16(SIGN_POSITIVE);
        out.put_u16(scale as u16);
        return Ok(());
    }

    let sign = if mantissa < 0 { SIGN_NEGATIVE } else { SIGN_POSITIVE };
    let digit_str = mantissa.unsigned_abs().to_string();
    let frac_len = scale as usize;

    let (int_part, frac_part) = if digit_str.len() > frac_len {
        let split = digit_str.len() - frac_len;
        (digit_str[..split].to_string(), digit_str[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digit_str, width = frac_len))
    };

    let int_pad = (4 - int_part.len() % 4) % 4;
    let int_part = format!("{:0>width$}", int_part, width = int_part.len() + int_pad);
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let frac_part = format!("{}{}", frac_part, "0".repeat(frac_pad));

    let n_int_groups = int_part.len() / 4;
    let full = format!("{int_part}{frac_part}");
    let mut groups: Vec<i16> = full
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap().parse::<i16>().unwrap())
        .collect();

    let mut weight = n_int_groups as i32 - 1;
    let mut start = 0;
    while start < n_int_groups && groups[start] == 0 {
        start += 1;
        weight -= 1;
    }
    groups.drain(..start);
    while groups.last() == Some(&0) {
        groups.pop();
    }

    if groups.is_empty() {
        out.put_u16(0);
        out.put_i16(0);
        out.put_u16(SIGN_POSITIVE);
        out.put_u16(scale as u16);
        return Ok(());
    }

    out.put_u16(groups.len() as u16);
    out.put_i16(weight as i16);
    out.put_u16(sign);
    out.put_u16(scale as u16);
    for g in groups {
        out.put_i16(g);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn round_trip(s: &str) {
        let d = Decimal::from_str(s).unwrap();
        let mut buf = BytesMut::new();
        encode(&d, &mut buf).unwrap();
        let back = decode(&buf).unwrap();
        assert_eq!(back, d, "round trip of {s}");
    }

    #[test]
    fn round_trips_common_values() {
        for s in [
            "0", "0.00", "1", "-1", "1234.5678", "-1234.5678", "0.0001", "100000", "12345678901234.56789",
            "-0.5", "3.14159",
        ] {
            round_trip(s);
        }
    }

    #[test]
    fn zero_has_zero_digits_on_the_wire() {
        let d = Decimal::from_str("0.00").unwrap();
        let mut buf = BytesMut::new();
        encode(&d, &mut buf).unwrap();
        assert_eq!(u16::from_be_bytes([buf[0], buf[1]]), 0);
    }
}
