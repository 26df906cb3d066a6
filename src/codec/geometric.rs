//! Geometric type wire formats (§4.2 "Geometric types"). Every coordinate is a
//! big-endian `float8`; the composite types differ only in how many points and
//! what leading flags they carry.

use bytes::{Buf, BufMut, BytesMut};

use super::value::Point;
use crate::error::{Error, Result};

fn get_f64(buf: &mut &[u8], what: &str) -> Result<f64> {
    if buf.remaining() < 8 {
        return Err(Error::fault(format!("truncated {what}")));
    }
    Ok(buf.get_f64())
}

pub fn encode_point(p: &Point, out: &mut BytesMut) {
    out.put_f64(p.x);
    out.put_f64(p.y);
}

pub fn decode_point(buf: &mut &[u8]) -> Result<Point> {
    Ok(Point {
        x: get_f64(buf, "point x")?,
        y: get_f64(buf, "point y")?,
    })
}

pub fn encode_lseg(points: &[Point; 2], out: &mut BytesMut) {
    encode_point(&points[0], out);
    encode_point(&points[1], out);
}

pub fn decode_lseg(mut buf: &[u8]) -> Result<[Point; 2]> {
    let a = decode_point(&mut buf)?;
    let b = decode_point(&mut buf)?;
    Ok([a, b])
}

pub fn encode_path(closed: bool, points: &[Point], out: &mut BytesMut) {
    out.put_u8(closed as u8);
    out.put_i32(points.len() as i32);
    for p in points {
        encode_point(p, out);
    }
}

pub fn decode_path(mut buf: &[u8]) -> Result<(bool, Vec<Point>)> {
    if buf.remaining() < 5 {
        return Err(Error::fault("truncated path header"));
    }
    let closed = buf.get_u8() != 0;
    let npoints = buf.get_i32();
    if npoints < 0 {
        return Err(Error::fault("negative path point count"));
    }
    let mut points = Vec::with_capacity(npoints as usize);
    for _ in 0..npoints {
        points.push(decode_point(&mut buf)?);
    }
    Ok((closed, points))
}

/// `box` is stored as two corner points with no count prefix, high corner first.
pub fn encode_box(high: &Point, low: &Point, out: &mut BytesMut) {
    encode_point(high, out);
    encode_point(low, out);
}

pub fn decode_box(mut buf: &[u8]) -> Result<(Point, Point)> {
    let high = decode_point(&mut buf)?;
    let low = decode_point(&mut buf)?;
    Ok((high, low))
}

pub fn encode_polygon(points: &[Point], out: &mut BytesMut) {
    out.put_i32(points.len() as i32);
    for p in points {
        encode_point(p, out);
    }
}

pub fn decode_polygon(mut buf: &[u8]) -> Result<Vec<Point>> {
    if buf.remaining() < 4 {
        return Err(Error::fault("truncated polygon header"));
    }
    let npoints = buf.get_i32();
    if npoints < 0 {
        return Err(Error::fault("negative polygon point count"));
    }
    let mut points = Vec::with_capacity(npoints as usize);
    for _ in 0..npoints {
        points.push(decode_point(&mut buf)?);
    }
    Ok(points)
}

/// `line` is stored in `{A, B, C}` form for `Ax + By + C = 0`.
pub fn encode_line(a: f64, b: f64, c: f64, out: &mut BytesMut) {
    out.put_f64(a);
    out.put_f64(b);
    out.put_f64(c);
}

pub fn decode_line(mut buf: &[u8]) -> Result<(f64, f64, f64)> {
    let a = get_f64(&mut buf, "line A")?;
    let b = get_f64(&mut buf, "line B")?;
    let c = get_f64(&mut buf, "line C")?;
    Ok((a, b, c))
}

pub fn encode_circle(center: &Point, radius: f64, out: &mut BytesMut) {
    encode_point(center, out);
    out.put_f64(radius);
}

pub fn decode_circle(mut buf: &[u8]) -> Result<(Point, f64)> {
    let center = decode_point(&mut buf)?;
    let radius = get_f64(&mut buf, "circle radius")?;
    Ok((center, radius))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_point() {
        let p = Point { x: 1.5, y: -2.25 };
        let mut buf = BytesMut::new();
        encode_point(&p, &mut buf);
        let decoded = decode_point(&mut buf.as_ref()).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn round_trips_open_path() {
        let points = vec![Point { x: 0.0, y: 0.0 }, Point { x: 1.0, y: 1.0 }];
        let mut buf = BytesMut::new();
        encode_path(false, &points, &mut buf);
        let (closed, decoded) = decode_path(&buf).unwrap();
        assert!(!closed);
        assert_eq!(decoded, points);
    }

    #[test]
    fn round_trips_circle() {
        let center = Point { x: 3.0, y: 4.0 };
        let mut buf = BytesMut::new();
        encode_circle(&center, 5.0, &mut buf);
        let (decoded_center, radius) = decode_circle(&buf).unwrap();
        assert_eq!(decoded_center, center);
        assert_eq!(radius, 5.0);
    }
}
