//! The built-in OID table (§4.2). A dense array would need OIDs packed from zero;
//! PostgreSQL's built-in type OIDs are sparse, so — per the Design Notes' dispatch
//! guidance — this is a small `match`/const table instead of a `HashMap` for the
//! built-ins, with a `HashMap` reserved for runtime-installed aliases
//! (`DecoderRegistry`, see `codec::registry`).

pub type Oid = i32;

pub const BOOL: Oid = 16;
pub const BYTEA: Oid = 17;
pub const CHAR: Oid = 18;
pub const NAME: Oid = 19;
pub const INT8: Oid = 20;
pub const INT2: Oid = 21;
pub const INT4: Oid = 23;
pub const TEXT: Oid = 25;
pub const OID: Oid = 26;
pub const XID: Oid = 28;
pub const JSON: Oid = 114;
pub const RECORD: Oid = 2249;
pub const POINT: Oid = 600;
pub const LSEG: Oid = 601;
pub const PATH: Oid = 602;
pub const BOX: Oid = 603;
pub const POLYGON: Oid = 604;
pub const LINE: Oid = 628;
pub const FLOAT4: Oid = 700;
pub const FLOAT8: Oid = 701;
pub const CIRCLE: Oid = 718;
pub const MONEY: Oid = 790;
pub const INET: Oid = 869;
pub const BPCHAR: Oid = 1042;
pub const VARCHAR: Oid = 1043;
pub const DATE: Oid = 1082;
pub const TIME: Oid = 1083;
pub const TIMESTAMP: Oid = 1114;
pub const TIMESTAMPTZ: Oid = 1184;
pub const INTERVAL: Oid = 1186;
pub const TIMETZ: Oid = 1266;
pub const NUMERIC: Oid = 1700;
pub const UUID: Oid = 2950;
pub const PG_LSN: Oid = 3220;
pub const TSVECTOR: Oid = 3614;
pub const JSONB: Oid = 3802;

pub const INT4RANGE: Oid = 3904;
pub const NUMRANGE: Oid = 3906;
pub const TSRANGE: Oid = 3908;
pub const TSTZRANGE: Oid = 3910;
pub const DATERANGE: Oid = 3912;
pub const INT8RANGE: Oid = 3926;

// Array OIDs, paired 1:1 with the scalar OID above (§4.2 "Arrays" rule: a new
// element type is registered as an array automatically via this pairing).
pub const BOOL_ARRAY: Oid = 1000;
pub const BYTEA_ARRAY: Oid = 1001;
pub const CHAR_ARRAY: Oid = 1002;
pub const NAME_ARRAY: Oid = 1003;
pub const INT2_ARRAY: Oid = 1005;
pub const INT4_ARRAY: Oid = 1007;
pub const TEXT_ARRAY: Oid = 1009;
pub const VARCHAR_ARRAY: Oid = 1015;
pub const INT8_ARRAY: Oid = 1016;
pub const FLOAT4_ARRAY: Oid = 1021;
pub const FLOAT8_ARRAY: Oid = 1022;
pub const OID_ARRAY: Oid = 1028;
pub const BPCHAR_ARRAY: Oid = 1014;
pub const DATE_ARRAY: Oid = 1182;
pub const TIMESTAMP_ARRAY: Oid = 1115;
pub const TIMESTAMPTZ_ARRAY: Oid = 1185;
pub const NUMERIC_ARRAY: Oid = 1231;
pub const UUID_ARRAY: Oid = 2951;
pub const JSON_ARRAY: Oid = 199;
pub const JSONB_ARRAY: Oid = 3807;

/// Returns the array OID that carries elements of `element_oid`, if this crate
/// knows the pairing. Used to pick an encode OID for `Value::Array`.
pub fn array_oid_for(element_oid: Oid) -> Option<Oid> {
    Some(match element_oid {
        BOOL => BOOL_ARRAY,
        BYTEA => BYTEA_ARRAY,
        CHAR => CHAR_ARRAY,
        NAME => NAME_ARRAY,
        INT2 => INT2_ARRAY,
        INT4 => INT4_ARRAY,
        INT8 => INT8_ARRAY,
        TEXT => TEXT_ARRAY,
        VARCHAR => VARCHAR_ARRAY,
        BPCHAR => BPCHAR_ARRAY,
        FLOAT4 => FLOAT4_ARRAY,
        FLOAT8 => FLOAT8_ARRAY,
        OID => OID_ARRAY,
        DATE => DATE_ARRAY,
        TIMESTAMP => TIMESTAMP_ARRAY,
        TIMESTAMPTZ => TIMESTAMPTZ_ARRAY,
        NUMERIC => NUMERIC_ARRAY,
        UUID => UUID_ARRAY,
        JSON => JSON_ARRAY,
        JSONB => JSONB_ARRAY,
        _ => return None,
    })
}

/// Inverse of `array_oid_for`, used when decoding an array header's `element_oid`.
pub fn element_oid_of(array_oid: Oid) -> Option<Oid> {
    Some(match array_oid {
        BOOL_ARRAY => BOOL,
        BYTEA_ARRAY => BYTEA,
        CHAR_ARRAY => CHAR,
        NAME_ARRAY => NAME,
        INT2_ARRAY => INT2,
        INT4_ARRAY => INT4,
        INT8_ARRAY => INT8,
        TEXT_ARRAY => TEXT,
        VARCHAR_ARRAY => VARCHAR,
        BPCHAR_ARRAY => BPCHAR,
        FLOAT4_ARRAY => FLOAT4,
        FLOAT8_ARRAY => FLOAT8,
        OID_ARRAY => OID,
        DATE_ARRAY => DATE,
        TIMESTAMP_ARRAY => TIMESTAMP,
        TIMESTAMPTZ_ARRAY => TIMESTAMPTZ,
        NUMERIC_ARRAY => NUMERIC,
        UUID_ARRAY => UUID,
        JSON_ARRAY => JSON,
        JSONB_ARRAY => JSONB,
        _ => return None,
    })
}
