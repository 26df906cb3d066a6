//! Row/relation shapes shared between the pgoutput decoder and the replication
//! state machine (§4.6). A decoded row omits NULL columns entirely rather than
//! carrying explicit nulls — "Open Question" resolution in DESIGN.md, the
//! source's tests rely on this rather than an accident of implementation.

use crate::codec::oid::Oid;
use crate::codec::value::Value;

/// Replica identity mode carried by `Relation` (§4.6): which columns a row's
/// "before" image contains on `Update`/`Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaIdentity {
    Default,
    Nothing,
    Full,
    Index,
}

impl ReplicaIdentity {
    pub fn from_byte(b: u8) -> crate::error::Result<Self> {
        Ok(match b {
            b'd' => ReplicaIdentity::Default,
            b'n' => ReplicaIdentity::Nothing,
            b'f' => ReplicaIdentity::Full,
            b'i' => ReplicaIdentity::Index,
            other => {
                return Err(crate::error::Error::fault(format!(
                    "unrecognized replica identity byte {:?}",
                    char::from(other)
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub type_oid: Oid,
    pub type_modifier: i32,
    /// Bit 0 of the wire `flags` byte: "part of the replica identity".
    pub is_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub oid: Oid,
    pub namespace: String,
    pub name: String,
    pub replica_identity: ReplicaIdentity,
    pub attributes: Vec<Attribute>,
}

impl Relation {
    pub fn key_attribute_names(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|a| a.is_key)
            .map(|a| a.name.as_str())
            .collect()
    }
}

/// A decoded tuple column before it is paired with its `Relation` attribute,
/// as carried on the wire (§4.6 "Tuple data encoding").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleColumn {
    Null,
    /// Unchanged TOASTed value: not resent, and not decodable without the
    /// prior row image.
    UnchangedToast,
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

/// Maps a raw column name to the key used in a decoded `Row`, e.g. to convert
/// `"user_id"` into a keyword-like form for callers that want symbol keys.
pub type KeyFn = fn(&str) -> String;

pub fn default_key_fn(name: &str) -> String {
    name.to_string()
}

/// An ordered (insertion-order) decoded row. NULL columns are omitted rather
/// than stored as `Value::Null` (§9 Open Question resolution).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self { columns: Vec::new() }
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.columns.push((key, value));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.columns.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Builds a `Row` from a relation's attribute schema and the tuple columns
/// decoded off the wire, in positional order. `UnchangedToast` columns are
/// omitted, same as NULL — neither carries a value to decode.
pub fn build_row(relation: &Relation, columns: &[TupleColumn], key_fn: KeyFn, registry: &crate::codec::DecoderRegistry) -> crate::error::Result<Row> {
    if columns.len() != relation.attributes.len() {
        return Err(crate::error::Error::fault(format!(
            "tuple has {} columns but relation {} has {}",
            columns.len(),
            relation.name,
            relation.attributes.len()
        )));
    }

    let mut row = Row::new();
    for (attr, column) in relation.attributes.iter().zip(columns) {
        let value = match column {
            TupleColumn::Null | TupleColumn::UnchangedToast => continue,
            TupleColumn::Text(bytes) => Value::Text(String::from_utf8(bytes.clone()).map_err(|e| crate::error::Error::fault(e.to_string()))?),
            TupleColumn::Binary(bytes) => registry.decode(attr.type_oid, bytes)?,
        };
        row.insert(key_fn(&attr.name), value);
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_relation() -> Relation {
        Relation {
            oid: 100,
            namespace: "public".to_string(),
            name: "t".to_string(),
            replica_identity: ReplicaIdentity::Default,
            attributes: vec![
                Attribute {
                    name: "id".to_string(),
                    type_oid: crate::codec::oid::INT4,
                    type_modifier: -1,
                    is_key: true,
                },
                Attribute {
                    name: "note".to_string(),
                    type_oid: crate::codec::oid::TEXT,
                    type_modifier: -1,
                    is_key: false,
                },
            ],
        }
    }

    #[test]
    fn omits_null_and_unchanged_toast_columns() {
        let relation = text_relation();
        let registry = crate::codec::DecoderRegistry::new();
        let columns = vec![TupleColumn::Binary(1i32.to_be_bytes().to_vec()), TupleColumn::Null];
        let row = build_row(&relation, &columns, default_key_fn, &registry).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("id"), Some(&Value::Int4(1)));
        assert_eq!(row.get("note"), None);
    }

    #[test]
    fn key_attribute_names_filters_by_flag() {
        let relation = text_relation();
        assert_eq!(relation.key_attribute_names(), vec!["id"]);
    }
}
