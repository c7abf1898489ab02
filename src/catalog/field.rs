//! Table columns, their values, and their optional index.
//!
//! A field record is `[name:str][type:str][indexUid:8]` with strings stored
//! as `[len:4][bytes]`. `indexUid` is the boot uid of the field's B+Tree, or
//! 0 when the field is not indexed.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::query::{CompareOp, Comparison, FieldType};
use crate::storage::btree::BPlusTree;
use crate::storage::mvcc::VersionManager;
use crate::types::{string_key, KeelError, Result, Uid, Xid, SUPER_XID};

/// A typed column value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// `int32`
    Int32(i32),
    /// `int64`
    Int64(i64),
    /// `string`
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl Value {
    /// Parses `text` as a value of type `ty`.
    pub fn parse(ty: FieldType, text: &str) -> Result<Self> {
        match ty {
            FieldType::Int32 => text
                .parse()
                .map(Value::Int32)
                .map_err(|_| KeelError::InvalidValues),
            FieldType::Int64 => text
                .parse()
                .map(Value::Int64)
                .map_err(|_| KeelError::InvalidValues),
            FieldType::String => Ok(Value::Str(text.to_string())),
        }
    }

    /// Appends the row encoding of the value.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Str(s) => put_str(out, s),
        }
    }

    /// Decodes a value of type `ty` from the front of `raw`, returning it
    /// with the number of bytes consumed.
    pub fn decode(ty: FieldType, raw: &[u8]) -> Result<(Self, usize)> {
        match ty {
            FieldType::Int32 => {
                let bytes = raw.get(..4).ok_or(KeelError::Corruption("row truncated"))?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                Ok((Value::Int32(i32::from_be_bytes(buf)), 4))
            }
            FieldType::Int64 => {
                let bytes = raw.get(..8).ok_or(KeelError::Corruption("row truncated"))?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok((Value::Int64(i64::from_be_bytes(buf)), 8))
            }
            FieldType::String => {
                let (s, used) = get_str(raw)?;
                Ok((Value::Str(s), used))
            }
        }
    }

    /// Index key: the integer itself, or a rolling hash of the string bytes.
    pub fn key(&self) -> i64 {
        match self {
            Value::Int32(v) => i64::from(*v),
            Value::Int64(v) => *v,
            Value::Str(s) => string_key(s.as_bytes()),
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

pub(crate) fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

pub(crate) fn get_str(raw: &[u8]) -> Result<(String, usize)> {
    let len = raw
        .get(..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or(KeelError::Corruption("string length truncated"))?;
    let bytes = raw
        .get(4..4 + len)
        .ok_or(KeelError::Corruption("string truncated"))?;
    let s = String::from_utf8(bytes.to_vec()).map_err(|_| KeelError::Corruption("string is not utf-8"))?;
    Ok((s, 4 + len))
}

/// Inclusive key range an index lookup must cover for a comparison.
/// `None` when no key can match.
fn key_range(ty: FieldType, op: CompareOp, value: &Value) -> Option<(i64, i64)> {
    let key = value.key();
    match (ty, op) {
        // string keys are hashes; only equality maps to a key range
        (FieldType::String, CompareOp::Eq) => Some((key, key)),
        (FieldType::String, _) => Some((i64::MIN, i64::MAX)),
        (_, CompareOp::Eq) => Some((key, key)),
        (_, CompareOp::Lt) => key.checked_sub(1).map(|hi| (i64::MIN, hi)),
        (_, CompareOp::Gt) => key.checked_add(1).map(|lo| (lo, i64::MAX)),
    }
}

/// One column of a table.
pub struct Field {
    uid: Uid,
    name: String,
    ty: FieldType,
    index: Option<BPlusTree>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("indexed", &self.index.is_some())
            .finish()
    }
}

impl Field {
    /// Writes a new field record, creating its index tree when `indexed`.
    pub fn create(vm: &VersionManager, xid: Xid, name: &str, ty: FieldType, indexed: bool) -> Result<Self> {
        let dm = vm.data_manager();
        let (index_uid, index) = if indexed {
            let boot = BPlusTree::create(dm)?;
            (boot, Some(BPlusTree::load(boot, Arc::clone(dm))?))
        } else {
            (Uid::NULL, None)
        };
        let mut raw = Vec::new();
        put_str(&mut raw, name);
        put_str(&mut raw, ty.name());
        raw.extend_from_slice(&index_uid.0.to_be_bytes());
        let uid = vm.insert(xid, &raw)?;
        Ok(Self {
            uid,
            name: name.to_string(),
            ty,
            index,
        })
    }

    /// Reads the field record at `uid`.
    pub fn load(vm: &VersionManager, uid: Uid) -> Result<Self> {
        let raw = vm
            .read(SUPER_XID, uid)?
            .ok_or(KeelError::Corruption("field record missing"))?;
        let (name, used) = get_str(&raw)?;
        let (ty_name, used_ty) = get_str(&raw[used..])?;
        let ty = FieldType::from_name(&ty_name).ok_or(KeelError::Corruption("unknown field type"))?;
        let at = used + used_ty;
        let index_raw: [u8; 8] = raw
            .get(at..at + 8)
            .and_then(|b| b.try_into().ok())
            .ok_or(KeelError::Corruption("field record truncated"))?;
        let index_uid = Uid(u64::from_be_bytes(index_raw));
        let index = if index_uid.is_null() {
            None
        } else {
            Some(BPlusTree::load(index_uid, Arc::clone(vm.data_manager()))?)
        };
        Ok(Self { uid, name, ty, index })
    }

    /// Uid of the field record.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column type.
    pub fn ty(&self) -> FieldType {
        self.ty
    }

    /// Whether the column has an index.
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Adds a row to the index, if there is one.
    pub fn index_row(&self, value: &Value, row: Uid) -> Result<()> {
        match &self.index {
            Some(tree) => tree.insert(value.key(), row),
            None => Ok(()),
        }
    }

    /// Row uids whose indexed key could satisfy `cmp`.
    pub fn lookup(&self, cmp: &Comparison) -> Result<Vec<Uid>> {
        let tree = self
            .index
            .as_ref()
            .ok_or_else(|| KeelError::FieldNotIndexed(self.name.clone()))?;
        let value = Value::parse(self.ty, &cmp.value)?;
        match key_range(self.ty, cmp.op, &value) {
            Some((lo, hi)) => tree.search_range(lo, hi),
            None => Ok(Vec::new()),
        }
    }

    /// All rows in the index.
    pub fn lookup_all(&self) -> Result<Vec<Uid>> {
        let tree = self
            .index
            .as_ref()
            .ok_or_else(|| KeelError::FieldNotIndexed(self.name.clone()))?;
        tree.search_range(i64::MIN, i64::MAX)
    }

    /// Whether `value` of this field satisfies `cmp`.
    pub fn matches(&self, value: &Value, cmp: &Comparison) -> Result<bool> {
        let wanted = Value::parse(self.ty, &cmp.value)?;
        let ord = value.compare(&wanted).ok_or(KeelError::InvalidValues)?;
        Ok(match cmp.op {
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Gt => ord == Ordering::Greater,
        })
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = if self.is_indexed() { "Index" } else { "NoIndex" };
        write!(f, "({}, {}, {})", self.name, self.ty, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(op: CompareOp, value: &str) -> Comparison {
        Comparison {
            field: "f".into(),
            op,
            value: value.into(),
        }
    }

    #[test]
    fn values_decode_what_they_encode() -> Result<()> {
        let mut row = Vec::new();
        Value::Int32(-7).encode_into(&mut row);
        Value::Str("hé".into()).encode_into(&mut row);
        Value::Int64(1 << 40).encode_into(&mut row);

        let (a, n) = Value::decode(FieldType::Int32, &row)?;
        let (b, m) = Value::decode(FieldType::String, &row[n..])?;
        let (c, _) = Value::decode(FieldType::Int64, &row[n + m..])?;
        assert_eq!((a, b, c), (Value::Int32(-7), Value::Str("hé".into()), Value::Int64(1 << 40)));
        assert!(Value::decode(FieldType::Int64, &row[..3]).is_err());
        Ok(())
    }

    #[test]
    fn parse_rejects_bad_integers() {
        assert!(matches!(
            Value::parse(FieldType::Int32, "abc"),
            Err(KeelError::InvalidValues)
        ));
        assert!(matches!(
            Value::parse(FieldType::Int32, "4294967296"),
            Err(KeelError::InvalidValues)
        ));
        assert_eq!(Value::parse(FieldType::Int64, "-3").ok(), Some(Value::Int64(-3)));
    }

    #[test]
    fn key_ranges_are_inclusive() {
        let v = Value::Int32(5);
        assert_eq!(key_range(FieldType::Int32, CompareOp::Lt, &v), Some((i64::MIN, 4)));
        assert_eq!(key_range(FieldType::Int32, CompareOp::Eq, &v), Some((5, 5)));
        assert_eq!(key_range(FieldType::Int32, CompareOp::Gt, &v), Some((6, i64::MAX)));
        assert_eq!(
            key_range(FieldType::Int64, CompareOp::Gt, &Value::Int64(i64::MAX)),
            None
        );
        let s = Value::Str("m".into());
        assert_eq!(
            key_range(FieldType::String, CompareOp::Lt, &s),
            Some((i64::MIN, i64::MAX))
        );
    }

    #[test]
    fn strings_compare_lexically() -> Result<()> {
        let field = Field {
            uid: Uid::NULL,
            name: "f".into(),
            ty: FieldType::String,
            index: None,
        };
        let value = Value::Str("bob".into());
        assert!(field.matches(&value, &cmp(CompareOp::Gt, "alice"))?);
        assert!(!field.matches(&value, &cmp(CompareOp::Lt, "alice"))?);
        assert!(field.matches(&value, &cmp(CompareOp::Eq, "bob"))?);
        assert!(matches!(
            field.lookup(&cmp(CompareOp::Eq, "bob")),
            Err(KeelError::FieldNotIndexed(_))
        ));
        Ok(())
    }
}
