//! Tables and their rows.
//!
//! A table record is `[name:str][nextUid:8][fieldUid:8]*`; tables form a
//! singly linked list through `nextUid`. Rows are the concatenated field
//! values, stored as versioned entries and added to every field index.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::query::{Comparison, CreateTable, LogicOp, Select, Update, Where};
use crate::storage::mvcc::VersionManager;
use crate::types::{KeelError, Result, Uid, Xid, SUPER_XID};

use super::field::{get_str, put_str, Field, Value};

/// One table: its name, its place in the table list, and its fields.
#[derive(Debug)]
pub struct Table {
    uid: Uid,
    name: String,
    next: Uid,
    fields: Vec<Field>,
}

impl Table {
    /// Writes the field and table records for `stmt`, linking the new table
    /// in front of `next`.
    pub fn create(vm: &VersionManager, xid: Xid, next: Uid, stmt: &CreateTable) -> Result<Self> {
        if let Some(missing) = stmt
            .index
            .iter()
            .find(|name| !stmt.fields.iter().any(|(field, _)| field == *name))
        {
            return Err(KeelError::FieldNotFound(missing.clone()));
        }
        let mut fields = Vec::with_capacity(stmt.fields.len());
        for (name, ty) in &stmt.fields {
            let indexed = stmt.index.contains(name);
            fields.push(Field::create(vm, xid, name, *ty, indexed)?);
        }
        let mut raw = Vec::new();
        put_str(&mut raw, &stmt.table);
        raw.extend_from_slice(&next.0.to_be_bytes());
        for field in &fields {
            raw.extend_from_slice(&field.uid().0.to_be_bytes());
        }
        let uid = vm.insert(xid, &raw)?;
        debug!(table = %stmt.table, %uid, "table.create");
        Ok(Self {
            uid,
            name: stmt.table.clone(),
            next,
            fields,
        })
    }

    /// Reads the table record at `uid` and its fields.
    pub fn load(vm: &VersionManager, uid: Uid) -> Result<Self> {
        let raw = vm
            .read(SUPER_XID, uid)?
            .ok_or(KeelError::Corruption("table record missing"))?;
        let (name, used) = get_str(&raw)?;
        if (raw.len() - used) % 8 != 0 {
            return Err(KeelError::Corruption("table record truncated"));
        }
        let mut uids = raw[used..].chunks_exact(8).map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            Uid(u64::from_be_bytes(buf))
        });
        let next = uids
            .next()
            .ok_or(KeelError::Corruption("table record truncated"))?;
        let fields = uids
            .map(|field| Field::load(vm, field))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            uid,
            name,
            next,
            fields,
        })
    }

    /// Uid of the table record.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next table in the list, `Uid::NULL` at the end.
    pub fn next(&self) -> Uid {
        self.next
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|field| field.name() == name)
            .ok_or_else(|| KeelError::FieldNotFound(name.to_string()))
    }

    fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|field| field.name() == name)
            .ok_or_else(|| KeelError::FieldNotFound(name.to_string()))
    }

    /// Inserts one row given one literal per field.
    pub fn insert(&self, vm: &VersionManager, xid: Xid, values: &[String]) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(KeelError::InvalidValues);
        }
        let row = self
            .fields
            .iter()
            .zip(values)
            .map(|(field, text)| Value::parse(field.ty(), text))
            .collect::<Result<Vec<_>>>()?;
        self.insert_row(vm, xid, &row)
    }

    fn insert_row(&self, vm: &VersionManager, xid: Xid, row: &[Value]) -> Result<()> {
        let mut raw = Vec::new();
        for value in row {
            value.encode_into(&mut raw);
        }
        let uid = vm.insert(xid, &raw)?;
        for (field, value) in self.fields.iter().zip(row) {
            field.index_row(value, uid)?;
        }
        Ok(())
    }

    fn decode_row(&self, raw: &[u8]) -> Result<Vec<Value>> {
        let mut at = 0;
        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let (value, used) = Value::decode(field.ty(), &raw[at..])?;
            at += used;
            row.push(value);
        }
        Ok(row)
    }

    /// Row uids an index says may satisfy `filter`. Without a filter this is
    /// every row in the first indexed field.
    fn candidates(&self, filter: Option<&Where>) -> Result<Vec<Uid>> {
        let Some(filter) = filter else {
            let field = self
                .fields
                .iter()
                .find(|field| field.is_indexed())
                .ok_or_else(|| KeelError::TableNoIndex(self.name.clone()))?;
            return field.lookup_all();
        };
        let mut uids = self.field(&filter.first.field)?.lookup(&filter.first)?;
        match &filter.rest {
            Some((LogicOp::Or, second)) => {
                let mut seen: HashSet<Uid> = uids.iter().copied().collect();
                for uid in self.field(&second.field)?.lookup(second)? {
                    if seen.insert(uid) {
                        uids.push(uid);
                    }
                }
            }
            // the second comparison only filters, but its field must exist
            Some((LogicOp::And, second)) => {
                self.field(&second.field)?;
            }
            None => {}
        }
        Ok(uids)
    }

    fn matches(&self, row: &[Value], filter: Option<&Where>) -> Result<bool> {
        let Some(filter) = filter else {
            return Ok(true);
        };
        let check = |cmp: &Comparison| -> Result<bool> {
            let at = self.field_index(&cmp.field)?;
            self.fields[at].matches(&row[at], cmp)
        };
        let first = check(&filter.first)?;
        match &filter.rest {
            None => Ok(first),
            Some((LogicOp::And, second)) => Ok(first && check(second)?),
            Some((LogicOp::Or, second)) => Ok(first || check(second)?),
        }
    }

    /// Rows visible to `xid` that satisfy `filter`, with their uids.
    fn scan(&self, vm: &VersionManager, xid: Xid, filter: Option<&Where>) -> Result<Vec<(Uid, Vec<Value>)>> {
        let mut rows = Vec::new();
        for uid in self.candidates(filter)? {
            let Some(raw) = vm.read(xid, uid)? else {
                continue;
            };
            let row = self.decode_row(&raw)?;
            if self.matches(&row, filter)? {
                rows.push((uid, row));
            }
        }
        Ok(rows)
    }

    /// Formats the selected rows, one `[v1, v2, ...]` per line.
    pub fn select(&self, vm: &VersionManager, xid: Xid, stmt: &Select) -> Result<String> {
        let columns = if stmt.fields.is_empty() {
            (0..self.fields.len()).collect()
        } else {
            stmt.fields
                .iter()
                .map(|name| self.field_index(name))
                .collect::<Result<Vec<_>>>()?
        };
        let lines: Vec<String> = self
            .scan(vm, xid, stmt.filter.as_ref())?
            .into_iter()
            .map(|(_, row)| {
                let values: Vec<String> = columns.iter().map(|&at| row[at].to_string()).collect();
                format!("[{}]", values.join(", "))
            })
            .collect();
        Ok(lines.join("\n"))
    }

    /// Deletes every visible row matching `filter`; returns how many.
    pub fn delete(&self, vm: &VersionManager, xid: Xid, filter: &Where) -> Result<usize> {
        let mut deleted = 0;
        for (uid, _) in self.scan(vm, xid, Some(filter))? {
            if vm.delete(xid, uid)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Rewrites one field of every visible matching row as a delete of the
    /// old row plus an insert of the new one; returns how many.
    pub fn update(&self, vm: &VersionManager, xid: Xid, stmt: &Update) -> Result<usize> {
        let at = self.field_index(&stmt.field)?;
        let value = Value::parse(self.fields[at].ty(), &stmt.value)?;
        let mut updated = 0;
        for (uid, mut row) in self.scan(vm, xid, stmt.filter.as_ref())? {
            if !vm.delete(xid, uid)? {
                continue;
            }
            row[at] = value.clone();
            self.insert_row(vm, xid, &row)?;
            updated += 1;
        }
        Ok(updated)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self.fields.iter().map(Field::to_string).collect();
        write!(f, "{{{}: {}}}", self.name, fields.join(", "))
    }
}
