//! Parsed statements.
//!
//! The statement set is closed: the executor matches [`Statement`]
//! exhaustively, so adding a variant is a compile-time change everywhere it
//! is handled.

use std::fmt;

use crate::storage::mvcc::IsolationLevel;

/// Column type of a table field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FieldType {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Length-prefixed byte string.
    String,
}

impl FieldType {
    /// Parses a type name as written in `create table`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int32" => Some(Self::Int32),
            "int64" => Some(Self::Int64),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    /// Name as written in `create table`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::String => "string",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Comparison in a `where` clause.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `=`
    Eq,
    /// `>`
    Gt,
}

/// Connective between two comparisons.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogicOp {
    /// Both sides must hold.
    And,
    /// Either side may hold.
    Or,
}

/// `field op value`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Comparison {
    /// Field name.
    pub field: String,
    /// Operator.
    pub op: CompareOp,
    /// Literal, still untyped.
    pub value: String,
}

/// A `where` clause: one comparison, optionally joined with a second.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Where {
    /// First comparison.
    pub first: Comparison,
    /// Connective and second comparison, if any.
    pub rest: Option<(LogicOp, Comparison)>,
}

/// `create table`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateTable {
    /// Table name.
    pub table: String,
    /// Field names with their types, in declaration order.
    pub fields: Vec<(String, FieldType)>,
    /// Names of the fields to index.
    pub index: Vec<String>,
}

/// `select`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Select {
    /// Table name.
    pub table: String,
    /// Projected fields; empty means `*`.
    pub fields: Vec<String>,
    /// Optional filter.
    pub filter: Option<Where>,
}

/// `insert into`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Insert {
    /// Table name.
    pub table: String,
    /// One literal per field, in declaration order.
    pub values: Vec<String>,
}

/// `delete from`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delete {
    /// Table name.
    pub table: String,
    /// Rows to delete.
    pub filter: Where,
}

/// `update ... set`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Update {
    /// Table name.
    pub table: String,
    /// Field to overwrite.
    pub field: String,
    /// New literal.
    pub value: String,
    /// Rows to update; all rows when absent.
    pub filter: Option<Where>,
}

/// One client statement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Statement {
    /// `begin [isolation level ...]`
    Begin(IsolationLevel),
    /// `commit`
    Commit,
    /// `abort`
    Abort,
    /// `create table`
    Create(CreateTable),
    /// `drop table`; parsed but not executable.
    Drop(String),
    /// `select`
    Select(Select),
    /// `insert into`
    Insert(Insert),
    /// `delete from`
    Delete(Delete),
    /// `update`
    Update(Update),
    /// `show`
    Show,
}
