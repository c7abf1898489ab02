//! Statement language: tokenizer, parser and the statement types.
//!
//! The language is small: transaction control, single-table
//! `select`/`insert`/`delete`/`update` with at most two comparisons in a
//! `where` clause, `create table` and `show`.

#![forbid(unsafe_code)]

/// Parsed statement types.
pub mod ast;
mod parser;
mod tokenizer;

pub use ast::{
    CompareOp, Comparison, CreateTable, Delete, FieldType, Insert, LogicOp, Select, Statement,
    Update, Where,
};
pub use parser::parse;
