//! Recursive-descent parser over [`Tokenizer`] output.

use crate::storage::mvcc::IsolationLevel;
use crate::types::{KeelError, Result};

use super::ast::{
    CompareOp, Comparison, CreateTable, Delete, FieldType, Insert, LogicOp, Select, Statement,
    Update, Where,
};
use super::tokenizer::{Token, Tokenizer};

/// Parses one statement.
pub fn parse(sql: &str) -> Result<Statement> {
    let mut p = Parser {
        tokens: Tokenizer::new(sql),
    };
    let statement = p.statement()?;
    p.expect_end()?;
    Ok(statement)
}

struct Parser<'a> {
    tokens: Tokenizer<'a>,
}

impl Parser<'_> {
    fn statement(&mut self) -> Result<Statement> {
        let keyword = self.word()?.to_ascii_lowercase();
        match keyword.as_str() {
            "begin" => self.begin(),
            "commit" => Ok(Statement::Commit),
            "abort" => Ok(Statement::Abort),
            "create" => self.create(),
            "drop" => {
                self.keyword("table")?;
                Ok(Statement::Drop(self.word()?))
            }
            "select" => self.select(),
            "insert" => self.insert(),
            "delete" => self.delete(),
            "update" => self.update(),
            "show" => Ok(Statement::Show),
            _ => Err(self.tokens.error()),
        }
    }

    fn begin(&mut self) -> Result<Statement> {
        if self.at_end()? {
            return Ok(Statement::Begin(IsolationLevel::default()));
        }
        self.keyword("isolation")?;
        self.keyword("level")?;
        let level = match self.word()?.to_ascii_lowercase().as_str() {
            "read" => {
                self.keyword("committed")?;
                IsolationLevel::ReadCommitted
            }
            "repeatable" => {
                self.keyword("read")?;
                IsolationLevel::RepeatableRead
            }
            _ => return Err(self.tokens.error()),
        };
        Ok(Statement::Begin(level))
    }

    fn create(&mut self) -> Result<Statement> {
        self.keyword("table")?;
        let table = self.word()?;
        let mut fields = Vec::new();
        loop {
            let name = self.word()?;
            let ty = self.word()?;
            let Some(ty) = FieldType::from_name(&ty) else {
                return Err(self.tokens.error());
            };
            fields.push((name, ty));
            match self.tokens.peek()? {
                Token::Symbol(',') => self.tokens.pop(),
                Token::Symbol('(') => {
                    self.tokens.pop();
                    break;
                }
                Token::End => return Err(KeelError::TableNoIndex(table)),
                _ => return Err(self.tokens.error()),
            }
        }
        self.keyword("index")?;
        let mut index = Vec::new();
        loop {
            if self.tokens.peek()? == &Token::Symbol(')') {
                self.tokens.pop();
                break;
            }
            index.push(self.word()?);
        }
        if index.is_empty() {
            return Err(KeelError::TableNoIndex(table));
        }
        Ok(Statement::Create(CreateTable {
            table,
            fields,
            index,
        }))
    }

    fn select(&mut self) -> Result<Statement> {
        let mut fields = Vec::new();
        if self.tokens.peek()? == &Token::Symbol('*') {
            self.tokens.pop();
        } else {
            loop {
                fields.push(self.word()?);
                if self.tokens.peek()? != &Token::Symbol(',') {
                    break;
                }
                self.tokens.pop();
            }
        }
        self.keyword("from")?;
        let table = self.word()?;
        let filter = self.optional_where()?;
        Ok(Statement::Select(Select {
            table,
            fields,
            filter,
        }))
    }

    fn insert(&mut self) -> Result<Statement> {
        self.keyword("into")?;
        let table = self.word()?;
        self.keyword("values")?;
        let mut values = Vec::new();
        while !self.at_end()? {
            values.push(self.value()?);
        }
        Ok(Statement::Insert(Insert { table, values }))
    }

    fn delete(&mut self) -> Result<Statement> {
        self.keyword("from")?;
        let table = self.word()?;
        self.keyword("where")?;
        let filter = self.where_clause()?;
        Ok(Statement::Delete(Delete { table, filter }))
    }

    fn update(&mut self) -> Result<Statement> {
        let table = self.word()?;
        self.keyword("set")?;
        let field = self.word()?;
        self.symbol('=')?;
        let value = self.value()?;
        let filter = self.optional_where()?;
        Ok(Statement::Update(Update {
            table,
            field,
            value,
            filter,
        }))
    }

    fn optional_where(&mut self) -> Result<Option<Where>> {
        if self.at_end()? {
            return Ok(None);
        }
        self.keyword("where")?;
        self.where_clause().map(Some)
    }

    fn where_clause(&mut self) -> Result<Where> {
        let first = self.comparison()?;
        if self.at_end()? {
            return Ok(Where { first, rest: None });
        }
        let logic = match self.word()?.to_ascii_lowercase().as_str() {
            "and" => LogicOp::And,
            "or" => LogicOp::Or,
            _ => return Err(KeelError::InvalidLogicOp),
        };
        let second = self.comparison()?;
        Ok(Where {
            first,
            rest: Some((logic, second)),
        })
    }

    fn comparison(&mut self) -> Result<Comparison> {
        let field = self.word()?;
        let op = match self.tokens.peek()? {
            Token::Symbol('<') => CompareOp::Lt,
            Token::Symbol('=') => CompareOp::Eq,
            Token::Symbol('>') => CompareOp::Gt,
            _ => return Err(self.tokens.error()),
        };
        self.tokens.pop();
        let value = self.value()?;
        Ok(Comparison { field, op, value })
    }

    fn word(&mut self) -> Result<String> {
        match self.tokens.peek()? {
            Token::Word(word) => {
                let word = word.clone();
                self.tokens.pop();
                Ok(word)
            }
            _ => Err(self.tokens.error()),
        }
    }

    /// A literal: a bare word or a quoted string.
    fn value(&mut self) -> Result<String> {
        match self.tokens.peek()? {
            Token::Word(text) | Token::Quoted(text) => {
                let text = text.clone();
                self.tokens.pop();
                Ok(text)
            }
            _ => Err(self.tokens.error()),
        }
    }

    fn keyword(&mut self, expected: &str) -> Result<()> {
        match self.tokens.peek()? {
            Token::Word(word) if word.eq_ignore_ascii_case(expected) => {
                self.tokens.pop();
                Ok(())
            }
            _ => Err(self.tokens.error()),
        }
    }

    fn symbol(&mut self, expected: char) -> Result<()> {
        if self.tokens.peek()? == &Token::Symbol(expected) {
            self.tokens.pop();
            Ok(())
        } else {
            Err(self.tokens.error())
        }
    }

    fn at_end(&mut self) -> Result<bool> {
        Ok(self.tokens.peek()? == &Token::End)
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.at_end()? {
            Ok(())
        } else {
            Err(self.tokens.error())
        }
    }
}
