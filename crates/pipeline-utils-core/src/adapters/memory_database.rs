//! # In-Memory Database
//!
//! A tiny SQL engine for tests and dry runs. It understands two statement
//! shapes:
//!
//! - `SELECT <*|col, ...> FROM <table> [WHERE <col> = <?|literal> [AND ...]]`
//! - `EXEC <procedure> @Name=?, @Other=?, ...`
//!
//! Procedures are bound to a table with [`InMemoryDatabase::register_procedure`];
//! executing one appends a row whose columns are the parameter names. Rows
//! written by `EXEC` stay pending until the connection commits and are
//! discarded if it closes first.

use crate::database::{ConnectionSettings, DatabaseError, SqlConnection, SqlConnector};
use crate::table::{CellValue, Table};
use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

#[derive(Default)]
struct DatabaseState {
    tables: RwLock<HashMap<String, Table>>,
    procedures: RwLock<HashMap<String, String>>,
    failing_procedures: RwLock<HashSet<String>>,
    opened: AtomicU64,
    closed: AtomicU64,
    abandoned: AtomicU64,
    commits: AtomicU64,
}

fn lock_poisoned() -> DatabaseError {
    DatabaseError::Internal {
        message: "in-memory database lock poisoned".to_string(),
    }
}

fn query_failed(message: impl Into<String>) -> DatabaseError {
    DatabaseError::QueryFailed {
        message: message.into(),
    }
}

/// In-memory database and connector
///
/// Clones share the same tables and counters.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<DatabaseState>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a table
    pub fn create_table(&self, name: impl Into<String>, table: Table) {
        if let Ok(mut tables) = self.state.tables.write() {
            tables.insert(name.into(), table);
        }
    }

    /// Snapshot of a table's committed rows
    pub fn table(&self, name: &str) -> Option<Table> {
        self.state.tables.read().ok()?.get(name).cloned()
    }

    /// Make `EXEC <procedure>` append rows to `table`
    pub fn register_procedure(&self, procedure: impl Into<String>, table: impl Into<String>) {
        if let Ok(mut procedures) = self.state.procedures.write() {
            procedures.insert(procedure.into(), table.into());
        }
    }

    /// Make every call of `procedure` fail as the server would on a raised error
    pub fn fail_procedure(&self, procedure: impl Into<String>) {
        if let Ok(mut failing) = self.state.failing_procedures.write() {
            failing.insert(procedure.into());
        }
    }

    pub fn connections_opened(&self) -> u64 {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Connections still alive: neither closed nor dropped
    pub fn open_connections(&self) -> u64 {
        self.connections_opened() - self.close_count() - self.abandoned_connections()
    }

    /// Explicit `close()` calls that ended a connection
    pub fn close_count(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections dropped without `close()`
    pub fn abandoned_connections(&self) -> u64 {
        self.state.abandoned.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> u64 {
        self.state.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlConnector for InMemoryDatabase {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn SqlConnection>, DatabaseError> {
        settings.validate()?;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConnection {
            state: self.state.clone(),
            pending: Vec::new(),
            closed: false,
        }))
    }
}

/// Connection returned by [`InMemoryDatabase`]
pub struct InMemoryConnection {
    state: Arc<DatabaseState>,
    pending: Vec<(String, Vec<String>, Vec<CellValue>)>,
    closed: bool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed {
            return Err(DatabaseError::ConnectionClosed);
        }
        Ok(())
    }

    fn run_select(&self, select: Select, params: &[CellValue]) -> Result<Table, DatabaseError> {
        let tables = self.state.tables.read().map_err(|_| lock_poisoned())?;
        let source = tables
            .get(&select.table)
            .ok_or_else(|| query_failed(format!("Invalid object name '{}'", select.table)))?;

        let mut filters = Vec::with_capacity(select.filters.len());
        let mut next_param = params.iter();
        for (column, operand) in select.filters {
            let index = source
                .column_index(&column)
                .ok_or_else(|| query_failed(format!("Invalid column name '{}'", column)))?;
            let value = match operand {
                Operand::Param => next_param
                    .next()
                    .cloned()
                    .ok_or_else(|| query_failed("missing parameter value"))?,
                Operand::Literal(value) => value,
            };
            filters.push((index, value));
        }

        let filtered = source.filter_rows(|row| {
            filters
                .iter()
                .all(|(index, value)| cells_equal(&row[*index], value))
        });

        let Some(columns) = select.columns else {
            return Ok(filtered);
        };

        let indexes = columns
            .iter()
            .map(|c| {
                filtered
                    .column_index(c)
                    .ok_or_else(|| query_failed(format!("Invalid column name '{}'", c)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut projected = Table::new(columns);
        for row in filtered.rows() {
            projected
                .push_row(indexes.iter().map(|&i| row[i].clone()).collect())
                .map_err(|e| query_failed(e.to_string()))?;
        }
        Ok(projected)
    }

    fn run_exec(&mut self, exec: Exec, params: &[CellValue]) -> Result<u64, DatabaseError> {
        let failing = self
            .state
            .failing_procedures
            .read()
            .map_err(|_| lock_poisoned())?
            .contains(&exec.procedure);
        if failing {
            return Err(query_failed(format!(
                "Procedure {} raised an error",
                exec.procedure
            )));
        }

        let table = self
            .state
            .procedures
            .read()
            .map_err(|_| lock_poisoned())?
            .get(&exec.procedure)
            .cloned()
            .ok_or_else(|| {
                query_failed(format!(
                    "Could not find stored procedure '{}'",
                    exec.procedure
                ))
            })?;

        if exec.arguments.len() != params.len() {
            return Err(query_failed(format!(
                "Procedure {} expects {} arguments, {} supplied",
                exec.procedure,
                exec.arguments.len(),
                params.len()
            )));
        }

        self.pending.push((table, exec.arguments, params.to_vec()));
        Ok(1)
    }
}

#[async_trait]
impl SqlConnection for InMemoryConnection {
    async fn query(&mut self, sql: &str, params: &[CellValue]) -> Result<Table, DatabaseError> {
        self.ensure_open()?;
        match parse_statement(sql)? {
            Statement::Select(select) => self.run_select(select, params),
            Statement::Exec(_) => Err(query_failed("EXEC does not return a result set")),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> Result<u64, DatabaseError> {
        self.ensure_open()?;
        match parse_statement(sql)? {
            Statement::Exec(exec) => self.run_exec(exec, params),
            Statement::Select(select) => self.run_select(select, params).map(|t| t.len() as u64),
        }
    }

    async fn commit(&mut self) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let mut tables = self.state.tables.write().map_err(|_| lock_poisoned())?;
        for (name, columns, values) in self.pending.drain(..) {
            let table = tables
                .entry(name)
                .or_insert_with(|| Table::new(columns.clone()));
            let row = table
                .columns()
                .iter()
                .map(|column| {
                    columns
                        .iter()
                        .position(|c| c == column)
                        .map_or(CellValue::Null, |i| values[i].clone())
                })
                .collect();
            table
                .push_row(row)
                .map_err(|e| query_failed(e.to_string()))?;
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DatabaseError> {
        if !self.closed {
            self.closed = true;
            self.pending.clear();
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.state.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Compare a stored cell with a filter value, widening integers to floats
fn cells_equal(cell: &CellValue, value: &CellValue) -> bool {
    match (cell, value) {
        (CellValue::Int(a), CellValue::Float(b)) | (CellValue::Float(b), CellValue::Int(a)) => {
            (*a as f64) == *b
        }
        (CellValue::Null, _) | (_, CellValue::Null) => false,
        _ => cell == value,
    }
}

// ============================================================================
// Statement Parsing
// ============================================================================

enum Statement {
    Select(Select),
    Exec(Exec),
}

struct Select {
    columns: Option<Vec<String>>,
    table: String,
    filters: Vec<(String, Operand)>,
}

struct Exec {
    procedure: String,
    arguments: Vec<String>,
}

enum Operand {
    Param,
    Literal(CellValue),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Symbol(char),
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn tokenize(sql: &str) -> Result<Vec<Token>, DatabaseError> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        value.push('\'');
                    }
                    Some('\'') => break,
                    Some(other) => value.push(other),
                    None => return Err(query_failed("Unclosed quotation mark")),
                }
            }
            tokens.push(Token::Str(value));
        } else if matches!(c, '?' | '=' | ',' | '*' | ';') {
            chars.next();
            tokens.push(Token::Symbol(c));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || matches!(c, '?' | '=' | ',' | '*' | ';' | '\'') {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }

    if tokens.last() == Some(&Token::Symbol(';')) {
        tokens.pop();
    }
    Ok(tokens)
}

fn parse_statement(sql: &str) -> Result<Statement, DatabaseError> {
    let tokens = tokenize(sql)?;
    let mut iter = tokens.into_iter().peekable();

    match iter.next() {
        Some(t) if t.is_keyword("SELECT") => parse_select(&mut iter).map(Statement::Select),
        Some(t) if t.is_keyword("EXEC") || t.is_keyword("EXECUTE") => {
            parse_exec(&mut iter).map(Statement::Exec)
        }
        _ => Err(query_failed(format!("Unsupported statement: {}", sql))),
    }
}

type Tokens = std::iter::Peekable<std::vec::IntoIter<Token>>;

fn expect_word(iter: &mut Tokens, what: &str) -> Result<String, DatabaseError> {
    match iter.next() {
        Some(Token::Word(w)) => Ok(w),
        other => Err(query_failed(format!("Expected {}, found {:?}", what, other))),
    }
}

fn expect_symbol(iter: &mut Tokens, symbol: char) -> Result<(), DatabaseError> {
    match iter.next() {
        Some(Token::Symbol(s)) if s == symbol => Ok(()),
        other => Err(query_failed(format!(
            "Expected '{}', found {:?}",
            symbol, other
        ))),
    }
}

fn parse_select(iter: &mut Tokens) -> Result<Select, DatabaseError> {
    let columns = if iter.peek() == Some(&Token::Symbol('*')) {
        iter.next();
        None
    } else {
        let mut columns = vec![expect_word(iter, "column name")?];
        while iter.peek() == Some(&Token::Symbol(',')) {
            iter.next();
            columns.push(expect_word(iter, "column name")?);
        }
        Some(columns)
    };

    match iter.next() {
        Some(t) if t.is_keyword("FROM") => {}
        other => return Err(query_failed(format!("Expected FROM, found {:?}", other))),
    }
    let table = expect_word(iter, "table name")?;

    let mut filters = Vec::new();
    if let Some(t) = iter.next() {
        if !t.is_keyword("WHERE") {
            return Err(query_failed(format!("Expected WHERE, found {:?}", t)));
        }
        loop {
            let column = expect_word(iter, "column name")?;
            expect_symbol(iter, '=')?;
            let operand = match iter.next() {
                Some(Token::Symbol('?')) => Operand::Param,
                Some(Token::Str(s)) => Operand::Literal(CellValue::Text(s)),
                Some(Token::Word(w)) => Operand::Literal(parse_number(&w)?),
                other => {
                    return Err(query_failed(format!("Expected value, found {:?}", other)))
                }
            };
            filters.push((column, operand));

            match iter.next() {
                None => break,
                Some(t) if t.is_keyword("AND") => continue,
                Some(t) => return Err(query_failed(format!("Expected AND, found {:?}", t))),
            }
        }
    }

    Ok(Select {
        columns,
        table,
        filters,
    })
}

fn parse_number(word: &str) -> Result<CellValue, DatabaseError> {
    if let Ok(v) = word.parse::<i64>() {
        return Ok(CellValue::Int(v));
    }
    word.parse::<f64>()
        .map(CellValue::Float)
        .map_err(|_| query_failed(format!("Unsupported literal '{}'", word)))
}

fn parse_exec(iter: &mut Tokens) -> Result<Exec, DatabaseError> {
    let procedure = expect_word(iter, "procedure name")?;
    let mut arguments = Vec::new();

    while let Some(token) = iter.next() {
        let name = match token {
            Token::Word(w) if w.starts_with('@') && w.len() > 1 => w[1..].to_string(),
            other => {
                return Err(query_failed(format!(
                    "Expected @parameter, found {:?}",
                    other
                )))
            }
        };
        expect_symbol(iter, '=')?;
        expect_symbol(iter, '?')?;
        arguments.push(name);

        match iter.next() {
            None => break,
            Some(Token::Symbol(',')) => continue,
            Some(other) => {
                return Err(query_failed(format!("Expected ',', found {:?}", other)))
            }
        }
    }

    Ok(Exec {
        procedure,
        arguments,
    })
}

#[cfg(test)]
#[path = "memory_database_tests.rs"]
mod tests;
