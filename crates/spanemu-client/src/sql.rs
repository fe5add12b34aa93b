//! A small SQL interpreter backing the in-memory mock emulator.
//!
//! Supported statements:
//! - DDL: `CREATE TABLE` (GoogleSQL trailing `PRIMARY KEY (..)` or
//!   PostgreSQL inline/table-level primary keys), `CREATE [UNIQUE] INDEX`
//!   (recorded, not enforced), `DROP TABLE`.
//! - DML: `INSERT [INTO] t (cols) VALUES (..), (..)`.
//! - Queries: `SELECT * | cols FROM t [ORDER BY c [ASC|DESC], ..]` and
//!   `SELECT <literal>, ..`.
//!
//! Literals, `@name` parameters (GoogleSQL) and `$n` parameters
//! (PostgreSQL, bound as `pn`) are accepted as values.

use crate::types::ResultSet;
use crate::ClientError;
use spanemu_config::{Dialect, Statement, TypeCode, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    QuotedIdent(String),
    Str(String),
    Int(i64),
    Float(f64),
    Param(String),
    Sym(char),
}

fn invalid(msg: impl Into<String>) -> ClientError {
    ClientError::InvalidArgument(msg.into())
}

fn tokenize(sql: &str, dialect: Dialect) -> Result<Vec<Token>, ClientError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            if text.contains('.') {
                let f = text
                    .parse()
                    .map_err(|_| invalid(format!("bad number literal '{text}'")))?;
                tokens.push(Token::Float(f));
            } else {
                let n = text
                    .parse()
                    .map_err(|_| invalid(format!("bad number literal '{text}'")))?;
                tokens.push(Token::Int(n));
            }
        } else if c == '\'' || c == '`' || c == '"' {
            let (text, next) = quoted(&chars, i)?;
            i = next;
            let token = match c {
                '\'' => Token::Str(text),
                '"' if dialect != Dialect::PostgreSql => Token::Str(text),
                _ => Token::QuotedIdent(text),
            };
            tokens.push(token);
        } else if c == '@' || c == '$' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            if name.is_empty() {
                return Err(invalid("empty parameter name"));
            }
            tokens.push(Token::Param(if c == '$' {
                format!("p{name}")
            } else {
                name
            }));
        } else if "(),;*-.=".contains(c) {
            tokens.push(Token::Sym(c));
            i += 1;
        } else {
            return Err(invalid(format!("unexpected character '{c}'")));
        }
    }
    Ok(tokens)
}

/// Read a literal delimited by `chars[start]`. A doubled delimiter or a
/// backslash escapes the delimiter.
fn quoted(chars: &[char], start: usize) -> Result<(String, usize), ClientError> {
    let delim = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            out.push(chars[i + 1]);
            i += 2;
        } else if c == delim {
            if chars.get(i + 1) == Some(&delim) {
                out.push(delim);
                i += 2;
            } else {
                return Ok((out, i + 1));
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    Err(invalid(format!("unterminated literal starting with {delim}")))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    params: &'a BTreeMap<String, Value>,
}

impl<'a> Parser<'a> {
    fn new(
        sql: &str,
        dialect: Dialect,
        params: &'a BTreeMap<String, Value>,
    ) -> Result<Self, ClientError> {
        let mut tokens = tokenize(sql, dialect)?;
        while tokens.last() == Some(&Token::Sym(';')) {
            tokens.pop();
        }
        Ok(Self {
            tokens,
            pos: 0,
            params,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ClientError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(invalid(format!("expected {kw} near {:?}", self.peek())))
        }
    }

    fn eat_sym(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Sym(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, c: char) -> Result<(), ClientError> {
        if self.eat_sym(c) {
            Ok(())
        } else {
            Err(invalid(format!("expected '{c}' near {:?}", self.peek())))
        }
    }

    fn ident(&mut self) -> Result<String, ClientError> {
        match self.next() {
            Some(Token::Word(w) | Token::QuotedIdent(w)) => Ok(w),
            other => Err(invalid(format!("expected identifier, found {other:?}"))),
        }
    }

    /// `( a [ASC|DESC], b, .. )`
    fn ident_list(&mut self) -> Result<Vec<String>, ClientError> {
        self.expect_sym('(')?;
        let mut names = Vec::new();
        if self.eat_sym(')') {
            return Ok(names);
        }
        loop {
            names.push(self.ident()?);
            let _ = self.eat_keyword("ASC") || self.eat_keyword("DESC");
            if self.eat_sym(')') {
                return Ok(names);
            }
            self.expect_sym(',')?;
        }
    }

    /// Skip tokens up to (not including) a `,` or `)` at nesting depth zero.
    fn skip_clause(&mut self) -> Vec<Token> {
        let mut depth = 0usize;
        let mut skipped = Vec::new();
        while let Some(t) = self.peek() {
            match t {
                Token::Sym('(') => depth += 1,
                Token::Sym(')') if depth == 0 => break,
                Token::Sym(')') => depth -= 1,
                Token::Sym(',') if depth == 0 => break,
                _ => {}
            }
            skipped.push(t.clone());
            self.pos += 1;
        }
        skipped
    }

    fn literal(&mut self) -> Result<Value, ClientError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Int(n)) => Ok(Value::Int64(n)),
            Some(Token::Float(f)) => Ok(Value::Float64(f)),
            Some(Token::Sym('-')) => match self.next() {
                Some(Token::Int(n)) => Ok(Value::Int64(-n)),
                Some(Token::Float(f)) => Ok(Value::Float64(-f)),
                other => Err(invalid(format!("expected number after '-', found {other:?}"))),
            },
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("TRUE") => Ok(Value::Bool(true)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("FALSE") => Ok(Value::Bool(false)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("NULL") => {
                Ok(Value::Null(TypeCode::String))
            }
            Some(Token::Param(name)) => self
                .params
                .get(&name)
                .cloned()
                .ok_or_else(|| invalid(format!("no value bound for parameter {name}"))),
            other => Err(invalid(format!("expected value, found {other:?}"))),
        }
    }

    fn finish(&self) -> Result<(), ClientError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(invalid(format!(
                "unexpected trailing input near {:?}",
                self.peek()
            )))
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    type_code: TypeCode,
    not_null: bool,
}

#[derive(Debug, Clone)]
struct Table {
    name: String,
    columns: Vec<Column>,
    primary_key: Vec<usize>,
    /// Kept sorted by primary key.
    rows: Vec<Vec<Value>>,
}

impl Table {
    fn column_index(&self, name: &str) -> Result<usize, ClientError> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| invalid(format!("column {name} not found in table {}", self.name)))
    }

    fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        self.primary_key
            .iter()
            .map(|&i| compare_values(&a[i], &b[i]))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    fn insert(&mut self, row: Vec<Value>) -> Result<(), ClientError> {
        let at = match self
            .rows
            .binary_search_by(|existing| self.compare_keys(existing, &row))
        {
            Ok(_) if !self.primary_key.is_empty() => {
                return Err(ClientError::AlreadyExists(format!(
                    "row with the same primary key already exists in {}",
                    self.name
                )));
            }
            Ok(i) | Err(i) => i,
        };
        self.rows.insert(at, row);
        Ok(())
    }
}

/// Total order used for primary keys and `ORDER BY`: NULL sorts first.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null(_), Value::Null(_)) => Ordering::Equal,
        (Value::Null(_), _) => Ordering::Less,
        (_, Value::Null(_)) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Float64(x), Value::Float64(y)) => x.total_cmp(y),
        (Value::Int64(x), Value::Float64(y)) => (*x as f64).total_cmp(y),
        (Value::Float64(x), Value::Int64(y)) => x.total_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null(_) => 0,
        Value::Bool(_) => 1,
        Value::Int64(_) | Value::Float64(_) => 2,
        Value::String(_) => 3,
    }
}

fn type_from_name(name: &str) -> TypeCode {
    match name.to_ascii_uppercase().as_str() {
        "INT64" | "BIGINT" | "INT8" | "INTEGER" | "INT" => TypeCode::Int64,
        "BOOL" | "BOOLEAN" => TypeCode::Bool,
        "FLOAT64" | "FLOAT8" | "FLOAT" | "DOUBLE" | "REAL" => TypeCode::Float64,
        _ => TypeCode::String,
    }
}

fn coerce(value: Value, column: &Column) -> Result<Value, ClientError> {
    match (value, column.type_code) {
        (Value::Null(_), code) => {
            if column.not_null {
                Err(invalid(format!("column {} is NOT NULL", column.name)))
            } else {
                Ok(Value::Null(code))
            }
        }
        (Value::Int64(n), TypeCode::Float64) => Ok(Value::Float64(n as f64)),
        (v, code) if v.type_code() == code => Ok(v),
        (v, code) => Err(invalid(format!(
            "value {v:?} does not match column {} of type {}",
            column.name,
            code.api_name()
        ))),
    }
}

/// One database of the mock emulator: dialect, applied DDL, and tables.
#[derive(Debug, Clone)]
pub struct MockDatabase {
    dialect: Dialect,
    ddl: Vec<String>,
    tables: BTreeMap<String, Table>,
}

impl MockDatabase {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ddl: Vec::new(),
            tables: BTreeMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Successfully applied DDL statements, in order.
    pub fn ddl(&self) -> &[String] {
        &self.ddl
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.values().map(|t| t.name.clone()).collect()
    }

    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables
            .get(&table.to_ascii_lowercase())
            .map(|t| t.rows.len())
    }

    fn table(&self, name: &str) -> Result<&Table, ClientError> {
        self.tables
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| ClientError::NotFound(format!("table not found: {name}")))
    }

    pub fn apply_ddl(&mut self, sql: &str) -> Result<(), ClientError> {
        let no_params = BTreeMap::new();
        let mut p = Parser::new(sql, self.dialect, &no_params)?;
        if p.eat_keyword("CREATE") {
            if p.eat_keyword("TABLE") {
                let table = parse_create_table(&mut p)?;
                let key = table.name.to_ascii_lowercase();
                if self.tables.contains_key(&key) {
                    return Err(ClientError::Rpc {
                        code: crate::code::FAILED_PRECONDITION,
                        message: format!("duplicate name in schema: {}", table.name),
                    });
                }
                self.tables.insert(key, table);
            } else {
                let _ = p.eat_keyword("UNIQUE");
                let _ = p.eat_keyword("NULL_FILTERED");
                p.expect_keyword("INDEX")?;
                let _ = p.ident()?;
                p.expect_keyword("ON")?;
                let table = p.ident()?;
                self.table(&table)?;
            }
        } else if p.eat_keyword("DROP") {
            p.expect_keyword("TABLE")?;
            let name = p.ident()?;
            p.finish()?;
            if self.tables.remove(&name.to_ascii_lowercase()).is_none() {
                return Err(ClientError::NotFound(format!("table not found: {name}")));
            }
        } else {
            return Err(invalid(format!("unsupported DDL statement: {sql}")));
        }
        self.ddl.push(sql.trim().to_owned());
        Ok(())
    }

    /// Execute a DML statement, returning the number of affected rows.
    pub fn execute_update(&mut self, statement: &Statement) -> Result<i64, ClientError> {
        let mut p = Parser::new(&statement.sql, self.dialect, &statement.params)?;
        p.expect_keyword("INSERT")?;
        let _ = p.eat_keyword("INTO");
        let name = p.ident()?;
        let table = self
            .tables
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| ClientError::NotFound(format!("table not found: {name}")))?;

        let columns = p.ident_list()?;
        let targets = columns
            .iter()
            .map(|c| table.column_index(c))
            .collect::<Result<Vec<_>, _>>()?;
        p.expect_keyword("VALUES")?;

        let mut rows = Vec::new();
        loop {
            p.expect_sym('(')?;
            let mut values = Vec::new();
            loop {
                values.push(p.literal()?);
                if p.eat_sym(')') {
                    break;
                }
                p.expect_sym(',')?;
            }
            if values.len() != targets.len() {
                return Err(invalid(format!(
                    "expected {} values, found {}",
                    targets.len(),
                    values.len()
                )));
            }
            let mut row: Vec<Value> = table
                .columns
                .iter()
                .map(|c| Value::Null(c.type_code))
                .collect();
            for (value, &idx) in values.into_iter().zip(&targets) {
                row[idx] = coerce(value, &table.columns[idx])?;
            }
            for (idx, column) in table.columns.iter().enumerate() {
                if column.not_null && matches!(row[idx], Value::Null(_)) {
                    return Err(invalid(format!("column {} is NOT NULL", column.name)));
                }
            }
            rows.push(row);
            if !p.eat_sym(',') {
                break;
            }
        }
        p.finish()?;

        // Validate the whole statement before touching the table.
        let mut staged = table.clone();
        for row in rows.iter().cloned() {
            staged.insert(row)?;
        }
        *table = staged;
        Ok(rows.len() as i64)
    }

    pub fn execute_query(&self, statement: &Statement) -> Result<ResultSet, ClientError> {
        let mut p = Parser::new(&statement.sql, self.dialect, &statement.params)?;
        p.expect_keyword("SELECT")?;

        if !p.tokens.iter().any(|t| matches!(t, Token::Word(w) if w.eq_ignore_ascii_case("FROM"))) {
            let mut row = Vec::new();
            loop {
                row.push(p.literal()?);
                if !p.eat_sym(',') {
                    break;
                }
            }
            p.finish()?;
            return Ok(ResultSet {
                columns: vec![String::new(); row.len()],
                rows: vec![row],
            });
        }

        let mut projection = Vec::new();
        if !p.eat_sym('*') {
            loop {
                projection.push(p.ident()?);
                if !p.eat_sym(',') {
                    break;
                }
            }
        }
        p.expect_keyword("FROM")?;
        let table = self.table(&p.ident()?)?;

        let indices: Vec<usize> = if projection.is_empty() {
            (0..table.columns.len()).collect()
        } else {
            projection
                .iter()
                .map(|c| table.column_index(c))
                .collect::<Result<_, _>>()?
        };

        let mut order = Vec::new();
        if p.eat_keyword("ORDER") {
            p.expect_keyword("BY")?;
            loop {
                let idx = table.column_index(&p.ident()?)?;
                let desc = if p.eat_keyword("DESC") {
                    true
                } else {
                    let _ = p.eat_keyword("ASC");
                    false
                };
                order.push((idx, desc));
                if !p.eat_sym(',') {
                    break;
                }
            }
        }
        p.finish()?;

        let mut rows: Vec<&Vec<Value>> = table.rows.iter().collect();
        rows.sort_by(|a, b| {
            order
                .iter()
                .map(|&(i, desc)| {
                    let o = compare_values(&a[i], &b[i]);
                    if desc {
                        o.reverse()
                    } else {
                        o
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        Ok(ResultSet {
            columns: indices
                .iter()
                .map(|&i| table.columns[i].name.clone())
                .collect(),
            rows: rows
                .into_iter()
                .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }
}

fn parse_create_table(p: &mut Parser<'_>) -> Result<Table, ClientError> {
    let name = p.ident()?;
    p.expect_sym('(')?;
    let mut columns = Vec::new();
    let mut key_names: Option<Vec<String>> = None;

    loop {
        if p.eat_sym(')') {
            break;
        }
        if p.eat_keyword("PRIMARY") {
            p.expect_keyword("KEY")?;
            key_names = Some(p.ident_list()?);
        } else if p.peek_keyword("CONSTRAINT") || p.peek_keyword("FOREIGN") {
            p.skip_clause();
        } else {
            let col_name = p.ident()?;
            let spec = p.skip_clause();
            let words: Vec<String> = spec
                .iter()
                .filter_map(|t| match t {
                    Token::Word(w) => Some(w.to_ascii_uppercase()),
                    _ => None,
                })
                .collect();
            let type_name = words
                .first()
                .ok_or_else(|| invalid(format!("column {col_name} has no type")))?;
            let has_pair = |a: &str, b: &str| words.windows(2).any(|w| w[0] == a && w[1] == b);
            if has_pair("PRIMARY", "KEY") {
                key_names = Some(vec![col_name.clone()]);
            }
            columns.push(Column {
                name: col_name,
                type_code: type_from_name(type_name),
                not_null: has_pair("NOT", "NULL"),
            });
        }
        if !p.eat_sym(',') {
            p.expect_sym(')')?;
            break;
        }
    }

    if p.eat_keyword("PRIMARY") {
        p.expect_keyword("KEY")?;
        key_names = Some(p.ident_list()?);
    }
    // Trailing clauses such as INTERLEAVE IN PARENT are accepted and ignored.

    let key_names =
        key_names.ok_or_else(|| invalid(format!("table {name} must have a primary key")))?;
    if columns.is_empty() {
        return Err(invalid(format!("table {name} has no columns")));
    }
    let mut table = Table {
        name,
        columns,
        primary_key: Vec::new(),
        rows: Vec::new(),
    };
    table.primary_key = key_names
        .iter()
        .map(|k| table.column_index(k))
        .collect::<Result<_, _>>()?;
    Ok(table)
}
