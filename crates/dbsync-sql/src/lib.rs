//! T-SQL statement rendering.
//!
//! Turns schema model elements into executable statements. Values that come
//! from data (seed records, catalog lookups) are never spliced into the SQL
//! text; they travel as named parameters (`@p1`, `@p2`, ...) next to it.

use dbsync_schema::Value;
use std::fmt;

mod ddl;
pub use ddl::*;

/// A single statement plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// The SQL text with `@pN` placeholders.
    pub sql: String,

    /// Parameters in placeholder order (`params[0]` is `@p1`).
    pub params: Vec<Param>,
}

/// A named statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: Value,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind the next positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        let name = placeholder(self.params.len());
        self.params.push(Param {
            name,
            value: value.into(),
        });
        self
    }

    /// Look up a bound parameter by placeholder name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Render with every parameter inlined as a literal, for scripts meant to
    /// be read or run by hand.
    ///
    /// Placeholders inside bracketed identifiers and string literals are left
    /// as they are.
    pub fn to_script(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut rest = self.sql.as_str();
        while let Some(pos) = rest.find(['[', '\'', '@']) {
            out.push_str(&rest[..pos]);
            rest = &rest[pos..];
            let taken = match rest.as_bytes()[0] {
                b'[' => quoted_span(rest, ']'),
                b'\'' => quoted_span(rest, '\''),
                _ => match self.placeholder_at(rest) {
                    Some((len, param)) => {
                        out.push_str(&literal(&param.value));
                        rest = &rest[len..];
                        continue;
                    }
                    None => 1,
                },
            };
            out.push_str(&rest[..taken]);
            rest = &rest[taken..];
        }
        out.push_str(rest);
        out
    }

    /// The bound parameter named by an `@pN` at the start of `sql`, and the
    /// length of the placeholder.
    fn placeholder_at(&self, sql: &str) -> Option<(usize, &Param)> {
        let after = sql.strip_prefix("@p")?;
        let digits = after.chars().take_while(|c| c.is_ascii_digit()).count();
        let index = after[..digits].parse::<usize>().ok()?.checked_sub(1)?;
        self.params.get(index).map(|param| (2 + digits, param))
    }
}

/// Length of the quoted span at the start of `sql`, up to and including the
/// `close` character. A doubled `close` is an escape and does not end it.
fn quoted_span(sql: &str, close: char) -> usize {
    let mut chars = sql.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c == close {
            if matches!(chars.peek(), Some((_, next)) if *next == close) {
                chars.next();
            } else {
                return i + c.len_utf8();
            }
        }
    }
    sql.len()
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Placeholder name for the zero-based parameter `index`.
pub fn placeholder(index: usize) -> String {
    format!("@p{}", index + 1)
}

/// A T-SQL string literal wrapper.
///
/// Display writes the value as a Unicode literal with single quotes doubled.
///
/// # Example
/// ```
/// use dbsync_sql::Lit;
/// assert_eq!(format!("{}", Lit("foo")), "N'foo'");
/// assert_eq!(format!("{}", Lit("it's")), "N'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A T-SQL identifier wrapper.
///
/// Display writes the value in square brackets, doubling any closing bracket.
///
/// # Example
/// ```
/// use dbsync_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "[user]");
/// assert_eq!(format!("{}", Ident("odd]name")), "[odd]]name]");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for c in self.0.as_ref().chars() {
            if c == ']' {
                write!(f, "]]")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "]")
    }
}

/// Quote a T-SQL identifier.
///
/// Always quotes, so reserved words like `user`, `order` or `table` are safe
/// as table and column names.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Render a value as a T-SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(true) => "1".to_string(),
        Value::Boolean(false) => "0".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Text(v) => format!("{}", Lit(v)),
    }
}
