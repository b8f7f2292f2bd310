use std::ops::ControlFlow;

use sqlparser::ast;
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use crate::errors::{Result, SqlRelError};

/// Which grammar to parse statements with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    Postgres,
    /// More permissive grammar accepted for older clients.
    Generic,
}

impl SqlDialect {
    fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }
}

/// Words that may never be used as bare column references.
const RESERVED: &[&str] = &[
    "and", "as", "by", "delete", "from", "group", "having", "insert", "into", "join", "limit",
    "offset", "on", "or", "order", "select", "set", "union", "update", "values", "where",
];

/// Parse exactly one statement.
pub fn parse_statement(sql: &str, dialect: SqlDialect) -> Result<ast::Statement> {
    let mut statements = Parser::parse_sql(dialect.dialect().as_ref(), sql)?;
    let statement = match statements.len() {
        0 => return Err(SqlRelError::Syntax("empty statement".to_string())),
        1 => statements.remove(0),
        n => {
            return Err(SqlRelError::Syntax(format!(
                "expected a single statement, found {n}"
            )));
        }
    };

    // The parser accepts keywords in expression position as identifiers, so
    // e.g. "SELECT FROM" parses as a projection of a column named "FROM".
    let reserved = ast::visit_expressions(&statement, |expr| match expr {
        ast::Expr::Identifier(ident)
            if ident.quote_style.is_none()
                && RESERVED.contains(&ident.value.to_ascii_lowercase().as_str()) =>
        {
            ControlFlow::Break(ident.value.clone())
        }
        _ => ControlFlow::Continue(()),
    });
    if let ControlFlow::Break(word) = reserved {
        return Err(SqlRelError::Syntax(format!(
            "Encountered \"{}\" where an expression was expected",
            word.to_uppercase()
        )));
    }

    Ok(statement)
}
