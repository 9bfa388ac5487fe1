//! Defines the `Dialect` trait for database-specific SQL syntax.

pub trait Dialect: Send + Sync {
    /// Wraps an identifier (like a table or column name) in the correct
    /// quotation marks for the dialect.
    ///
    /// - PostgreSQL uses double quotes: `"my_column"`
    fn quote_identifier(&self, ident: &str) -> String;

    /// Renders a string literal, e.g. the delimiter of a COPY statement.
    fn quote_literal(&self, value: &str) -> String;

    /// Returns the name of the dialect (e.g., "PostgreSQL").
    fn name(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct Postgres;

impl Dialect for Postgres {
    fn quote_identifier(&self, ident: &str) -> String {
        // Names supplied already quoted are kept verbatim
        if ident.len() >= 2 && ident.starts_with('"') && ident.ends_with('"') {
            return ident.to_string();
        }
        format!(r#""{}""#, ident.replace('"', r#""""#))
    }

    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", model::core::utils::escape_sql_literal(value))
    }

    fn name(&self) -> String {
        "PostgreSQL".into()
    }
}
