//! Identifier validation and quoting.
//!
//! Identifiers cannot be bound as statement parameters, so every table and
//! column name that ends up in generated SQL goes through this module.
//! Table names arrive from HTTP callers and are held to a strict pattern;
//! column names come from the source catalog and are only checked for
//! obviously broken input before being quoted.

use crate::error::{EtlError, Result};
use std::fmt;

/// PostgreSQL truncates identifiers longer than this (NAMEDATALEN - 1).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Schema an unqualified name resolves to under the default `search_path`.
const DEFAULT_SCHEMA: &str = "public";

/// A validated, optionally schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    /// Parse `table` or `schema.table` from untrusted input.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split('.');
        let (schema, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => (None, name),
            (Some(schema), Some(name), None) => (Some(schema), name),
            _ => {
                return Err(EtlError::InvalidIdentifier(format!(
                    "{raw:?} has too many dot-separated parts"
                )))
            }
        };

        if let Some(schema) = schema {
            check_strict(raw, schema)?;
        }
        check_strict(raw, name)?;

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema-qualified key, so `customers` and `public.customers` lock
    /// the same table.
    pub fn lock_key(&self) -> String {
        format!(
            "{}.{}",
            self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA),
            self.name
        )
    }

    /// Quoted form ready to splice into SQL.
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn check_strict(raw: &str, part: &str) -> Result<()> {
    if part.is_empty() {
        return Err(EtlError::InvalidIdentifier(format!(
            "{raw:?} contains an empty name"
        )));
    }
    if part.len() > MAX_IDENTIFIER_LENGTH {
        return Err(EtlError::InvalidIdentifier(format!(
            "{raw:?} exceeds {MAX_IDENTIFIER_LENGTH} bytes"
        )));
    }

    let mut chars = part.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if !starts_ok || !rest_ok {
        return Err(EtlError::InvalidIdentifier(format!(
            "{raw:?} may only contain ASCII letters, digits, '_' and '$', and must not start with a digit"
        )));
    }

    Ok(())
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a column name reported by the source database.
///
/// Rejects empty names, NUL bytes and names over the PostgreSQL limit;
/// everything else is legal inside a quoted identifier.
pub fn quote_column(table: &TableName, name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') || name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(EtlError::InvalidIdentifier(format!(
            "column {name:?} of table {table}"
        )));
    }
    Ok(quote(name))
}
