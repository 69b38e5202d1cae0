//! SQLite implementation of the core persistence contracts.
//!
//! One [`SqlStore`] backs all three store traits; each trait lives in its own module.
//! Decoding applies explicit defaults for columns older rows may leave empty.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use renobudget_core::errors::DomainError;
use renobudget_core::store::StoreError;

use crate::DbPool;

pub mod alert;
pub mod project;
pub mod purchase;
pub mod rule;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("refused to store invalid record: {0}")]
    Invalid(#[from] DomainError),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
            RepositoryError::Invalid(error) => StoreError::Backend(error.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqlStore {
    pool: DbPool,
}

impl SqlStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub(crate) fn text(row: &SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn optional_text(row: &SqliteRow, column: &str) -> Result<Option<String>, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn flag(row: &SqliteRow, column: &str) -> Result<bool, RepositoryError> {
    let value: i64 =
        row.try_get(column).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))?;
    Ok(value != 0)
}

pub(crate) fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| RepositoryError::Decode(format!("{column} `{raw}` is not a decimal: {e}")))
}

pub(crate) fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, RepositoryError> {
    parse_decimal(column, &text(row, column)?)
}

pub(crate) fn optional_decimal(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, RepositoryError> {
    optional_text(row, column)?
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_decimal(column, &raw))
        .transpose()
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw = text(row, column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column} `{raw}` is not RFC 3339: {e}")))
}

pub(crate) fn optional_timestamp(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    optional_text(row, column)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw).map(|value| value.with_timezone(&Utc)).map_err(
                |e| RepositoryError::Decode(format!("{column} `{raw}` is not RFC 3339: {e}")),
            )
        })
        .transpose()
}
