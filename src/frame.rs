//! Shared DataFrame access helpers.

use polars::prelude::*;

use crate::error::{ForecastError, Result};

/// Fail with a `MissingColumn` error unless every required column exists.
pub(crate) fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &name in required {
        if df.column(name).is_err() {
            return Err(ForecastError::MissingColumn(name.to_string()));
        }
    }
    Ok(())
}

/// Fetch a column as Float64, casting if needed (columns often arrive as
/// strings from all-string CSV loads).
pub(crate) fn f64_column(df: &DataFrame, name: &str) -> Result<Float64Chunked> {
    let col = df
        .column(name)
        .map_err(|_| ForecastError::MissingColumn(name.to_string()))?;
    Ok(col.cast(&DataType::Float64)?.f64()?.clone())
}

/// Fetch a column as String, casting if needed.
pub(crate) fn str_column(df: &DataFrame, name: &str) -> Result<StringChunked> {
    let col = df
        .column(name)
        .map_err(|_| ForecastError::MissingColumn(name.to_string()))?;
    Ok(col.cast(&DataType::String)?.str()?.clone())
}

/// Like [`f64_column`] but returns None when the column is absent.
pub(crate) fn opt_f64_column(df: &DataFrame, name: &str) -> Result<Option<Float64Chunked>> {
    match df.column(name) {
        Ok(col) => Ok(Some(col.cast(&DataType::Float64)?.f64()?.clone())),
        Err(_) => Ok(None),
    }
}
