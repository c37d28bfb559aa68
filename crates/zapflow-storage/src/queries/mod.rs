// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per table.

pub mod channels;
pub mod conversations;
pub mod leads;
pub mod messages;

/// Parse a TEXT column into a strum-backed enum, mapping parse failures to a
/// rusqlite conversion error so they surface through the normal query path.
pub(crate) fn parse_text_col<T>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Like [`parse_text_col`] for nullable columns.
pub(crate) fn parse_opt_text_col<T>(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.map(|v| parse_text_col(idx, v)).transpose()
}
