// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Zapflow inbox service.
//!
//! All access goes through [`Database`] (a tokio-rusqlite handle with WAL
//! mode and embedded refinery migrations) and the typed query modules under
//! [`queries`].

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
