// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types are defined in `zapflow-core::types` for use across
//! crate boundaries. This module re-exports them for convenience within the
//! storage crate.

pub use zapflow_core::types::{Channel, Conversation, Lead, Message};
