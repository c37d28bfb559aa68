// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Messaging-provider client for the Zapflow inbox service.
//!
//! Wraps the Evolution-style HTTP API: session lifecycle commands, message
//! sending, and chat/message history listing, plus best-effort extraction of
//! human-readable error messages from the provider's heterogeneous error
//! shapes.

pub mod client;
pub mod error_extract;
pub mod types;

pub use client::{CreateInstanceResult, EvolutionClient, Pairing};
pub use error_extract::extract_provider_error;
