// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for the Zapflow inbox service.
//!
//! Exposes two surfaces on one axum server: unauthenticated webhook ingress
//! for the messaging provider and automation tooling, and a bearer-guarded
//! REST API consumed by the dashboard UI.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod webhooks;

pub use auth::AuthConfig;
pub use server::{GatewayState, ServerConfig, build_router, start_server};
