// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbox synchronization core: event normalization, conversation
//! reconciliation, and the channel session lifecycle.
//!
//! Control flow: webhook ingress (zapflow-gateway) → [`normalizer`] →
//! [`reconciler`] → store. User actions drive [`lifecycle`] and the
//! reconciler's UI-facing operations.

pub mod lifecycle;
pub mod normalizer;
pub mod reconciler;

pub use lifecycle::{ConnectOutcome, SessionLifecycle};
pub use normalizer::{NormalizedMessage, Outcome, SkipReason};
pub use reconciler::{Reconciler, SendOutcome, SyncSummary};

/// Current instant as an RFC 3339 UTC string, the storage timestamp format.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
