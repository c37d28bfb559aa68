// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Zapflow inbox service.
//!
//! Provides the shared error type and the domain types (channels,
//! conversations, messages, leads) used throughout the workspace.

pub mod error;
pub mod types;

pub use error::ZapflowError;
pub use types::{
    Channel, ChannelKind, ConnectionState, Conversation, ConversationStatus, Lead, LeadSource,
    MediaKind, Message, SenderRole,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zapflow_error_has_all_variants() {
        let _config = ZapflowError::Config("test".into());
        let _storage = ZapflowError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _provider = ZapflowError::Provider {
            message: "test".into(),
            source: None,
        };
        let _gateway = ZapflowError::Gateway {
            message: "test".into(),
            source: None,
        };
        let _not_found = ZapflowError::NotFound {
            entity: "channel",
            id: "ch-1".into(),
        };
        let _conflict = ZapflowError::Conflict("test".into());
        let _internal = ZapflowError::Internal("test".into());
    }

    #[test]
    fn not_found_formats_entity_and_id() {
        let err = ZapflowError::NotFound {
            entity: "conversation",
            id: "conv-9".into(),
        };
        assert_eq!(err.to_string(), "conversation not found: conv-9");
    }
}
