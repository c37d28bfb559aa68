// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel session lifecycle: `disconnected → connecting → qr_ready →
//! connected`, driven against a provider with idempotency quirks.
//!
//! Connecting always re-probes remote state first, so a stuck local state is
//! resolved by simply retrying the action. Every retry loop is bounded.

use std::time::Duration;

use tracing::{debug, info, warn};

use zapflow_core::ZapflowError;
use zapflow_core::types::ConnectionState;
use zapflow_provider::EvolutionClient;
use zapflow_storage::Database;
use zapflow_storage::queries::channels;

use crate::now_rfc3339;

/// Bounded number of pairing-code polls after a create call without one.
pub const QR_POLL_ATTEMPTS: u32 = 5;

/// Provider state string meaning the session is connected.
const STATE_OPEN: &str = "open";

/// Result of a start-connect action.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// Provider already reported the session open; no create was issued.
    AlreadyConnected,
    /// A pairing artifact was obtained and persisted.
    QrReady { pairing_code: String },
    /// Session created but no artifact yet; the user can retry.
    Connecting,
}

/// Drives the connection state machine for channels.
#[derive(Clone)]
pub struct SessionLifecycle {
    db: Database,
    client: EvolutionClient,
    webhook_url: String,
    qr_poll_base_delay: Duration,
    delete_propagation_delay: Duration,
}

impl SessionLifecycle {
    pub fn new(db: Database, client: EvolutionClient, webhook_url: String) -> Self {
        Self {
            db,
            client,
            webhook_url,
            qr_poll_base_delay: Duration::from_secs(1),
            delete_propagation_delay: Duration::from_secs(2),
        }
    }

    /// Override the internal delays (tests run the polling loop with zero
    /// real delay and assert the attempt count instead).
    pub fn with_delays(mut self, qr_poll_base: Duration, delete_propagation: Duration) -> Self {
        self.qr_poll_base_delay = qr_poll_base;
        self.delete_propagation_delay = delete_propagation;
        self
    }

    /// Begin connecting a channel.
    ///
    /// Probes remote state first: an already-open session short-circuits to
    /// `connected` (re-registering the webhook on the way) without a create
    /// call. A session that exists but is not open is asked for a pairing
    /// artifact directly. Only when neither path yields anything is a fresh
    /// session created, with the documented recovery paths for name
    /// collisions and 401s.
    pub async fn start_connect(&self, channel_id: &str) -> Result<ConnectOutcome, ZapflowError> {
        let channel = self.get_channel(channel_id).await?;
        let instance = channel.instance_name.as_str();

        match self.client.connection_state(instance).await {
            Ok(Some(state)) if state == STATE_OPEN => {
                info!(instance, "session already open, skipping create");
                if let Err(e) = self.client.set_webhook(instance, &self.webhook_url).await {
                    warn!(instance, error = %e, "failed to set webhook (non-fatal)");
                }
                self.persist_connected(channel_id).await?;
                return Ok(ConnectOutcome::AlreadyConnected);
            }
            Ok(Some(state)) if state == "connecting" || state == "close" => {
                debug!(instance, state, "session exists but not open, requesting pairing");
                if let Ok(pairing) = self.client.connect(instance).await
                    && let Some(artifact) = pairing.base64.or(pairing.code)
                {
                    return self.persist_qr(channel_id, artifact).await;
                }
            }
            Ok(other) => {
                debug!(instance, state = ?other, "unrecognized remote state, creating fresh");
            }
            Err(e) => {
                debug!(instance, error = %e, "state probe failed, creating fresh");
            }
        }

        // Create path, with the delete-and-recreate fallback for name collisions.
        let created = match self.client.create_instance(instance, &self.webhook_url).await {
            Ok(result) => result,
            Err(ZapflowError::Provider { message, .. }) if is_name_collision(&message) => {
                info!(instance, "instance name in use, deleting and recreating");
                if let Err(e) = self.client.delete_instance(instance).await {
                    warn!(instance, error = %e, "delete before recreate failed");
                }
                tokio::time::sleep(self.delete_propagation_delay).await;
                self.client.create_instance(instance, &self.webhook_url).await?
            }
            Err(e) => return Err(e),
        };

        let mut artifact = created.pairing_code;

        // The create response often omits the artifact; poll the connect
        // endpoint a bounded number of times with increasing backoff.
        if artifact.is_none() {
            for attempt in 1..=QR_POLL_ATTEMPTS {
                tokio::time::sleep(self.qr_poll_base_delay * attempt).await;
                debug!(instance, attempt, "polling for pairing code");
                match self.client.connect(instance).await {
                    Ok(pairing) => {
                        if let Some(found) = pairing.base64.or(pairing.code) {
                            artifact = Some(found);
                            break;
                        }
                    }
                    Err(e) => warn!(instance, attempt, error = %e, "pairing poll failed"),
                }
            }
        }

        match artifact {
            Some(artifact) => self.persist_qr(channel_id, artifact).await,
            None => {
                // Not an error: the session exists, the user just retries.
                channels::update_state(&self.db, channel_id, &ConnectionState::Connecting, None)
                    .await?;
                info!(instance, "no pairing artifact after polling, left in connecting");
                Ok(ConnectOutcome::Connecting)
            }
        }
    }

    /// Poll the provider and persist the channel's confirmed state.
    /// Returns whether the session is connected.
    pub async fn confirm_connected(&self, channel_id: &str) -> Result<bool, ZapflowError> {
        let channel = self.get_channel(channel_id).await?;
        let state = self.client.connection_state(&channel.instance_name).await?;
        let connected = state.as_deref() == Some(STATE_OPEN);
        if connected {
            self.persist_connected(channel_id).await?;
        } else {
            channels::update_state(
                &self.db,
                channel_id,
                &ConnectionState::Disconnected,
                Some(false),
            )
            .await?;
        }
        Ok(connected)
    }

    /// Force the channel into `connected` without touching the provider.
    /// Test aid for environments without a live provider.
    pub async fn simulate_connected(&self, channel_id: &str) -> Result<(), ZapflowError> {
        self.get_channel(channel_id).await?;
        self.persist_connected(channel_id).await
    }

    /// Apply a provider `connection.update` webhook event to the channel
    /// registered under `instance`. Unknown instances are ignored.
    pub async fn apply_connection_event(
        &self,
        instance: &str,
        state: &str,
    ) -> Result<(), ZapflowError> {
        let Some(channel) = channels::find_by_instance(&self.db, instance).await? else {
            debug!(instance, "connection update for unknown instance ignored");
            return Ok(());
        };
        match state {
            STATE_OPEN => self.persist_connected(&channel.id).await,
            "close" | "closed" => {
                channels::update_state(
                    &self.db,
                    &channel.id,
                    &ConnectionState::Disconnected,
                    Some(false),
                )
                .await?;
                Ok(())
            }
            _ => {
                channels::update_state(&self.db, &channel.id, &ConnectionState::Connecting, None)
                    .await?;
                Ok(())
            }
        }
    }

    /// Log the provider session out and mark the channel disconnected.
    /// Provider failures surface; the local state is left untouched so the
    /// user can retry.
    pub async fn disconnect(&self, channel_id: &str) -> Result<(), ZapflowError> {
        let channel = self.get_channel(channel_id).await?;
        self.client.logout(&channel.instance_name).await?;
        channels::update_state(
            &self.db,
            channel_id,
            &ConnectionState::Disconnected,
            Some(false),
        )
        .await?;
        Ok(())
    }

    /// Delete the channel, releasing the provider session best-effort.
    pub async fn delete(&self, channel_id: &str) -> Result<(), ZapflowError> {
        let channel = self.get_channel(channel_id).await?;
        if let Err(e) = self.client.delete_instance(&channel.instance_name).await {
            warn!(instance = %channel.instance_name, error = %e, "provider delete failed (ignored)");
        }
        channels::delete_channel(&self.db, channel_id).await?;
        Ok(())
    }

    async fn get_channel(
        &self,
        channel_id: &str,
    ) -> Result<zapflow_core::types::Channel, ZapflowError> {
        channels::get_channel(&self.db, channel_id)
            .await?
            .ok_or_else(|| ZapflowError::NotFound {
                entity: "channel",
                id: channel_id.to_string(),
            })
    }

    async fn persist_connected(&self, channel_id: &str) -> Result<(), ZapflowError> {
        channels::update_state(
            &self.db,
            channel_id,
            &ConnectionState::Connected {
                since: now_rfc3339(),
            },
            Some(true),
        )
        .await?;
        Ok(())
    }

    async fn persist_qr(
        &self,
        channel_id: &str,
        artifact: String,
    ) -> Result<ConnectOutcome, ZapflowError> {
        let pairing_code = normalize_pairing_artifact(artifact);
        channels::update_state(
            &self.db,
            channel_id,
            &ConnectionState::QrReady {
                pairing_code: pairing_code.clone(),
            },
            None,
        )
        .await?;
        Ok(ConnectOutcome::QrReady { pairing_code })
    }
}

/// Prefix a bare base64 QR payload so the UI can render it directly.
fn normalize_pairing_artifact(artifact: String) -> String {
    if artifact.starts_with("data:") {
        artifact
    } else {
        format!("data:image/png;base64,{artifact}")
    }
}

/// Whether a provider create error means the instance name is taken.
fn is_name_collision(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already in use")
        || lower.contains("já está em uso")
        || lower.contains("already")
        || lower.contains("exists")
}
