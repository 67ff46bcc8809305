//! Filters chat messages and runs each accepted one through
//! normalize, sign and publish.

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{
    content,
    discord::{ChatMessage, GatewayEvent},
    error::Result,
    event::{Event, UnsignedEvent},
    relay::{Relay, RelayReply},
    signer::Signer,
};

/// Shared, read-only state for every message task.
pub struct Bridge {
    channel_id: String,
    pubkey: String,
    signer: Signer,
    relay: Relay,
    self_id: OnceLock<String>,
}

impl Bridge {
    pub fn new(channel_id: String, pubkey: String, signer: Signer, relay: Relay) -> Self {
        Self {
            channel_id,
            pubkey,
            signer,
            relay,
            self_id: OnceLock::new(),
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Record the bot's own user id. Later calls are ignored.
    pub fn set_self_id(&self, user_id: String) {
        let _ = self.self_id.set(user_id);
    }

    /// True for messages in the watched channel not written by the bot.
    pub fn accepts(&self, msg: &ChatMessage) -> bool {
        if msg.channel_id != self.channel_id {
            return false;
        }
        self.self_id.get() != Some(&msg.author_id)
    }

    /// Normalize, hash and sign a message into a finished note.
    pub fn build_note(&self, msg: &ChatMessage) -> Result<Event> {
        let text = content::normalize(&msg.content, &msg.attachments);
        let unsigned = UnsignedEvent::text_note(self.pubkey.clone(), text);
        self.signer.sign(unsigned)
    }

    /// Publish `msg` if it passes the filters. `Ok(None)` means it was skipped.
    pub async fn handle(&self, msg: &ChatMessage) -> Result<Option<(Event, RelayReply)>> {
        if !self.accepts(msg) {
            debug!(message_id = %msg.id, channel_id = %msg.channel_id, "skipping message");
            return Ok(None);
        }
        let event = self.build_note(msg)?;
        debug!(message_id = %msg.id, event_id = %event.id, "note signed");
        let reply = self.relay.publish(&event).await?;
        Ok(Some((event, reply)))
    }

    /// Run [`Bridge::handle`] and log the outcome; errors end here.
    pub async fn process(&self, msg: ChatMessage) {
        match self.handle(&msg).await {
            Ok(Some((event, _))) => {
                info!(message_id = %msg.id, event_id = %event.id, "note published")
            }
            Ok(None) => {}
            Err(e) => error!(
                message_id = %msg.id,
                stage = e.stage(),
                error = %e,
                "dropping message"
            ),
        }
    }
}

/// Consume gateway events, spawning one task per chat message.
pub async fn dispatch(bridge: Arc<Bridge>, mut rx: mpsc::Receiver<GatewayEvent>) {
    while let Some(ev) = rx.recv().await {
        match ev {
            GatewayEvent::Ready { user_id } => bridge.set_self_id(user_id),
            GatewayEvent::Message(msg) => {
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.process(msg).await });
            }
        }
    }
}
