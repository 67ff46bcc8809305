//! Minimal Discord gateway client: identify, heartbeat, and surface
//! `READY` / `MESSAGE_CREATE` dispatches as [`GatewayEvent`]s.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
pub const INTENTS: u64 = (1 << 9) | (1 << 12) | (1 << 15);

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A chat message as the bridge sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    /// Attachment URLs in upload order.
    pub attachments: Vec<String>,
}

/// Events forwarded from the gateway to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Session established; carries the bot's own user id.
    Ready { user_id: String },
    Message(ChatMessage),
}

#[derive(Debug, Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Deserialize)]
struct MessageCreate {
    id: String,
    channel_id: String,
    author: Author,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Deserialize)]
struct Author {
    id: String,
}

#[derive(Deserialize)]
struct Attachment {
    url: String,
}

impl From<MessageCreate> for ChatMessage {
    fn from(m: MessageCreate) -> Self {
        Self {
            id: m.id,
            channel_id: m.channel_id,
            author_id: m.author.id,
            content: m.content,
            attachments: m.attachments.into_iter().map(|a| a.url).collect(),
        }
    }
}

/// Decode a dispatch (`op` 0) body into an event the bridge cares about.
fn decode_dispatch(t: Option<&str>, d: Value) -> Result<Option<GatewayEvent>> {
    match t {
        Some("READY") => {
            let user_id = d
                .pointer("/user/id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("READY without user id"))?;
            Ok(Some(GatewayEvent::Ready {
                user_id: user_id.to_string(),
            }))
        }
        Some("MESSAGE_CREATE") => {
            let msg: MessageCreate = serde_json::from_value(d)?;
            Ok(Some(GatewayEvent::Message(msg.into())))
        }
        _ => Ok(None),
    }
}

fn identify(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "cordstr",
                "device": "cordstr",
            },
        },
    })
}

fn heartbeat(seq: Option<u64>) -> Message {
    Message::Text(json!({ "op": OP_HEARTBEAT, "d": seq }).to_string())
}

/// Gateway connection owner. Reconnects after a session drops, but only once
/// a first session has reached `READY`.
pub struct Gateway {
    url: String,
    token: Zeroizing<String>,
    ready: bool,
}

impl Gateway {
    pub fn new(url: impl Into<String>, token: Zeroizing<String>) -> Self {
        Self {
            url: url.into(),
            token,
            ready: false,
        }
    }

    /// Run sessions until the receiving side goes away.
    ///
    /// An error before the first `READY` is returned to the caller; later
    /// session failures are logged and retried.
    pub async fn run(&mut self, tx: mpsc::Sender<GatewayEvent>) -> Result<()> {
        loop {
            match self.session(&tx).await {
                Ok(()) => return Ok(()),
                Err(e) if !self.ready => return Err(e.context("establishing chat session")),
                Err(e) => {
                    warn!(error = %e, "gateway session ended, reconnecting");
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// One gateway session. Returns `Ok` only when `tx` is closed.
    pub async fn session(&mut self, tx: &mpsc::Sender<GatewayEvent>) -> Result<()> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .context("connecting to gateway")?;

        let hello = loop {
            match ws.next().await {
                Some(Ok(Message::Text(txt))) => break serde_json::from_str::<Payload>(&txt)?,
                Some(Ok(Message::Close(frame))) => bail!("gateway closed before hello: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => bail!("gateway closed before hello"),
            }
        };
        if hello.op != OP_HELLO {
            bail!("expected hello, got op {}", hello.op);
        }
        let period = hello
            .d
            .get("heartbeat_interval")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("hello without heartbeat_interval"))?;
        debug!(period_ms = period, "gateway hello");

        ws.send(Message::Text(identify(&self.token).to_string()))
            .await?;

        let mut ticker = interval(Duration::from_millis(period.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        let mut seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ws.send(heartbeat(seq)).await?;
                }
                msg = ws.next() => {
                    let Some(msg) = msg else { bail!("gateway stream ended") };
                    match msg? {
                        Message::Text(txt) => {
                            let payload: Payload = match serde_json::from_str(&txt) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, "unparseable gateway payload");
                                    continue;
                                }
                            };
                            if payload.s.is_some() {
                                seq = payload.s;
                            }
                            match payload.op {
                                OP_DISPATCH => {
                                    let event = match decode_dispatch(payload.t.as_deref(), payload.d) {
                                        Ok(Some(ev)) => ev,
                                        Ok(None) => continue,
                                        Err(e) => {
                                            warn!(error = %e, kind = ?payload.t, "bad dispatch");
                                            continue;
                                        }
                                    };
                                    if let GatewayEvent::Ready { user_id } = &event {
                                        info!(%user_id, "gateway ready");
                                        self.ready = true;
                                    }
                                    if tx.send(event).await.is_err() {
                                        return Ok(());
                                    }
                                }
                                OP_HEARTBEAT => ws.send(heartbeat(seq)).await?,
                                OP_HEARTBEAT_ACK => {}
                                OP_RECONNECT => bail!("gateway requested reconnect"),
                                OP_INVALID_SESSION => bail!("gateway invalidated session"),
                                op => debug!(op, "ignoring gateway op"),
                            }
                        }
                        Message::Close(frame) => bail!("gateway closed: {frame:?}"),
                        _ => {}
                    }
                }
            }
        }
    }
}
