//! Publishing signed notes over a long-lived relay WebSocket.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async_tls, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{BridgeError, Result};
use crate::event::Event;

/// How long to wait for the relay to answer one `EVENT`.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

type RelayStream = WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>;

/// Relay answer to one `EVENT`.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayReply {
    /// `["OK", <id>, <accepted>, <message>]`
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice(String),
    /// Anything else, kept verbatim.
    Other(String),
}

impl RelayReply {
    pub fn parse(text: &str) -> Self {
        let Ok(val) = serde_json::from_str::<Value>(text) else {
            return RelayReply::Other(text.to_string());
        };
        let Some(arr) = val.as_array() else {
            return RelayReply::Other(text.to_string());
        };
        match arr.first().and_then(|v| v.as_str()) {
            Some("OK") if arr.len() >= 3 => RelayReply::Ok {
                event_id: arr[1].as_str().unwrap_or_default().to_string(),
                accepted: arr[2].as_bool().unwrap_or(false),
                message: arr
                    .get(3)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            Some("NOTICE") => RelayReply::Notice(
                arr.get(1)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => RelayReply::Other(text.to_string()),
        }
    }
}

/// One relay connection shared by every publish call.
///
/// The lock covers write-then-read so each `EVENT` is paired with the `OK`
/// carrying its id (or a `NOTICE`). A failed exchange drops the socket; the
/// following publish dials again.
pub struct Relay {
    url: String,
    tor_socks: Option<String>,
    conn: Mutex<Option<RelayStream>>,
}

impl Relay {
    /// Create a handle without dialing.
    pub fn new(url: impl Into<String>, tor_socks: Option<String>) -> Self {
        Self {
            url: url.into(),
            tor_socks,
            conn: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Dial now instead of on the first publish.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(connect_ws(&self.url, self.tor_socks.as_deref()).await?);
            info!(relay = %self.url, "connected to relay");
        }
        Ok(())
    }

    /// Send `["EVENT", event]` and wait for the relay's answer to it.
    pub async fn publish(&self, event: &Event) -> Result<RelayReply> {
        let frame = event.to_envelope()?;
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(connect_ws(&self.url, self.tor_socks.as_deref()).await?);
            info!(relay = %self.url, "connected to relay");
        }
        let Some(ws) = guard.as_mut() else {
            return Err(BridgeError::Connection("no relay connection".into()));
        };
        let result = exchange(ws, frame, &event.id).await;
        if result.is_err() {
            // The stream may be mid-frame; never reuse it.
            *guard = None;
        }
        result
    }

    /// Close the socket if one is open.
    pub async fn close(&self) {
        if let Some(mut ws) = self.conn.lock().await.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "relay close");
            }
        }
    }
}

async fn exchange(ws: &mut RelayStream, frame: String, event_id: &str) -> Result<RelayReply> {
    debug!(%frame, "sending event");
    ws.send(Message::Text(frame)).await?;
    match timeout(REPLY_TIMEOUT, await_reply(ws, event_id)).await {
        Ok(reply) => reply,
        Err(_) => Err(BridgeError::Connection(format!(
            "no reply for {event_id} within {}s",
            REPLY_TIMEOUT.as_secs()
        ))),
    }
}

/// Read frames until the `OK` for `event_id` or a `NOTICE` arrives.
///
/// `OK`s for other ids and unsolicited frames such as `AUTH` are skipped.
async fn await_reply(ws: &mut RelayStream, event_id: &str) -> Result<RelayReply> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(txt) => {
                let reply = RelayReply::parse(&txt);
                match &reply {
                    RelayReply::Ok { event_id: got, .. } if got != event_id => {
                        debug!(expected = %event_id, %got, "skipping ack for another event");
                        continue;
                    }
                    RelayReply::Ok { accepted: true, .. } => {
                        info!(%event_id, "relay accepted event")
                    }
                    RelayReply::Ok { message, .. } => {
                        warn!(%event_id, %message, "relay rejected event")
                    }
                    RelayReply::Notice(_) => info!(response = %txt, "relay notice"),
                    RelayReply::Other(_) => {
                        debug!(frame = %txt, "skipping unsolicited frame");
                        continue;
                    }
                }
                return Ok(reply);
            }
            Message::Close(frame) => {
                return Err(BridgeError::Connection(format!(
                    "relay closed connection: {frame:?}"
                )));
            }
            _ => {}
        }
    }
    Err(BridgeError::Connection("relay stream ended".into()))
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, tor_socks: Option<&str>) -> Result<RelayStream> {
    let url = Url::parse(relay).map_err(|e| BridgeError::Connection(format!("{relay}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| BridgeError::Connection("missing host".into()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| BridgeError::Connection("missing port".into()))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(
            Socks5Stream::connect(proxy, (host, port))
                .await
                .map_err(|e| BridgeError::Connection(format!("socks {proxy}: {e}")))?,
        )
    } else {
        Box::new(
            TcpStream::connect((host, port))
                .await
                .map_err(|e| BridgeError::Connection(format!("{host}:{port}: {e}")))?,
        )
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
