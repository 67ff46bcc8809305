//! Failure taxonomy for the note pipeline.

use thiserror::Error;

/// Errors produced while turning one chat message into a published note.
///
/// Each variant is scoped to a single message: the bridge logs it and moves
/// on to the next message.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A field could not be encoded as JSON.
    #[error("serialize: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The private key is not valid hex of the right length.
    #[error("key decode: {0}")]
    KeyDecode(String),

    /// The secp256k1 primitive rejected the key/message pair.
    #[error("sign: {0}")]
    Signing(#[from] secp256k1::Error),

    /// Relay connect, write, or read failed.
    #[error("relay connection: {0}")]
    Connection(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::Connection(e.to_string())
    }
}

impl BridgeError {
    /// Short name of the pipeline stage that failed, used as a log field.
    pub fn stage(&self) -> &'static str {
        match self {
            BridgeError::Serialization(_) => "serialize",
            BridgeError::KeyDecode(_) => "key-decode",
            BridgeError::Signing(_) => "sign",
            BridgeError::Connection(_) => "publish",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
