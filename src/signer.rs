//! BIP-340 Schnorr signing of note ids.

use std::fmt;

use rand::RngCore;
use secp256k1::{All, Keypair, Message, Secp256k1};
use zeroize::Zeroizing;

use crate::error::{BridgeError, Result};
use crate::event::{Event, EventId, UnsignedEvent};

/// Holds the author's key pair for the lifetime of the process.
pub struct Signer {
    secp: Secp256k1<All>,
    keypair: Keypair,
}

impl Signer {
    /// Decode a 64-character hex secret key.
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex.trim())
                .map_err(|e| BridgeError::KeyDecode(format!("private key: {e}")))?,
        );
        if bytes.len() != 32 {
            return Err(BridgeError::KeyDecode(format!(
                "private key: expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &bytes)
            .map_err(|e| BridgeError::KeyDecode(format!("private key: {e}")))?;
        Ok(Self { secp, keypair })
    }

    /// X-only public key matching the secret, as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    /// Sign the raw 32 id bytes, returning 128 hex characters.
    ///
    /// Fresh auxiliary randomness is mixed into every nonce.
    pub fn sign_id(&self, id: &EventId) -> Result<String> {
        let msg = Message::from_digest(*id.as_bytes());
        let mut aux = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut aux);
        let sig = self
            .secp
            .sign_schnorr_with_aux_rand(&msg, &self.keypair, &aux);
        // Catch a faulty primitive before the note leaves the process.
        let (xonly, _) = self.keypair.x_only_public_key();
        self.secp.verify_schnorr(&sig, &msg, &xonly)?;
        Ok(hex::encode(sig.serialize()))
    }

    /// Finalize a note: derive its id, then sign that id.
    pub fn sign(&self, unsigned: UnsignedEvent) -> Result<Event> {
        let id = unsigned.id()?;
        let sig = self.sign_id(&id)?;
        Ok(Event::from_parts(unsigned, id, sig))
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("pubkey", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{schnorr::Signature, XOnlyPublicKey};

    const SECRET: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn rejects_malformed_keys() {
        assert!(matches!(Signer::from_hex("zz"), Err(BridgeError::KeyDecode(_))));
        assert!(matches!(Signer::from_hex("abcd"), Err(BridgeError::KeyDecode(_))));
        assert!(matches!(
            Signer::from_hex(&"00".repeat(32)),
            Err(BridgeError::KeyDecode(_))
        ));
    }

    #[test]
    fn public_key_matches_secret() {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, &[1u8; 32]).unwrap();
        let signer = Signer::from_hex(SECRET).unwrap();
        assert_eq!(
            signer.public_key_hex(),
            hex::encode(kp.x_only_public_key().0.serialize())
        );
    }

    #[test]
    fn signature_verifies_independently() {
        let signer = Signer::from_hex(SECRET).unwrap();
        let unsigned =
            UnsignedEvent::text_note(signer.public_key_hex(), "hello").with_created_at(1);
        let ev = signer.sign(unsigned).unwrap();
        assert_eq!(ev.sig.len(), 128);

        let secp = Secp256k1::verification_only();
        let sig = Signature::from_slice(&hex::decode(&ev.sig).unwrap()).unwrap();
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey).unwrap()).unwrap();
        let id = EventId::from_hex(&ev.id).unwrap();
        secp.verify_schnorr(&sig, &Message::from_digest(*id.as_bytes()), &pk)
            .unwrap();
        ev.verify().unwrap();
    }

    #[test]
    fn signatures_differ_per_id_and_per_call() {
        let signer = Signer::from_hex(SECRET).unwrap();
        let a = EventId::derive(b"a");
        let b = EventId::derive(b"b");
        assert_ne!(signer.sign_id(&a).unwrap(), signer.sign_id(&b).unwrap());
        assert_ne!(signer.sign_id(&a).unwrap(), signer.sign_id(&a).unwrap());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let signer = Signer::from_hex(SECRET).unwrap();
        let mut ev = signer
            .sign(UnsignedEvent::text_note(signer.public_key_hex(), "a"))
            .unwrap();
        ev.content = "b".into();
        assert!(ev.verify().is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let signer = Signer::from_hex(SECRET).unwrap();
        let dbg = format!("{signer:?}");
        assert!(!dbg.contains(SECRET));
        assert!(dbg.contains(&signer.public_key_hex()));
    }
}
