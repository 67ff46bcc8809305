//! Configuration loading from `.env` files.

use std::{env, fmt};

use anyhow::{bail, Context, Result};
use zeroize::Zeroizing;

/// Gateway endpoint used when `DISCORD_GATEWAY_URL` is unset.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Runtime settings derived from environment variables.
#[derive(Clone)]
pub struct Settings {
    /// Discord bot token.
    pub discord_token: Zeroizing<String>,
    /// The only channel whose messages are forwarded.
    pub discord_channel_id: String,
    /// Gateway WebSocket endpoint.
    pub discord_gateway_url: String,
    /// Author public key (x-only, hex).
    pub nostr_pubkey: String,
    /// Author secret key (hex). Never logged.
    pub nostr_privkey: Zeroizing<String>,
    /// Relay to publish to, e.g. `wss://relay.example`.
    pub nostr_relay_url: String,
    /// Optional SOCKS5 proxy (host:port) for the relay connection.
    pub tor_socks: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let nostr_pubkey = required("NOSTR_PUBKEY")?.to_ascii_lowercase();
        if nostr_pubkey.len() != 64 || !nostr_pubkey.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("NOSTR_PUBKEY must be 64 hex characters");
        }
        Ok(Self {
            discord_token: Zeroizing::new(required("DISCORD_TOKEN")?),
            discord_channel_id: required("DISCORD_CHANNEL_ID")?,
            discord_gateway_url: env::var("DISCORD_GATEWAY_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.into()),
            nostr_pubkey,
            nostr_privkey: Zeroizing::new(required("NOSTR_PRIVKEY")?),
            nostr_relay_url: required("NOSTR_RELAY_URL")?,
            tor_socks: env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty()),
        })
    }
}

/// Read a variable that must be present and non-empty.
fn required(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => bail!("missing required setting {name}"),
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("discord_token", &"<redacted>")
            .field("discord_channel_id", &self.discord_channel_id)
            .field("discord_gateway_url", &self.discord_gateway_url)
            .field("nostr_pubkey", &self.nostr_pubkey)
            .field("nostr_privkey", &"<redacted>")
            .field("nostr_relay_url", &self.nostr_relay_url)
            .field("tor_socks", &self.tor_socks)
            .finish()
    }
}

/// Template written by `cordstr init`.
pub fn template() -> String {
    let mut content = String::new();
    content.push_str("DISCORD_TOKEN=\n");
    content.push_str("DISCORD_CHANNEL_ID=\n");
    content.push_str(&format!("DISCORD_GATEWAY_URL={DEFAULT_GATEWAY_URL}\n"));
    content.push_str("NOSTR_PUBKEY=\n");
    content.push_str("NOSTR_PRIVKEY=\n");
    content.push_str("NOSTR_RELAY_URL=wss://relay.damus.io\n");
    content.push_str("TOR_SOCKS=\n");
    content
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{env, fs, sync::Mutex};
    use tempfile::tempdir;

    /// Serializes tests that touch process environment variables.
    pub(crate) static ENV_MUTEX: Mutex<()> = Mutex::new(());

    pub(crate) const VARS: [&str; 7] = [
        "DISCORD_TOKEN",
        "DISCORD_CHANNEL_ID",
        "DISCORD_GATEWAY_URL",
        "NOSTR_PUBKEY",
        "NOSTR_PRIVKEY",
        "NOSTR_RELAY_URL",
        "TOR_SOCKS",
    ];

    pub(crate) fn clear_vars() {
        for v in VARS.iter() {
            env::remove_var(v);
        }
    }

    fn full_env() -> String {
        format!(
            concat!(
                "DISCORD_TOKEN=tok\n",
                "DISCORD_CHANNEL_ID=42\n",
                "NOSTR_PUBKEY={}\n",
                "NOSTR_PRIVKEY={}\n",
                "NOSTR_RELAY_URL=ws://127.0.0.1:7000\n",
            ),
            "AB".repeat(32),
            "01".repeat(32)
        )
    }

    #[test]
    fn loads_env() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, full_env() + "TOR_SOCKS=127.0.0.1:9050\n").unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.discord_token.as_str(), "tok");
        assert_eq!(cfg.discord_channel_id, "42");
        assert_eq!(cfg.discord_gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(cfg.nostr_pubkey, "ab".repeat(32));
        assert_eq!(cfg.nostr_privkey.as_str(), "01".repeat(32));
        assert_eq!(cfg.nostr_relay_url, "ws://127.0.0.1:7000");
        assert_eq!(cfg.tor_socks, Some("127.0.0.1:9050".into()));
    }

    #[test]
    fn each_required_field_is_mandatory() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().unwrap();
        for missing in [
            "DISCORD_TOKEN",
            "DISCORD_CHANNEL_ID",
            "NOSTR_PUBKEY",
            "NOSTR_PRIVKEY",
            "NOSTR_RELAY_URL",
        ] {
            clear_vars();
            let content: String = full_env()
                .lines()
                .filter(|l| !l.starts_with(missing))
                .map(|l| format!("{l}\n"))
                .collect();
            let env_path = dir.path().join(format!("{missing}.env"));
            fs::write(&env_path, content).unwrap();
            let err = Settings::from_env(env_path.to_str().unwrap()).unwrap_err();
            assert!(err.to_string().contains(missing), "{err}");
        }
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, full_env().replace("DISCORD_TOKEN=tok", "DISCORD_TOKEN=")).unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn rejects_short_pubkey() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            full_env().replace(&"AB".repeat(32), "abcd"),
        )
        .unwrap();
        assert!(Settings::from_env(env_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn missing_file_errors() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        assert!(Settings::from_env("/nonexistent/cordstr.env").is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let _g = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_vars();
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        fs::write(&env_path, full_env()).unwrap();
        let cfg = Settings::from_env(env_path.to_str().unwrap()).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains(&"01".repeat(32)));
        assert!(!dbg.contains("tok\""));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn template_lists_every_setting() {
        let t = template();
        for v in VARS {
            assert!(t.contains(&format!("{v}=")), "{v}");
        }
    }
}
