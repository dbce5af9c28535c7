//! Settings types. Every section deserializes from camelCase JSON and falls
//! back to its compiled default for any missing key.

use std::path::PathBuf;
use std::time::Duration;

use poker_core::VoteDeck;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.poker/settings.json`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PokerSettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

impl PokerSettings {
    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.session.closing_delay_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "session.closingDelaySecs must be at least 1".into(),
            ));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        let _ = self.session.deck()?;
        Ok(())
    }
}

/// WebSocket server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    /// Outbound messages buffered per client before updates are dropped.
    pub max_send_queue: usize,
    /// WebSocket ping interval in seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Session coordinator settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Seconds between `closeSession` and the session being destroyed.
    pub closing_delay_secs: u64,
    /// Vote deck offered by every new session.
    pub allowed_vote_values: Vec<String>,
}

impl SessionSettings {
    pub fn closing_delay(&self) -> Duration {
        Duration::from_secs(self.closing_delay_secs)
    }

    pub fn deck(&self) -> Result<VoteDeck> {
        VoteDeck::new(self.allowed_vote_values.iter().cloned())
            .map_err(|e| SettingsError::InvalidValue(format!("session.allowedVoteValues: {e}")))
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            closing_delay_secs: 60,
            allowed_vote_values: VoteDeck::default().values().to_vec(),
        }
    }
}

/// Card store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite file; relative paths resolve against `~/.poker`.
    pub db_path: String,
}

impl StoreSettings {
    pub fn resolved_db_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.db_path);
        if path.is_absolute() {
            path
        } else {
            crate::loader::poker_home().join(path)
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "cards.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = PokerSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.session.closing_delay(), Duration::from_secs(60));
        assert_eq!(settings.session.deck().unwrap(), VoteDeck::default());
    }

    #[test]
    fn camel_case_round_trip() {
        let json = serde_json::to_value(PokerSettings::default()).unwrap();
        assert_eq!(json["session"]["closingDelaySecs"], 60);
        assert_eq!(json["server"]["maxSendQueue"], 256);
        assert_eq!(json["store"]["dbPath"], "cards.db");
    }

    #[test]
    fn bad_deck_fails_validation() {
        let mut settings = PokerSettings::default();
        settings.session.allowed_vote_values = vec!["1".into(), "1".into()];
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("allowedVoteValues"));
    }

    #[test]
    fn zero_closing_delay_fails_validation() {
        let mut settings = PokerSettings::default();
        settings.session.closing_delay_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn absolute_db_path_is_kept() {
        let store = StoreSettings {
            db_path: "/var/lib/poker/cards.db".into(),
        };
        assert_eq!(
            store.resolved_db_path(),
            PathBuf::from("/var/lib/poker/cards.db")
        );
        assert!(StoreSettings::default()
            .resolved_db_path()
            .ends_with(".poker/cards.db"));
    }
}
