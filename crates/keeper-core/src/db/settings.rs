//! Key/value settings
//!
//! Values are opaque strings. The typed helpers below cover the keys the
//! rest of the crate reads.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{parse_datetime, Database};
use crate::clock::format_db_timestamp;
use crate::error::{Error, Result};

/// Setting keys consumed by the core
pub mod keys {
    pub const SETUP_COMPLETED: &str = "setup_completed";
    pub const LOCAL_RECEIPTS_PATH: &str = "local_receipts_path";
    pub const LOCAL_LOGS_PATH: &str = "local_logs_path";
    pub const REMOTE_BASE_PATH: &str = "remote_base_path";
    pub const REMOTE_ACCESS_TOKEN: &str = "remote_access_token";
    pub const REMOTE_REFRESH_TOKEN: &str = "remote_refresh_token";
    pub const REMOTE_TOKEN_EXPIRY: &str = "remote_token_expiry";
    pub const PAYMENT_CARDS: &str = "payment_cards";

    pub const ALL: &[&str] = &[
        SETUP_COMPLETED,
        LOCAL_RECEIPTS_PATH,
        LOCAL_LOGS_PATH,
        REMOTE_BASE_PATH,
        REMOTE_ACCESS_TOKEN,
        REMOTE_REFRESH_TOKEN,
        REMOTE_TOKEN_EXPIRY,
        PAYMENT_CARDS,
    ];
}

/// OAuth tokens for the remote drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl RemoteCredentials {
    /// Whether the access token is still usable at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

impl Database {
    /// Get a setting value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Upsert a setting; `None` removes it
    pub fn set_setting(&self, key: &str, value: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        match value {
            Some(value) => {
                conn.execute(
                    "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, self.now_str()],
                )?;
            }
            None => {
                conn.execute("DELETE FROM settings WHERE key = ?", params![key])?;
            }
        }
        Ok(())
    }

    /// All settings, sorted by key
    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key ASC")?;
        let settings = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(settings)
    }

    /// Non-empty setting value, trimmed
    pub(crate) fn setting_nonempty(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get_setting(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    pub fn setup_completed(&self) -> Result<bool> {
        Ok(self
            .get_setting(keys::SETUP_COMPLETED)?
            .is_some_and(|v| v == "true" || v == "1"))
    }

    pub fn set_setup_completed(&self, done: bool) -> Result<()> {
        self.set_setting(keys::SETUP_COMPLETED, Some(if done { "true" } else { "false" }))
    }

    /// Payment card profiles (opaque JSON owned by the UI)
    pub fn payment_cards(&self) -> Result<Option<serde_json::Value>> {
        match self.get_setting(keys::PAYMENT_CARDS)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_payment_cards(&self, cards: &serde_json::Value) -> Result<()> {
        self.set_setting(keys::PAYMENT_CARDS, Some(&serde_json::to_string(cards)?))
    }

    /// Stored remote drive credentials, if an access token is present
    pub fn remote_credentials(&self) -> Result<Option<RemoteCredentials>> {
        let Some(access_token) = self.setting_nonempty(keys::REMOTE_ACCESS_TOKEN)? else {
            return Ok(None);
        };
        let refresh_token = self.setting_nonempty(keys::REMOTE_REFRESH_TOKEN)?;
        let expires_at = match self.setting_nonempty(keys::REMOTE_TOKEN_EXPIRY)? {
            Some(raw) => Some(parse_expiry(&raw)?),
            None => None,
        };
        Ok(Some(RemoteCredentials {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    pub fn set_remote_credentials(&self, creds: &RemoteCredentials) -> Result<()> {
        self.set_setting(keys::REMOTE_ACCESS_TOKEN, Some(&creds.access_token))?;
        self.set_setting(keys::REMOTE_REFRESH_TOKEN, creds.refresh_token.as_deref())?;
        let expiry = creds.expires_at.map(format_db_timestamp);
        self.set_setting(keys::REMOTE_TOKEN_EXPIRY, expiry.as_deref())
    }

    pub fn clear_remote_credentials(&self) -> Result<()> {
        self.set_setting(keys::REMOTE_ACCESS_TOKEN, None)?;
        self.set_setting(keys::REMOTE_REFRESH_TOKEN, None)?;
        self.set_setting(keys::REMOTE_TOKEN_EXPIRY, None)
    }
}

/// Token expiry is stored as RFC 3339 or "YYYY-MM-DD HH:MM:SS" (UTC)
fn parse_expiry(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok() {
        return Ok(parse_datetime(raw));
    }
    Err(Error::Config(format!("invalid remote_token_expiry: {}", raw)))
}
