use anyhow::{Context, Result};
use keyring::Entry;

use super::session::SessionData;
use super::storage::SessionStorage;

const SERVICE_NAME: &str = "docdesk";

/// Fixed entry name the session is stored under.
const SESSION_ENTRY: &str = "session";

/// Session storage in the OS keychain, serialized as JSON.
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, SESSION_ENTRY).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage for KeyringStorage {
    fn load(&self) -> Result<Option<SessionData>> {
        match self.entry()?.get_password() {
            Ok(contents) => {
                let data = serde_json::from_str(&contents)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(data))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn save(&self, data: &SessionData) -> Result<()> {
        let contents = serde_json::to_string(data)?;
        self.entry()?
            .set_password(&contents)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}
