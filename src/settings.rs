//! Database and integration settings, persisted as one flat JSON object.
//!
//! The file is written verbatim from the settings form and read back with
//! defaults applied to anything missing or empty. Nothing here locks the
//! file: concurrent saves race and the last writer wins.

use anyhow::{format_err, Context, Result};
use log::{debug, warn};
use serde_derive::Deserialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

pub const SETTINGS_FILENAME: &str = "settings.json";
pub const DEFAULT_DB_NAME: &str = "WebPerfMonitor";
pub const DEFAULT_PORT_NUMBER: u16 = 3306;

pub const DATABASE_HOSTNAME: &str = "databaseHostname";
pub const DATABASE_PORT_NUM: &str = "databasePortNum";
pub const DATABASE_USERNAME: &str = "databaseUsername";
pub const DATABASE_PASSWORD: &str = "databasePassword";
pub const SITEMAP_URL: &str = "sitemapUrl";

/// The form fields as they sit on disk. Values stay loosely typed since the
/// form posts strings while hand-edited files may hold numbers.
#[derive(Debug, Default, Deserialize)]
pub struct StoredSettings {
    #[serde(rename = "databaseHostname")]
    pub database_hostname: Option<Value>,
    #[serde(rename = "databasePortNum")]
    pub database_port_num: Option<Value>,
    #[serde(rename = "databaseUsername")]
    pub database_username: Option<Value>,
    #[serde(rename = "databasePassword")]
    pub database_password: Option<Value>,
    #[serde(rename = "databaseName")]
    pub database_name: Option<Value>,
    #[serde(rename = "sitemapUrl")]
    pub sitemap_url: Option<Value>,
    #[serde(rename = "webpagetestAPIKey")]
    pub webpagetest_api_key: Option<Value>,
}

/// Settings with every field resolved to its stored value or its default.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_hostname: String,
    pub database_port_num: u16,
    pub database_username: String,
    pub database_password: String,
    pub database_name: String,
    pub sitemap_url: String,
    pub webpagetest_api_key: String,
}

// Keeps the password out of logs.
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("database_hostname", &self.database_hostname)
            .field("database_port_num", &self.database_port_num)
            .field("database_username", &self.database_username)
            .field("database_name", &self.database_name)
            .field("sitemap_url", &self.sitemap_url)
            .finish_non_exhaustive()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(&StoredSettings::default())
    }
}

impl Settings {
    /// Empty strings count as missing, so they fall back to the default too.
    pub fn resolve(stored: &StoredSettings) -> Self {
        let text = |value: &Option<Value>| non_empty_text(value).unwrap_or_default();
        Self {
            database_hostname: text(&stored.database_hostname),
            database_port_num: port(&stored.database_port_num).unwrap_or(DEFAULT_PORT_NUMBER),
            database_username: text(&stored.database_username),
            database_password: text(&stored.database_password),
            database_name: non_empty_text(&stored.database_name)
                .unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
            sitemap_url: text(&stored.sitemap_url),
            webpagetest_api_key: text(&stored.webpagetest_api_key),
        }
    }

    pub fn validate(&self) -> Vec<FieldError> {
        [
            (
                DATABASE_HOSTNAME,
                &self.database_hostname,
                "You need to supply a Database hostname",
            ),
            (
                DATABASE_USERNAME,
                &self.database_username,
                "You need to supply a Database username",
            ),
            (
                DATABASE_PASSWORD,
                &self.database_password,
                "You need to supply a Database password",
            ),
            (
                SITEMAP_URL,
                &self.sitemap_url,
                "You need to supply a sitemap URL",
            ),
        ]
        .into_iter()
        .filter(|(_, value, _)| value.is_empty())
        .map(|(key, _, msg)| FieldError {
            error_key: key.to_string(),
            error_msg: msg.to_string(),
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub error_key: String,
    pub error_msg: String,
}

fn non_empty_text(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn port(value: &Option<Value>) -> Option<u16> {
    let port = match value.as_ref()? {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) if !s.is_empty() => s.trim().parse().ok(),
        _ => return None,
    };
    if port.is_none() {
        warn!("Ignoring unusable {DATABASE_PORT_NUM} value, using {DEFAULT_PORT_NUMBER}");
    }
    // 0 is never a usable port
    port.filter(|p| *p != 0)
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when there is no usable file. Only a parse failure is an error.
    pub async fn read(&self) -> Result<Option<StoredSettings>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("Could not read {}: {e}", self.path.display());
                return Ok(None);
            }
        };

        let value: Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("invalid JSON in {}", self.path.display()))?;
        if !value.is_object() {
            return Err(format_err!(
                "{} does not contain a JSON object",
                self.path.display()
            ));
        }
        let stored = serde_json::from_value(value)
            .with_context(|| format!("unexpected settings in {}", self.path.display()))?;
        Ok(Some(stored))
    }

    pub async fn load(&self) -> Result<Settings> {
        let stored = self.read().await?.unwrap_or_default();
        let settings = Settings::resolve(&stored);
        debug!("Loaded settings: {settings:?}");
        Ok(settings)
    }

    /// Overwrites the whole file with the submitted form fields.
    pub async fn save(&self, params: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_vec(params)?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("could not write {}", self.path.display()))
    }
}
