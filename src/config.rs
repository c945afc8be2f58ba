use anyhow::{Context, Result};
use std::{net::SocketAddr, path::PathBuf};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8888";
pub const DEFAULT_STATIC_DIR: &str = "static";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub settings_path: PathBuf,
    pub static_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `WEBPERF_LISTEN`, `WEBPERF_SETTINGS` and `WEBPERF_STATIC_DIR`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen = lookup("WEBPERF_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen
            .parse()
            .with_context(|| format!("invalid WEBPERF_LISTEN address {listen:?}"))?;

        let settings_path = lookup("WEBPERF_SETTINGS")
            .unwrap_or_else(|| crate::settings::SETTINGS_FILENAME.to_string())
            .into();
        let static_dir = lookup("WEBPERF_STATIC_DIR")
            .unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string())
            .into();

        Ok(Self {
            listen_addr,
            settings_path,
            static_dir,
        })
    }
}
