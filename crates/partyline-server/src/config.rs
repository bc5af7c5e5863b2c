use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Extra mention blacklist patterns, on top of the built-in ones.
    pub blacklist: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("PARTYLINE_DB_PATH").unwrap_or_else(|| "partyline.db".into());
        let host = lookup("PARTYLINE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("PARTYLINE_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("PARTYLINE_PORT is not a port number")?;
        let blacklist = lookup("PARTYLINE_BLACKLIST")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            db_path: PathBuf::from(db_path),
            host,
            port,
            blacklist,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("bad listen address {}:{}", self.host, self.port))
    }
}
