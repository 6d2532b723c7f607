use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use tracing::info;

use crate::tmdb::TMDB_BASE;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3146";
pub const DEFAULT_FAVORITES_PAGE_SIZE: usize = 20;
pub const DEFAULT_WATCHLIST_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub bind_addr: SocketAddr,
    /// Bearer token required on every route except `/health`, when set.
    pub api_token: Option<String>,
    pub favorites_page_size: usize,
    pub watchlist_page_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let tmdb_api_key = var("TMDB_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("Missing required environment variable: TMDB_API_KEY"))?;
        let tmdb_base_url = var("TMDB_BASE_URL").unwrap_or_else(|| TMDB_BASE.to_string());
        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:3146")?;
        let api_token = var("API_TOKEN");
        if api_token.is_some() {
            info!("Bearer token authentication enabled");
        }

        Ok(Self {
            tmdb_api_key,
            tmdb_base_url,
            bind_addr,
            api_token,
            favorites_page_size: page_size(
                "FAVORITES_PAGE_SIZE",
                var("FAVORITES_PAGE_SIZE"),
                DEFAULT_FAVORITES_PAGE_SIZE,
            )?,
            watchlist_page_size: page_size(
                "WATCHLIST_PAGE_SIZE",
                var("WATCHLIST_PAGE_SIZE"),
                DEFAULT_WATCHLIST_PAGE_SIZE,
            )?,
        })
    }
}

fn page_size(key: &str, raw: Option<String>, default: usize) -> Result<usize> {
    match raw {
        None => Ok(default),
        Some(raw) => {
            let n: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a positive integer"))?;
            if n == 0 {
                anyhow::bail!("{key} must be greater than zero");
            }
            Ok(n)
        }
    }
}
