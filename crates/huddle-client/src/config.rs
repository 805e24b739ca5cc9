use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use huddle_sync::config::DEFAULT_PAGE_LIMIT;
use huddle_sync::{SessionContext, SyncConfig};
use huddle_types::ChannelId;

use crate::gateway::{GatewayConfig, ReconnectPolicy};

const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_GATEWAY_URL: &str = "ws://localhost:5000/gateway";

/// Everything the client needs to reach the backend, read from `HUDDLE_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub gateway_url: String,
    pub context: SessionContext,
    /// Channel to open at startup. `None` means the first one listed.
    pub initial_channel: Option<ChannelId>,
    pub reconnect: ReconnectPolicy,
    pub page_limit: usize,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{} must be set", key));

        let defaults = ReconnectPolicy::default();
        let delay_ms = parse_or(
            get("HUDDLE_RECONNECT_DELAY_MS"),
            "HUDDLE_RECONNECT_DELAY_MS",
            defaults.delay.as_millis() as u64,
        )?;
        let max_attempts = parse_or(
            get("HUDDLE_RECONNECT_ATTEMPTS"),
            "HUDDLE_RECONNECT_ATTEMPTS",
            defaults.max_attempts,
        )?;

        Ok(Self {
            api_url: get("HUDDLE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
            gateway_url: get("HUDDLE_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.into()),
            context: SessionContext::new(
                required("HUDDLE_USER_ID")?,
                required("HUDDLE_USERNAME")?,
                required("HUDDLE_TOKEN")?,
            ),
            initial_channel: get("HUDDLE_CHANNEL").map(ChannelId::from),
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(delay_ms),
                max_attempts,
            },
            page_limit: parse_or(
                get("HUDDLE_PAGE_LIMIT"),
                "HUDDLE_PAGE_LIMIT",
                DEFAULT_PAGE_LIMIT,
            )?,
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default().with_page_limit(self.page_limit)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new(self.gateway_url.clone(), self.context.clone())
            .with_reconnect(self.reconnect)
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
