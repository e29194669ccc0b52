use std::env;

use anyhow::{Context, bail};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub scb: ScbConfig,
}

/// SCB partner gateway settings. `client_id`/`client_secret` fall back to the
/// API key pair when the portal does not issue a separate client pair.
#[derive(Debug, Clone)]
pub struct ScbConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub client_id: String,
    pub client_secret: String,
    pub biller_id: String,
    pub ref3_prefix: String,
    pub callback_url: Option<String>,
    pub webhook_secret: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        Ok(Self {
            port,
            database_url,
            host,
            scb: ScbConfig::from_env()?,
        })
    }
}

impl ScbConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = env::var("SCB_BASE")
            .unwrap_or_else(|_| "https://api-sandbox.partners.scb/partners/sandbox".to_string());
        let api_key = must_get("SCB_API_KEY")?;
        let api_secret = must_get("SCB_API_SECRET")?;
        let client_id = env::var("SCB_CLIENT_ID").unwrap_or_else(|_| api_key.clone());
        let client_secret = env::var("SCB_CLIENT_SECRET").unwrap_or_else(|_| api_secret.clone());
        let biller_id = must_get("SCB_BILLER_ID")?;
        let ref3_prefix = must_get("SCB_REF3_PREFIX")?;
        let callback_url = env::var("SCB_CALLBACK_URL").ok().filter(|v| !v.is_empty());
        let webhook_secret = env::var("SCB_WEBHOOK_SECRET").unwrap_or_else(|_| api_secret.clone());

        if biller_id.len() != 15 || !biller_id.bytes().all(|b| b.is_ascii_digit()) {
            bail!("SCB_BILLER_ID must be 15 digits");
        }

        Ok(Self {
            base_url,
            api_key,
            api_secret,
            client_id,
            client_secret,
            biller_id,
            ref3_prefix,
            callback_url,
            webhook_secret,
        })
    }
}

fn must_get(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("{name} is not set"))
}
