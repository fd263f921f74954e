//! Environment configuration. Credentials are mandatory and validated at
//! startup; a missing or malformed variable aborts boot instead of falling
//! back to a baked-in deployment.

use anyhow::{Context, bail};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GEMINI_MODEL: &str = "gemini-flash-latest";

/// Placeholder value shipped in sample env files; never a usable key.
const GEMINI_KEY_PLACEHOLDER: &str = "MY_GEMINI_API_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub database_url: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let gemini_api_key = require("GEMINI_API_KEY")?;
        if gemini_api_key == GEMINI_KEY_PLACEHOLDER {
            bail!("GEMINI_API_KEY is set to the placeholder value; provide a real key");
        }

        let database_url = require("DATABASE_URL")?;
        if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
            bail!("DATABASE_URL must be a postgres:// connection string");
        }

        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port number: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            gemini_api_key,
            gemini_model,
            database_url,
            port,
        })
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    let value =
        std::env::var(name).with_context(|| format!("{name} environment variable is required"))?;
    if value.trim().is_empty() {
        bail!("{name} environment variable is empty");
    }
    Ok(value)
}
