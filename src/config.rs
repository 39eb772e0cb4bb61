use std::env;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub run_migrations: bool,
    pub db_max_connections: u32,
    pub session_jwt_key: String,
    pub identity_api_url: String,
    pub identity_secret_key: String,
    pub webhook_signing_secret: String,
    pub media_upload_url: String,
    pub media_upload_preset: String,
    pub postal_lookup_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let run_migrations = env::var("RUN_MIGRATIONS")
            .ok()
            .map(|s| parse_flag(&s))
            .unwrap_or(true);
        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);

        // PEM keys are often pasted into .env files on a single line.
        let session_jwt_key = env::var("SESSION_JWT_KEY")
            .context("SESSION_JWT_KEY is not set")?
            .replace("\\n", "\n");

        let identity_api_url = env::var("IDENTITY_API_URL")
            .unwrap_or_else(|_| "https://api.clerk.com/v1".to_string());
        let identity_secret_key =
            env::var("IDENTITY_SECRET_KEY").context("IDENTITY_SECRET_KEY is not set")?;
        let webhook_signing_secret =
            env::var("WEBHOOK_SIGNING_SECRET").context("WEBHOOK_SIGNING_SECRET is not set")?;

        let media_upload_url =
            env::var("MEDIA_UPLOAD_URL").context("MEDIA_UPLOAD_URL is not set")?;
        let media_upload_preset =
            env::var("MEDIA_UPLOAD_PRESET").context("MEDIA_UPLOAD_PRESET is not set")?;

        let postal_lookup_url = env::var("POSTAL_LOOKUP_URL")
            .unwrap_or_else(|_| "https://viacep.com.br/ws".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            run_migrations,
            db_max_connections,
            session_jwt_key,
            identity_api_url,
            identity_secret_key,
            webhook_signing_secret,
            media_upload_url,
            media_upload_preset,
            postal_lookup_url,
        })
    }
}

fn parse_flag(s: &str) -> bool {
    !matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag("yes"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(" OFF "));
        assert!(!parse_flag("0"));
    }
}
