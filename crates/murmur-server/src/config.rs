use std::path::PathBuf;

use anyhow::{Context, bail};

/// Secrets that ship in sample `.env` files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    pub media_url_prefix: String,
    /// Allowed browser origin. `None` means permissive CORS.
    pub client_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("MURMUR_JWT_SECRET").context("MURMUR_JWT_SECRET must be set")?;
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MURMUR_JWT_SECRET is empty or a placeholder; set a real secret");
        }

        let port = var("MURMUR_PORT", "4000")
            .parse()
            .context("MURMUR_PORT must be a port number")?;

        let media_url_prefix = var("MURMUR_MEDIA_URL_PREFIX", "/media");
        if !media_url_prefix.starts_with('/') || media_url_prefix.len() < 2 {
            bail!("MURMUR_MEDIA_URL_PREFIX must be an absolute path like /media");
        }

        Ok(Self {
            host: var("MURMUR_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("MURMUR_DB_PATH", "murmur.db")),
            jwt_secret,
            media_dir: PathBuf::from(var("MURMUR_MEDIA_DIR", "./media")),
            media_url_prefix: media_url_prefix.trim_end_matches('/').to_string(),
            client_origin: get("MURMUR_CLIENT_ORIGIN").filter(|o| !o.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = load(&[("MURMUR_JWT_SECRET", "a-long-random-secret")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 4000);
        assert_eq!(config.db_path, PathBuf::from("murmur.db"));
        assert_eq!(config.media_url_prefix, "/media");
        assert!(config.client_origin.is_none());
    }

    #[test]
    fn secret_is_required_and_not_a_placeholder() {
        assert!(load(&[]).is_err());
        assert!(load(&[("MURMUR_JWT_SECRET", "dev-secret-change-me")]).is_err());
        assert!(load(&[("MURMUR_JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("MURMUR_JWT_SECRET", "a-long-random-secret"),
            ("MURMUR_PORT", "8080"),
            ("MURMUR_MEDIA_URL_PREFIX", "/uploads/"),
            ("MURMUR_CLIENT_ORIGIN", "https://murmur.example"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.media_url_prefix, "/uploads");
        assert_eq!(config.client_origin.as_deref(), Some("https://murmur.example"));

        assert!(load(&[("MURMUR_JWT_SECRET", "x-secret-x"), ("MURMUR_PORT", "http")]).is_err());
    }
}
