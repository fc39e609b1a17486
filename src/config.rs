use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::model::Ms;

/// Credentials for the first admin, registered when none exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl FromStr for BootstrapAdmin {
    type Err = String;

    /// `username:email:password`; the password may itself contain `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(u), Some(e), Some(p)) if !u.is_empty() && !e.is_empty() && !p.is_empty() => {
                Ok(Self {
                    username: u.to_string(),
                    email: e.to_string(),
                    password: p.to_string(),
                })
            }
            _ => Err("expected username:email:password".into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// `None` means a random per-process secret; tokens die with the process.
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: i64,
    pub public_url: String,
    pub admin_emails: Vec<String>,
    pub rate_limit: usize,
    pub rate_window_ms: Ms,
    pub sweep_interval_secs: u64,
    pub retention_ms: Ms,
    pub compact_threshold: u64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = parsed(&lookup, "ROOMBOOK_PORT", 8080);
        Self {
            port,
            bind: lookup("ROOMBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            jwt_secret: lookup("ROOMBOOK_JWT_SECRET").filter(|s| !s.is_empty()),
            token_ttl_secs: parsed(&lookup, "ROOMBOOK_TOKEN_TTL_SECS", 24 * 3600),
            public_url: lookup("ROOMBOOK_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            admin_emails: lookup("ROOMBOOK_ADMIN_EMAILS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            rate_limit: parsed(&lookup, "ROOMBOOK_RATE_LIMIT", 5),
            rate_window_ms: parsed::<Ms>(&lookup, "ROOMBOOK_RATE_WINDOW_SECS", 60) * 1000,
            sweep_interval_secs: parsed(&lookup, "ROOMBOOK_SWEEP_INTERVAL_SECS", 300),
            retention_ms: parsed::<Ms>(&lookup, "ROOMBOOK_RETENTION_SECS", 2 * 3600) * 1000,
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD", 1000),
            bootstrap_admin: lookup("ROOMBOOK_BOOTSTRAP_ADMIN").and_then(|s| {
                s.parse()
                    .map_err(|e| warn!("ignoring ROOMBOOK_BOOTSTRAP_ADMIN: {e}"))
                    .ok()
            }),
            metrics_port: lookup("ROOMBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring unparseable {key}={raw}");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.port, 8080);
        assert_eq!(c.public_url, "http://localhost:8080");
        assert_eq!(c.rate_limit, 5);
        assert_eq!(c.rate_window_ms, 60_000);
        assert_eq!(c.sweep_interval_secs, 300);
        assert_eq!(c.retention_ms, 7_200_000);
        assert_eq!(c.token_ttl_secs, 86_400);
        assert!(c.jwt_secret.is_none());
        assert!(c.admin_emails.is_empty());
        assert!(c.bootstrap_admin.is_none());
        assert_eq!(c.wal_path(), PathBuf::from("./data/roombook.wal"));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("ROOMBOOK_PORT", "9000"),
            ("ROOMBOOK_ADMIN_EMAILS", "a@example.com, b@example.com,,"),
            ("ROOMBOOK_RATE_LIMIT", "10"),
            ("ROOMBOOK_RETENTION_SECS", "60"),
            ("ROOMBOOK_JWT_SECRET", "s3cret"),
            ("ROOMBOOK_BOOTSTRAP_ADMIN", "root:root@example.com:pa:ss"),
        ]);
        assert_eq!(c.port, 9000);
        assert_eq!(c.public_url, "http://localhost:9000");
        assert_eq!(c.admin_emails, vec!["a@example.com", "b@example.com"]);
        assert_eq!(c.rate_limit, 10);
        assert_eq!(c.retention_ms, 60_000);
        assert_eq!(c.jwt_secret.as_deref(), Some("s3cret"));
        let admin = c.bootstrap_admin.unwrap();
        assert_eq!(admin.username, "root");
        assert_eq!(admin.password, "pa:ss");
    }

    #[test]
    fn bad_values_fall_back() {
        let c = config(&[
            ("ROOMBOOK_PORT", "eighty"),
            ("ROOMBOOK_BOOTSTRAP_ADMIN", "root"),
            ("ROOMBOOK_METRICS_PORT", "x"),
        ]);
        assert_eq!(c.port, 8080);
        assert!(c.bootstrap_admin.is_none());
        assert!(c.metrics_port.is_none());
    }
}
