//! Environment-driven configuration.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Operator credentials injected into outbound remote calls.
#[derive(Clone, PartialEq, Eq)]
pub enum RemoteCredentials {
    None,
    Basic { username: String, password: String },
    Bearer(String),
}

impl core::fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RemoteCredentials::None => f.write_str("None"),
            RemoteCredentials::Basic { username, .. } => {
                write!(f, "Basic({username}, <redacted>)")
            }
            RemoteCredentials::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Remote authority settings. Absent when `MIS_URL` is unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub credentials: RemoteCredentials,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub sync_api_key: Option<String>,
    pub remote: Option<RemoteConfig>,
    pub remote_timeout: Duration,
    pub invitation_ttl: chrono::Duration,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            sync_api_key: None,
            remote: None,
            remote_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            invitation_ttl: chrono::Duration::days(DEFAULT_TTL_DAYS),
            database_url: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load through an arbitrary lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            var: "BIND_ADDR",
            reason: e.to_string(),
        })?;

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let sync_api_key = get("MIS_SYNC_API_KEY");
        if sync_api_key.is_none() {
            tracing::warn!("MIS_SYNC_API_KEY not set; inbound sync routes will reject every call");
        }

        let credentials = match (get("MIS_TOKEN"), get("MIS_USERNAME"), get("MIS_PASSWORD")) {
            (Some(token), _, _) => RemoteCredentials::Bearer(token),
            (None, Some(username), Some(password)) => RemoteCredentials::Basic { username, password },
            (None, Some(_), None) => {
                return Err(ConfigError::Invalid {
                    var: "MIS_PASSWORD",
                    reason: "required when MIS_USERNAME is set".to_string(),
                });
            }
            _ => RemoteCredentials::None,
        };

        let remote = match get("MIS_URL") {
            Some(url) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::Invalid {
                        var: "MIS_URL",
                        reason: "must be an http(s) URL".to_string(),
                    });
                }
                Some(RemoteConfig {
                    base_url: url.trim_end_matches('/').to_string(),
                    credentials,
                })
            }
            None => {
                tracing::info!("MIS_URL not set; remote authority integration disabled");
                None
            }
        };

        let timeout_secs = parse_positive(get("MIS_TIMEOUT_SECS"), "MIS_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS as i64)?;
        let ttl_days = parse_positive(get("INVITATION_TTL_DAYS"), "INVITATION_TTL_DAYS", DEFAULT_TTL_DAYS)?;

        Ok(Self {
            bind_addr,
            jwt_secret,
            sync_api_key,
            remote,
            remote_timeout: Duration::from_secs(timeout_secs as u64),
            invitation_ttl: chrono::Duration::days(ttl_days),
            database_url: get("DATABASE_URL"),
        })
    }
}

fn parse_positive(raw: Option<String>, var: &'static str, default: i64) -> Result<i64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            var,
            reason: "must be positive".to_string(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.jwt_secret, "dev-secret");
        assert!(cfg.remote.is_none());
        assert!(cfg.sync_api_key.is_none());
        assert_eq!(cfg.remote_timeout, Duration::from_secs(10));
        assert_eq!(cfg.invitation_ttl, chrono::Duration::days(7));
    }

    #[test]
    fn bearer_wins_over_basic() {
        let cfg = load(&[
            ("MIS_URL", "https://mis.example.org/"),
            ("MIS_TOKEN", "tok"),
            ("MIS_USERNAME", "u"),
            ("MIS_PASSWORD", "p"),
        ])
        .unwrap();
        let remote = cfg.remote.unwrap();
        assert_eq!(remote.base_url, "https://mis.example.org");
        assert_eq!(remote.credentials, RemoteCredentials::Bearer("tok".into()));
        assert_eq!(format!("{:?}", remote.credentials), "Bearer(<redacted>)");
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(load(&[("MIS_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("INVITATION_TTL_DAYS", "soon")]).is_err());
        assert!(load(&[("BIND_ADDR", "nowhere")]).is_err());
        assert!(load(&[("MIS_URL", "ftp://x")]).is_err());
        assert!(load(&[("MIS_URL", "http://x"), ("MIS_USERNAME", "u")]).is_err());
    }
}
