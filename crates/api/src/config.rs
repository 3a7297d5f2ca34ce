//! Application configuration

use std::env;
use std::time::Duration;

use chrono_tz::Tz;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    /// Derive kiosk identity from proxy headers instead of the socket peer
    pub trust_proxy_headers: bool,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Presence
    pub heartbeat_interval: Duration,

    // Scheduler
    pub school_timezone: Tz,
    pub pre_alert_minutes: i64,
    pub scheduler_enabled: bool,

    // Push gateway (FCM)
    pub firebase_service_account_path: Option<String>,
    pub fcm_api_base: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            trust_proxy_headers: parse_var("TRUST_PROXY_HEADERS", false)?,

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,

            // Presence
            heartbeat_interval: {
                let secs: u64 = parse_var("HEARTBEAT_INTERVAL_SECS", 20)?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        var: "HEARTBEAT_INTERVAL_SECS",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_secs(secs)
            },

            // Scheduler
            school_timezone: {
                let name = env::var("SCHOOL_TIMEZONE").unwrap_or_else(|_| "Asia/Manila".to_string());
                name.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                    var: "SCHOOL_TIMEZONE",
                    reason: e.to_string(),
                })?
            },
            pre_alert_minutes: {
                let minutes: i64 = parse_var("PRE_ALERT_MINUTES", 5)?;
                if !(1..=60).contains(&minutes) {
                    return Err(ConfigError::Invalid {
                        var: "PRE_ALERT_MINUTES",
                        reason: "must be between 1 and 60".to_string(),
                    });
                }
                minutes
            },
            scheduler_enabled: parse_var("SCHEDULER_ENABLED", true)?,

            // Push gateway
            firebase_service_account_path: env::var("FIREBASE_SERVICE_ACCOUNT_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            fcm_api_base: env::var("FCM_API_BASE")
                .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
        })
    }
}

#[cfg(test)]
impl Config {
    /// Defaults without touching the environment
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            trust_proxy_headers: false,
            database_url: "postgres://localhost/tns_test".to_string(),
            database_max_connections: 1,
            heartbeat_interval: Duration::from_secs(20),
            school_timezone: chrono_tz::Asia::Manila,
            pre_alert_minutes: 5,
            scheduler_enabled: false,
            firebase_service_account_path: None,
            fcm_api_base: "http://127.0.0.1:1".to_string(),
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "BIND_ADDRESS",
        "HEARTBEAT_INTERVAL_SECS",
        "SCHOOL_TIMEZONE",
        "PRE_ALERT_MINUTES",
        "SCHEDULER_ENABLED",
        "FIREBASE_SERVICE_ACCOUNT_PATH",
        "TRUST_PROXY_HEADERS",
    ];

    fn cleanup_config() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        cleanup_config();
        match Config::from_env() {
            Err(ConfigError::Missing("DATABASE_URL")) => {}
            other => panic!("Expected Missing DATABASE_URL, got: {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.school_timezone, chrono_tz::Asia::Manila);
        assert_eq!(config.pre_alert_minutes, 5);
        assert!(config.scheduler_enabled);
        assert!(!config.trust_proxy_headers);
        assert!(config.firebase_service_account_path.is_none());

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");

        env::set_var("SCHOOL_TIMEZONE", "Mars/Olympus");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "SCHOOL_TIMEZONE", .. })
        ));
        env::remove_var("SCHOOL_TIMEZONE");

        env::set_var("HEARTBEAT_INTERVAL_SECS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "HEARTBEAT_INTERVAL_SECS", .. })
        ));
        env::set_var("HEARTBEAT_INTERVAL_SECS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "HEARTBEAT_INTERVAL_SECS", .. })
        ));
        env::remove_var("HEARTBEAT_INTERVAL_SECS");

        env::set_var("PRE_ALERT_MINUTES", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { var: "PRE_ALERT_MINUTES", .. })
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_blank_service_account_path_disables_push() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("FIREBASE_SERVICE_ACCOUNT_PATH", "  ");

        let config = Config::from_env().unwrap();
        assert!(config.firebase_service_account_path.is_none());

        cleanup_config();
    }
}
