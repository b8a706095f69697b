use crate::error::{FlappyoError, Result};
use crate::hub::HubConfig;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Hub tuning
    pub hub: HubConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to bind to (default: 80)
    pub port: u16,
    /// Directory served under /static (default: ./static)
    pub static_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            server: ServerConfig {
                host: get_env_or("FLAPPYO_HOST", "0.0.0.0"),
                port: get_env_or("FLAPPYO_PORT", "80").parse().map_err(|_| {
                    FlappyoError::InvalidConfig("FLAPPYO_PORT must be a valid port number".into())
                })?,
                static_dir: PathBuf::from(get_env_or("FLAPPYO_STATIC_DIR", "./static")),
            },
            hub: HubConfig {
                outbox_capacity: parse_positive("FLAPPYO_OUTBOX_CAPACITY", 256)?,
                notify_capacity: parse_positive("FLAPPYO_NOTIFY_CAPACITY", 1024)?,
                enqueue_timeout: match parse_env::<u64>("FLAPPYO_ENQUEUE_TIMEOUT_MS", 5000)? {
                    0 => None,
                    ms => Some(Duration::from_millis(ms)),
                },
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        };

        // Fail at startup rather than at bind time.
        config.listen_addr()?;

        Ok(config)
    }

    /// Get the HTTP listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| {
                FlappyoError::InvalidConfig(format!(
                    "FLAPPYO_HOST must be an IP address, got {:?}",
                    self.server.host
                ))
            })
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| FlappyoError::InvalidConfig(format!("{} must be a valid number", key))),
        Err(_) => Ok(default),
    }
}

fn parse_positive(key: &str, default: usize) -> Result<usize> {
    match parse_env(key, default)? {
        0 => Err(FlappyoError::InvalidConfig(format!(
            "{} must be greater than zero",
            key
        ))),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "FLAPPYO_HOST",
        "FLAPPYO_PORT",
        "FLAPPYO_STATIC_DIR",
        "FLAPPYO_OUTBOX_CAPACITY",
        "FLAPPYO_NOTIFY_CAPACITY",
        "FLAPPYO_ENQUEUE_TIMEOUT_MS",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 80);
        assert_eq!(config.server.static_dir, PathBuf::from("./static"));
        assert_eq!(config.hub, HubConfig::default());
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "pretty");
        assert_eq!(config.listen_addr().unwrap().to_string(), "0.0.0.0:80");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FLAPPYO_HOST", "127.0.0.1");
        env::set_var("FLAPPYO_PORT", "9000");
        env::set_var("FLAPPYO_STATIC_DIR", "/srv/flappyo");
        env::set_var("FLAPPYO_OUTBOX_CAPACITY", "16");
        env::set_var("FLAPPYO_NOTIFY_CAPACITY", "64");
        env::set_var("FLAPPYO_ENQUEUE_TIMEOUT_MS", "250");
        env::set_var("LOG_FORMAT", "json");

        let config = Config::from_env().unwrap();

        assert_eq!(config.listen_addr().unwrap().to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.static_dir, PathBuf::from("/srv/flappyo"));
        assert_eq!(
            config.hub,
            HubConfig {
                outbox_capacity: 16,
                notify_capacity: 64,
                enqueue_timeout: Some(Duration::from_millis(250)),
            }
        );
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_config_zero_timeout_waits_forever() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FLAPPYO_ENQUEUE_TIMEOUT_MS", "0");
        let config = Config::from_env().unwrap();
        assert_eq!(config.hub.enqueue_timeout, None);
    }

    #[test]
    fn test_config_from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FLAPPYO_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FlappyoError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_host() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FLAPPYO_HOST", "not a host");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FlappyoError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FLAPPYO_OUTBOX_CAPACITY", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FlappyoError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_malformed_capacity() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FLAPPYO_NOTIFY_CAPACITY", "lots");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, FlappyoError::InvalidConfig(_)));
    }
}
