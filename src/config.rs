use std::time::Duration;

use crate::error::ConfigError;

/// Runtime configuration for the relay, read once at startup and handed to
/// the router and upstream client by value.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base address of the external chatbot API, without a trailing slash.
    pub api_host: String,
    pub bind_host: String,
    pub bind_port: u16,
    /// Total timeout for non-streaming upstream calls.
    pub request_timeout: Duration,
    /// Total timeout for a streamed prompt, covering the whole generation.
    pub stream_timeout: Duration,
    pub connect_timeout: Duration,
    /// Include `debug_info` in normalized 500 bodies.
    pub expose_debug_info: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_host: "http://127.0.0.1:5003".to_string(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8088,
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            expose_debug_info: false,
        }
    }
}

impl RelayConfig {
    /// Configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Unset keys fall
    /// back to the defaults; set-but-unparseable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_host = lookup("CHATBOT_API_HOST")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_host);
        let bind_host = lookup("RELAY_HOST").unwrap_or(defaults.bind_host);
        let bind_port = match lookup("RELAY_PORT") {
            Some(raw) => parse_number::<u16>("RELAY_PORT", &raw)?,
            None => defaults.bind_port,
        };

        // Timeout configuration (prevents indefinite hangs)
        let request_timeout = seconds(&lookup, "REQUEST_TIMEOUT_SECONDS", defaults.request_timeout)?;
        let stream_timeout = seconds(&lookup, "STREAM_TIMEOUT_SECONDS", defaults.stream_timeout)?;
        let connect_timeout = seconds(&lookup, "CONNECT_TIMEOUT_SECONDS", defaults.connect_timeout)?;

        let expose_debug_info = lookup("EXPOSE_DEBUG_INFO")
            .map(|s| {
                let s = s.to_lowercase();
                s == "true" || s == "1" || s == "yes"
            })
            .unwrap_or(defaults.expose_debug_info);

        let config = Self {
            api_host,
            bind_host,
            bind_port,
            request_timeout,
            stream_timeout,
            connect_timeout,
            expose_debug_info,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_host.starts_with("http://") || self.api_host.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "CHATBOT_API_HOST",
                reason: format!("'{}' must start with http:// or https://", self.api_host),
            });
        }
        for (key, value) in [
            ("REQUEST_TIMEOUT_SECONDS", self.request_timeout),
            ("STREAM_TIMEOUT_SECONDS", self.stream_timeout),
            ("CONNECT_TIMEOUT_SECONDS", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.stream_timeout < self.request_timeout {
            return Err(ConfigError::Invalid {
                key: "STREAM_TIMEOUT_SECONDS",
                reason: "must not be shorter than REQUEST_TIMEOUT_SECONDS".to_string(),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }
}

fn seconds<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_number::<u64>(key, &raw).map(Duration::from_secs),
        None => Ok(default),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("'{}' is not a valid number", raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = RelayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.api_host, "http://127.0.0.1:5003");
        assert_eq!(config.bind_addr(), "127.0.0.1:8088");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.stream_timeout, Duration::from_secs(300));
        assert!(!config.expose_debug_info);
    }

    #[test]
    fn test_overrides_and_trailing_slash() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("CHATBOT_API_HOST", "http://host.docker.internal:5003/"),
            ("RELAY_PORT", "9000"),
            ("STREAM_TIMEOUT_SECONDS", "600"),
            ("EXPOSE_DEBUG_INFO", "TRUE"),
        ]))
        .unwrap();

        assert_eq!(config.api_host, "http://host.docker.internal:5003");
        assert_eq!(config.bind_port, 9000);
        assert_eq!(config.stream_timeout, Duration::from_secs(600));
        assert!(config.expose_debug_info);
    }

    #[test]
    fn test_rejects_garbage_number() {
        let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("RELAY_PORT"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = RelayConfig::from_lookup(lookup_from(&[("CONNECT_TIMEOUT_SECONDS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_stream_timeout_must_cover_request_timeout() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("REQUEST_TIMEOUT_SECONDS", "120"),
            ("STREAM_TIMEOUT_SECONDS", "30"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("STREAM_TIMEOUT_SECONDS"));
    }

    #[test]
    fn test_rejects_non_http_host() {
        let err = RelayConfig::from_lookup(lookup_from(&[("CHATBOT_API_HOST", "ftp://nope")]))
            .unwrap_err();
        assert!(err.to_string().contains("CHATBOT_API_HOST"));
    }
}
