//! Connection settings built from plain key/value pairs.

use crate::constants::{DEFAULT_ESL_PASSWORD, DEFAULT_ESL_PORT, DEFAULT_RESPONSE_TIMEOUT};
use crate::error::{EslError, EslResult};
use std::time::Duration;

/// Where and how to reach FreeSWITCH in inbound mode.
#[derive(Clone, PartialEq, Eq)]
pub struct EslConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Bounds the TCP connect and the authentication handshake.
    pub response_timeout: Duration,
}

impl Default for EslConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_ESL_PORT,
            password: DEFAULT_ESL_PASSWORD.to_string(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for EslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EslConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"[REDACTED]")
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

impl EslConfig {
    /// Build from key/value pairs over the defaults.
    ///
    /// Recognised keys, case-insensitively: `FREESWITCH_ESL_HOSTNAME`,
    /// `FREESWITCH_ESL_PORT`, `FREESWITCH_ESL_PASSWORD`,
    /// `FREESWITCH_ESL_RESPONSE_TIMEOUT_MS`, or the short forms `host`, `port`,
    /// `password` and `response_timeout_ms`. Other keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> EslResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let key = key
                .as_ref()
                .to_ascii_lowercase();
            let key = key
                .strip_prefix("freeswitch_esl_")
                .unwrap_or(&key);
            let value = value
                .as_ref()
                .trim();
            match key {
                "host" | "hostname" => config.host = value.to_string(),
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| EslError::config(format!("invalid port: {}", value)))?
                }
                "password" => config.password = value.to_string(),
                "response_timeout_ms" => {
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| {
                            EslError::config(format!("invalid response timeout: {}", value))
                        })?;
                    config.response_timeout = Duration::from_millis(ms);
                }
                _ => {}
            }
        }
        if config
            .host
            .is_empty()
        {
            return Err(EslError::config("empty host"));
        }
        Ok(config)
    }

    /// [`from_pairs`](Self::from_pairs) over the process environment.
    pub fn from_env() -> EslResult<Self> {
        Self::from_pairs(std::env::vars().filter(|(key, _)| {
            key.to_ascii_uppercase()
                .starts_with("FREESWITCH_ESL_")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EslConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8021);
        assert_eq!(config.password, "ClueCon");
        assert_eq!(config.response_timeout, Duration::from_secs(5));
    }

    #[test]
    fn long_and_short_keys() {
        let config = EslConfig::from_pairs([
            ("FREESWITCH_ESL_HOSTNAME", "fs1.example.net"),
            ("port", "8022"),
            ("Freeswitch_Esl_Response_Timeout_Ms", "1500"),
            ("unrelated", "x"),
        ])
        .unwrap();
        assert_eq!(config.host, "fs1.example.net");
        assert_eq!(config.port, 8022);
        assert_eq!(config.password, "ClueCon");
        assert_eq!(config.response_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn bad_numbers_are_config_errors() {
        assert!(matches!(
            EslConfig::from_pairs([("port", "eighty")]),
            Err(EslError::Config { .. })
        ));
        assert!(matches!(
            EslConfig::from_pairs([("response_timeout_ms", "-1")]),
            Err(EslError::Config { .. })
        ));
    }

    #[test]
    fn password_is_not_printed() {
        let config = EslConfig::from_pairs([("password", "s3cret")]).unwrap();
        assert!(!format!("{:?}", config).contains("s3cret"));
    }
}
