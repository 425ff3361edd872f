use std::env;
use std::time::Duration;

use engine::ConfigError;
use engine::config::parse_var;

const DEFAULT_DATABASE_URL: &str = "sqlite:price_watch.db";
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);
const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub check_interval: Duration,
    pub max_concurrent_checks: usize,
    /// Notifications are only logged when this is absent.
    pub telegram: Option<TelegramConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = parse_var::<String>(&lookup, "DATABASE_URL")?
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let check_interval = parse_var::<u64>(&lookup, "CHECK_INTERVAL_SECS")?
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(DEFAULT_CHECK_INTERVAL);
        let max_concurrent_checks = parse_var::<usize>(&lookup, "MAX_CONCURRENT_CHECKS")?
            .map(|n| n.max(1))
            .unwrap_or(DEFAULT_MAX_CONCURRENT_CHECKS);

        let token = parse_var::<String>(&lookup, "TELEGRAM_BOT_TOKEN")?;
        let chat_id = parse_var::<i64>(&lookup, "TELEGRAM_CHAT_ID")?;
        let telegram = match (token, chat_id) {
            (Some(token), Some(chat_id)) => Some(TelegramConfig { token, chat_id }),
            (None, None) => None,
            (Some(_), None) => return Err(missing("TELEGRAM_CHAT_ID", "TELEGRAM_BOT_TOKEN")),
            (None, Some(_)) => return Err(missing("TELEGRAM_BOT_TOKEN", "TELEGRAM_CHAT_ID")),
        };

        Ok(Self {
            database_url,
            check_interval,
            max_concurrent_checks,
            telegram,
        })
    }
}

fn missing(key: &'static str, companion: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: String::new(),
        reason: format!("must be set together with {companion}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, "sqlite:price_watch.db");
        assert_eq!(config.check_interval, Duration::from_secs(14_400));
        assert_eq!(config.max_concurrent_checks, 5);
        assert!(config.telegram.is_none());
    }

    #[test]
    fn telegram_needs_both_values() {
        let config = config_from(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "-100200"),
            ("CHECK_INTERVAL_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(
            config.telegram,
            Some(TelegramConfig {
                token: "123:abc".to_string(),
                chat_id: -100200,
            })
        );
        assert_eq!(config.check_interval, Duration::from_secs(60));

        let err = config_from(&[("TELEGRAM_BOT_TOKEN", "123:abc")]).unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_CHAT_ID"));
    }

    #[test]
    fn rejects_non_numeric_values() {
        assert!(config_from(&[("MAX_CONCURRENT_CHECKS", "many")]).is_err());
        assert!(config_from(&[("TELEGRAM_CHAT_ID", "me"), ("TELEGRAM_BOT_TOKEN", "t")]).is_err());
    }
}
