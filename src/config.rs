use crate::disposition::{Disposition, DispositionMap};
use crate::normalize::PhoneFormat;
use crate::storage::StorageConfig;
use crate::timestamp::{TimestampResolver, DEFAULT_SOURCE_TIMEZONE};
use anyhow::{anyhow, Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

pub const CRM_TOKEN_ENV: &str = "HUBSPOT_ACCESS_TOKEN";
pub const TELEPHONY_USERNAME_ENV: &str = "TELEPHONY_USERNAME";
pub const TELEPHONY_PASSWORD_ENV: &str = "TELEPHONY_PASSWORD";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub database_url: String,
    /// External base URL of this service, used for recording stream links.
    pub public_url: Option<String>,
    pub access_log_skip_paths: Vec<String>,
    pub crm: Option<CrmConfig>,
    pub telephony: TelephonyConfig,
    pub phone: PhoneFormat,
    pub backup: BackupConfig,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CrmConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub timeout_secs: Option<u64>,
    pub deal_pipeline: String,
    pub deal_stage: String,
    pub disposition_ids: HashMap<Disposition, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelephonyConfig {
    pub source_timezone: String,
    /// Prefixes the dialer prepends to the CRM contact id in `extern_id`.
    pub extern_id_prefixes: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub batch_size: u64,
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            database_url: "sqlite://callbridge.sqlite3".to_string(),
            public_url: None,
            access_log_skip_paths: vec!["/health".to_string()],
            crm: None,
            telephony: TelephonyConfig::default(),
            phone: PhoneFormat::default(),
            backup: BackupConfig::default(),
            storage: None,
        }
    }
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.hubapi.com".to_string(),
            access_token: None,
            timeout_secs: None,
            deal_pipeline: "default".to_string(),
            deal_stage: "appointmentscheduled".to_string(),
            disposition_ids: HashMap::new(),
        }
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            source_timezone: DEFAULT_SOURCE_TIMEZONE.to_string(),
            extern_id_prefixes: vec!["hubspot_".to_string(), "hs_".to_string()],
            username: None,
            password: None,
            timeout_secs: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
        }
    }
}

impl CrmConfig {
    /// Token from the config file, else from the environment.
    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(CRM_TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn disposition_map(&self) -> DispositionMap {
        DispositionMap::new(self.disposition_ids.clone())
    }
}

impl TelephonyConfig {
    pub fn credentials(&self) -> Option<(String, Option<String>)> {
        let username = self
            .username
            .clone()
            .or_else(|| std::env::var(TELEPHONY_USERNAME_ENV).ok())
            .filter(|u| !u.is_empty())?;
        let password = self
            .password
            .clone()
            .or_else(|| std::env::var(TELEPHONY_PASSWORD_ENV).ok());
        Some((username, password))
    }

    pub fn timestamp_resolver(&self) -> Result<TimestampResolver> {
        TimestampResolver::from_name(&self.source_timezone)
    }

    /// Removes the first matching prefix from a dialer contact reference.
    pub fn strip_extern_prefix<'a>(&self, extern_id: &'a str) -> &'a str {
        let extern_id = extern_id.trim();
        self.extern_id_prefixes
            .iter()
            .filter(|prefix| !prefix.is_empty())
            .find_map(|prefix| extern_id.strip_prefix(prefix.as_str()))
            .unwrap_or(extern_id)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow!("{}: {}", e, path))?,
        )?;
        config.check()?;
        Ok(config)
    }

    /// Validates values that would otherwise only fail on first use.
    pub fn check(&self) -> Result<()> {
        self.http_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("invalid http_addr {}: {}", self.http_addr, e))?;
        self.telephony.timestamp_resolver()?;
        if self.backup.max_attempts == 0 {
            return Err(anyhow!("backup.max_attempts must be at least 1"));
        }
        if self.backup.batch_size == 0 {
            return Err(anyhow!("backup.batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Absolute URL through which a backed-up recording is streamed.
pub fn recording_stream_url(public_url: &str, call_id: &str) -> String {
    format!(
        "{}/recordings/{}",
        public_url.trim_end_matches('/'),
        urlencoding::encode(call_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            http_addr = "127.0.0.1:9000"
            database_url = "sqlite::memory:"
            public_url = "https://calls.example.com/"

            [crm]
            access_token = "pat-123"
            deal_stage = "qualifiedtobuy"

            [crm.disposition_ids]
            booked = "booked-guid"

            [telephony]
            source_timezone = "Australia/Sydney"
            extern_id_prefixes = ["crm-"]

            [phone]
            country_code = "64"

            [backup]
            max_attempts = 5

            [storage]
            type = "local"
            path = "/tmp/callbridge-recordings"
            "#,
        )
        .unwrap();

        assert!(config.check().is_ok());
        let crm = config.crm.as_ref().unwrap();
        assert_eq!(crm.access_token().as_deref(), Some("pat-123"));
        assert_eq!(crm.base_url, "https://api.hubapi.com");
        assert_eq!(crm.disposition_map().crm_id(Disposition::Booked), "booked-guid");
        assert_eq!(config.phone.country_code, "64");
        assert_eq!(config.phone.trunk_prefix, '0');
        assert_eq!(config.backup.max_attempts, 5);
        assert_eq!(config.backup.batch_size, 10);
        assert_eq!(config.telephony.strip_extern_prefix("crm-1234"), "1234");
        assert_eq!(config.telephony.strip_extern_prefix("1234"), "1234");
        assert_eq!(
            recording_stream_url(config.public_url.as_deref().unwrap(), "abc 1"),
            "https://calls.example.com/recordings/abc%201"
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.check().is_ok());
        assert!(config.crm.is_none());
        assert_eq!(config.telephony.source_timezone, DEFAULT_SOURCE_TIMEZONE);
        assert_eq!(config.telephony.strip_extern_prefix(" hs_987 "), "987");
        assert_eq!(config.public_url, None);
    }

    #[test]
    fn test_check_rejects_bad_values() {
        let mut config = Config::default();
        config.telephony.source_timezone = "Nowhere/Special".to_string();
        assert!(config.check().is_err());

        let mut config = Config::default();
        config.backup.max_attempts = 0;
        assert!(config.check().is_err());
    }
}
