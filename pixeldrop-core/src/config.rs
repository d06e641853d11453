// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exchange Configuration
//!
//! Timeouts, retry policy and identity for the exchange roles, plus the
//! read-only settings collaborator supplied by the host application.

use std::time::Duration;

use thiserror::Error;

use crate::crypto::AppSecret;
use crate::exchange::{PairingMethod, PAIRING_CODE_VALIDITY};

/// Environment variable prefix used by [`ExchangeConfig::from_env`].
pub const ENV_PREFIX: &str = "PIXELDROP_";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// Configuration shared by the initiator and responder roles.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Identifier announced in pairing requests.
    pub device_id: String,
    /// Pre-shared application secret (payload key and pairing MAC).
    pub secret: AppSecret,
    /// Require pairing before any artifact moves.
    pub require_pairing: bool,
    /// Method used when this device initiates pairing.
    pub pairing_method: PairingMethod,
    /// How long discovery runs before stopping on its own.
    pub scan_timeout: Duration,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// How long to wait for the pairing verdict.
    pub pairing_timeout: Duration,
    /// How long to wait for the peer's artifact after writing ours.
    pub exchange_timeout: Duration,
    /// Validity window of a generated pairing code.
    pub code_validity: Duration,
    /// Retries on transient connect failures.
    pub connect_retries: u32,
    /// Pause before a connect retry.
    pub retry_delay: Duration,
    /// Peers not re-sighted within this window leave the discovery view.
    pub discovery_expiry: Duration,
    /// In dual mode, connect to discovered peers without operator action.
    pub auto_connect: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            device_id: uuid::Uuid::new_v4().to_string(),
            secret: AppSecret::default(),
            require_pairing: true,
            pairing_method: PairingMethod::NumericComparison,
            scan_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pairing_timeout: PAIRING_CODE_VALIDITY,
            exchange_timeout: Duration::from_secs(10),
            code_validity: PAIRING_CODE_VALIDITY,
            connect_retries: 1,
            retry_delay: Duration::from_millis(500),
            discovery_expiry: Duration::from_secs(15),
            auto_connect: true,
        }
    }
}

impl ExchangeConfig {
    /// Creates a configuration for `device_id` with default timings.
    pub fn new(device_id: &str) -> Self {
        ExchangeConfig {
            device_id: device_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_secret(mut self, secret: AppSecret) -> Self {
        self.secret = secret;
        self
    }

    pub fn with_pairing_required(mut self, required: bool) -> Self {
        self.require_pairing = required;
        self
    }

    pub fn with_pairing_method(mut self, method: PairingMethod) -> Self {
        self.pairing_method = method;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn with_code_validity(mut self, validity: Duration) -> Self {
        self.code_validity = validity;
        self
    }

    pub fn with_connect_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.connect_retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_discovery_expiry(mut self, expiry: Duration) -> Self {
        self.discovery_expiry = expiry;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Overlays `PIXELDROP_*` environment variables on the defaults.
    ///
    /// Recognised: `SECRET`, `DEVICE_ID`, `REQUIRE_PAIRING`,
    /// `PAIRING_METHOD`, and `SCAN_TIMEOUT_SECS`, `CONNECT_TIMEOUT_SECS`,
    /// `PAIRING_TIMEOUT_SECS`, `EXCHANGE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ExchangeConfig::default();

        if let Some(secret) = lookup("SECRET") {
            config.secret = AppSecret::from_passphrase(&secret);
        }
        if let Some(device_id) = lookup("DEVICE_ID") {
            config.device_id = device_id;
        }
        if let Some(value) = lookup("REQUIRE_PAIRING") {
            config.require_pairing = parse_bool("REQUIRE_PAIRING", &value)?;
        }
        if let Some(value) = lookup("PAIRING_METHOD") {
            config.pairing_method = match value.as_str() {
                "numeric_comparison" | "numeric" => PairingMethod::NumericComparison,
                "passkey_entry" | "passkey" => PairingMethod::PasskeyEntry,
                _ => return Err(invalid("PAIRING_METHOD", &value)),
            };
        }

        let timeouts: [(&str, &mut Duration); 4] = [
            ("SCAN_TIMEOUT_SECS", &mut config.scan_timeout),
            ("CONNECT_TIMEOUT_SECS", &mut config.connect_timeout),
            ("PAIRING_TIMEOUT_SECS", &mut config.pairing_timeout),
            ("EXCHANGE_TIMEOUT_SECS", &mut config.exchange_timeout),
        ];
        for (name, slot) in timeouts {
            if let Some(value) = lookup(name) {
                let secs: u64 = value.parse().map_err(|_| invalid(name, &value))?;
                *slot = Duration::from_secs(secs);
            }
        }

        Ok(config)
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: format!("{ENV_PREFIX}{name}"),
        value: value.to_string(),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value)),
    }
}

/// Read-only user preferences owned by the host application.
pub trait ExchangeSettings: Send + Sync {
    /// Whether the user allows exchange to run in dual (background) mode.
    fn background_exchange_enabled(&self) -> bool;

    /// Whether advertising should use a rotating private address.
    fn address_rotation_enabled(&self) -> bool;
}

/// Fixed settings, for hosts without a settings store and for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSettings {
    pub background_exchange: bool,
    pub address_rotation: bool,
}

impl Default for StaticSettings {
    fn default() -> Self {
        StaticSettings {
            background_exchange: true,
            address_rotation: true,
        }
    }
}

impl ExchangeSettings for StaticSettings {
    fn background_exchange_enabled(&self) -> bool {
        self.background_exchange
    }

    fn address_rotation_enabled(&self) -> bool {
        self.address_rotation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExchangeConfig::new("device-a");
        assert_eq!(config.device_id, "device-a");
        assert!(config.require_pairing);
        assert_eq!(config.connect_retries, 1);
        assert_eq!(config.code_validity, Duration::from_secs(60));
    }

    #[test]
    fn test_lookup_overrides() {
        let config = ExchangeConfig::from_lookup(lookup(&[
            ("DEVICE_ID", "kiosk-1"),
            ("REQUIRE_PAIRING", "no"),
            ("PAIRING_METHOD", "passkey"),
            ("CONNECT_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.device_id, "kiosk-1");
        assert!(!config.require_pairing);
        assert_eq!(config.pairing_method, PairingMethod::PasskeyEntry);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let err = ExchangeConfig::from_lookup(lookup(&[("SCAN_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "PIXELDROP_SCAN_TIMEOUT_SECS".into(),
                value: "soon".into(),
            }
        );
    }

    #[test]
    fn test_static_settings_default_enabled() {
        let settings = StaticSettings::default();
        assert!(settings.background_exchange_enabled());
        assert!(settings.address_rotation_enabled());
    }
}
