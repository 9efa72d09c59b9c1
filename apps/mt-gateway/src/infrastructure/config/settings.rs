//! Gateway configuration settings.
//!
//! Configuration is supplied programmatically by the host
//! application; this crate never reads the environment itself (§1
//! Out of scope, §6).

use std::time::Duration;

/// Packet logger configuration (§4.2, §6).
#[derive(Debug, Clone)]
pub struct PacketLoggerConfig {
    /// Whether packets are journaled at all.
    pub enabled: bool,
    /// Number of most-recent hourly buckets retained on disk.
    pub file_number_limit: u32,
    /// Width of a time bucket, in hours.
    pub log_file_size_in_hours: u32,
    /// Compress runs of contiguous `prices` packets.
    pub compress_prices: bool,
    /// Persist `specifications` packets as `{type, sequenceNumber}` only.
    pub compress_specifications: bool,
    /// Root directory for the on-disk journal.
    pub root_dir: std::path::PathBuf,
}

impl Default for PacketLoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_number_limit: 12,
            log_file_size_in_hours: 4,
            compress_prices: true,
            compress_specifications: true,
            root_dir: std::path::PathBuf::from("./.metaapi/logs"),
        }
    }
}

/// Top-level gateway configuration (§6).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Authentication token.
    pub token: String,
    /// Application identifier injected into every RPC. Must match
    /// `[A-Za-z0-9_]+`.
    pub application: String,
    /// Gateway domain, used to build the connection URL.
    pub domain: String,
    /// Per-request RPC deadline, absent an explicit override.
    pub request_timeout: Duration,
    /// Per-connect-attempt timeout.
    pub connect_timeout: Duration,
    /// Orderer wait-timeout before giving up on a gap and
    /// resubscribing (§4.1).
    pub packet_ordering_timeout: Duration,
    /// Packet logger settings.
    pub packet_logger: PacketLoggerConfig,
    /// Gate the C7 price-to-position P&L denormalization (§4.7, §9
    /// Open Questions). Off by default: the source excerpt implies
    /// but never specifies it.
    pub denormalize_position_pnl: bool,
}

impl GatewayConfig {
    /// Build a configuration for `token`, with every other field at
    /// its spec-default value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// The `wss://mt-client-api-v1.<domain>/ws?auth-token=<token>`
    /// connection URL (§4.5, §6).
    #[must_use]
    pub fn connect_url(&self) -> String {
        format!(
            "wss://mt-client-api-v1.{}/ws?auth-token={}",
            self.domain, self.token
        )
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            application: "MetaApi".to_string(),
            domain: "agiliumtrade.agiliumtrade.ai".to_string(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(60),
            packet_ordering_timeout: Duration::from_secs(60),
            packet_logger: PacketLoggerConfig::default(),
            denormalize_position_pnl: false,
        }
    }
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `application` must match `[A-Za-z0-9_]+`.
    #[error("application identifier '{0}' must match [A-Za-z0-9_]+")]
    InvalidApplication(String),
}

impl GatewayConfig {
    /// Validate the configuration's invariants (§6, mirroring the
    /// source's `application` regex check).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidApplication`] if `application`
    /// contains characters outside `[A-Za-z0-9_]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = !self.application.is_empty()
            && self
                .application
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidApplication(self.application.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.application, "MetaApi");
        assert_eq!(config.domain, "agiliumtrade.agiliumtrade.ai");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.packet_ordering_timeout, Duration::from_secs(60));
        assert!(!config.denormalize_position_pnl);
    }

    #[test]
    fn packet_logger_defaults() {
        let logger = PacketLoggerConfig::default();
        assert!(logger.enabled);
        assert_eq!(logger.file_number_limit, 12);
        assert_eq!(logger.log_file_size_in_hours, 4);
        assert!(logger.compress_prices);
        assert!(logger.compress_specifications);
    }

    #[test]
    fn connect_url_embeds_domain_and_token() {
        let config = GatewayConfig::new("tok123");
        assert_eq!(
            config.connect_url(),
            "wss://mt-client-api-v1.agiliumtrade.agiliumtrade.ai/ws?auth-token=tok123"
        );
    }

    #[test]
    fn application_validation_rejects_special_characters() {
        let mut config = GatewayConfig::new("tok");
        config.application = "My App!".to_string();
        assert!(config.validate().is_err());
        config.application = "My_App_1".to_string();
        assert!(config.validate().is_ok());
    }
}
