//! Endpoint and timing configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use nallely_telemetry::TelemetryConfig;
//!
//! let config = TelemetryConfig::new()
//!     .with_control_address("ws://192.168.1.20:6788")
//!     .with_flush_interval(Duration::from_millis(33));
//!
//! config.validate()?;
//! let url = config.endpoint_url("widget-7")?;
//! // ws://192.168.1.20:6789/widget-7/autoconfig
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default address of the main control channel.
pub const DEFAULT_CONTROL_ADDRESS: &str = "ws://localhost:6788";

/// Port of the telemetry websocket bus.
pub const DEFAULT_TELEMETRY_PORT: u16 = 6789;

/// Reconnect delay for interactive widget connections.
pub const INTERACTIVE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Reconnect delay for multiplexed scope connections.
pub const SCOPE_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Multiplexer flush period (~60 Hz).
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(16);

/// Maximum time a transport may take to connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time spent closing a transport gracefully.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Path suffix of the registration endpoint.
const AUTOCONFIG_SEGMENT: &str = "autoconfig";

// ============================================================================
// ControlEncoding
// ============================================================================

/// Encoding used for outbound control values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControlEncoding {
    /// `[len][name][f64 BE]` binary frame.
    #[default]
    Binary,
    /// `{"on": name, "value": value}` text frame.
    Json,
}

// ============================================================================
// TelemetryConfig
// ============================================================================

/// Configuration shared by the bus, the multiplexer and their connections.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Base URL of the main control channel.
    pub control_address: String,

    /// Port of the telemetry endpoint on the same host.
    pub telemetry_port: u16,

    /// Delay before reconnecting an interactive widget.
    pub interactive_reconnect_delay: Duration,

    /// Delay before reconnecting a multiplexed scope.
    pub scope_reconnect_delay: Duration,

    /// Multiplexer flush period.
    pub flush_interval: Duration,

    /// Transport connect timeout.
    pub connect_timeout: Duration,

    /// Graceful close timeout.
    pub close_timeout: Duration,

    /// Outbound control value encoding.
    pub control_encoding: ControlEncoding,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TelemetryConfig {
    /// Creates a config with the default endpoints and timings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            control_address: DEFAULT_CONTROL_ADDRESS.to_string(),
            telemetry_port: DEFAULT_TELEMETRY_PORT,
            interactive_reconnect_delay: INTERACTIVE_RECONNECT_DELAY,
            scope_reconnect_delay: SCOPE_RECONNECT_DELAY,
            flush_interval: FLUSH_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
            control_encoding: ControlEncoding::Binary,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TelemetryConfig {
    /// Sets the control channel address (e.g. `ws://host:6788`).
    #[inline]
    #[must_use]
    pub fn with_control_address(mut self, address: impl Into<String>) -> Self {
        self.control_address = address.into();
        self
    }

    /// Sets the telemetry port.
    #[inline]
    #[must_use]
    pub fn with_telemetry_port(mut self, port: u16) -> Self {
        self.telemetry_port = port;
        self
    }

    /// Sets the interactive reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_interactive_reconnect_delay(mut self, delay: Duration) -> Self {
        self.interactive_reconnect_delay = delay;
        self
    }

    /// Sets the scope reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_scope_reconnect_delay(mut self, delay: Duration) -> Self {
        self.scope_reconnect_delay = delay;
        self
    }

    /// Sets the multiplexer flush interval.
    #[inline]
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the control value encoding.
    #[inline]
    #[must_use]
    pub fn with_control_encoding(mut self, encoding: ControlEncoding) -> Self {
        self.control_encoding = encoding;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl TelemetryConfig {
    /// Derives the telemetry base address from the control address.
    ///
    /// Keeps scheme and host, swaps the port for [`Self::telemetry_port`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Url`] or [`Error::Config`] if the control address
    /// is not a usable URL.
    pub fn telemetry_address(&self) -> Result<String> {
        let mut url = Url::parse(&self.control_address)?;
        url.set_port(Some(self.telemetry_port))
            .map_err(|()| Error::config(format!("Cannot set port on {}", self.control_address)))?;

        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    /// Builds the registration endpoint for `identifier` on the telemetry port.
    ///
    /// # Errors
    ///
    /// See [`Self::telemetry_address`] and [`autoconfig_url`].
    pub fn endpoint_url(&self, identifier: &str) -> Result<Url> {
        autoconfig_url(&self.telemetry_address()?, identifier)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a timing is zero, the telemetry port is
    /// zero, or the control address is not a `ws`/`wss` URL.
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(Error::config("Flush interval must be greater than zero"));
        }

        if self.interactive_reconnect_delay.is_zero() || self.scope_reconnect_delay.is_zero() {
            return Err(Error::config("Reconnect delays must be greater than zero"));
        }

        if self.telemetry_port == 0 {
            return Err(Error::config("Telemetry port must be greater than zero"));
        }

        let url = Url::parse(&self.control_address)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Control address must use ws:// or wss://, got {}",
                url.scheme()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// URL Helpers
// ============================================================================

/// Builds `<base>/<identifier>/autoconfig`.
///
/// The identifier is percent-encoded so it always occupies exactly one path
/// segment.
///
/// # Errors
///
/// Returns [`Error::Url`] if the result does not parse.
pub fn autoconfig_url(base: &str, identifier: &str) -> Result<Url> {
    let base = base.trim_end_matches('/');
    let identifier = urlencoding::encode(identifier);

    Ok(Url::parse(&format!("{base}/{identifier}/{AUTOCONFIG_SEGMENT}"))?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.telemetry_port, 6789);
        assert_eq!(config.interactive_reconnect_delay, Duration::from_millis(1000));
        assert_eq!(config.scope_reconnect_delay, Duration::from_millis(5000));
        assert_eq!(config.flush_interval, Duration::from_millis(16));
        assert_eq!(config.control_encoding, ControlEncoding::Binary);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_telemetry_address_swaps_port() {
        let config = TelemetryConfig::new().with_control_address("ws://10.0.0.4:6788");
        assert_eq!(config.telemetry_address().expect("address"), "ws://10.0.0.4:6789");
    }

    #[test]
    fn test_endpoint_url() {
        let config = TelemetryConfig::new();
        let url = config.endpoint_url("widget-7").expect("url");
        assert_eq!(url.as_str(), "ws://localhost:6789/widget-7/autoconfig");
    }

    #[test]
    fn test_autoconfig_url_encodes_identifier() {
        let url = autoconfig_url("ws://host:6789/", "my scope/1").expect("url");
        assert_eq!(url.as_str(), "ws://host:6789/my%20scope%2F1/autoconfig");
    }

    #[test]
    fn test_validate_rejects_zero_flush() {
        let config = TelemetryConfig::new().with_flush_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_http_scheme() {
        let config = TelemetryConfig::new().with_control_address("http://localhost:6788");
        assert_err!(config.validate());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = TelemetryConfig::new().with_telemetry_port(0);
        assert_err!(config.validate());
    }
}
