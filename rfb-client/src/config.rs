//! Configuration types for a single RFB connection.
//!
//! Configs are plain serde structs so they can be loaded from TOML:
//!
//! ```
//! use rfb_client::Config;
//!
//! let config = Config::from_toml_str(r#"
//!     [connection]
//!     host = "127.0.0.1"
//!     port = 5901
//!
//!     [display]
//!     encoding = "tight"
//!     quality = 5
//! "#).unwrap();
//! assert_eq!(config.display.quality, 5);
//! assert_eq!(config.updates.max_deferred, 60);
//! ```

use crate::errors::RfbClientError;
use rfb_protocol::messages::types::{
    ENCODING_RAW, ENCODING_TIGHT, ENCODING_ZRLE, PSEUDO_ENCODING_COMPRESS_LEVEL_0, PSEUDO_ENCODING_DESKTOP_SIZE,
    PSEUDO_ENCODING_FINE_QUALITY_LEVEL_0, PSEUDO_ENCODING_LAST_RECT,
    PSEUDO_ENCODING_QUALITY_LEVEL_0, PSEUDO_ENCODING_SUBSAMPLE_LEVEL_0,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Level value meaning "do not advertise this pseudo-encoding".
pub const LEVEL_UNSET: i32 = -1;

/// Complete connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    pub connection: ConnectionConfig,
    /// Encoding and quality settings.
    #[serde(default)]
    pub display: DisplayConfig,
    /// Update flow settings.
    #[serde(default)]
    pub updates: UpdatesConfig,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port (typically 5900 + display number).
    pub port: u16,
    /// VNC password, used only if the server demands VNC authentication.
    #[serde(default)]
    pub password: String,
    /// Per-attempt TCP connect and handshake timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total time to keep retrying refused TCP connects, in milliseconds.
    /// Zero means a single attempt.
    #[serde(default)]
    pub start_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Rectangle encoding requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Tight (7).
    #[default]
    Tight,
    /// ZRLE (16).
    Zrle,
    /// Raw (0).
    Raw,
}

impl Encoding {
    /// Wire encoding number.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Tight => ENCODING_TIGHT,
            Self::Zrle => ENCODING_ZRLE,
            Self::Raw => ENCODING_RAW,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tight => f.write_str("tight"),
            Self::Zrle => f.write_str("zrle"),
            Self::Raw => f.write_str("raw"),
        }
    }
}

impl FromStr for Encoding {
    type Err = RfbClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "tight" => Ok(Self::Tight),
            "zrle" => Ok(Self::Zrle),
            "raw" => Ok(Self::Raw),
            other => Err(RfbClientError::Config(format!(
                "unsupported encoding '{other}' (expected \"tight\", \"zrle\" or \"raw\")"
            ))),
        }
    }
}

/// Encoding and quality configuration.
///
/// Each level is either [`LEVEL_UNSET`] or a value in the documented range.
/// Out-of-range values are clamped with a warning when the SetEncodings list
/// is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Requested encoding.
    #[serde(default)]
    pub encoding: Encoding,
    /// JPEG quality level, 0-9.
    #[serde(default = "default_level")]
    pub quality: i32,
    /// zlib compression level, 0-9.
    #[serde(default = "default_level")]
    pub compress: i32,
    /// Fine-grained JPEG quality, 0-100.
    #[serde(default = "default_level")]
    pub fine_quality: i32,
    /// Chroma subsampling, 0 (full colour) to 3 (grayscale).
    #[serde(default = "default_level")]
    pub subsample: i32,
}

fn default_level() -> i32 {
    LEVEL_UNSET
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default(),
            quality: default_level(),
            compress: default_level(),
            fine_quality: default_level(),
            subsample: default_level(),
        }
    }
}

/// Update flow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatesConfig {
    /// Applied-but-unconsumed updates after which update requests pause.
    #[serde(default = "default_max_deferred")]
    pub max_deferred: usize,
    /// Largest rectangle count accepted in one FramebufferUpdate.
    #[serde(default = "default_max_rects")]
    pub max_rects: usize,
}

fn default_max_deferred() -> usize {
    60
}

fn default_max_rects() -> usize {
    1000
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            max_deferred: default_max_deferred(),
            max_rects: default_max_rects(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                host: String::new(),
                port: 5900,
                password: String::new(),
                timeout_ms: default_timeout_ms(),
                start_timeout_ms: 0,
            },
            display: DisplayConfig::default(),
            updates: UpdatesConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, RfbClientError> {
        let config: Self =
            toml::from_str(s).map_err(|e| RfbClientError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), RfbClientError> {
        if self.connection.host.is_empty() {
            return Err(RfbClientError::Config("Host cannot be empty".to_string()));
        }

        if self.connection.port == 0 {
            return Err(RfbClientError::Config("Port cannot be 0".to_string()));
        }

        if self.connection.timeout_ms == 0 {
            return Err(RfbClientError::Config("Timeout cannot be 0".to_string()));
        }

        if self.updates.max_deferred == 0 {
            return Err(RfbClientError::Config(
                "max_deferred must be at least 1".to_string(),
            ));
        }

        if self.updates.max_rects == 0 {
            return Err(RfbClientError::Config(
                "max_rects must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms)
    }

    /// Returns the overall connect retry budget.
    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.start_timeout_ms)
    }

    /// `host:port` for logging.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.connection.host, self.connection.port)
    }

    /// The SetEncodings list: the chosen encoding, DesktopSize, LastRect,
    /// then any quality pseudo-encodings that are set. `label` prefixes the
    /// clamp warnings.
    #[must_use]
    pub fn effective_encodings(&self, label: &str) -> Vec<i32> {
        let display = &self.display;
        let mut encodings = vec![
            display.encoding.code(),
            PSEUDO_ENCODING_DESKTOP_SIZE,
            PSEUDO_ENCODING_LAST_RECT,
        ];

        let levels = [
            ("quality", display.quality, 9, PSEUDO_ENCODING_QUALITY_LEVEL_0),
            ("compress", display.compress, 9, PSEUDO_ENCODING_COMPRESS_LEVEL_0),
            ("fine quality", display.fine_quality, 100, PSEUDO_ENCODING_FINE_QUALITY_LEVEL_0),
            ("subsample", display.subsample, 3, PSEUDO_ENCODING_SUBSAMPLE_LEVEL_0),
        ];
        for (what, level, max, base) in levels {
            if level == LEVEL_UNSET {
                continue;
            }
            let clamped = level.clamp(0, max);
            if clamped != level {
                tracing::warn!(
                    "[{}] {} level {} requested, but valid values are between 0 and {}. Using {} instead.",
                    label,
                    what,
                    level,
                    max,
                    clamped
                );
            }
            encodings.push(base + clamped);
        }

        encodings
    }
}

/// Builder for creating a `Config`.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Sets the server hostname or IP address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.connection.host = host.into();
        self
    }

    /// Sets the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.connection.port = port;
        self
    }

    /// Sets the VNC password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.connection.password = password.into();
        self
    }

    /// Sets the requested encoding.
    #[must_use]
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.config.display.encoding = encoding;
        self
    }

    /// Sets quality, compress, fine quality and subsample levels.
    #[must_use]
    pub fn levels(mut self, quality: i32, compress: i32, fine_quality: i32, subsample: i32) -> Self {
        self.config.display.quality = quality;
        self.config.display.compress = compress;
        self.config.display.fine_quality = fine_quality;
        self.config.display.subsample = subsample;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the connect retry budget.
    #[must_use]
    pub fn start_timeout(mut self, start_timeout: Duration) -> Self {
        self.config.connection.start_timeout_ms = start_timeout.as_millis() as u64;
        self
    }

    /// Replaces the update flow settings.
    #[must_use]
    pub fn updates(mut self, updates: UpdatesConfig) -> Self {
        self.config.updates = updates;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<Config, RfbClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .host("localhost")
            .port(5900)
            .build()
            .unwrap();

        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 5900);
        assert_eq!(config.address(), "localhost:5900");
        assert_eq!(config.display.encoding, Encoding::Tight);
    }

    #[test]
    fn test_config_validation_empty_host() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_port() {
        let mut config = Config::default();
        config.connection.host = "localhost".to_string();
        config.connection.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_limits() {
        let mut config = Config::default();
        config.connection.host = "localhost".to_string();
        config.updates.max_rects = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_encodings() {
        let config = Config::builder().host("h").build().unwrap();
        assert_eq!(
            config.effective_encodings("t"),
            vec![ENCODING_TIGHT, PSEUDO_ENCODING_DESKTOP_SIZE, PSEUDO_ENCODING_LAST_RECT]
        );
    }

    #[test]
    fn test_levels_are_clamped() {
        let config = Config::builder()
            .host("h")
            .encoding(Encoding::Raw)
            .levels(12, -5, 50, LEVEL_UNSET)
            .build()
            .unwrap();
        assert_eq!(
            config.effective_encodings("t"),
            vec![
                ENCODING_RAW,
                PSEUDO_ENCODING_DESKTOP_SIZE,
                PSEUDO_ENCODING_LAST_RECT,
                PSEUDO_ENCODING_QUALITY_LEVEL_0 + 9,
                PSEUDO_ENCODING_COMPRESS_LEVEL_0,
                PSEUDO_ENCODING_FINE_QUALITY_LEVEL_0 + 50,
            ]
        );
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("tight".parse::<Encoding>().unwrap(), Encoding::Tight);
        assert_eq!("".parse::<Encoding>().unwrap(), Encoding::Tight);
        assert_eq!("raw".parse::<Encoding>().unwrap(), Encoding::Raw);
        assert_eq!("zrle".parse::<Encoding>().unwrap(), Encoding::Zrle);
        assert_eq!(Encoding::Zrle.code(), 16);
        assert_eq!(Encoding::Zrle.to_string(), "zrle");
        let err = "hextile".parse::<Encoding>().unwrap_err();
        assert!(err.to_string().contains("hextile"));
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [connection]
            host = "10.0.0.5"
            port = 5901
            start_timeout_ms = 2000

            [display]
            encoding = "raw"
            subsample = 2

            [updates]
            max_rects = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.password, "");
        assert_eq!(config.display.encoding, Encoding::Raw);
        assert_eq!(config.display.subsample, 2);
        assert_eq!(config.display.quality, LEVEL_UNSET);
        assert_eq!(config.updates.max_rects, 50);
        assert_eq!(config.updates.max_deferred, 60);
        assert_eq!(config.start_timeout(), Duration::from_secs(2));
    }
}
