//! Builder pattern for bridge configuration.
//!
//! Provides a fluent API for locating the native host and creating a
//! [`NativeBridge`] connected to it.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use attester_bridge::NativeBridge;
//! use attester_bridge::bridge::CorrelationMode;
//!
//! # async fn example() -> attester_bridge::Result<()> {
//! let bridge = NativeBridge::builder()
//!     .manifest("./com.douzebis.attester.json")
//!     .origin("chrome-extension://knldjmfmopnpolahpmmgbagdohdnhkik/")
//!     .timeout(Duration::from_secs(10))
//!     .correlation(CorrelationMode::Sequential)
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::transport::{Browser, Channel, HostSource};

use super::core::NativeBridge;
use super::options::{BridgeOptions, CorrelationMode};

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`NativeBridge`] instance.
///
/// Use [`NativeBridge::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct BridgeBuilder {
    /// Where the host comes from; defaults to the attester host name.
    source: Option<HostSource>,
    /// Browsers whose manifest directories are searched for named hosts.
    browsers: Vec<Browser>,
    /// Caller origin passed to the host.
    origin: Option<String>,
    /// Bridge options.
    options: BridgeOptions,
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks the host up by name in the browsers' manifest directories.
    #[inline]
    #[must_use]
    pub fn host(mut self, name: impl Into<String>) -> Self {
        self.source = Some(HostSource::name(name));
        self
    }

    /// Uses an explicit host manifest file.
    #[inline]
    #[must_use]
    pub fn manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(HostSource::manifest(path));
        self
    }

    /// Runs the given executable directly, skipping manifest checks.
    #[inline]
    #[must_use]
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(HostSource::binary(path));
        self
    }

    /// Sets the host source directly.
    #[inline]
    #[must_use]
    pub fn source(mut self, source: HostSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Adds a browser to search for named hosts.
    ///
    /// When none is added, every supported browser is searched.
    #[inline]
    #[must_use]
    pub fn browser(mut self, browser: Browser) -> Self {
        if !self.browsers.contains(&browser) {
            self.browsers.push(browser);
        }
        self
    }

    /// Sets the caller origin, e.g. `chrome-extension://<id>/`.
    #[inline]
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Sets the reply correlation mode.
    #[inline]
    #[must_use]
    pub fn correlation(mut self, correlation: CorrelationMode) -> Self {
        self.options.correlation = correlation;
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.options.max_pending = max_pending;
        self
    }

    /// Replaces all bridge options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the configured options.
    #[inline]
    #[must_use]
    pub fn bridge_options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Launches the host and connects the bridge to it.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if options or origin are invalid
    /// - [`Error::InvalidHostName`] / [`Error::HostNotFound`] if the host
    ///   cannot be located
    /// - [`Error::ProcessLaunchFailed`] if it cannot be spawned
    pub async fn connect(self) -> Result<NativeBridge> {
        self.options.validate()?;
        let origin = self.validate_origin()?;
        let source = self.source.unwrap_or_default();
        let browsers = if self.browsers.is_empty() {
            Browser::ALL.to_vec()
        } else {
            self.browsers
        };

        let channel = Channel::open(&source, &browsers, origin.as_deref())?;
        info!(?source, correlation = ?self.options.correlation, "Bridge connected");

        Ok(NativeBridge::from_channel(channel, self.options))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeBuilder {
    /// Validates the origin configuration.
    fn validate_origin(&self) -> Result<Option<String>> {
        let Some(origin) = self.origin.clone() else {
            return Ok(None);
        };

        if origin.trim().is_empty() {
            return Err(Error::config(
                "Origin must not be empty. Use .origin() with an extension origin.\n\
                 Example: NativeBridge::builder().origin(\"chrome-extension://<id>/\")",
            ));
        }

        Ok(Some(origin))
    }
}

// ============================================================================
// Tests
// ============================================================================
