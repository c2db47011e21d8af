//! Native-messaging host manifests.
//!
//! Browsers locate a native host by name: `<name>.json` in a per-browser
//! directory holds the executable path and the origins allowed to talk
//! to it.
//!
//! # Manifest Format
//!
//! ```json
//! {
//!   "name": "com.douzebis.attester",
//!   "description": "TPM attester",
//!   "path": "/opt/attester/attest",
//!   "type": "stdio",
//!   "allowed_origins": ["chrome-extension://abcdef/"]
//! }
//! ```
//!
//! Firefox manifests use `allowed_extensions` instead of `allowed_origins`.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Name of the TPM attestation host.
pub const DEFAULT_HOST_NAME: &str = "com.douzebis.attester";

/// Only transport type browsers support.
const STDIO_TYPE: &str = "stdio";

/// Lowercase alphanumerics and `_`, dot-separated, no empty segments.
static HOST_NAME_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_]+(\.[a-z0-9_]+)*$").expect("host name rule is a valid regex")
});

// ============================================================================
// Host Name
// ============================================================================

/// Checks a host name against the browser naming rule.
///
/// # Errors
///
/// Returns [`Error::InvalidHostName`] if the name is rejected.
pub fn validate_host_name(name: &str) -> Result<()> {
    if HOST_NAME_RULE.is_match(name) {
        Ok(())
    } else {
        Err(Error::invalid_host_name(name))
    }
}

// ============================================================================
// Browser
// ============================================================================

/// Browser whose manifest directories are searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Browser {
    /// Google Chrome.
    Chrome,
    /// Chromium.
    Chromium,
    /// Mozilla Firefox.
    Firefox,
}

impl Browser {
    /// All supported browsers, in search order.
    pub const ALL: [Self; 3] = [Self::Chrome, Self::Chromium, Self::Firefox];

    /// Returns the manifest directories for this browser.
    ///
    /// Per-user directories come first, then system-wide ones.
    #[must_use]
    pub fn manifest_dirs(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(self.user_dir()));
        }
        paths.extend(self.system_dirs().iter().map(PathBuf::from));

        paths
    }

    #[cfg(target_os = "macos")]
    fn user_dir(&self) -> &'static str {
        match self {
            Self::Chrome => "Library/Application Support/Google/Chrome/NativeMessagingHosts",
            Self::Chromium => "Library/Application Support/Chromium/NativeMessagingHosts",
            Self::Firefox => "Library/Application Support/Mozilla/NativeMessagingHosts",
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn user_dir(&self) -> &'static str {
        match self {
            Self::Chrome => ".config/google-chrome/NativeMessagingHosts",
            Self::Chromium => ".config/chromium/NativeMessagingHosts",
            Self::Firefox => ".mozilla/native-messaging-hosts",
        }
    }

    #[cfg(target_os = "macos")]
    fn system_dirs(&self) -> &'static [&'static str] {
        match self {
            Self::Chrome => &["/Library/Google/Chrome/NativeMessagingHosts"],
            Self::Chromium => &["/Library/Application Support/Chromium/NativeMessagingHosts"],
            Self::Firefox => &["/Library/Application Support/Mozilla/NativeMessagingHosts"],
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn system_dirs(&self) -> &'static [&'static str] {
        match self {
            Self::Chrome => &["/etc/opt/chrome/native-messaging-hosts"],
            Self::Chromium => &["/etc/chromium/native-messaging-hosts"],
            Self::Firefox => &[
                "/usr/lib/mozilla/native-messaging-hosts",
                "/usr/lib64/mozilla/native-messaging-hosts",
            ],
        }
    }
}

// ============================================================================
// HostManifest
// ============================================================================

/// A parsed native-messaging host manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostManifest {
    /// Host name, must match the manifest file stem.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Host executable. Absolute after [`HostManifest::load`].
    pub path: PathBuf,

    /// Transport type, always `stdio`.
    #[serde(rename = "type")]
    pub host_type: String,

    /// Chromium extension origins allowed to connect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,

    /// Firefox extension IDs allowed to connect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_extensions: Vec<String>,
}

impl HostManifest {
    /// Loads and validates a manifest file.
    ///
    /// A relative `path` is resolved against the manifest's directory.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Config`] if it is not a valid `stdio` manifest
    /// - [`Error::InvalidHostName`] if the declared name is invalid
    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Self> {
        let manifest_path = manifest_path.as_ref();
        let text = fs::read_to_string(manifest_path)?;

        let mut manifest: Self = serde_json::from_str(&text).map_err(|e| {
            Error::config(format!(
                "Invalid host manifest {}: {e}",
                manifest_path.display()
            ))
        })?;

        validate_host_name(&manifest.name)?;

        if manifest.host_type != STDIO_TYPE {
            return Err(Error::config(format!(
                "Host manifest {} has type `{}`, expected `{STDIO_TYPE}`",
                manifest_path.display(),
                manifest.host_type
            )));
        }

        if manifest.path.is_relative()
            && let Some(dir) = manifest_path.parent()
        {
            manifest.path = dir.join(&manifest.path);
        }

        debug!(
            name = %manifest.name,
            path = %manifest.path.display(),
            "Loaded host manifest"
        );

        Ok(manifest)
    }

    /// Finds the manifest for `name` in the given browsers' directories.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHostName`] if `name` is invalid
    /// - [`Error::HostNotFound`] if no directory holds `<name>.json`
    /// - Errors from [`HostManifest::load`]
    pub fn locate(name: &str, browsers: &[Browser]) -> Result<Self> {
        let dirs: Vec<PathBuf> = browsers.iter().flat_map(Browser::manifest_dirs).collect();
        Self::locate_in(name, &dirs)
    }

    /// Finds the manifest for `name` in explicit directories.
    ///
    /// # Errors
    ///
    /// Same as [`HostManifest::locate`], plus [`Error::Config`] if the
    /// manifest declares a different name.
    pub fn locate_in(name: &str, dirs: &[PathBuf]) -> Result<Self> {
        validate_host_name(name)?;

        let file_name = format!("{name}.json");
        let found = dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| Error::host_not_found(name))?;

        let manifest = Self::load(&found)?;
        if manifest.name != name {
            return Err(Error::config(format!(
                "Host manifest {} declares name `{}`, expected `{name}`",
                found.display(),
                manifest.name
            )));
        }

        Ok(manifest)
    }

    /// Returns `true` if `origin` may connect to this host.
    ///
    /// Matches both Chromium origins and Firefox extension IDs.
    #[must_use]
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .chain(&self.allowed_extensions)
            .any(|allowed| allowed == origin)
    }
}

// ============================================================================
// Tests
// ============================================================================
