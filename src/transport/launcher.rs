//! Native host resolution and process launch.
//!
//! A host can be named (looked up through browser manifests), given as an
//! explicit manifest file, or given as a bare executable.
//!
//! # Example
//!
//! ```
//! use attester_bridge::transport::HostSource;
//!
//! // Looked up in the browsers' native-messaging-hosts directories
//! let named = HostSource::name("com.douzebis.attester");
//!
//! // Explicit manifest file
//! let manifest = HostSource::manifest("./com.douzebis.attester.json");
//!
//! // Bare executable, no manifest checks
//! let binary = HostSource::binary("./target/debug/attest");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::manifest::{Browser, DEFAULT_HOST_NAME, HostManifest};

// ============================================================================
// HostSource
// ============================================================================

/// Where to find the native host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostSource {
    /// Host name, resolved through browser manifest directories.
    Name(String),

    /// Path to a host manifest (`<name>.json`).
    Manifest(PathBuf),

    /// Path to the host executable.
    Binary(PathBuf),
}

impl Default for HostSource {
    fn default() -> Self {
        Self::Name(DEFAULT_HOST_NAME.to_string())
    }
}

impl From<PathBuf> for HostSource {
    /// Auto-detects manifest vs executable based on the `.json` extension.
    fn from(path: PathBuf) -> Self {
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::Manifest(path)
        } else {
            Self::Binary(path)
        }
    }
}

impl HostSource {
    /// Creates a named host source.
    #[inline]
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Creates a manifest host source.
    #[inline]
    #[must_use]
    pub fn manifest(path: impl Into<PathBuf>) -> Self {
        Self::Manifest(path.into())
    }

    /// Creates an executable host source.
    #[inline]
    #[must_use]
    pub fn binary(path: impl Into<PathBuf>) -> Self {
        Self::Binary(path.into())
    }

    /// Resolves the source into an executable and optional manifest.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHostName`] / [`Error::HostNotFound`] for named hosts
    /// - Manifest load errors for manifest sources
    pub fn resolve(&self, browsers: &[Browser]) -> Result<ResolvedHost> {
        let manifest = match self {
            Self::Name(name) => Some(HostManifest::locate(name, browsers)?),
            Self::Manifest(path) => Some(HostManifest::load(path)?),
            Self::Binary(_) => None,
        };

        let program = match (&manifest, self) {
            (Some(manifest), _) => manifest.path.clone(),
            (None, Self::Binary(path)) => path.clone(),
            (None, _) => return Err(Error::config("Host source resolved without a program")),
        };

        Ok(ResolvedHost { program, manifest })
    }
}

// ============================================================================
// ResolvedHost
// ============================================================================

/// A host ready to be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    /// Executable to run.
    pub program: PathBuf,

    /// Manifest the executable came from, if any.
    pub manifest: Option<HostManifest>,
}

impl ResolvedHost {
    /// Spawns the host with piped stdin/stdout.
    ///
    /// The caller origin, when given, is passed as the first argument the
    /// way browsers do. A manifest that does not list the origin refuses
    /// the launch.
    ///
    /// # Errors
    ///
    /// - [`Error::HostNotFound`] if the executable does not exist
    /// - [`Error::Config`] if the manifest does not allow `origin`
    /// - [`Error::ProcessLaunchFailed`] if the process fails to start
    pub(crate) fn spawn(&self, origin: Option<&str>) -> Result<Child> {
        if !self.program.exists() {
            return Err(Error::host_not_found(self.program.display().to_string()));
        }

        if let (Some(origin), Some(manifest)) = (origin, &self.manifest)
            && !manifest.allows_origin(origin)
        {
            return Err(Error::config(format!(
                "Origin {origin} is not allowed by host manifest `{}`",
                manifest.name
            )));
        }

        let mut cmd = Command::new(&self.program);

        if let Some(origin) = origin {
            cmd.arg(origin);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::process_launch_failed(&self.program, &e))?;

        info!(
            pid = child.id(),
            program = %self.program.display(),
            "Native host spawned"
        );

        Ok(child)
    }
}

// ============================================================================
// ProcessGuard
// ============================================================================

/// Guards the host process and ensures it is killed when dropped.
pub(crate) struct ProcessGuard {
    /// The child process handle.
    child: Option<Child>,
    /// Process ID for logging.
    pid: u32,
}

impl ProcessGuard {
    /// Creates a new process guard.
    pub(crate) fn new(child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        debug!(pid, "Process guard created");
        Self {
            child: Some(child),
            pid,
        }
    }

    /// Gives the host `grace` to exit on its own, then kills it.
    pub(crate) async fn stop(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = self.pid, %status, "Native host exited");
                return;
            }
            Ok(Err(e)) => debug!(pid = self.pid, error = %e, "Failed to wait for native host"),
            Err(_) => debug!(pid = self.pid, "Native host did not exit in time"),
        }

        if let Err(e) = child.kill().await {
            debug!(pid = self.pid, error = %e, "Failed to kill native host");
        }
        info!(pid = self.pid, "Native host terminated");
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
