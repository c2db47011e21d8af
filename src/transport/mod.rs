//! Native-messaging transport layer.
//!
//! This module locates the native host, launches it and exchanges
//! length-prefixed JSON frames over its stdio.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  NativeBridge   │          stdin               │  Native host    │
//! │                 │─────────────────────────────►│  (attester)     │
//! │  Channel        │          stdout              │                 │
//! │  reader/writer  │◄─────────────────────────────│  NativeHost     │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `HostSource::resolve` - Find the manifest and executable
//! 2. `Channel::open` - Spawn the host with piped stdio
//! 3. `Channel::send` / message handler - Exchange frames
//! 4. Disconnect handler - Fires once when either side goes away
//! 5. `Channel::shutdown` - Close stdin, then stop the process
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Reader/writer tasks and lifecycle state |
//! | `launcher` | Host source resolution and process spawn |
//! | `manifest` | Host manifests and lookup directories |

// ============================================================================
// Submodules
// ============================================================================

/// Stdio channel and its tasks.
pub mod channel;

/// Host resolution and launch.
pub mod launcher;

/// Native-messaging host manifests.
pub mod manifest;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, ChannelState, DisconnectHandler, MalformedHandler, MessageHandler};
pub use launcher::{HostSource, ResolvedHost};
pub use manifest::{Browser, DEFAULT_HOST_NAME, HostManifest, validate_host_name};
