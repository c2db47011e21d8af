//! Attester Bridge - Native-messaging bridge to a TPM attestation host.
//!
//! This library forwards JSON queries typed on a page to a native host
//! process over the browser native-messaging wire format, and relays the
//! host's JSON replies back.
//!
//! # Architecture
//!
//! The bridge plays the extension side of native messaging:
//!
//! - **Page side**: [`QueryClient`] parses user input and renders replies
//! - **Bridge**: [`NativeBridge`] correlates requests with replies
//! - **Transport**: [`Channel`] frames JSON over the host's stdin/stdout
//! - **Host side**: [`NativeHost`] serves queries through a [`QueryHandler`]
//!
//! Key design principles:
//!
//! - The bridge owns its channel; there is no process-wide port
//! - A disconnect fails every pending request with [`Error::NoConnection`]
//! - Replies are matched FIFO, or by echoed `request-id` when the host supports it
//!
//! # Quick Start
//!
//! ```no_run
//! use attester_bridge::{NativeBridge, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = NativeBridge::builder()
//!         .host("com.douzebis.attester")
//!         .connect()
//!         .await?;
//!
//!     let ak_pub = bridge.get_ak_pub().await?;
//!     println!("AK: {ak_pub}");
//!
//!     bridge.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Request/response bridge and its configuration |
//! | [`client`] | Page query client and rendering |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | Native host serve loop |
//! | [`identifiers`] | Correlation IDs |
//! | [`protocol`] | Queries, replies and wire framing |
//! | [`transport`] | Host discovery, launch and stdio channel |

// ============================================================================
// Modules
// ============================================================================

/// Native bridge.
///
/// Use [`NativeBridge::builder()`] to create a connected bridge.
pub mod bridge;

/// Page query client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Native host side.
pub mod host;

/// Type-safe identifiers.
pub mod identifiers;

/// Native-messaging protocol message types.
pub mod protocol;

/// Native-messaging transport layer.
///
/// Host manifests, process launch and the stdio channel.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{BridgeBuilder, BridgeOptions, CorrelationMode, NativeBridge, Requester};

// Client types
pub use client::{DisplayLog, QueryClient, RenderedResponse, Status};

// Error types
pub use error::{Error, Result};

// Host types
pub use host::{NativeHost, QueryHandler};

// Identifier types
pub use identifiers::RequestId;

// Protocol types
pub use protocol::{Query, QueryKind, Quote, Reply, Verdict, VerifyRequest};

// Transport types
pub use transport::{Browser, Channel, ChannelState, HostSource};
