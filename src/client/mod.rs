//! Page query client.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`QueryClient`] | Parses user input, submits it, logs the rendered response |
//! | [`RenderedResponse`] | Labelled fields, verdict indicator and raw JSON |
//! | [`DisplayLog`] | Rendered responses in submission order |

// ============================================================================
// Submodules
// ============================================================================

/// Query submission.
pub mod core;

/// Response rendering.
pub mod render;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{QueryClient, parse_query};
pub use render::{DisplayLog, RenderedResponse, Status};
