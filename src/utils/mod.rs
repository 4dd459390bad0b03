//! Utility Functions and Diagnostics
//!
//! Session diagnostics and user-friendly error formatting.
//!
//! ## Diagnostics
//!
//! The [`diagnostics`] module describes the session the screen runs in:
//!
//! ```rust
//! use lamco_x11_screen::utils::SessionInfo;
//!
//! let session = SessionInfo::gather();
//! session.log(); // Logs: DISPLAY, session type, desktop
//! ```
//!
//! ## Error Formatting
//!
//! The [`errors`] module turns failures into messages with troubleshooting
//! steps:
//!
//! ```rust
//! use lamco_x11_screen::utils::format_user_error;
//!
//! let error = anyhow::anyhow!("cannot open display \":1\"");
//! eprintln!("{}", format_user_error(&error));
//! ```
//!
//! Error categories with context-aware help:
//! - Display errors → `DISPLAY`, Xauthority, server running
//! - Connection errors → server restarts, lost sessions
//! - Config errors → syntax, field values

pub mod diagnostics;
pub mod errors;

pub use diagnostics::{log_startup_diagnostics, SessionInfo};
pub use errors::format_user_error;
