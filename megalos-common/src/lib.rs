//! # Megalos Common
//!
//! Shared utilities for the Megalos binaries.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use megalos_common::{init_logging_with_format, LogFormat};
//!
//! init_logging_with_format("info", LogFormat::Pretty).unwrap();
//! ```

pub mod logging;

pub use logging::{
    init_logging,
    init_logging_json,
    init_logging_with_format,
    LogFormat,
};
