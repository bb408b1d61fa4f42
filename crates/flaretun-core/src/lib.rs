//! `flaretun` Core Library
//!
//! Shared functionality for the `flaretun` setup tool:
//! - Settings resolution and hierarchy
//! - Public tunnel URL matching
//! - Poll policies with an injectable clock
//! - Common error types

pub mod config;
pub mod endpoint;
pub mod error;
pub mod poll;
pub mod tracing_init;

pub use config::Settings;
pub use endpoint::EndpointPattern;
pub use error::{Error, Result};
pub use poll::{Clock, ManualClock, PollPolicy, SystemClock};
