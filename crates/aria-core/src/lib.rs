//! # aria-core
//!
//! Core types and error handling for the aria audio playback library.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
