//! Common types and utilities for SpotX
//!
//! This crate provides shared types, traits, and utilities used across
//! all SpotX crates.
//!
//! # Modules
//!
//! - [`error`] - Common error types
//! - [`types`] - Shared domain types (OrderId, UserId, Side, Pair, etc.)
//! - [`precision`] - Exact fixed-point arithmetic for prices and quantities

pub mod error;
pub mod precision;
pub mod types;

pub use error::{Error, Result};
pub use precision::{Amount, PrecisionError, PrecisionResult, Scale, MAX_DECIMALS};
pub use types::*;
