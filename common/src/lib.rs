#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, future_incompatible)]
//! Shared types and utilities for the security-engine workspace
//!
//! This crate provides the security event model, error taxonomy, and
//! centralized constants used by the engine and by collaborating services.

pub mod constants;
pub mod errors;
pub mod types;

pub use errors::*;
pub use types::*;
