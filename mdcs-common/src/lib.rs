//! # MDCS Common Library
//!
//! Shared code for the MDCS data-collection services:
//! - Common error type
//! - Root folder and port resolution
//! - Configuration file loading

pub mod config;
pub mod error;

pub use error::{Error, Result};
