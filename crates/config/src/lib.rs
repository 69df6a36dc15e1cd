//! Configuration module for the WebP optimizer
//!
//! Handles loading configuration from TOML files and the `PORT` environment override.

pub mod config;

pub use config::*;
