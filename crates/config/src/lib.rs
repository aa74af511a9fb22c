//! Configuration module for vidbatch
//!
//! Handles loading run configuration from TOML files and validating it at startup.

pub mod config;

pub use config::*;
