//! Pelago CLI - Command-line interface for the archive publisher
//!
//! This crate provides the CLI application that ties together the core
//! publishing flow and the portal trigger client.

pub mod config;

pub use config::{Command, Config};
