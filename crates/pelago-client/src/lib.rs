//! Pelago Client - HTTP client for the portal import trigger API.
//!
//! The portal importer runs on its own host; this crate talks to its
//! status and trigger endpoints and waits for removal manifests to be
//! consumed.

pub mod trigger;

pub use trigger::{ImportStatus, ImportTrigger, WaitMode, DEFAULT_WAIT};
