//! # taskhost-netns
//!
//! Sets up and tears down a container's network namespace by running
//! CNI-style plugin executables.
//!
//! Handles:
//! - **Config**: The ordered list of networks to attach to a namespace.
//! - **Exec**: Plugin invocation transport, injectable for tests.
//! - **Result**: The ADD result and plugin error objects.
//! - **Version**: Plugin version and capability probing output.
//! - **Client**: The deadline-bounded namespace manager.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod config;
pub mod exec;
pub mod result;
pub mod version;

pub use client::{CniClient, NetworkNamespaceManager};
pub use config::{NetworkConfig, NetworkEntry, PluginConfig};
pub use result::AddResult;
