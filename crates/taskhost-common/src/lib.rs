//! # taskhost-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the taskhost workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the status model and error taxonomy that the
//! resource and network crates build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod status;
pub mod types;
