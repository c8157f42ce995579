//! # taskhost-resource
//!
//! Lifecycle engine for the auxiliary, non-container artifacts a task
//! depends on.
//!
//! Handles:
//! - **Tracker**: Concurrency-safe desired/known/applied status and the
//!   one-shot terminal reason.
//! - **Transition**: Per-instance table mapping a target status to the
//!   function that reaches it.
//! - **Resource**: The capability trait every resource type implements and
//!   the closed set of resource variants.
//! - **Fs**: Injected filesystem capability and the atomic config writer.
//! - **Credentials**: Lookup of short-lived task credentials.
//! - **Storage**: Object-storage addressing, the S3 client, and fetch.
//! - **Firelens**: The log-router configuration resource.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod credentials;
pub mod firelens;
pub mod fs;
pub mod resource;
pub mod storage;
pub mod tracker;
pub mod transition;
