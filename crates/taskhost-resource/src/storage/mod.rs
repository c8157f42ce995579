//! Object-storage access for external configuration fragments.
//!
//! - [`arn`]: Resolves an S3 ARN into a bucket and key.
//! - [`client`]: Region- and bucket-scoped S3 client and its factory.
//! - [`fetch`]: Credential exchange and deadline-bounded download.

pub mod arn;
pub mod client;
pub mod fetch;
