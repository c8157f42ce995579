//! Region- and bucket-scoped object storage clients.

use std::fmt::Display;
use std::io::Write;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use taskhost_common::config::AgentConfig;
use taskhost_common::error::{Result, TaskhostError};
use tokio::runtime::Runtime;

use crate::credentials::RoleCredentials;

const CREDENTIALS_PROVIDER: &str = "task-execution-role";

/// Downloads objects from one bucket.
pub trait ObjectStoreClient: Send + Sync {
    /// Streams `key` from `bucket` into `sink`, giving up after `timeout`.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::Download`] if the request fails, the object
    /// store answers with a non-success status, or `timeout` elapses.
    fn download(
        &self,
        bucket: &str,
        key: &str,
        timeout: Duration,
        sink: &mut dyn Write,
    ) -> Result<u64>;
}

/// Builds clients scoped to a bucket, region, and set of credentials.
pub trait ObjectStoreClientFactory: Send + Sync {
    /// Creates a client for `bucket` in `region`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskhostError::Download`] if the client cannot be constructed.
    fn client_for_bucket(
        &self,
        bucket: &str,
        region: &str,
        credentials: &RoleCredentials,
    ) -> Result<Box<dyn ObjectStoreClient>>;
}

/// Factory for [`S3Client`]s.
#[derive(Debug, Clone, Default)]
pub struct S3ClientFactory {
    endpoint: Option<String>,
}

impl S3ClientFactory {
    /// Creates a factory targeting the regional AWS endpoints.
    #[must_use]
    pub const fn new() -> Self {
        Self { endpoint: None }
    }

    /// Creates a factory targeting a fixed endpoint, e.g. an S3-compatible
    /// store. Requests against it use path-style addressing.
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
        }
    }

    /// Creates a factory honoring the endpoint override of `config`.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            endpoint: config.s3_endpoint.clone(),
        }
    }
}

impl ObjectStoreClientFactory for S3ClientFactory {
    fn client_for_bucket(
        &self,
        bucket: &str,
        region: &str,
        credentials: &RoleCredentials,
    ) -> Result<Box<dyn ObjectStoreClient>> {
        if region.is_empty() {
            return Err(TaskhostError::Download {
                message: format!("no region configured for bucket {bucket}"),
            });
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TaskhostError::Download {
                message: format!("unable to start s3 client runtime: {e}"),
            })?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                &credentials.access_key_id,
                &credentials.secret_access_key,
                credentials.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER,
            ));
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = runtime.block_on(loader.load());
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.endpoint.is_some())
            .build();

        tracing::debug!(bucket, region, endpoint = ?self.endpoint, "created s3 client");
        Ok(Box::new(S3Client {
            client: Client::from_conf(config),
            runtime,
        }))
    }
}

/// S3 client driving the SDK on its own single-threaded runtime.
///
/// Call it from a thread that is not driving an async runtime.
#[derive(Debug)]
pub struct S3Client {
    client: Client,
    runtime: Runtime,
}

impl ObjectStoreClient for S3Client {
    fn download(
        &self,
        bucket: &str,
        key: &str,
        timeout: Duration,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        let transfer = async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| download_error(bucket, key, DisplayErrorContext(e)))?;
            let mut body = output.body;
            let mut written = 0u64;
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| download_error(bucket, key, e))?
            {
                sink.write_all(&chunk)
                    .map_err(|e| download_error(bucket, key, e))?;
                written += chunk.len() as u64;
            }
            Ok::<_, TaskhostError>(written)
        };

        let written = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, transfer).await })
            .map_err(|_| TaskhostError::Download {
                message: format!("timed out after {timeout:?} fetching s3://{bucket}/{key}"),
            })??;
        tracing::debug!(bucket, key, bytes = written, "downloaded object");
        Ok(written)
    }
}

fn download_error(bucket: &str, key: &str, e: impl Display) -> TaskhostError {
    TaskhostError::Download {
        message: format!("fetching s3://{bucket}/{key}: {e}"),
    }
}
